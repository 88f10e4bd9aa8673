//! Cache key formats shared by the domain services.
//!
//! Keys follow the `<aggregate>:<owner>[:<qualifier>]` shape; invalidation
//! must use the exact same constructors as population or stale entries
//! survive until their TTL.

use time::Date;
use uuid::Uuid;

/// A user profile by login.
#[must_use]
pub fn user(login: &str) -> String {
    format!("user:{login}")
}

/// Every product visible to a user.
#[must_use]
pub fn user_products(user_id: Uuid) -> String {
    format!("user_products:{user_id}")
}

/// Only the products a user created.
#[must_use]
pub fn personal_products(user_id: Uuid) -> String {
    format!("personal_products:{user_id}")
}

/// One product in a user's view.
#[must_use]
pub fn product(user_id: Uuid, product_id: Uuid) -> String {
    format!("product:{user_id}:{product_id}")
}

/// A product search result page. The query is lowercased so differently-cased
/// searches share an entry.
#[must_use]
pub fn product_search(user_id: Uuid, query: &str) -> String {
    format!("product_search:{user_id}:{}", query.to_lowercase())
}

/// A user's full meal history.
#[must_use]
pub fn user_meals(user_id: Uuid) -> String {
    format!("user_meals:{user_id}")
}

/// A user's meals on one day.
#[must_use]
pub fn user_meals_on(user_id: Uuid, date: Date) -> String {
    format!("user_meals:{user_id}:{date}")
}

/// One meal in a user's view.
#[must_use]
pub fn user_meal(user_id: Uuid, meal_id: Uuid) -> String {
    format!("user_meal:{user_id}:{meal_id}")
}

/// The aggregated meal history view for a user.
#[must_use]
pub fn user_meals_history(user_id: Uuid) -> String {
    format!("user_meals_history:{user_id}")
}

/// A user's meals with their products attached, on one day.
#[must_use]
pub fn user_meals_products(user_id: Uuid, date: Date) -> String {
    format!("user_meals_products:{user_id}:{date}")
}
