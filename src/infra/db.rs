//! Postgres adapters for the slug namespace.

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::slug::SlugNamespace;

/// Postgres `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum NamespaceConfigError {
    #[error("`{identifier}` is not a valid SQL identifier")]
    InvalidIdentifier { identifier: String },
}

/// A slug namespace backed by one table/column pair.
///
/// The sibling query relies on Postgres regex matching (`~`), mirroring how
/// live slugs are enumerated in a single read. Identifiers are validated at
/// construction because they are interpolated into the statement text.
pub struct PgSlugNamespace {
    pool: PgPool,
    table: String,
    slug_column: String,
    id_column: String,
}

impl PgSlugNamespace {
    pub fn new(
        pool: PgPool,
        table: impl Into<String>,
        slug_column: impl Into<String>,
        id_column: impl Into<String>,
    ) -> Result<Self, NamespaceConfigError> {
        let table = into_identifier(table)?;
        let slug_column = into_identifier(slug_column)?;
        let id_column = into_identifier(id_column)?;
        Ok(Self {
            pool,
            table,
            slug_column,
            id_column,
        })
    }
}

#[async_trait]
impl SlugNamespace for PgSlugNamespace {
    type Error = sqlx::Error;

    async fn sibling_slugs(
        &self,
        base: &str,
        exclude_id: Option<Uuid>,
    ) -> Result<Vec<String>, Self::Error> {
        let pattern = format!("^{}(-([0-9]+))?$", escape_regex(base));

        match exclude_id {
            Some(id) => {
                let sql = format!(
                    "SELECT {slug} FROM {table} WHERE {slug} ~ $1 AND {id} <> $2",
                    slug = self.slug_column,
                    table = self.table,
                    id = self.id_column,
                );
                sqlx::query_scalar(&sql)
                    .bind(&pattern)
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {slug} FROM {table} WHERE {slug} ~ $1",
                    slug = self.slug_column,
                    table = self.table,
                );
                sqlx::query_scalar(&sql)
                    .bind(&pattern)
                    .fetch_all(&self.pool)
                    .await
            }
        }
    }
}

/// Whether a persistence error is the uniqueness-constraint violation that
/// signals a lost slug race. Allocation is read-then-decide, so two
/// concurrent writers can propose the same slug; the caller catches this on
/// insert and retries allocation once.
#[must_use]
pub fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => {
            db_error.code().as_deref() == Some(UNIQUE_VIOLATION)
        }
        _ => false,
    }
}

fn into_identifier(value: impl Into<String>) -> Result<String, NamespaceConfigError> {
    let identifier = value.into();
    let mut bytes = identifier.bytes();
    let head_ok = bytes
        .next()
        .is_some_and(|byte| byte.is_ascii_lowercase() || byte == b'_');
    let tail_ok = bytes.all(|byte| byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'_');
    if head_ok && tail_ok {
        Ok(identifier)
    } else {
        Err(NamespaceConfigError::InvalidIdentifier { identifier })
    }
}

/// Escape regex metacharacters in a slug base. Slugified input is already
/// `[a-z0-9-]`; caller-supplied bases are not guaranteed to be.
fn escape_regex(base: &str) -> String {
    let mut escaped = String::with_capacity(base.len());
    for ch in base.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            escaped.push(ch);
        } else {
            escaped.push('\\');
            escaped.push(ch);
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_validated() {
        assert!(into_identifier("products").is_ok());
        assert!(into_identifier("user_weights").is_ok());
        assert!(into_identifier("products; DROP TABLE users").is_err());
        assert!(into_identifier("1col").is_err());
        assert!(into_identifier("").is_err());
    }

    #[test]
    fn regex_escaping_leaves_slugs_untouched() {
        assert_eq!(escape_regex("oat-milk"), "oat-milk");
        assert_eq!(escape_regex("a.b"), "a\\.b");
    }
}
