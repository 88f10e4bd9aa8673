//! Infrastructure adapters: Redis cache, object storage, Postgres namespace,
//! and runtime bootstrap.

pub mod cache;
pub mod db;
pub mod error;
pub mod object_store;
pub mod telemetry;
