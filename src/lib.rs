//! Shared infrastructure for the Food Diary backend.
//!
//! Three leaf components live here, consumed by every domain service:
//!
//! - [`infra::cache::KeyValueCache`]: a Redis-backed document cache with
//!   explicit lifecycle and TTL-bounded entries.
//! - [`infra::object_store::ObjectStore`]: durable binary storage behind a
//!   narrow trait; the S3-compatible backend switches to a multipart protocol
//!   for large payloads, and a second ingestion path fetches from remote URLs.
//! - [`domain::slug`]: URL-safe, collision-resistant slug allocation over a
//!   persistence namespace.
//!
//! The `application` module hoists the call patterns the services repeat on
//! top of those leaves: cache-aside reads, media attach/replace/detach, and
//! typed cache keys.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
