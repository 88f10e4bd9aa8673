//! Durable binary storage behind a narrow interface.
//!
//! Objects are immutable once written; replacement is write-new + delete-old
//! at the call site. The store keeps no backreferences, so the owning entity
//! must pair every image-field deletion with [`ObjectStore::delete`] on the
//! corresponding key or the object leaks.

pub mod memory;
pub mod s3;

pub use memory::MemoryObjectStore;
pub use s3::{CompletedPartSpec, S3Api, S3ApiError, S3ObjectStore, build_s3_client};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::media::{UploadPayload, UploadValidationError};

/// Errors surfaced by object storage operations.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error(transparent)]
    Validation(#[from] UploadValidationError),
    #[error("failed to fetch `{url}`: {reason}")]
    Fetch { url: String, reason: String },
    #[error("remote host returned status {status} for `{url}`")]
    FetchStatus { url: String, status: u16 },
    #[error(transparent)]
    Backend(#[from] S3ApiError),
}

/// Storage capability consumed by the domain services.
///
/// The S3-compatible backend is one implementation; `MemoryObjectStore`
/// serves tests and local development without touching callers.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Persist an uploaded payload and return its durable key.
    ///
    /// `key_hint` replaces the generated identifier when given; the extension
    /// is still derived by the store.
    async fn put(
        &self,
        upload: &UploadPayload,
        key_hint: Option<&str>,
    ) -> Result<String, ObjectStoreError>;

    /// Fetch a remote resource and persist it under a derived key.
    ///
    /// A non-2xx response or timeout is a hard failure; partial downloads are
    /// never persisted.
    async fn put_from_url(
        &self,
        url: &str,
        content_type: &str,
        key_hint: Option<&str>,
    ) -> Result<String, ObjectStoreError>;

    /// Public URL for a stored key. Pure string construction; performs no I/O.
    fn url_for(&self, key: &str) -> String;

    /// Metadata-only probe. `Ok(false)` when the key does not exist; any
    /// other backend error propagates.
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;

    /// Idempotent removal; deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
}

/// Derive a storage key: a time-ordered unique identifier plus the payload's
/// extension. Filenames are never trusted beyond their extension.
pub(crate) fn derive_key(key_hint: Option<&str>, extension: Option<&str>) -> String {
    let stem = match key_hint {
        Some(hint) => hint.to_string(),
        None => Uuid::now_v7().to_string(),
    };
    match extension {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}

/// Guess a file extension for a declared content type.
pub(crate) fn extension_for_mime(content_type: &str) -> Option<&'static str> {
    mime_guess::get_mime_extensions_str(content_type)
        .and_then(|extensions| extensions.last())
        .copied()
}

pub(crate) fn public_url(access_domain: &str, key: &str) -> String {
    format!("{}/{key}", access_domain.trim_end_matches('/'))
}
