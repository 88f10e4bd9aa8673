//! In-memory object store double for tests and local development.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::domain::media::{UploadLimits, UploadPayload};

use super::{ObjectStore, ObjectStoreError, derive_key, extension_for_mime, public_url};

/// An object held by the memory store.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub etag: String,
}

/// Object store keeping everything in process memory.
///
/// Remote-URL ingestion is simulated: tests seed URL content up front with
/// [`MemoryObjectStore::seed_remote`], and unseeded URLs fail the same way an
/// unreachable host would.
#[derive(Default)]
pub struct MemoryObjectStore {
    access_domain: String,
    limits: UploadLimits,
    objects: RwLock<HashMap<String, StoredObject>>,
    remote: RwLock<HashMap<String, (String, Bytes)>>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new(access_domain: impl Into<String>) -> Self {
        Self {
            access_domain: access_domain.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Register the body a future `put_from_url` call will "download".
    pub fn seed_remote(
        &self,
        url: impl Into<String>,
        content_type: impl Into<String>,
        body: impl Into<Bytes>,
    ) {
        self.remote
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), (content_type.into(), body.into()));
    }

    /// Look up a stored object by key.
    #[must_use]
    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, key: &str, content_type: Option<String>, bytes: Bytes) {
        let etag = hex::encode(Sha256::digest(&bytes));
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                StoredObject {
                    bytes,
                    content_type,
                    etag,
                },
            );
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        upload: &UploadPayload,
        key_hint: Option<&str>,
    ) -> Result<String, ObjectStoreError> {
        self.limits.check(upload)?;

        let extension = upload.extension();
        let key = derive_key(key_hint, extension.as_deref());
        self.insert(&key, upload.content_type.clone(), upload.bytes.clone());
        Ok(key)
    }

    async fn put_from_url(
        &self,
        url: &str,
        content_type: &str,
        key_hint: Option<&str>,
    ) -> Result<String, ObjectStoreError> {
        let seeded = self
            .remote
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned();
        let Some((seeded_type, body)) = seeded else {
            return Err(ObjectStoreError::Fetch {
                url: url.to_string(),
                reason: "no seeded content for URL".to_string(),
            });
        };

        let key = derive_key(key_hint, extension_for_mime(content_type));
        self.insert(&key, Some(seeded_type), body);
        Ok(key)
    }

    fn url_for(&self, key: &str) -> String {
        public_url(&self.access_domain, key)
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        Ok(self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(bytes: &'static [u8]) -> UploadPayload {
        UploadPayload::new(
            "cover.webp",
            Some("image/webp".to_string()),
            Bytes::from_static(bytes),
        )
    }

    #[tokio::test]
    async fn put_then_exists_then_delete() {
        let store = MemoryObjectStore::new("https://media.example.com");

        let key = store.put(&upload(b"payload"), None).await.expect("put");
        assert!(key.ends_with(".webp"));
        assert!(store.exists(&key).await.expect("exists"));

        store.delete(&key).await.expect("delete");
        assert!(!store.exists(&key).await.expect("exists"));
        // Idempotent: deleting again is still fine.
        store.delete(&key).await.expect("delete twice");
    }

    #[tokio::test]
    async fn seeded_urls_are_ingested_and_unseeded_urls_fail() {
        let store = MemoryObjectStore::new("https://media.example.com");
        store.seed_remote("https://cdn.example.com/p.png", "image/png", &b"body"[..]);

        let key = store
            .put_from_url("https://cdn.example.com/p.png", "image/png", None)
            .await
            .expect("ingest");
        assert_eq!(store.object(&key).expect("stored").bytes, &b"body"[..]);

        let error = store
            .put_from_url("https://cdn.example.com/missing.png", "image/png", None)
            .await
            .expect_err("must fail");
        assert!(matches!(error, ObjectStoreError::Fetch { .. }));
        assert_eq!(store.len(), 1);
    }
}
