//! Media replacement helpers.
//!
//! The object store tracks no backreferences, so the entity owning a key is
//! responsible for cleanup: clearing or replacing an image field without
//! deleting the old key leaks the object forever.

use tracing::warn;

use crate::domain::media::UploadPayload;
use crate::infra::object_store::{ObjectStore, ObjectStoreError};

/// Store a replacement payload, then delete the previous object.
///
/// The new object is written first so a delete failure never loses data; a
/// failed delete only orphans the old object and is logged rather than
/// surfaced. Returns the new key for the caller to persist.
pub async fn replace<S>(
    store: &S,
    upload: &UploadPayload,
    previous_key: Option<&str>,
) -> Result<String, ObjectStoreError>
where
    S: ObjectStore + ?Sized,
{
    let key = store.put(upload, None).await?;

    if let Some(old_key) = previous_key
        && old_key != key
        && let Err(error) = store.delete(old_key).await
    {
        warn!(old_key, %error, "failed to delete replaced object; key is orphaned");
    }

    Ok(key)
}

/// Delete the object backing a cleared image field.
pub async fn detach<S>(store: &S, key: &str) -> Result<(), ObjectStoreError>
where
    S: ObjectStore + ?Sized,
{
    store.delete(key).await
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::infra::object_store::MemoryObjectStore;

    use super::*;

    fn upload(name: &str, bytes: &'static [u8]) -> UploadPayload {
        UploadPayload::new(name, Some("image/webp".into()), Bytes::from_static(bytes))
    }

    #[tokio::test]
    async fn replace_writes_new_then_deletes_old() {
        let store = MemoryObjectStore::new("https://media.example.com");
        let first = store
            .put(&upload("avatar.webp", b"v1"), None)
            .await
            .expect("put");

        let second = replace(&store, &upload("avatar.webp", b"v2"), Some(&first))
            .await
            .expect("replace");

        assert_ne!(first, second);
        assert!(!store.exists(&first).await.expect("exists"));
        assert_eq!(store.object(&second).expect("stored").bytes, &b"v2"[..]);
    }

    #[tokio::test]
    async fn replace_without_previous_key_just_stores() {
        let store = MemoryObjectStore::new("https://media.example.com");
        let key = replace(&store, &upload("cover.webp", b"v1"), None)
            .await
            .expect("replace");
        assert!(store.exists(&key).await.expect("exists"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn detach_pairs_field_clear_with_object_delete() {
        let store = MemoryObjectStore::new("https://media.example.com");
        let key = store
            .put(&upload("cover.webp", b"v1"), None)
            .await
            .expect("put");

        detach(&store, &key).await.expect("detach");
        assert!(store.is_empty());
    }
}
