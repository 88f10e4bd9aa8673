//! S3-compatible object storage with a size-threshold multipart protocol.
//!
//! The backend talks to the wire through the narrow [`S3Api`] seam so the
//! dispatch logic (single `PutObject` below the threshold, multipart above
//! it) is exercisable against a recording fake. `aws_sdk_s3::Client`
//! implements the seam for production use; the SDK's default retry/backoff
//! covers transient network errors.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{
    config::Credentials,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
};
use bytes::Bytes;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{FetchSettings, ObjectStoreSettings};
use crate::domain::media::{UploadLimits, UploadPayload};

use super::{ObjectStore, ObjectStoreError, derive_key, extension_for_mime, public_url};

/// A failed call against the S3-compatible API.
#[derive(Debug, Error)]
#[error("S3 {operation} failed: {message}")]
pub struct S3ApiError {
    pub operation: &'static str,
    pub message: String,
}

impl S3ApiError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// One finished part of a multipart session: its 1-based number and the
/// integrity tag returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPartSpec {
    pub part_number: i32,
    pub etag: String,
}

/// The subset of the S3 wire protocol the store depends on.
#[async_trait]
pub trait S3Api: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<(), S3ApiError>;

    /// Open a multipart session; returns the upload id.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<String, S3ApiError>;

    /// Upload one part; returns its integrity tag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, S3ApiError>;

    /// Finalize a session. Parts must be supplied in ascending part-number
    /// order with matching tags; this call alone makes the key readable.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartSpec],
    ) -> Result<(), S3ApiError>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), S3ApiError>;

    /// Metadata probe. `Ok(false)` when the backend answers "not found".
    async fn head_object(&self, bucket: &str, key: &str) -> Result<bool, S3ApiError>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3ApiError>;
}

#[async_trait]
impl S3Api for aws_sdk_s3::Client {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<(), S3ApiError> {
        let mut request = self
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body));
        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }
        request
            .send()
            .await
            .map_err(|err| S3ApiError::new("PutObject", err.to_string()))?;
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<String, S3ApiError> {
        let mut request = self.create_multipart_upload().bucket(bucket).key(key);
        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }
        let output = request
            .send()
            .await
            .map_err(|err| S3ApiError::new("CreateMultipartUpload", err.to_string()))?;
        output.upload_id().map(str::to_string).ok_or_else(|| {
            S3ApiError::new("CreateMultipartUpload", "response carried no upload id")
        })
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, S3ApiError> {
        let output = self
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| S3ApiError::new("UploadPart", err.to_string()))?;
        output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| S3ApiError::new("UploadPart", "response carried no ETag"))
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartSpec],
    ) -> Result<(), S3ApiError> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|part| {
                        CompletedPart::builder()
                            .part_number(part.part_number)
                            .e_tag(&part.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();
        self.complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|err| S3ApiError::new("CompleteMultipartUpload", err.to_string()))?;
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), S3ApiError> {
        self.abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|err| S3ApiError::new("AbortMultipartUpload", err.to_string()))?;
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<bool, S3ApiError> {
        match self.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                let service_error = err.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(S3ApiError::new("HeadObject", service_error.to_string()))
                }
            }
        }
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3ApiError> {
        self.delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| S3ApiError::new("DeleteObject", err.to_string()))?;
        Ok(())
    }
}

/// Build an SDK client from the resolved settings (custom endpoint, static
/// credentials, path-style addressing for S3-compatible providers).
pub async fn build_s3_client(settings: &ObjectStoreSettings) -> aws_sdk_s3::Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(settings.region.clone()));
    if let (Some(key_id), Some(secret)) = (
        settings.access_key_id.as_ref(),
        settings.secret_access_key.as_ref(),
    ) {
        loader = loader.credentials_provider(Credentials::new(
            key_id.clone(),
            secret.clone(),
            None,
            None,
            "dispensa-settings",
        ));
    }
    let base = loader.load().await;

    let mut builder = aws_sdk_s3::config::Builder::from(&base).force_path_style(true);
    if let Some(endpoint) = settings.endpoint.as_ref() {
        builder = builder.endpoint_url(endpoint);
    }
    aws_sdk_s3::Client::from_conf(builder.build())
}

/// Object store backed by an S3-compatible API.
pub struct S3ObjectStore<C = aws_sdk_s3::Client> {
    client: C,
    fetcher: reqwest::Client,
    bucket: String,
    access_domain: String,
    limits: UploadLimits,
    multipart_threshold: u64,
    part_size: u64,
}

impl<C> S3ObjectStore<C>
where
    C: S3Api,
{
    pub fn new(
        client: C,
        settings: &ObjectStoreSettings,
        fetch: &FetchSettings,
    ) -> Result<Self, reqwest::Error> {
        let fetcher = reqwest::Client::builder()
            .connect_timeout(fetch.connect_timeout)
            .read_timeout(fetch.read_timeout)
            .timeout(fetch.total_timeout)
            .build()?;

        Ok(Self {
            client,
            fetcher,
            bucket: settings.bucket.clone(),
            access_domain: settings.access_domain.clone(),
            limits: UploadLimits {
                max_bytes: settings.max_upload_bytes,
                allowed_content_types: settings.allowed_content_types.clone(),
            },
            multipart_threshold: settings.multipart_threshold_bytes.get(),
            part_size: settings.part_size_bytes.get(),
        })
    }

    /// Access the wire client, mainly for test doubles that record calls.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Write a payload under `key`, choosing the upload protocol by size.
    ///
    /// Below the threshold the payload goes up as one `PutObject`. At or
    /// above it, a multipart session carries fixed-size parts numbered from
    /// 1; only a successful `CompleteMultipartUpload` makes the key readable,
    /// so any failure aborts the session best-effort and the key never
    /// appears.
    async fn store(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<(), ObjectStoreError> {
        counter!("dispensa_store_upload_bytes_total").increment(body.len() as u64);

        if (body.len() as u64) < self.multipart_threshold {
            self.client
                .put_object(&self.bucket, key, body, content_type)
                .await?;
            debug!(key, "stored object via single upload");
            return Ok(());
        }

        let upload_id = self
            .client
            .create_multipart_upload(&self.bucket, key, content_type)
            .await?;
        counter!("dispensa_store_multipart_sessions_total").increment(1);

        let total = body.len();
        let part_size = self.part_size as usize;
        let mut parts = Vec::with_capacity(total.div_ceil(part_size));
        let mut offset = 0;
        let mut part_number = 1;

        while offset < total {
            let end = usize::min(offset + part_size, total);
            let chunk = body.slice(offset..end);
            match self
                .client
                .upload_part(&self.bucket, key, &upload_id, part_number, chunk)
                .await
            {
                Ok(etag) => parts.push(CompletedPartSpec { part_number, etag }),
                Err(err) => {
                    self.abandon_session(key, &upload_id).await;
                    return Err(err.into());
                }
            }
            offset = end;
            part_number += 1;
        }

        if let Err(err) = self
            .client
            .complete_multipart_upload(&self.bucket, key, &upload_id, &parts)
            .await
        {
            self.abandon_session(key, &upload_id).await;
            return Err(err.into());
        }

        debug!(key, parts = parts.len(), "stored object via multipart upload");
        Ok(())
    }

    /// Abort a failed session. Failure to abort only leaks storage, never
    /// correctness, so it is logged and swallowed.
    async fn abandon_session(&self, key: &str, upload_id: &str) {
        counter!("dispensa_store_multipart_aborted_total").increment(1);
        if let Err(err) = self
            .client
            .abort_multipart_upload(&self.bucket, key, upload_id)
            .await
        {
            warn!(key, upload_id, error = %err, "failed to abort multipart session");
        }
    }
}

#[async_trait]
impl<C> ObjectStore for S3ObjectStore<C>
where
    C: S3Api,
{
    async fn put(
        &self,
        upload: &UploadPayload,
        key_hint: Option<&str>,
    ) -> Result<String, ObjectStoreError> {
        self.limits.check(upload)?;

        let extension = upload.extension();
        let key = derive_key(key_hint, extension.as_deref());
        self.store(&key, upload.bytes.clone(), upload.content_type.as_deref())
            .await?;
        Ok(key)
    }

    async fn put_from_url(
        &self,
        url: &str,
        content_type: &str,
        key_hint: Option<&str>,
    ) -> Result<String, ObjectStoreError> {
        let response = self.fetcher.get(url).send().await.map_err(|err| {
            counter!("dispensa_fetch_failure_total").increment(1);
            ObjectStoreError::Fetch {
                url: url.to_string(),
                reason: err.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            counter!("dispensa_fetch_failure_total").increment(1);
            return Err(ObjectStoreError::FetchStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // A mid-stream timeout fails here, before anything is persisted.
        let body = response.bytes().await.map_err(|err| {
            counter!("dispensa_fetch_failure_total").increment(1);
            ObjectStoreError::Fetch {
                url: url.to_string(),
                reason: err.to_string(),
            }
        })?;

        let key = derive_key(key_hint, extension_for_mime(content_type));
        self.store(&key, body, Some(content_type)).await?;
        Ok(key)
    }

    fn url_for(&self, key: &str) -> String {
        public_url(&self.access_domain, key)
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        Ok(self.client.head_object(&self.bucket, key).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.client.delete_object(&self.bucket, key).await?;
        Ok(())
    }
}
