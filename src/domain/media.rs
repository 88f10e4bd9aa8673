//! Upload payloads and the validation that runs before any storage I/O.

use std::num::NonZeroU64;

use bytes::Bytes;
use thiserror::Error;

/// An uploaded file as received from the request layer.
///
/// Only the extension of `filename` is ever trusted; stored keys are always
/// prefixed with a fresh identifier so unrelated uploads sharing a filename
/// cannot collide.
#[derive(Debug, Clone)]
pub struct UploadPayload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl UploadPayload {
    pub fn new(
        filename: impl Into<String>,
        content_type: Option<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            bytes: bytes.into(),
        }
    }

    /// Declared payload size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Lowercased extension of the original filename, if any.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|value| value.to_str())
            .map(|value| value.to_ascii_lowercase())
            .filter(|value| !value.is_empty())
    }
}

/// Limits applied to uploads before any I/O is attempted.
#[derive(Debug, Clone, Default)]
pub struct UploadLimits {
    pub max_bytes: Option<NonZeroU64>,
    /// Accepted content types; an empty list accepts everything.
    pub allowed_content_types: Vec<String>,
}

impl UploadLimits {
    /// Validate a payload against these limits.
    pub fn check(&self, payload: &UploadPayload) -> Result<(), UploadValidationError> {
        if payload.bytes.is_empty() {
            return Err(UploadValidationError::EmptyPayload);
        }

        if let Some(limit) = self.max_bytes
            && payload.size() > limit.get()
        {
            return Err(UploadValidationError::PayloadTooLarge {
                size: payload.size(),
                limit: limit.get(),
            });
        }

        if !self.allowed_content_types.is_empty() {
            let declared = payload.content_type.as_deref().unwrap_or("unknown");
            if !self
                .allowed_content_types
                .iter()
                .any(|allowed| allowed == declared)
            {
                return Err(UploadValidationError::UnsupportedContentType {
                    content_type: declared.to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Validation failures raised before storage is touched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadValidationError {
    #[error("uploaded file is empty")]
    EmptyPayload,
    #[error("uploaded file of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: u64, limit: u64 },
    #[error("content type `{content_type}` is not accepted")]
    UnsupportedContentType { content_type: String },
}
