//! The network boundary.
//!
//! A [`Transport`] performs exactly one round-trip for one attempt of one
//! request. It knows nothing about retries, captcha recovery or chains.

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpTransport;

use crate::errors::TransportError;
use crate::request::{HttpMethod, Media, Parameters, PartType};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Everything a transport needs for one attempt.
#[derive(Debug, Clone)]
pub struct AttemptRequest {
    /// Id of the request this attempt belongs to.
    pub request_id: u64,
    /// 1-based attempt number within the current send.
    pub attempt: u32,
    /// Target URL.
    pub url: String,
    /// HTTP verb.
    pub http_method: HttpMethod,
    /// Effective parameters for this attempt.
    pub parameters: Parameters,
    /// Media payloads (uploads only).
    pub media: Vec<Media>,
    /// Multipart naming mode (uploads only).
    pub part_type: Option<PartType>,
    /// Attempt timeout.
    pub timeout: Duration,
}

impl AttemptRequest {
    /// Total size of the media payloads in bytes.
    #[must_use]
    pub fn media_bytes(&self) -> u64 {
        self.media.iter().map(|m| m.len() as u64).sum()
    }
}

/// Reports transfer progress back to the request.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn Fn(u64, u64) + Send + Sync>,
}

impl ProgressReporter {
    /// Creates a reporter forwarding to `sink`.
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Creates a reporter that discards progress.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|_, _| {})
    }

    /// Reports `done` of `total` bytes transferred.
    pub fn report(&self, done: u64, total: u64) {
        (self.sink)(done, total);
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter").finish_non_exhaustive()
    }
}

/// Performs the network exchange for a single attempt.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends `request` and returns the raw response body.
    async fn attempt(
        &self,
        request: AttemptRequest,
        progress: ProgressReporter,
    ) -> Result<Vec<u8>, TransportError>;
}
