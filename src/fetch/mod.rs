//! Image fetching
//!
//! The producer uses [`ImageFetcher::probe`] to check that a URL is
//! reachable before publishing it; the worker uses [`ImageFetcher::fetch`]
//! to pull the image bytes for a task.

pub mod http;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use http::{HttpConfig, HttpFetcher};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unreachable: {0}")]
    Unreachable(String),

    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Too many redirects")]
    TooManyRedirects,

    #[error("Response body exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("Failed to read body: {0}")]
    Body(String),
}

impl FetchError {
    /// True when the remote end answered, as opposed to a transport failure
    pub fn is_http_status(&self) -> bool {
        matches!(self, FetchError::Status { .. })
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Resolves URLs to raw bytes
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Lightweight reachability check; succeeds on a 2xx response
    async fn probe(&self, url: &str) -> Result<()>;

    /// Download the full response body
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}
