//! HTTP client for probing and downloading images

use super::{FetchError, ImageFetcher, Result};
use crate::config::FetchConfig;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{Client, Proxy, Response};
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub max_body_bytes: u64,
    pub user_agent: String,
    pub proxy: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_attempts: 1,
            max_body_bytes: 20 * 1024 * 1024,
            user_agent: concat!("crowdcount/", env!("CARGO_PKG_VERSION")).to_string(),
            proxy: None,
        }
    }
}

impl From<&FetchConfig> for HttpConfig {
    fn from(config: &FetchConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            max_attempts: config.max_attempts,
            max_body_bytes: config.max_image_bytes.as_u64(),
            user_agent: config.user_agent.clone(),
            proxy: config.proxy.clone(),
        }
    }
}

/// reqwest-backed [`ImageFetcher`]
pub struct HttpFetcher {
    client: Client,
    config: HttpConfig,
}

impl HttpFetcher {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10));

        if let Some(url) = &config.proxy {
            let proxy = Proxy::all(url)
                .map_err(|e| FetchError::InvalidUrl(format!("Invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::Unreachable(e.to_string()))?;

        Ok(Self { client, config })
    }

    async fn get(&self, url: &str) -> Result<Response> {
        let response = self.client.get(url).send().await.map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        Ok(response)
    }

    /// Download once (no retry)
    async fn fetch_once(&self, url: &str) -> Result<Bytes> {
        debug!(url, "Starting download");

        let mut response = self.get(url).await?;
        let limit = self.config.max_body_bytes;

        if response.content_length().is_some_and(|len| len > limit) {
            return Err(FetchError::TooLarge { limit });
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Body(e.to_string())
            }
        })? {
            if body.len() as u64 + chunk.len() as u64 > limit {
                return Err(FetchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url, size = body.len(), "Download completed");

        Ok(body.freeze())
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn probe(&self, url: &str) -> Result<()> {
        self.get(url).await?;
        debug!(url, "URL reachable");
        Ok(())
    }

    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.fetch_once(url).await {
                Ok(bytes) => {
                    if attempts > 1 {
                        debug!(url, attempts, "Download succeeded after retry");
                    }
                    return Ok(bytes);
                }
                Err(e) if attempts >= self.config.max_attempts || !is_transient(&e) => {
                    warn!(url, attempts, error = %e, "Download failed");
                    return Err(e);
                }
                Err(e) => {
                    warn!(url, attempts, error = %e, "Download failed, retrying");

                    // Exponential backoff: 1s, 2s, 4s
                    let backoff = Duration::from_secs(2u64.pow(attempts - 1));
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

fn map_send_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_redirect() {
        FetchError::TooManyRedirects
    } else if e.is_builder() {
        FetchError::InvalidUrl(e.to_string())
    } else {
        FetchError::Unreachable(e.to_string())
    }
}

fn is_transient(error: &FetchError) -> bool {
    match error {
        FetchError::Unreachable(_) | FetchError::Timeout | FetchError::Body(_) => true,
        FetchError::Status { status, .. } => *status >= 500,
        _ => false,
    }
}
