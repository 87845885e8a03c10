//! HTTP client for a running crowdcount server
//!
//! The queue directory belongs to the process that opened it, so command
//! line tools talk to the API instead of opening the broker themselves.

use crate::api::models::SubmissionRequest;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server answered {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unreadable response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    /// `base` is the server root, e.g. `http://127.0.0.1:8080`
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        let invalid = |reason: String| ClientError::InvalidUrl {
            url: base.to_string(),
            reason,
        };

        let base = Url::parse(base).map_err(|e| invalid(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", base.scheme())));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base })
    }

    /// POST /submissions; returns the per-URL report as sent by the server
    pub async fn submit(&self, urls: &[String]) -> Result<Value> {
        let body = serde_json::to_vec(&SubmissionRequest {
            urls: urls.to_vec(),
        })?;

        let response = self
            .http
            .post(self.endpoint("submissions"))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        decode(response).await
    }

    /// GET /dead-letters?limit=N
    pub async fn dead_letters(&self, limit: usize) -> Result<Value> {
        let response = self
            .http
            .get(self.endpoint("dead-letters"))
            .query(&[("limit", limit)])
            .send()
            .await?;

        decode(response).await
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        let joined = format!("{}/{path}", url.path().trim_end_matches('/'));
        url.set_path(&joined);
        url
    }
}

async fn decode(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let bytes = response.bytes().await?;

    if !status.is_success() {
        // Error bodies are `{"code", "message"}` when they come from our API
        let message = serde_json::from_slice::<Value>(&bytes)
            .ok()
            .and_then(|body| body["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());

        return Err(ClientError::Api {
            status: status.as_u16(),
            message,
        });
    }

    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_base_path() {
        let client = ApiClient::new("http://127.0.0.1:8080", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.endpoint("submissions").as_str(),
            "http://127.0.0.1:8080/submissions"
        );

        let client = ApiClient::new("http://gateway/crowdcount/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.endpoint("dead-letters").as_str(),
            "http://gateway/crowdcount/dead-letters"
        );
    }

    #[test]
    fn test_rejects_non_http_base() {
        assert!(matches!(
            ApiClient::new("ftp://host", Duration::from_secs(1)),
            Err(ClientError::InvalidUrl { .. })
        ));
        assert!(ApiClient::new("not a url", Duration::from_secs(1)).is_err());
    }
}
