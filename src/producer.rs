//! Producer: validates candidate URLs and publishes detection tasks
//!
//! Each URL is handled on its own. A rejected URL never reaches the queue
//! and never affects the other URLs of the same batch.

use crate::fetch::{FetchError, ImageFetcher};
use crate::observability::Metrics;
use crate::queue::Broker;
use crate::task::TaskEnvelope;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

const DEFAULT_SCHEME: &str = "http://";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("empty URL")]
    Empty,

    #[error("malformed URL: {0}")]
    Malformed(String),

    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("unreachable: {0}")]
    Unreachable(#[from] FetchError),

    #[error("publish failed: {0}")]
    Publish(String),
}

impl SubmitError {
    pub fn code(&self) -> &'static str {
        match self {
            SubmitError::Empty => "EMPTY_URL",
            SubmitError::Malformed(_) => "MALFORMED_URL",
            SubmitError::UnsupportedScheme(_) => "UNSUPPORTED_SCHEME",
            SubmitError::Unreachable(_) => "UNREACHABLE",
            SubmitError::Publish(_) => "PUBLISH_FAILED",
        }
    }
}

/// Result of submitting one URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Accepted { task_id: String },
    Rejected(SubmitError),
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionResult {
    /// Normalized URL when normalization succeeded, raw input otherwise
    pub url: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Serialize for Outcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(None)?;
        match self {
            Outcome::Accepted { task_id } => {
                map.serialize_entry("status", "accepted")?;
                map.serialize_entry("task_id", task_id)?;
            }
            Outcome::Rejected(reason) => {
                map.serialize_entry("status", "rejected")?;
                map.serialize_entry("code", reason.code())?;
                map.serialize_entry("reason", &reason.to_string())?;
            }
        }
        map.end()
    }
}

/// Per-URL results of a batch, in input order
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub accepted: usize,
    pub results: Vec<SubmissionResult>,
}

/// Trim, drop embedded CR/LF and add `http://` when no scheme is given
pub fn normalize_url(raw: &str) -> Result<String, SubmitError> {
    let cleaned: String = raw.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return Err(SubmitError::Empty);
    }

    let normalized = if has_scheme(cleaned) {
        cleaned.to_string()
    } else {
        format!("{DEFAULT_SCHEME}{cleaned}")
    };

    let parsed = Url::parse(&normalized).map_err(|e| SubmitError::Malformed(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(SubmitError::UnsupportedScheme(other.to_string())),
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(SubmitError::Malformed("missing host".to_string()));
    }

    Ok(normalized)
}

/// True when `url` starts with `<scheme>://`
///
/// A `://` further in, e.g. inside a query string, does not count.
fn has_scheme(url: &str) -> bool {
    let Some((scheme, _)) = url.split_once("://") else {
        return false;
    };

    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Last dot-delimited part of the final path segment, case preserved
///
/// Query and fragment are ignored. Returns an empty string when the path
/// has no suffix.
pub fn file_extension(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return String::new();
    };

    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|segment| segment.rsplit_once('.'))
        .map(|(_, ext)| ext.to_string())
        .unwrap_or_default()
}

/// Split a free-form submission into candidate URLs
pub fn split_urls(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

pub struct Producer {
    broker: Arc<Broker>,
    fetcher: Arc<dyn ImageFetcher>,
    metrics: Arc<Metrics>,
}

impl Producer {
    pub fn new(broker: Arc<Broker>, fetcher: Arc<dyn ImageFetcher>, metrics: Arc<Metrics>) -> Self {
        Self {
            broker,
            fetcher,
            metrics,
        }
    }

    /// Validate one URL and publish it as a task
    pub async fn submit(&self, raw_url: &str) -> SubmissionResult {
        let (url, outcome) = match normalize_url(raw_url) {
            Ok(url) => {
                let outcome = match self.publish(&url).await {
                    Ok(task_id) => Outcome::Accepted { task_id },
                    Err(reason) => Outcome::Rejected(reason),
                };
                (url, outcome)
            }
            Err(reason) => (raw_url.trim().to_string(), Outcome::Rejected(reason)),
        };

        match &outcome {
            Outcome::Accepted { .. } => self.metrics.submission_accepted(),
            Outcome::Rejected(reason) => {
                warn!(url = %url, error = %reason, "Submission rejected");
                self.metrics.submission_rejected();
            }
        }

        SubmissionResult { url, outcome }
    }

    /// Submit every URL independently, publishing in input order
    pub async fn submit_batch<'a, I>(&self, urls: I) -> BatchReport
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut results = Vec::new();
        for url in urls {
            results.push(self.submit(url).await);
        }

        let accepted = results.iter().filter(|r| r.outcome.is_accepted()).count();
        info!(accepted, total = results.len(), "Batch submitted");

        BatchReport { accepted, results }
    }

    async fn publish(&self, url: &str) -> Result<String, SubmitError> {
        self.fetcher.probe(url).await?;

        let envelope = TaskEnvelope::new(url, file_extension(url));

        let seq = self
            .broker
            .publish(&envelope.encode())
            .map_err(|e| SubmitError::Publish(e.to_string()))?;

        info!(
            seq,
            task_id = %envelope.task_id,
            url,
            queue = %self.broker.queue_name(),
            "Task published"
        );

        Ok(envelope.task_id)
    }
}
