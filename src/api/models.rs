//! Request and response bodies of the HTTP surface
//!
//! - `POST /submissions` takes a [`SubmissionRequest`] (or a `text/plain`
//!   body of whitespace-delimited URLs) and answers with a
//!   [`BatchReport`](crate::producer::BatchReport)
//! - `POST /detections` takes raw image bytes and answers with a
//!   [`DetectionReport`](crate::worker::DetectionReport)
//! - `GET /dead-letters?limit=N` answers with the oldest `N`
//!   [`DeadLetter`](crate::queue::DeadLetter) records
//!
//! A JSON submission looks like:
//!
//! ```json
//! {
//!   "urls": [
//!     "https://cdn.example.com/crowd.jpg",
//!     "example.com/street.png"
//!   ]
//! }
//! ```
//!
//! and is answered with one entry per URL, in input order:
//!
//! ```json
//! {
//!   "accepted": 1,
//!   "results": [
//!     {"url": "https://cdn.example.com/crowd.jpg", "status": "accepted", "task_id": "…"},
//!     {"url": "http://example.com/street.png", "status": "rejected",
//!      "code": "UNREACHABLE", "reason": "unreachable: HTTP 404 Not Found"}
//!   ]
//! }
//! ```

use crate::queue::BrokerStats;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SubmissionRequest {
    pub urls: Vec<String>,
}

/// Upper bound on `limit` for `GET /dead-letters`
pub const MAX_DEAD_LETTER_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    #[serde(default = "default_dead_letter_limit")]
    pub limit: usize,
}

fn default_dead_letter_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<BrokerStats>,
}
