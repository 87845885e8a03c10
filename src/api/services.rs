use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use uuid::Uuid;

use super::{
    models::{DeadLetterQuery, HealthResponse, MAX_DEAD_LETTER_LIMIT, SubmissionRequest},
    state::AppState,
    utils::{self, SubmissionFormat},
    validation,
};
use crate::api::error::ApiError;

fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
}

/// URL submission endpoint (POST /submissions)
///
/// ## Flow:
/// 1. Pick the body format from Content-Type (JSON object or plain text)
/// 2. Read the body, enforcing `server.max_body_bytes`
/// 3. Reject empty submissions and ones above `server.max_urls_per_submission`
/// 4. Hand every URL to the producer, which normalizes, probes and publishes
///    each one independently
/// 5. Return 200 with one result per URL, in input order
///
/// Per-URL rejections are part of a successful response; only a malformed
/// request as a whole produces an error status.
pub async fn submit_urls(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let format = utils::parse_submission_content_type(content_type(&headers))?;
    let body_bytes = utils::read_body(body, state.config.server.max_body_bytes.as_u64()).await?;

    let urls = match format {
        SubmissionFormat::Json => serde_json::from_slice::<SubmissionRequest>(&body_bytes)?.urls,
        SubmissionFormat::Text => validation::parse_text_submission(&body_bytes)?,
    };

    validation::validate_submission(&urls, state.config.server.max_urls_per_submission)?;

    let report = state
        .producer
        .submit_batch(urls.iter().map(String::as_str))
        .await;

    Ok((StatusCode::OK, Json(report)))
}

/// Direct detection endpoint (POST /detections)
///
/// Runs the uploaded image through the same pipeline a worker uses, without
/// the queue, and answers with the person count and artifact location.
pub async fn detect_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let extension = utils::upload_extension(content_type(&headers))?;
    let body_bytes = utils::read_body(body, state.config.server.max_body_bytes.as_u64()).await?;

    if body_bytes.is_empty() {
        return Err(ApiError::InvalidPayload("image body is empty".to_string()));
    }

    let task_id = Uuid::new_v4().to_string();

    match state
        .pipeline
        .process_bytes(&task_id, &extension, body_bytes)
        .await
    {
        Ok(report) => {
            tracing::info!(
                task_id = %report.task_id,
                people = report.people,
                output = %report.output_path,
                "Direct upload processed"
            );
            state.metrics.task_completed(report.people);
            Ok((StatusCode::OK, Json(report)))
        }
        Err(err) => {
            tracing::warn!(task_id = %task_id, code = err.code(), error = %err, "Direct upload failed");
            state.metrics.task_failed();
            Err(err.into())
        }
    }
}

/// Health check endpoint (GET /health)
///
/// Returns 503 Service Unavailable once the broker is closed or its stats
/// cannot be read, 200 OK otherwise.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let stats = if state.broker.is_closed() {
        None
    } else {
        match state.broker.stats() {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::warn!(error = %e, "Broker stats unavailable");
                None
            }
        }
    };

    let (status_code, status) = if stats.is_some() {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        queue: stats,
    };

    (status_code, Json(response))
}

/// Dead-letter listing (GET /dead-letters?limit=N)
///
/// Reads through the broker this server holds, so operators can inspect
/// failures while the queue directory is locked by the running process.
pub async fn dead_letters(
    State(state): State<AppState>,
    Query(query): Query<DeadLetterQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let records = state
        .broker
        .dead_letters(query.limit.min(MAX_DEAD_LETTER_LIMIT))?;

    Ok(Json(records))
}

/// Counters snapshot (GET /metrics)
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}
