//! API utility functions
//!
//! Pure, stateless helpers for HTTP request processing, kept apart from
//! services.rs so they can be unit tested.

use crate::api::error::ApiError;
use http_body_util::{BodyExt, LengthLimitError, Limited};

/// Body encodings accepted by `POST /submissions`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionFormat {
    Json,
    Text,
}

/// Parses the Content-Type of a submission
///
/// Accepts `application/json` and `text/plain`, with or without a charset
/// parameter. A missing header is treated as plain text.
///
/// Rejects:
/// - `application/jsonp`
/// - `application/json-patch+json`
/// - `text/html`
/// - Malformed media types
pub fn parse_submission_content_type(
    content_type: Option<&str>,
) -> Result<SubmissionFormat, ApiError> {
    let Some(content_type) = content_type else {
        return Ok(SubmissionFormat::Text);
    };

    let media_type: mime::Mime = content_type
        .parse()
        .map_err(|_| ApiError::InvalidPayload(format!("invalid Content-Type: {content_type}")))?;

    match (media_type.type_(), media_type.subtype()) {
        (mime::APPLICATION, mime::JSON) => Ok(SubmissionFormat::Json),
        (mime::TEXT, mime::PLAIN) => Ok(SubmissionFormat::Text),
        (t, s) => Err(ApiError::UnsupportedMediaType(format!("{t}/{s}"))),
    }
}

/// File extension for a directly uploaded image, taken from its Content-Type
///
/// Unknown or missing types give an empty extension, which the annotator
/// writes as PNG.
pub fn upload_extension(content_type: Option<&str>) -> Result<String, ApiError> {
    let Some(content_type) = content_type else {
        return Ok(String::new());
    };

    let media_type: mime::Mime = content_type
        .parse()
        .map_err(|_| ApiError::InvalidPayload(format!("invalid Content-Type: {content_type}")))?;

    if media_type.type_() == mime::IMAGE {
        let ext = match media_type.subtype().as_str() {
            "jpeg" | "jpg" | "pjpeg" => "jpg",
            other => other,
        };
        return Ok(ext.to_string());
    }

    if media_type.essence_str() == mime::APPLICATION_OCTET_STREAM.essence_str() {
        return Ok(String::new());
    }

    Err(ApiError::UnsupportedMediaType(media_type.essence_str().to_string()))
}

/// Reads a request body, failing once it grows past `max_size`
///
/// Decompression is handled upstream by `RequestDecompressionLayer`, so the
/// limit applies to the decoded size.
pub async fn read_body(body: axum::body::Body, max_size: u64) -> Result<Vec<u8>, ApiError> {
    let limit = usize::try_from(max_size).unwrap_or(usize::MAX);

    let collected = Limited::new(body, limit).collect().await.map_err(|err| {
        if err.downcast_ref::<LengthLimitError>().is_some() {
            ApiError::PayloadTooLarge(max_size)
        } else {
            ApiError::InvalidPayload(err.to_string())
        }
    })?;

    Ok(collected.to_bytes().to_vec())
}
