use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmissionValidationError {
    #[error("submission must contain at least one URL")]
    NoUrls,
    #[error("submission contains {count} URLs, limit is {max}")]
    TooManyUrls { count: usize, max: usize },
    #[error("text submission must be UTF-8")]
    NotUtf8,
}

/// Check the size of a submission before any URL is probed
///
/// Blank entries are not counted here; the producer rejects them per URL.
pub fn validate_submission(urls: &[String], max_urls: usize) -> Result<(), SubmissionValidationError> {
    if urls.is_empty() {
        return Err(SubmissionValidationError::NoUrls);
    }

    if urls.len() > max_urls {
        return Err(SubmissionValidationError::TooManyUrls {
            count: urls.len(),
            max: max_urls,
        });
    }

    Ok(())
}

/// Split a `text/plain` submission body into URLs
pub fn parse_text_submission(body: &[u8]) -> Result<Vec<String>, SubmissionValidationError> {
    let text = std::str::from_utf8(body).map_err(|_| SubmissionValidationError::NotUtf8)?;
    Ok(crate::producer::split_urls(text)
        .into_iter()
        .map(str::to_owned)
        .collect())
}
