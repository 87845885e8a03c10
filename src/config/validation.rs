use super::models::{Config, StorageProvider};
use crate::queue::store::is_valid_queue_name;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("broker.prefetch must be at least 1")]
    ZeroPrefetch,

    #[error("Invalid queue name '{0}': use only letters, digits, '_' and '-'")]
    InvalidQueueName(String),

    #[error("Timeout must be positive: {field}")]
    ZeroTimeout { field: &'static str },

    #[error("fetch.max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("Size limit must be positive: {field}")]
    ZeroSizeLimit { field: &'static str },

    #[error("Invalid detector endpoint '{endpoint}': {reason}")]
    InvalidDetectorEndpoint { endpoint: String, reason: String },

    #[error("storage.root must not be empty for the local provider")]
    EmptyStorageRoot,

    #[error("worker.consumers must be at least 1")]
    ZeroConsumers,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_broker(config)?;
    validate_fetch(config)?;
    validate_detector(config)?;
    validate_storage(config)?;
    validate_server(config)?;
    validate_worker(config)?;
    Ok(())
}

fn validate_broker(config: &Config) -> Result<(), ValidationError> {
    if config.broker.prefetch == 0 {
        return Err(ValidationError::ZeroPrefetch);
    }

    if !is_valid_queue_name(&config.broker.queue_name) {
        return Err(ValidationError::InvalidQueueName(
            config.broker.queue_name.clone(),
        ));
    }

    Ok(())
}

fn validate_fetch(config: &Config) -> Result<(), ValidationError> {
    if config.fetch.connect_timeout_ms == 0 {
        return Err(ValidationError::ZeroTimeout {
            field: "fetch.connect_timeout_ms",
        });
    }
    if config.fetch.request_timeout_ms == 0 {
        return Err(ValidationError::ZeroTimeout {
            field: "fetch.request_timeout_ms",
        });
    }
    if config.fetch.max_attempts == 0 {
        return Err(ValidationError::ZeroAttempts);
    }
    if config.fetch.max_image_bytes.as_u64() == 0 {
        return Err(ValidationError::ZeroSizeLimit {
            field: "fetch.max_image_bytes",
        });
    }
    Ok(())
}

/// Endpoint must be an absolute http(s) URL
fn validate_detector(config: &Config) -> Result<(), ValidationError> {
    let endpoint = &config.detector.endpoint;

    let parsed = url::Url::parse(endpoint).map_err(|e| ValidationError::InvalidDetectorEndpoint {
        endpoint: endpoint.clone(),
        reason: e.to_string(),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidDetectorEndpoint {
            endpoint: endpoint.clone(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }

    if config.detector.timeout_ms == 0 {
        return Err(ValidationError::ZeroTimeout {
            field: "detector.timeout_ms",
        });
    }

    Ok(())
}

fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    if config.storage.provider == StorageProvider::Local
        && config.storage.root.as_os_str().is_empty()
    {
        return Err(ValidationError::EmptyStorageRoot);
    }
    Ok(())
}

fn validate_server(config: &Config) -> Result<(), ValidationError> {
    if config.server.max_body_bytes.as_u64() == 0 {
        return Err(ValidationError::ZeroSizeLimit {
            field: "server.max_body_bytes",
        });
    }
    if config.server.max_urls_per_submission == 0 {
        return Err(ValidationError::ZeroSizeLimit {
            field: "server.max_urls_per_submission",
        });
    }
    Ok(())
}

fn validate_worker(config: &Config) -> Result<(), ValidationError> {
    if config.worker.consumers == 0 {
        return Err(ValidationError::ZeroConsumers);
    }
    Ok(())
}
