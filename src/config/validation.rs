use super::models::Config;
use reqwest::Url;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{section}.concurrency must be at least 1")]
    ZeroConcurrency { section: &'static str },

    #[error("{field} must be positive")]
    NonPositive { field: &'static str },

    #[error("notifier.download_url '{url}' is not an absolute URL: {reason}")]
    InvalidDownloadUrl { url: String, reason: String },

    #[error("server.max_payload_bytes must be positive")]
    InvalidPayloadLimit,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_server(config)?;
    validate_processor(config)?;
    validate_notifier(config)?;
    Ok(())
}

fn validate_server(config: &Config) -> Result<(), ValidationError> {
    if config.server.max_payload_bytes.as_u64() == 0 {
        return Err(ValidationError::InvalidPayloadLimit);
    }
    Ok(())
}

fn validate_processor(config: &Config) -> Result<(), ValidationError> {
    let processor = &config.processor;
    if processor.concurrency == 0 {
        return Err(ValidationError::ZeroConcurrency {
            section: "processor",
        });
    }
    positive("processor.download_timeout_secs", processor.download_timeout_secs)?;
    positive("processor.max_retries", processor.max_retries.into())?;
    positive("processor.poll_interval_ms", processor.poll_interval_ms)?;
    Ok(())
}

fn validate_notifier(config: &Config) -> Result<(), ValidationError> {
    let notifier = &config.notifier;
    if notifier.concurrency == 0 {
        return Err(ValidationError::ZeroConcurrency {
            section: "notifier",
        });
    }
    positive("notifier.callback_timeout_ms", notifier.callback_timeout_ms)?;
    positive(
        "notifier.max_callback_attempts",
        notifier.max_callback_attempts.into(),
    )?;
    positive("notifier.poll_interval_ms", notifier.poll_interval_ms)?;
    positive("notifier.scan_batch_size", notifier.scan_batch_size as u64)?;
    validate_download_url(&notifier.download_url)
}

/// The download URL must be able to take the job id as an extra path segment
pub fn validate_download_url(url: &str) -> Result<(), ValidationError> {
    let parsed = Url::parse(url).map_err(|e| ValidationError::InvalidDownloadUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if parsed.cannot_be_a_base() {
        return Err(ValidationError::InvalidDownloadUrl {
            url: url.to_string(),
            reason: "URL cannot carry path segments".to_string(),
        });
    }
    Ok(())
}

fn positive(field: &'static str, value: u64) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::NonPositive { field });
    }
    Ok(())
}
