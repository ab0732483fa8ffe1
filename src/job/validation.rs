use reqwest::Url;
use serde_json::{Map, Value};
use thiserror::Error;

use super::Job;

#[derive(Debug, Error)]
pub enum JobValidationError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("payload must be a JSON object")]
    NotAnObject,
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("{0} must be a string")]
    NotAString(&'static str),
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("{field} is not a valid absolute URL: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
    #[error("download_timeout must be a positive integer")]
    InvalidDownloadTimeout,
}

pub(super) fn decode_submission(data: &[u8]) -> Result<Job, JobValidationError> {
    let value: Value = serde_json::from_slice(data)?;
    let Value::Object(fields) = value else {
        return Err(JobValidationError::NotAnObject);
    };

    let aggr_id = required_string(&fields, "aggr_id")?;
    let url = required_url(&fields, "url")?;
    let callback_url = required_url(&fields, "callback_url")?;

    let extra = match fields.get("extra") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(JobValidationError::NotAString("extra")),
    };

    // Absent is fine; an explicit null is not.
    let download_timeout = match fields.get("download_timeout") {
        None => None,
        Some(value) => Some(
            value
                .as_u64()
                .filter(|secs| *secs > 0)
                .ok_or(JobValidationError::InvalidDownloadTimeout)?,
        ),
    };

    let mut job = Job::new(aggr_id, url, callback_url);
    job.extra = extra;
    job.download_timeout = download_timeout;
    Ok(job)
}

fn required_string(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<String, JobValidationError> {
    match fields.get(field) {
        None => Err(JobValidationError::MissingField(field)),
        Some(Value::String(s)) if s.is_empty() => Err(JobValidationError::EmptyField(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(JobValidationError::NotAString(field)),
    }
}

fn required_url(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<String, JobValidationError> {
    let raw = required_string(fields, field)?;
    let parsed = Url::parse(&raw).map_err(|e| JobValidationError::InvalidUrl {
        field,
        reason: e.to_string(),
    })?;

    if parsed.cannot_be_a_base() {
        return Err(JobValidationError::InvalidUrl {
            field,
            reason: "URL has no authority or path".to_string(),
        });
    }

    Ok(raw)
}
