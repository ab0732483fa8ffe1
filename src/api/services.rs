use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use http_body_util::BodyExt;
use tracing::info;

use super::{
    error::ApiError,
    models::{HealthResponse, JobAcceptedResponse, QueueDepths},
    state::AppState,
    utils,
};
use crate::job::Job;
use crate::store::{JobStore, keys::Queue};

/// Job submission endpoint (POST /jobs)
///
/// ## Flow:
/// 1. Require `Content-Type: application/json`
/// 2. Read the (already decompressed) body and enforce the size limit
/// 3. Validate the submission into a fresh pending [`Job`]
/// 4. Persist the record, then enqueue it for download
/// 5. Return 202 Accepted with the job id
pub async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    utils::parse_content_type(content_type)?;

    let max_size = state.config.server.max_payload_bytes.as_usize();
    let body_bytes = read_body(body, max_size).await?;

    let job = Job::from_request(&body_bytes)?;

    // Record first: a queued id must always resolve to a record
    state.store.save_job(&job).await?;
    state.store.queue_pending_download(&job).await?;
    state.metrics.job_accepted();

    info!(job_id = %job.id, aggr_id = %job.aggr_id, url = %job.url, "Job accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAcceptedResponse { id: job.id }),
    ))
}

/// Reads request body and validates size
///
/// Decompression is handled by `RequestDecompressionLayer`, so the limit
/// applies to the decoded submission.
async fn read_body(body: axum::body::Body, max_size: usize) -> Result<Vec<u8>, ApiError> {
    let data = body
        .collect()
        .await
        .map_err(|err| ApiError::InvalidPayload(err.to_string()))?
        .to_bytes()
        .to_vec();

    utils::validate_body_size(&data, max_size)?;

    Ok(data)
}

/// Job record endpoint (GET /jobs/{job_id})
///
/// Jobs whose callback was delivered are gone; permanently failed callbacks
/// stay inspectable here.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.store.get_job(&job_id).await?;
    Ok((StatusCode::OK, Json(job)))
}

/// Downloaded file endpoint (GET /files/{job_id})
pub async fn download_file(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = state.storage.download(&job_id).await?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, mime::APPLICATION_OCTET_STREAM.to_string())],
        bytes,
    ))
}

/// Health check endpoint (GET /health)
///
/// Returns 503 Service Unavailable if the job store is unhealthy.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = BTreeMap::new();
    components.insert("api".to_string(), "healthy".to_string());

    let store_healthy = match state.store.health_check() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Job store health check failed");
            false
        }
    };
    components.insert("store".to_string(), status_label(store_healthy).to_string());

    let queues = match (
        state.store.queue_len(Queue::Downloads),
        state.store.queue_len(Queue::Callbacks),
    ) {
        (Ok(pending_downloads), Ok(pending_callbacks)) => Some(QueueDepths {
            pending_downloads,
            pending_callbacks,
        }),
        _ => None,
    };

    let status_code = if store_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: status_label(store_healthy).to_string(),
        components,
        queues,
        metrics: state.metrics.snapshot(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}

fn status_label(healthy: bool) -> &'static str {
    if healthy { "healthy" } else { "unhealthy" }
}
