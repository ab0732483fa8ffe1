//! Wire types of the HTTP API
//!
//! `POST /jobs` accepts a job submission:
//!
//! ```json
//! {
//!   "aggr_id": "crawl-2024-05-01",
//!   "url": "https://cdn.example.com/image.jpg",
//!   "callback_url": "https://client.example.com/hooks/download",
//!   "extra": "opaque client data",
//!   "download_timeout": 30
//! }
//! ```
//!
//! and answers `202 Accepted` with a [`JobAcceptedResponse`]. The record
//! itself is served back as a [`crate::job::Job`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::observability::MetricsSnapshot;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobAcceptedResponse {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct QueueDepths {
    pub pending_downloads: usize,
    pub pending_callbacks: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, String>,
    pub queues: Option<QueueDepths>,
    pub metrics: MetricsSnapshot,
    pub version: String,
}
