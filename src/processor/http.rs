//! HTTP client for fetching job sources

use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Too many redirects")]
    TooManyRedirects,

    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("Failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<DownloadError>,
    },
}

pub type Result<T> = std::result::Result<T, DownloadError>;

/// Upper bound for a single retry delay
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Delay before the retry that follows attempt `attempt` (1-based)
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub user_agent: String,
    /// First retry delay; doubles on every further attempt
    pub base_backoff: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_retries: 3,
            user_agent: format!("downloader/{}", env!("CARGO_PKG_VERSION")),
            base_backoff: Duration::from_secs(1),
        }
    }
}

/// HTTP downloader
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| DownloadError::RequestFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Download a resource, retrying with exponential backoff
    ///
    /// `timeout` bounds every single attempt, not the whole sequence.
    pub async fn download(&self, url: &str, timeout: Duration) -> Result<Bytes> {
        let max_attempts = self.config.max_retries.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.download_once(url, timeout).await {
                Ok(bytes) => {
                    if attempts > 1 {
                        debug!(url, attempts, "Download succeeded after retry");
                    }
                    return Ok(bytes);
                }
                Err(e) if attempts >= max_attempts || !e.is_retryable() => {
                    warn!(url, attempts, error = %e, "Download failed");
                    if attempts == 1 {
                        return Err(e);
                    }
                    return Err(DownloadError::Exhausted {
                        attempts,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(url, attempts, error = %e, "Download failed, retrying");
                    let backoff = backoff_delay(self.config.base_backoff, attempts);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn download_once(&self, url: &str, timeout: Duration) -> Result<Bytes> {
        debug!(url, "Starting download");

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| classify(e, timeout))?;

        debug!(url, size = bytes.len(), "Download completed");

        Ok(bytes)
    }
}

impl DownloadError {
    /// Client errors other than 408/429 will not change on retry
    fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            DownloadError::TooManyRedirects => false,
            _ => true,
        }
    }
}

fn classify(e: reqwest::Error, timeout: Duration) -> DownloadError {
    if e.is_timeout() {
        DownloadError::Timeout(timeout)
    } else if e.is_redirect() {
        DownloadError::TooManyRedirects
    } else {
        DownloadError::RequestFailed(e.to_string())
    }
}
