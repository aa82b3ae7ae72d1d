//! Streaming artifact downloader.
//!
//! Downloads go to a different host policy than the listing endpoint, so
//! this client is not routed through the portal rate limiter. Redirects are
//! followed (the instance endpoint answers 302), bodies are streamed to disk
//! in bounded chunks, and the SHA-256 is computed on the fly.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use fund_report_core::config::DownloadConfig;
use fund_report_core::error::{IngestError, IngestResult};
use fund_report_core::models::ArtifactRecord;

/// **Downloader**
///
/// Fetches one URL to one destination path with a total timeout, retry of
/// transient failures, and an integrity hash over the streamed bytes.
pub struct Downloader {
    client: Client,
    config: DownloadConfig,
}

impl Downloader {
    pub fn new(config: DownloadConfig, user_agent: &str) -> IngestResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|e| IngestError::Internal(format!("invalid user agent: {}", e)))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IngestError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Fetch `url` into `destination`, creating parent directories.
    pub async fn download(&self, url: &str, destination: &Path) -> IngestResult<ArtifactRecord> {
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        debug!(url, dest = %destination.display(), "downloading artifact");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let mut file = tokio::fs::File::create(destination).await?;
        let mut hasher = Sha256::new();
        let mut bytes: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.map_transport(e))?;
            hasher.update(&chunk);
            bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        let file_path = destination
            .canonicalize()
            .unwrap_or_else(|_| destination.to_path_buf())
            .to_string_lossy()
            .into_owned();

        Ok(ArtifactRecord {
            url: url.to_string(),
            file_path,
            bytes,
            sha256: hex::encode(hasher.finalize()),
            fetched_at: Utc::now(),
        })
    }

    /// [`Self::download`] with exponential backoff on transient failures.
    ///
    /// Timeouts and network errors retry (initial delay doubling per
    /// attempt, 3 attempts by default); HTTP 4xx is terminal immediately.
    pub async fn download_with_retry(
        &self,
        url: &str,
        destination: &Path,
    ) -> IngestResult<ArtifactRecord> {
        let mut delay = Duration::from_secs(self.config.initial_retry_delay_secs);
        let mut attempt: u32 = 1;

        loop {
            match self.download(url, destination).await {
                Ok(record) => return Ok(record),
                Err(err) if err.is_retryable() && attempt < self.config.max_attempts => {
                    warn!(
                        url,
                        attempt,
                        delay_secs = delay.as_secs_f64(),
                        "transient download failure, retrying: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn map_transport(&self, err: reqwest::Error) -> IngestError {
        if err.is_timeout() {
            IngestError::Timeout {
                operation: "download".to_string(),
                seconds: self.config.timeout_secs,
            }
        } else {
            IngestError::Network(err.to_string())
        }
    }
}
