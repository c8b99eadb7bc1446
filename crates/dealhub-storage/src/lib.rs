//! Listing archive, HTTP fetch utilities and offer persistence for DealHub.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

mod offers;
mod postgres;

pub use offers::{apply_update, MemoryOfferStore, OfferStore, StoreError, UpsertOutcome};
pub use postgres::PgOfferStore;

pub const CRATE_NAME: &str = "dealhub-storage";

#[derive(Debug, Clone)]
pub struct ArchivedListing {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub already_present: bool,
}

/// Hash-addressed archive of fetched listing pages, kept for selector debugging.
#[derive(Debug, Clone)]
pub struct ListingArchive {
    root: PathBuf,
}

impl ListingArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn relative_path_for(
        &self,
        fetched_at: DateTime<Utc>,
        source_id: &str,
        target_slug: &str,
        content_hash: &str,
    ) -> PathBuf {
        let day = fetched_at.format("%Y%m%d").to_string();
        let short = &content_hash[..content_hash.len().min(12)];
        PathBuf::from(source_id)
            .join(day)
            .join(format!("{target_slug}-{short}.html"))
    }

    /// Write the page once; identical content for the same target and day is not rewritten.
    pub async fn archive(
        &self,
        fetched_at: DateTime<Utc>,
        source_id: &str,
        target_slug: &str,
        html: &str,
    ) -> anyhow::Result<ArchivedListing> {
        let content_hash = Self::sha256_hex(html.as_bytes());
        let relative_path = self.relative_path_for(fetched_at, source_id, target_slug, &content_hash);
        let absolute_path = self.root.join(&relative_path);

        let Some(parent) = absolute_path.parent().map(Path::to_path_buf) else {
            anyhow::bail!("archive path {} has no parent", absolute_path.display());
        };
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating archive directory {}", parent.display()))?;

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking archive path {}", absolute_path.display()))?
        {
            return Ok(ArchivedListing {
                content_hash,
                relative_path,
                absolute_path,
                already_present: true,
            });
        }

        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&temp_path, html.as_bytes())
            .await
            .with_context(|| format!("writing temp archive file {}", temp_path.display()))?;
        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!("moving archive file into place at {}", absolute_path.display())
            });
        }

        Ok(ArchivedListing {
            content_hash,
            relative_path,
            absolute_path,
            already_present: false,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Total attempts including the first request.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}


/// Sequential HTML fetcher. Requests are issued one at a time by the caller;
/// politeness delays live in the adapters, not here.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    /// GET `url` and return its body. `Ok(None)` means the page does not exist (404)
    /// and should be skipped; it is never retried.
    pub async fn fetch_html(&self, url: &str) -> Result<Option<String>, FetchError> {
        let span = info_span!("http_fetch", url);
        self.fetch_with_retries(url).instrument(span).await
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<Option<String>, FetchError> {
        let attempts = self.backoff.max_attempts.max(1);
        let mut attempt = 0usize;

        loop {
            let is_last = attempt + 1 >= attempts;
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status == StatusCode::NOT_FOUND {
                        debug!(%final_url, "listing not found");
                        return Ok(None);
                    }

                    if status.is_success() {
                        let body = resp.text().await?;
                        return Ok(Some(body));
                    }

                    if classify_status(status) == RetryDisposition::Retryable && !is_last {
                        warn!(status = status.as_u16(), attempt, "retryable status, backing off");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable && !is_last {
                        warn!(error = %err, attempt, "request failed, backing off");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}
