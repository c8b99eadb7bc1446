//! Source adapter contracts, the shared catalog loop, and per-site strategies.

use std::time::Duration;

use async_trait::async_trait;
use dealhub_core::RawCandidate;
use dealhub_storage::{FetchError, HttpFetcher, ListingArchive};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod detail;
pub mod listing;
pub mod sites;

pub use detail::{BrowserSession, DetailError, DetailExtractor, DetailOptions, DetailPage, DetailSelectors};
pub use listing::{classify_discount, listing_code, CatalogAdapter, CatalogTarget, SelectorChain, SiteStrategy};

pub const CRATE_NAME: &str = "dealhub-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Where adapters get listing HTML from. `Ok(None)` means "not found, skip".
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Result<Option<String>, FetchError>;
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_html(&self, url: &str) -> Result<Option<String>, FetchError> {
        HttpFetcher::fetch_html(self, url).await
    }
}

/// Fixed delays inserted between requests to third-party sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub between_targets: Duration,
    pub between_details: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            between_targets: Duration::from_millis(1000),
            between_details: Duration::from_millis(1500),
        }
    }
}

impl Pacing {
    pub fn none() -> Self {
        Self {
            between_targets: Duration::ZERO,
            between_details: Duration::ZERO,
        }
    }

    pub async fn pause_between_targets(&self) {
        if !self.between_targets.is_zero() {
            tokio::time::sleep(self.between_targets).await;
        }
    }

    pub async fn pause_between_details(&self) {
        if !self.between_details.is_zero() {
            tokio::time::sleep(self.between_details).await;
        }
    }
}

/// Per-source switches read from the source registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterSettings {
    pub deep_scrape: bool,
    pub max_detail_pages: usize,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            deep_scrape: false,
            max_detail_pages: 5,
        }
    }
}

/// Run-scoped resources handed to every adapter.
pub struct ScrapeContext<'a> {
    pub run_id: Uuid,
    pub fetcher: &'a dyn PageFetcher,
    /// Present only when a browser session was opened for this run.
    pub detail: Option<&'a dyn DetailExtractor>,
    pub archive: Option<&'a ListingArchive>,
    pub pacing: Pacing,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;
    fn base_url(&self) -> &'static str;

    /// Whether this adapter would use a browser session if one were available.
    fn wants_detail_pages(&self) -> bool;

    /// Scrape every catalog target. Individual target failures are logged and
    /// skipped; an `Err` means the adapter could not run at all.
    async fn scrape(&self, ctx: &ScrapeContext<'_>) -> Result<Vec<RawCandidate>, AdapterError>;
}

pub const KNOWN_SOURCES: &[&str] = &["grabon", "coupondunia", "cashkaro", "desidime"];

pub fn adapter_for_source(source_id: &str, settings: AdapterSettings) -> Option<Box<dyn SourceAdapter>> {
    match source_id {
        "grabon" => Some(Box::new(CatalogAdapter::new(sites::GrabOn, settings))),
        "coupondunia" => Some(Box::new(CatalogAdapter::new(sites::CouponDunia, settings))),
        "cashkaro" => Some(Box::new(CatalogAdapter::new(sites::CashKaro, settings))),
        "desidime" => Some(Box::new(CatalogAdapter::new(sites::DesiDime, settings))),
        _ => None,
    }
}
