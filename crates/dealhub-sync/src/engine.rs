use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dealhub_adapters::{
    BrowserSession, DetailExtractor, DetailOptions, Pacing, PageFetcher, ScrapeContext, SourceAdapter,
};
use dealhub_core::NormalizedOffer;
use dealhub_storage::{ListingArchive, OfferStore, StoreError, UpsertOutcome};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::normalize::Normalizer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRunReport {
    pub source_id: String,
    pub candidates: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed_saves: usize,
    /// Set when the adapter could not run at all.
    pub error: Option<String>,
}

impl SourceRunReport {
    fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            candidates: 0,
            inserted: 0,
            updated: 0,
            failed_saves: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub deep_scrape_active: bool,
    pub inserted: usize,
    pub updated: usize,
    pub failed_saves: usize,
    pub sources: Vec<SourceRunReport>,
    #[serde(skip)]
    pub report_path: Option<PathBuf>,
}

impl RunSummary {
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceRunReport> {
        self.sources.iter().filter(|s| s.error.is_some())
    }
}

/// Drives adapters in order, normalizes what they return and upserts it.
pub struct ScrapeEngine {
    store: Arc<dyn OfferStore>,
    normalizer: Normalizer,
    fetcher: Arc<dyn PageFetcher>,
    archive: Option<ListingArchive>,
    pacing: Pacing,
    detail_options: DetailOptions,
    reports_root: Option<PathBuf>,
}

impl ScrapeEngine {
    pub fn new(store: Arc<dyn OfferStore>, normalizer: Normalizer, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            store,
            normalizer,
            fetcher,
            archive: None,
            pacing: Pacing::default(),
            detail_options: DetailOptions::default(),
            reports_root: None,
        }
    }

    pub fn with_archive(mut self, archive: ListingArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_detail_options(mut self, options: DetailOptions) -> Self {
        self.detail_options = options;
        self
    }

    pub fn with_reports_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.reports_root = Some(root.into());
        self
    }

    pub fn store(&self) -> &Arc<dyn OfferStore> {
        &self.store
    }

    /// Upsert by dedup key. Returns `true` when a new record was created.
    pub async fn save_or_update(&self, offer: &NormalizedOffer) -> Result<bool, StoreError> {
        let UpsertOutcome { inserted, .. } = self.store.upsert(offer, Utc::now()).await?;
        Ok(inserted)
    }

    pub async fn run_once(&self, adapters: &[Box<dyn SourceAdapter>]) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id);
        self.run_with_id(run_id, adapters).instrument(span).await
    }

    async fn run_with_id(&self, run_id: Uuid, adapters: &[Box<dyn SourceAdapter>]) -> Result<RunSummary> {
        let started_at = Utc::now();
        info!(adapters = adapters.len(), "sync run started");

        let session = self.open_session(adapters).await;
        let deep_scrape_active = session.is_some();

        let mut sources = Vec::with_capacity(adapters.len());
        {
            let ctx = ScrapeContext {
                run_id,
                fetcher: self.fetcher.as_ref(),
                detail: session.as_ref().map(|s| s as &dyn DetailExtractor),
                archive: self.archive.as_ref(),
                pacing: self.pacing,
            };
            for adapter in adapters {
                sources.push(self.run_adapter(adapter.as_ref(), &ctx).await);
            }
        }

        if let Some(session) = session {
            session.close().await;
        }

        let mut summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            deep_scrape_active,
            inserted: sources.iter().map(|s| s.inserted).sum(),
            updated: sources.iter().map(|s| s.updated).sum(),
            failed_saves: sources.iter().map(|s| s.failed_saves).sum(),
            sources,
            report_path: None,
        };
        summary.report_path = match self.write_report(&summary).await {
            Ok(path) => path,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "run summary not written");
                None
            }
        };

        info!(
            inserted = summary.inserted,
            updated = summary.updated,
            failed_saves = summary.failed_saves,
            failed_sources = summary.failed_sources().count(),
            "sync run finished"
        );
        Ok(summary)
    }

    /// A launch failure only disables deep scraping for this run.
    async fn open_session(&self, adapters: &[Box<dyn SourceAdapter>]) -> Option<BrowserSession> {
        if !adapters.iter().any(|a| a.wants_detail_pages()) {
            return None;
        }
        match BrowserSession::launch(self.detail_options).await {
            Ok(session) => Some(session),
            Err(err) => {
                warn!(error = %err, "browser unavailable; continuing with listing pages only");
                None
            }
        }
    }

    async fn run_adapter(&self, adapter: &dyn SourceAdapter, ctx: &ScrapeContext<'_>) -> SourceRunReport {
        let source_id = adapter.source_id();
        let mut report = SourceRunReport::new(source_id);

        let candidates = match adapter.scrape(ctx).await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(source_id, error = %err, "adapter failed");
                report.error = Some(err.to_string());
                return report;
            }
        };
        report.candidates = candidates.len();

        for raw in &candidates {
            let offer = self
                .normalizer
                .normalize(raw, source_id, adapter.base_url(), Utc::now())
                .await;
            match self.save_or_update(&offer).await {
                Ok(true) => report.inserted += 1,
                Ok(false) => report.updated += 1,
                Err(err) => {
                    warn!(source_id, brand = %offer.brand_name, name = %offer.name, error = %err, "save failed");
                    report.failed_saves += 1;
                }
            }
        }

        info!(
            source_id,
            candidates = report.candidates,
            inserted = report.inserted,
            updated = report.updated,
            "source finished"
        );
        report
    }

    async fn write_report(&self, summary: &RunSummary) -> Result<Option<PathBuf>> {
        let Some(root) = &self.reports_root else {
            return Ok(None);
        };
        let dir = root.join(summary.run_id.to_string());
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        let path = dir.join("run_summary.json");
        let bytes = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use dealhub_adapters::AdapterError;
    use dealhub_core::RawCandidate;
    use dealhub_storage::{FetchError, MemoryOfferStore};

    use super::*;
    use crate::stage::CleaningStage;

    struct NoFetch;

    #[async_trait]
    impl PageFetcher for NoFetch {
        async fn fetch_html(&self, _url: &str) -> Result<Option<String>, FetchError> {
            Ok(None)
        }
    }

    /// Adapter returning canned candidates, or failing outright.
    struct Canned {
        id: &'static str,
        candidates: Option<Vec<RawCandidate>>,
    }

    #[async_trait]
    impl SourceAdapter for Canned {
        fn source_id(&self) -> &'static str {
            self.id
        }

        fn base_url(&self) -> &'static str {
            "https://canned.example/"
        }

        fn wants_detail_pages(&self) -> bool {
            false
        }

        async fn scrape(&self, _ctx: &ScrapeContext<'_>) -> Result<Vec<RawCandidate>, AdapterError> {
            self.candidates
                .clone()
                .ok_or_else(|| AdapterError::Message("site layout changed".into()))
        }
    }

    fn candidate(brand: &str, title: &str, description: &str) -> RawCandidate {
        let mut raw = RawCandidate::new(brand, title);
        raw.description = description.into();
        raw
    }

    fn engine(store: Arc<MemoryOfferStore>) -> ScrapeEngine {
        ScrapeEngine::new(
            store,
            Normalizer::new(CleaningStage::rules_only()),
            Arc::new(NoFetch),
        )
        .with_pacing(Pacing::none())
    }

    #[tokio::test]
    async fn same_brand_and_name_updates_instead_of_inserting() {
        let store = Arc::new(MemoryOfferStore::new());
        let engine = engine(store.clone());
        let normalizer = Normalizer::new(CleaningStage::rules_only());
        let now = Utc::now();

        let first = normalizer
            .normalize(
                &candidate("Zomato", "Flat 40% off on food orders", "Valid on all restaurants"),
                "grabon",
                "https://www.grabon.in/",
                now,
            )
            .await;
        let second = normalizer
            .normalize(
                &candidate("Zomato", "Flat 40% off on food orders", "Valid on orders above Rs 199"),
                "grabon",
                "https://www.grabon.in/",
                now,
            )
            .await;

        assert!(engine.save_or_update(&first).await.unwrap());
        assert!(!engine.save_or_update(&second).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 1);

        let kept = store.snapshot().await.remove(0);
        assert_eq!(kept.offer.description, "Valid on orders above Rs 199");
    }

    #[tokio::test]
    async fn failing_adapter_does_not_stop_the_run() {
        let store = Arc::new(MemoryOfferStore::new());
        let engine = engine(store.clone());
        let adapters: Vec<Box<dyn SourceAdapter>> = vec![
            Box::new(Canned {
                id: "first",
                candidates: Some(vec![candidate("Myntra", "Extra 10% off on fashion", "Sitewide sale")]),
            }),
            Box::new(Canned {
                id: "broken",
                candidates: None,
            }),
            Box::new(Canned {
                id: "last",
                candidates: Some(vec![
                    candidate("Ajio", "Flat 300 off on 999", "New users only"),
                    candidate("Ajio", "Flat 300 off on 999", "Updated terms"),
                ]),
            }),
        ];

        let summary = engine.run_once(&adapters).await.unwrap();

        let ids: Vec<_> = summary.sources.iter().map(|s| s.source_id.as_str()).collect();
        assert_eq!(ids, ["first", "broken", "last"]);
        assert_eq!(summary.sources[1].error.as_deref(), Some("site layout changed"));
        assert_eq!(summary.sources[2].candidates, 2);
        assert_eq!(summary.sources[2].inserted, 1);
        assert_eq!(summary.sources[2].updated, 1);
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.failed_sources().count(), 1);
        assert!(!summary.deep_scrape_active);
        assert!(summary.report_path.is_none());
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn run_summary_is_written_under_run_id() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryOfferStore::new());
        let engine = engine(store).with_reports_root(tmp.path().join("reports"));
        let adapters: Vec<Box<dyn SourceAdapter>> = vec![Box::new(Canned {
            id: "only",
            candidates: Some(vec![candidate("Nykaa", "Buy 1 get 1 free", "On select lipsticks")]),
        })];

        let summary = engine.run_once(&adapters).await.unwrap();
        let path = summary.report_path.clone().unwrap();
        assert_eq!(
            path,
            tmp.path()
                .join("reports")
                .join(summary.run_id.to_string())
                .join("run_summary.json")
        );

        let written: RunSummary = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written.run_id, summary.run_id);
        assert_eq!(written.inserted, 1);
        assert_eq!(written.sources, summary.sources);
    }

    #[tokio::test]
    async fn unwritable_reports_root_still_returns_summary() {
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let store = Arc::new(MemoryOfferStore::new());
        let engine = engine(store.clone()).with_reports_root(blocker.path());
        let adapters: Vec<Box<dyn SourceAdapter>> = vec![Box::new(Canned {
            id: "only",
            candidates: Some(vec![candidate("Nykaa", "Buy 1 get 1 free", "On select lipsticks")]),
        })];

        let summary = engine.run_once(&adapters).await.unwrap();
        assert!(summary.report_path.is_none());
        assert_eq!(summary.inserted, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
