use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use dealhub_adapters::{DetailOptions, PageFetcher};
use dealhub_storage::{HttpClientConfig, HttpFetcher, ListingArchive, OfferStore};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::ai::AiCleaner;
use crate::config::{SourceRegistry, SyncConfig};
use crate::engine::{RunSummary, ScrapeEngine};
use crate::llm::{LlmClient, OpenAiClient};
use crate::normalize::Normalizer;
use crate::reminders::{sweep_and_remind, LogReminderSink, MaintenanceReport, ReminderSink};
use crate::stage::CleaningStage;

/// Everything a sync or maintenance pass needs, built once from config.
pub struct SyncRuntime {
    config: SyncConfig,
    engine: ScrapeEngine,
    sink: Box<dyn ReminderSink>,
    // scheduled jobs never overlap
    run_lock: Mutex<()>,
}

impl SyncRuntime {
    pub fn from_config(config: SyncConfig, store: Arc<dyn OfferStore>) -> Result<Self> {
        let fetcher = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        let engine = Self::engine_for(&config, store, Arc::new(fetcher))?;
        Ok(Self {
            config,
            engine,
            sink: Box::new(LogReminderSink),
            run_lock: Mutex::new(()),
        })
    }

    pub fn with_fetcher(config: SyncConfig, store: Arc<dyn OfferStore>, fetcher: Arc<dyn PageFetcher>) -> Result<Self> {
        let engine = Self::engine_for(&config, store, fetcher)?;
        Ok(Self {
            config,
            engine,
            sink: Box::new(LogReminderSink),
            run_lock: Mutex::new(()),
        })
    }

    pub fn with_sink(mut self, sink: Box<dyn ReminderSink>) -> Self {
        self.sink = sink;
        self
    }

    fn engine_for(config: &SyncConfig, store: Arc<dyn OfferStore>, fetcher: Arc<dyn PageFetcher>) -> Result<ScrapeEngine> {
        let stage = match &config.ai {
            Some(ai_config) => {
                let client = OpenAiClient::new(ai_config.clone()).context("building openai client")?;
                let primary = client.default_model().to_string();
                let client: Arc<dyn LlmClient> = Arc::new(client);
                info!(model = %primary, "ai cleaning enabled");
                CleaningStage::with_ai(AiCleaner::new(
                    client,
                    primary,
                    config.ai_alternate_model.clone(),
                    Duration::from_secs(config.ai_timeout_secs),
                ))
            }
            None => {
                info!("no OPENAI_API_KEY; cleaning with local rules only");
                CleaningStage::rules_only()
            }
        };

        let mut engine = ScrapeEngine::new(store, Normalizer::new(stage), fetcher)
            .with_pacing(config.pacing())
            .with_detail_options(DetailOptions::default())
            .with_reports_root(config.reports_root());
        if config.archive_listings {
            engine = engine.with_archive(ListingArchive::new(config.artifacts_dir.clone()));
        }
        Ok(engine)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn OfferStore> {
        self.engine.store()
    }

    pub async fn run_sync(&self) -> Result<RunSummary> {
        let _guard = self.run_lock.lock().await;
        let registry = SourceRegistry::load(&self.config.sources_file).await?;
        let adapters = registry.enabled_adapters();
        self.engine.run_once(&adapters).await
    }

    pub async fn run_maintenance(&self) -> Result<MaintenanceReport> {
        let _guard = self.run_lock.lock().await;
        sweep_and_remind(
            self.engine.store().as_ref(),
            self.sink.as_ref(),
            Utc::now(),
            self.config.reminder_window_days,
        )
        .await
    }
}

/// Cron jobs for every sync schedule plus the daily sweep. The caller starts it.
pub async fn build_scheduler(runtime: Arc<SyncRuntime>) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;

    for cron in &runtime.config().sync_crons {
        let rt = runtime.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let rt = rt.clone();
            Box::pin(async move {
                match rt.run_sync().await {
                    Ok(summary) => info!(run_id = %summary.run_id, inserted = summary.inserted, "scheduled sync done"),
                    Err(err) => error!(error = %format!("{err:#}"), "scheduled sync failed"),
                }
            })
        })
        .with_context(|| format!("creating sync job for cron {cron}"))?;
        sched.add(job).await.context("adding sync job")?;
    }

    let sweep_cron = runtime.config().sweep_cron.clone();
    let rt = runtime.clone();
    let job = Job::new_async(sweep_cron.as_str(), move |_uuid, _l| {
        let rt = rt.clone();
        Box::pin(async move {
            match rt.run_maintenance().await {
                Ok(report) => info!(expired = report.expired, reminded = report.reminded, "scheduled sweep done"),
                Err(err) => warn!(error = %format!("{err:#}"), "scheduled sweep failed"),
            }
        })
    })
    .with_context(|| format!("creating sweep job for cron {sweep_cron}"))?;
    sched.add(job).await.context("adding sweep job")?;

    Ok(sched)
}
