use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dealhub_storage::{MemoryOfferStore, OfferStore, PgOfferStore};
use dealhub_sync::{build_scheduler, SyncConfig, SyncRuntime};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "dealhub-cli")]
#[command(about = "DealHub coupon aggregator command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scrape every enabled source once and upsert the results.
    Sync {
        /// Keep results in memory instead of writing to Postgres.
        #[arg(long)]
        dry_run: bool,
    },
    Migrate,
    Serve,
    /// Run the sync and sweep cron jobs until interrupted.
    Schedule,
    /// Expire past offers and log the ones expiring soon.
    Sweep,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let builder = tracing_subscriber::registry().with(filter);

    if matches!(std::env::var("DEALHUB_LOG_JSON").as_deref(), Ok("1")) {
        let _ = builder.with(fmt_layer.json().flatten_event(true)).try_init();
    } else {
        let _ = builder.with(fmt_layer.compact()).try_init();
    }
}

async fn postgres_store(config: &SyncConfig) -> Result<PgOfferStore> {
    PgOfferStore::connect(&config.database_url)
        .await
        .context("connecting to DATABASE_URL")
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync { dry_run: false }) {
        Commands::Sync { dry_run } => {
            let store: Arc<dyn OfferStore> = if dry_run {
                Arc::new(MemoryOfferStore::new())
            } else {
                Arc::new(postgres_store(&config).await?)
            };
            let runtime = SyncRuntime::from_config(config, store)?;
            let summary = runtime.run_sync().await?;
            println!(
                "sync complete: run_id={} inserted={} updated={} failed_saves={} failed_sources={}",
                summary.run_id,
                summary.inserted,
                summary.updated,
                summary.failed_saves,
                summary.failed_sources().count()
            );
            if let Some(path) = &summary.report_path {
                println!("report: {}", path.display());
            }
        }
        Commands::Migrate => {
            postgres_store(&config).await?.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Serve => {
            dealhub_web::serve_from_env().await?;
        }
        Commands::Schedule => {
            let store = Arc::new(postgres_store(&config).await?);
            let runtime = Arc::new(SyncRuntime::from_config(config, store)?);
            let mut sched = build_scheduler(runtime).await?;
            sched.start().await.context("starting scheduler")?;
            info!("scheduler running; ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Sweep => {
            let store = Arc::new(postgres_store(&config).await?);
            let runtime = SyncRuntime::from_config(config, store)?;
            let report = runtime.run_maintenance().await?;
            println!("sweep complete: expired={} expiring_soon={}", report.expired, report.reminded);
        }
    }

    Ok(())
}
