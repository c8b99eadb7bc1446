//! Cleaning, normalization and the scrape engine, plus the config, scheduling
//! and maintenance jobs that drive them.

pub mod ai;
pub mod clean;
pub mod config;
pub mod engine;
pub mod llm;
pub mod normalize;
pub mod reminders;
pub mod scheduler;
pub mod stage;

pub use ai::AiCleaner;
pub use clean::{CleanError, CleanedFields, Cleaner, RuleBasedCleaner};
pub use config::{SourceEntry, SourceRegistry, SyncConfig};
pub use engine::{RunSummary, ScrapeEngine, SourceRunReport};
pub use normalize::Normalizer;
pub use reminders::{
    select_reminders, sweep, sweep_and_remind, LogReminderSink, MaintenanceReport, ReminderError, ReminderSink,
};
pub use scheduler::{build_scheduler, SyncRuntime};
pub use stage::CleaningStage;

pub const CRATE_NAME: &str = "dealhub-sync";
