//! Expiry sweep and the "expiring soon" reminder selection.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dealhub_core::StoredOffer;
use dealhub_storage::{OfferStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("reminder window of {0} days is out of range")]
    Window(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Mark every active offer whose expiry has passed as expired.
pub async fn sweep(store: &dyn OfferStore, now: DateTime<Utc>) -> Result<usize, StoreError> {
    let expired = store.expire_before(now).await?;
    info!(expired, "expiry sweep finished");
    Ok(expired)
}

/// Active offers expiring within `[now, now + window_days]`, soonest first.
///
/// Negative windows select nothing; a window whose end is not a representable
/// timestamp is rejected.
pub async fn select_reminders(
    store: &dyn OfferStore,
    now: DateTime<Utc>,
    window_days: i64,
) -> Result<Vec<StoredOffer>, ReminderError> {
    let until = Duration::try_days(window_days.max(0))
        .and_then(|window| now.checked_add_signed(window))
        .ok_or(ReminderError::Window(window_days))?;
    Ok(store.active_expiring_between(now, until).await?)
}

#[async_trait]
pub trait ReminderSink: Send + Sync {
    async fn deliver(&self, batch: &[StoredOffer]) -> anyhow::Result<()>;
}

/// Emits one structured log event per offer.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReminderSink;

#[async_trait]
impl ReminderSink for LogReminderSink {
    async fn deliver(&self, batch: &[StoredOffer]) -> anyhow::Result<()> {
        for stored in batch {
            info!(
                offer_id = %stored.id,
                brand = %stored.offer.brand_name,
                name = %stored.offer.name,
                expiry = %stored.offer.expiry,
                "offer expiring soon"
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub reminded: usize,
}

/// Sweep first so reminders never include offers that just expired.
pub async fn sweep_and_remind(
    store: &dyn OfferStore,
    sink: &dyn ReminderSink,
    now: DateTime<Utc>,
    window_days: i64,
) -> anyhow::Result<MaintenanceReport> {
    let expired = sweep(store, now).await?;
    let batch = select_reminders(store, now, window_days).await?;
    if !batch.is_empty() {
        sink.deliver(&batch).await?;
    }
    Ok(MaintenanceReport {
        expired,
        reminded: batch.len(),
    })
}
