//! Offer persistence seam with upsert-by-key semantics.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealhub_core::{NormalizedOffer, OfferStatus, StoredOffer};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("undecodable offer row: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: Uuid,
    pub inserted: bool,
}

#[async_trait]
pub trait OfferStore: Send + Sync {
    /// Insert the offer, or update the record sharing its dedup key.
    async fn upsert(&self, offer: &NormalizedOffer, now: DateTime<Utc>) -> Result<UpsertOutcome, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<StoredOffer>, StoreError>;

    async fn list_active(&self) -> Result<Vec<StoredOffer>, StoreError>;

    /// Active offers with `from <= expiry <= to`, soonest first.
    async fn active_expiring_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StoredOffer>, StoreError>;

    /// Mark active offers whose expiry is before `now` as expired. Returns the count.
    async fn expire_before(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

/// Copy the mutable fields of `incoming` onto an existing record.
///
/// Identity (`id`, `created_at`) is kept; the owner is part of the key so it
/// never changes here. A redeemed offer stays
/// redeemed; an expired one is reactivated only when the fresh scrape pushes its
/// expiry into the future.
pub fn apply_update(existing: &mut StoredOffer, incoming: &NormalizedOffer, now: DateTime<Utc>) {
    let status = match existing.offer.status {
        OfferStatus::Expired if incoming.expiry > now => OfferStatus::Active,
        other => other,
    };
    existing.offer = NormalizedOffer {
        status,
        ..incoming.clone()
    };
    existing.updated_at = now;
}

/// In-process store used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryOfferStore {
    offers: Mutex<BTreeMap<String, StoredOffer>>,
}

impl MemoryOfferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<StoredOffer> {
        self.offers.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl OfferStore for MemoryOfferStore {
    async fn upsert(&self, offer: &NormalizedOffer, now: DateTime<Utc>) -> Result<UpsertOutcome, StoreError> {
        let key = offer.dedup_key();
        let mut offers = self.offers.lock().await;
        if let Some(existing) = offers.get_mut(&key) {
            apply_update(existing, offer, now);
            return Ok(UpsertOutcome {
                id: existing.id,
                inserted: false,
            });
        }

        let id = Uuid::new_v4();
        offers.insert(
            key.clone(),
            StoredOffer {
                id,
                dedup_key: key,
                created_at: now,
                updated_at: now,
                offer: offer.clone(),
            },
        );
        Ok(UpsertOutcome { id, inserted: true })
    }

    async fn get(&self, id: Uuid) -> Result<Option<StoredOffer>, StoreError> {
        Ok(self
            .offers
            .lock()
            .await
            .values()
            .find(|o| o.id == id)
            .cloned())
    }

    async fn list_active(&self) -> Result<Vec<StoredOffer>, StoreError> {
        let mut out = self
            .offers
            .lock()
            .await
            .values()
            .filter(|o| o.offer.status == OfferStatus::Active)
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    async fn active_expiring_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StoredOffer>, StoreError> {
        let mut out = self
            .offers
            .lock()
            .await
            .values()
            .filter(|o| {
                o.offer.status == OfferStatus::Active && o.offer.expiry >= from && o.offer.expiry <= to
            })
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by_key(|o| o.offer.expiry);
        Ok(out)
    }

    async fn expire_before(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut offers = self.offers.lock().await;
        let mut expired = 0usize;
        for stored in offers.values_mut() {
            if stored.offer.status == OfferStatus::Active && stored.offer.expiry < now {
                stored.offer.status = OfferStatus::Expired;
                stored.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.offers.lock().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use dealhub_core::{Category, DiscountType, UsageMethod, SYSTEM_OWNER_TAG};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().unwrap()
    }

    fn offer(brand: &str, name: &str, expiry: DateTime<Utc>) -> NormalizedOffer {
        NormalizedOffer {
            owner_tag: SYSTEM_OWNER_TAG.into(),
            name: name.into(),
            brand_name: brand.into(),
            title: name.into(),
            description: format!("{name} on every order"),
            code: Some("ZOM40".into()),
            discount_type: DiscountType::Percentage,
            discount_value: Some("40%".into()),
            minimum_order: None,
            expiry,
            category: Category::Food,
            visiting_link: "https://www.zomato.com".into(),
            source_identifier: "grabon".into(),
            usage_method: UsageMethod::Both,
            status: OfferStatus::Active,
            details: None,
        }
    }

    #[tokio::test]
    async fn second_upsert_with_same_key_updates_in_place() {
        let store = MemoryOfferStore::new();
        let first = store
            .upsert(&offer("Zomato", "40% Off", now() + Duration::days(5)), now())
            .await
            .unwrap();
        let mut changed = offer("zomato", "40% off", now() + Duration::days(9));
        changed.description = "Fresh copy of the description".into();
        let second = store.upsert(&changed, now() + Duration::hours(1)).await.unwrap();

        assert!(first.inserted);
        assert!(!second.inserted);
        assert_eq!(first.id, second.id);
        assert_eq!(store.count().await.unwrap(), 1);
        let stored = store.get(first.id).await.unwrap().unwrap();
        assert_eq!(stored.offer.description, "Fresh copy of the description");
        assert_eq!(stored.created_at, now());
    }

    #[tokio::test]
    async fn system_upsert_leaves_user_coupon_untouched() {
        let store = MemoryOfferStore::new();
        let mine = NormalizedOffer {
            owner_tag: "user-42".into(),
            code: Some("MYCODE1".into()),
            source_identifier: "manual".into(),
            ..offer("Zomato", "40% Off", now() + Duration::days(5))
        };
        let user = store.upsert(&mine, now()).await.unwrap();
        let system = store
            .upsert(&offer("Zomato", "40% Off", now() + Duration::days(9)), now())
            .await
            .unwrap();

        assert!(user.inserted);
        assert!(system.inserted);
        assert_ne!(user.id, system.id);
        assert_eq!(store.count().await.unwrap(), 2);
        let kept = store.get(user.id).await.unwrap().unwrap();
        assert_eq!(kept.offer.owner_tag, "user-42");
        assert_eq!(kept.offer.code.as_deref(), Some("MYCODE1"));
        assert_eq!(kept.offer.source_identifier, "manual");
        assert_eq!(kept.offer.expiry, now() + Duration::days(5));
    }

    #[tokio::test]
    async fn expiry_sweep_and_window_queries() {
        let store = MemoryOfferStore::new();
        store
            .upsert(&offer("Zomato", "Old deal", now() - Duration::days(1)), now())
            .await
            .unwrap();
        store
            .upsert(&offer("Swiggy", "Soon deal", now() + Duration::days(2)), now())
            .await
            .unwrap();
        store
            .upsert(&offer("Myntra", "Later deal", now() + Duration::days(20)), now())
            .await
            .unwrap();

        assert_eq!(store.expire_before(now()).await.unwrap(), 1);
        assert_eq!(store.expire_before(now()).await.unwrap(), 0);
        assert_eq!(store.list_active().await.unwrap().len(), 2);

        let soon = store
            .active_expiring_between(now(), now() + Duration::days(3))
            .await
            .unwrap();
        assert_eq!(soon.len(), 1);
        assert_eq!(soon[0].offer.brand_name, "Swiggy");
    }

    #[test]
    fn update_reactivates_expired_offer_only_for_future_expiry() {
        let mut stored = StoredOffer {
            id: Uuid::new_v4(),
            dedup_key: "system::zomato::x".into(),
            created_at: now(),
            updated_at: now(),
            offer: NormalizedOffer {
                status: OfferStatus::Expired,
                ..offer("Zomato", "x", now() - Duration::days(1))
            },
        };
        apply_update(&mut stored, &offer("Zomato", "x", now() - Duration::hours(1)), now());
        assert_eq!(stored.offer.status, OfferStatus::Expired);

        apply_update(&mut stored, &offer("Zomato", "x", now() + Duration::days(3)), now());
        assert_eq!(stored.offer.status, OfferStatus::Active);

        stored.offer.status = OfferStatus::Redeemed;
        apply_update(&mut stored, &offer("Zomato", "x", now() + Duration::days(3)), now());
        assert_eq!(stored.offer.status, OfferStatus::Redeemed);
    }
}
