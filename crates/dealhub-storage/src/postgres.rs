use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealhub_core::{Category, DiscountType, NormalizedOffer, OfferStatus, StoredOffer, UsageMethod};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::offers::{OfferStore, StoreError, UpsertOutcome};

const OFFER_COLUMNS: &str = r#"
    id, dedup_key, created_at, updated_at, owner_tag, name, brand_name, title,
    description, code, discount_type, discount_value, minimum_order, expiry,
    category, visiting_link, source_identifier, usage_method, status, details
"#;

/// Postgres-backed store. The unique `dedup_key` column makes every write a
/// single-statement upsert; no multi-row transactions are used.
#[derive(Debug, Clone)]
pub struct PgOfferStore {
    pool: PgPool,
}

impl PgOfferStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn decode_label<T>(row: &PgRow, column: &str, parse: fn(&str) -> Option<T>) -> Result<T, StoreError> {
    let raw: String = row.try_get(column)?;
    parse(&raw).ok_or_else(|| StoreError::Decode(format!("{column}={raw}")))
}

fn row_to_stored(row: &PgRow) -> Result<StoredOffer, StoreError> {
    Ok(StoredOffer {
        id: row.try_get("id")?,
        dedup_key: row.try_get("dedup_key")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        offer: NormalizedOffer {
            owner_tag: row.try_get("owner_tag")?,
            name: row.try_get("name")?,
            brand_name: row.try_get("brand_name")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            code: row.try_get("code")?,
            discount_type: decode_label(row, "discount_type", DiscountType::from_label)?,
            discount_value: row.try_get("discount_value")?,
            minimum_order: row.try_get("minimum_order")?,
            expiry: row.try_get("expiry")?,
            category: decode_label(row, "category", Category::from_label)?,
            visiting_link: row.try_get("visiting_link")?,
            source_identifier: row.try_get("source_identifier")?,
            usage_method: decode_label(row, "usage_method", UsageMethod::from_label)?,
            status: decode_label(row, "status", OfferStatus::from_label)?,
            details: row.try_get("details")?,
        },
    })
}

#[async_trait]
impl OfferStore for PgOfferStore {
    async fn upsert(&self, offer: &NormalizedOffer, now: DateTime<Utc>) -> Result<UpsertOutcome, StoreError> {
        // xmax is zero only for rows created by this statement.
        let row = sqlx::query(
            r#"
            INSERT INTO offers (
                id, dedup_key, created_at, updated_at, owner_tag, name, brand_name, title,
                description, code, discount_type, discount_value, minimum_order, expiry,
                category, visiting_link, source_identifier, usage_method, status, details
            )
            VALUES ($1, $2, $3, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (dedup_key) DO UPDATE SET
                name = EXCLUDED.name,
                brand_name = EXCLUDED.brand_name,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                code = EXCLUDED.code,
                discount_type = EXCLUDED.discount_type,
                discount_value = EXCLUDED.discount_value,
                minimum_order = EXCLUDED.minimum_order,
                expiry = EXCLUDED.expiry,
                category = EXCLUDED.category,
                visiting_link = EXCLUDED.visiting_link,
                source_identifier = EXCLUDED.source_identifier,
                usage_method = EXCLUDED.usage_method,
                details = EXCLUDED.details,
                status = CASE
                    WHEN offers.status = 'expired' AND EXCLUDED.expiry > EXCLUDED.updated_at THEN 'active'
                    ELSE offers.status
                END,
                updated_at = EXCLUDED.updated_at
            RETURNING id, (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(offer.dedup_key())
        .bind(now)
        .bind(&offer.owner_tag)
        .bind(&offer.name)
        .bind(&offer.brand_name)
        .bind(&offer.title)
        .bind(&offer.description)
        .bind(&offer.code)
        .bind(offer.discount_type.as_str())
        .bind(&offer.discount_value)
        .bind(&offer.minimum_order)
        .bind(offer.expiry)
        .bind(offer.category.as_str())
        .bind(&offer.visiting_link)
        .bind(&offer.source_identifier)
        .bind(offer.usage_method.as_str())
        .bind(offer.status.as_str())
        .bind(&offer.details)
        .fetch_one(&self.pool)
        .await?;

        Ok(UpsertOutcome {
            id: row.try_get("id")?,
            inserted: row.try_get("inserted")?,
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<StoredOffer>, StoreError> {
        let row = sqlx::query(&format!("SELECT {OFFER_COLUMNS} FROM offers WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_stored).transpose()
    }

    async fn list_active(&self) -> Result<Vec<StoredOffer>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE status = 'active' ORDER BY updated_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_stored).collect()
    }

    async fn active_expiring_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StoredOffer>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {OFFER_COLUMNS}
              FROM offers
             WHERE status = 'active'
               AND expiry >= $1
               AND expiry <= $2
             ORDER BY expiry ASC
            "#
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_stored).collect()
    }

    async fn expire_before(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE offers
               SET status = 'expired', updated_at = $1
             WHERE status = 'active'
               AND expiry < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM offers")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as usize)
    }
}
