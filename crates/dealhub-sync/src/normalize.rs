use chrono::{DateTime, Duration, Utc};
use dealhub_core::{
    Category, NormalizedOffer, OfferStatus, RawCandidate, UsageMethod, DESCRIPTION_MAX_CHARS,
    DESCRIPTION_MIN_CHARS, NAME_MAX_CHARS, SYSTEM_OWNER_TAG, TITLE_MAX_CHARS,
};

use crate::clean::{collapse_whitespace, truncate_chars};
use crate::stage::CleaningStage;

pub const DEFAULT_EXPIRY_DAYS: i64 = 30;

/// Turns adapter output into the canonical offer shape.
pub struct Normalizer {
    stage: CleaningStage,
    default_expiry: Duration,
}

impl Normalizer {
    pub fn new(stage: CleaningStage) -> Self {
        Self {
            stage,
            default_expiry: Duration::days(DEFAULT_EXPIRY_DAYS),
        }
    }

    pub async fn normalize(
        &self,
        raw: &RawCandidate,
        source_id: &str,
        base_url: &str,
        now: DateTime<Utc>,
    ) -> NormalizedOffer {
        let fields = self.stage.extract(raw).await;
        let brand_name = collapse_whitespace(&raw.brand_name);
        let title = truncate_chars(&fields.title, TITLE_MAX_CHARS);
        let description = pad_description(fields.description.as_deref(), &brand_name, &title);

        // usage reflects an offer-specific link, not the site fallback below
        let usage_method = UsageMethod::derive(fields.code.is_some(), fields.link.is_some());

        NormalizedOffer {
            owner_tag: SYSTEM_OWNER_TAG.to_string(),
            name: truncate_chars(&fields.name, NAME_MAX_CHARS),
            brand_name,
            title,
            description: truncate_chars(&description, DESCRIPTION_MAX_CHARS),
            code: fields.code,
            discount_type: fields.discount_type,
            discount_value: fields.discount_value,
            minimum_order: fields.minimum_order,
            expiry: now + self.default_expiry,
            category: fields.category.unwrap_or(Category::Other),
            visiting_link: fields.link.unwrap_or_else(|| base_url.to_string()),
            source_identifier: source_id.to_string(),
            usage_method,
            status: OfferStatus::Active,
            details: fields.details,
        }
    }
}

/// Missing or short descriptions get a sentence naming the brand.
fn pad_description(description: Option<&str>, brand: &str, title: &str) -> String {
    match description {
        Some(text) if text.chars().count() >= DESCRIPTION_MIN_CHARS => text.to_string(),
        Some(text) => format!("{text} Offer from {brand}."),
        None if title.is_empty() => format!("Offer from {brand}."),
        None => format!("Offer from {brand}: {title}"),
    }
}
