//! Core domain model for DealHub offers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "dealhub-core";

/// Owner tag stamped on every record produced by the scraping pipeline.
/// User-submitted and privately-synced coupons carry the owning user's id instead.
pub const SYSTEM_OWNER_TAG: &str = "system";

pub const NAME_MAX_CHARS: usize = 100;
pub const TITLE_MAX_CHARS: usize = 200;
pub const DESCRIPTION_MIN_CHARS: usize = 10;
pub const DESCRIPTION_MAX_CHARS: usize = 1000;
pub const CODE_MIN_LEN: usize = 3;
pub const CODE_MAX_LEN: usize = 20;

/// Call-to-action button labels that listing pages render where a code would be.
pub const CTA_PHRASES: &[&str] = &[
    "SHOW CODE",
    "GET CODE",
    "REVEAL CODE",
    "VIEW CODE",
    "COPY CODE",
    "APPLY CODE",
    "USE CODE",
    "GET DEAL",
    "GRAB DEAL",
    "ACTIVATE DEAL",
    "SHOP NOW",
    "GRAB NOW",
    "CLICK HERE",
    "NO CODE NEEDED",
    "NO CODE REQUIRED",
    "GET CASHBACK",
    "ACTIVATE CASHBACK",
];

/// True when `text` is, or contains, one of [`CTA_PHRASES`] (case-insensitive).
pub fn contains_cta_phrase(text: &str) -> bool {
    let upper = text.to_uppercase();
    let squashed: String = upper.chars().filter(|c| c.is_alphanumeric()).collect();
    CTA_PHRASES.iter().any(|phrase| {
        let phrase_squashed: String = phrase.chars().filter(|c| c.is_alphanumeric()).collect();
        upper.contains(phrase) || squashed.contains(&phrase_squashed)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Flat,
    Cashback,
    Freebie,
    #[default]
    Unknown,
}

impl DiscountType {
    pub const ALL: [DiscountType; 5] = [
        DiscountType::Percentage,
        DiscountType::Flat,
        DiscountType::Cashback,
        DiscountType::Freebie,
        DiscountType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Percentage => "percentage",
            DiscountType::Flat => "flat",
            DiscountType::Cashback => "cashback",
            DiscountType::Freebie => "freebie",
            DiscountType::Unknown => "unknown",
        }
    }

    /// Case-insensitive exact match against the enum labels.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(label))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    All,
    Food,
    Fashion,
    Electronics,
    Travel,
    Beauty,
    Grocery,
    Entertainment,
    Health,
    Home,
    Recharge,
    Other,
}

impl Category {
    pub const ALL: [Category; 12] = [
        Category::All,
        Category::Food,
        Category::Fashion,
        Category::Electronics,
        Category::Travel,
        Category::Beauty,
        Category::Grocery,
        Category::Entertainment,
        Category::Health,
        Category::Home,
        Category::Recharge,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::All => "All",
            Category::Food => "Food",
            Category::Fashion => "Fashion",
            Category::Electronics => "Electronics",
            Category::Travel => "Travel",
            Category::Beauty => "Beauty",
            Category::Grocery => "Grocery",
            Category::Entertainment => "Entertainment",
            Category::Health => "Health",
            Category::Home => "Home",
            Category::Recharge => "Recharge",
            Category::Other => "Other",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(label))
    }
}

/// How an offer is redeemed. Always derived, never read from upstream text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageMethod {
    Code,
    Link,
    Both,
    None,
}

impl UsageMethod {
    pub fn derive(has_code: bool, has_link: bool) -> Self {
        match (has_code, has_link) {
            (true, true) => UsageMethod::Both,
            (true, false) => UsageMethod::Code,
            (false, true) => UsageMethod::Link,
            (false, false) => UsageMethod::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UsageMethod::Code => "code",
            UsageMethod::Link => "link",
            UsageMethod::Both => "both",
            UsageMethod::None => "none",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        [
            UsageMethod::Code,
            UsageMethod::Link,
            UsageMethod::Both,
            UsageMethod::None,
        ]
        .into_iter()
        .find(|v| v.as_str().eq_ignore_ascii_case(label.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    #[default]
    Active,
    Redeemed,
    Expired,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Active => "active",
            OfferStatus::Redeemed => "redeemed",
            OfferStatus::Expired => "expired",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        [OfferStatus::Active, OfferStatus::Redeemed, OfferStatus::Expired]
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(label.trim()))
    }
}

/// Unvalidated record handed from adapters to the normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawCandidate {
    pub brand_name: String,
    pub title: String,
    pub description: String,
    pub code: Option<String>,
    pub discount_type_hint: DiscountType,
    pub discount_value_hint: Option<String>,
    pub category: Option<String>,
    pub link: Option<String>,
    pub terms: Option<String>,
    /// Absolute url of the offer's detail page, when the listing exposes one.
    pub detail_url: Option<String>,
}

impl RawCandidate {
    pub fn new(brand_name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            brand_name: brand_name.into(),
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Canonical persisted offer shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedOffer {
    pub owner_tag: String,
    pub name: String,
    pub brand_name: String,
    pub title: String,
    pub description: String,
    pub code: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Option<String>,
    pub minimum_order: Option<String>,
    pub expiry: DateTime<Utc>,
    pub category: Category,
    pub visiting_link: String,
    pub source_identifier: String,
    pub usage_method: UsageMethod,
    pub status: OfferStatus,
    pub details: Option<String>,
}

impl NormalizedOffer {
    pub fn dedup_key(&self) -> String {
        dedup_key(&self.owner_tag, &self.brand_name, &self.name)
    }
}

/// A normalized offer plus its store identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOffer {
    pub id: Uuid,
    pub dedup_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub offer: NormalizedOffer,
}

/// Lowercase and collapse whitespace. Symbols such as `%` and `₹` are kept.
pub fn normalize_key_fragment(input: &str) -> String {
    input
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Composite identity used for save-or-update: (brand, offer name), scoped to
/// the owner so scraped offers never match a user's own coupon.
pub fn dedup_key(owner_tag: &str, brand_name: &str, name: &str) -> String {
    format!(
        "{}::{}::{}",
        owner_tag.trim(),
        normalize_key_fragment(brand_name),
        normalize_key_fragment(name)
    )
}
