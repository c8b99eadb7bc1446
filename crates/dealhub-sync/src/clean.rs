//! Field segregation: turning a scraped candidate into validated offer fields.
//!
//! Every path out of the cleaning stage goes through [`CleanedFields::finalize`],
//! so code validation and usage derivation are the same whether the fields came
//! from the AI backend, the local rules, or a mix of both.

use std::sync::LazyLock;

use async_trait::async_trait;
use dealhub_core::{
    Category, DiscountType, RawCandidate, UsageMethod, CODE_MAX_LEN, CODE_MIN_LEN, CTA_PHRASES,
    DESCRIPTION_MIN_CHARS, NAME_MAX_CHARS,
};
use regex::Regex;
use strsim::jaro_winkler;
use thiserror::Error;
use url::Url;

use crate::llm::LlmError;

/// Descriptions at least this similar to the title are treated as copies of it.
pub const DESCRIPTION_TITLE_SIMILARITY: f64 = 0.92;
/// Digitless codes with at least [`VOWEL_CHECK_MIN_LETTERS`] letters and a higher vowel share read as words.
pub const VOWEL_RATIO_LIMIT: f64 = 0.6;
pub const VOWEL_CHECK_MIN_LETTERS: usize = 5;
/// Digit-less codes longer than this are almost always marketing copy.
pub const DIGITLESS_CODE_MAX_LEN: usize = 15;

const MARKETING_WORDS: &[&str] = &[
    "FREESHIPPING",
    "SHIPPING",
    "UNLOCKED",
    "UNLOCK",
    "ACTIVATED",
    "EXCLUSIVE",
    "VERIFIED",
    "DISCOUNT",
    "CASHBACK",
    "OFFER",
    "DEAL",
    "SALE",
    "COUPON",
    "EXPIRED",
    "CLICK",
];

const DESCRIPTION_FILLER: &str = "Limited period offer.";

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+").expect("url regex"));
static EMBEDDED_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z0-9]{4,20}\b").expect("embedded code regex"));
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)
        \b(?:valid\s+(?:till|until|upto|up\s+to)|expires?(?:\s+on)?|ends?\s+on)\s*:?\s*[^|,;]*
        | \b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b
        | \b\d{1,2}(?:st|nd|rd|th)?\s+(?:jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?(?:,?\s+\d{4})?\b
        | \b(?:jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?\s+\d{1,2}(?:st|nd|rd|th)?(?:,?\s+\d{4})?\b
        ",
    )
    .expect("date regex")
});
static CTA_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = CTA_PHRASES
        .iter()
        .map(|p| p.split(' ').map(regex::escape).collect::<Vec<_>>().join(r"[\s\-_]*"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).expect("cta regex")
});
static DISCOUNT_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?\s*%|(?:₹|rs\.?|inr)\s*\d[\d,]*(?:\.\d+)?|\$\s*\d[\d,]*(?:\.\d+)?)")
        .expect("discount value regex")
});
static MINIMUM_ORDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:orders?|purchases?|cart(?:\s+value)?|bill(?:\s+value)?|shopping)\s+(?:above|over|of|worth|value)\s+(?:₹|rs\.?|inr)?\s*(\d[\d,]*)",
    )
    .expect("minimum order regex")
});

#[derive(Debug, Error)]
pub enum CleanError {
    #[error("ai backend disabled")]
    Disabled,
    #[error("ai call timed out")]
    Timeout,
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("unparseable ai response: {0}")]
    Parse(String),
}

/// Validated offer fields. `usage_method` is only meaningful after [`finalize`](Self::finalize).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedFields {
    pub name: String,
    pub title: String,
    pub code: Option<String>,
    pub link: Option<String>,
    /// `None` when the scraped text was missing, a copy of the title, or only noise.
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Option<String>,
    pub minimum_order: Option<String>,
    pub category: Option<Category>,
    pub details: Option<String>,
    pub usage_method: UsageMethod,
}

impl CleanedFields {
    /// Re-run code validation, drop a description that repeats the final title,
    /// and recompute usage from the final code/link pair.
    pub fn finalize(mut self) -> Self {
        self.code = self.code.as_deref().and_then(validate_code);
        self.link = self.link.as_deref().and_then(validate_link);
        if self
            .description
            .as_deref()
            .is_some_and(|d| is_near_duplicate(d, &self.title))
        {
            self.description = None;
        }
        self.usage_method = UsageMethod::derive(self.code.is_some(), self.link.is_some());
        self
    }
}

#[async_trait]
pub trait Cleaner: Send + Sync {
    async fn clean(&self, raw: &RawCandidate) -> Result<CleanedFields, CleanError>;
}

/// Deterministic local rules. Never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleBasedCleaner;

impl RuleBasedCleaner {
    pub fn clean_fields(&self, raw: &RawCandidate) -> CleanedFields {
        let code = raw.code.as_deref().and_then(validate_code);
        let title = collapse_whitespace(&strip_cta(&raw.title));
        let name = clean_name(&raw.title, code.as_deref(), raw.code.as_deref())
            .unwrap_or_else(|| fallback_name(&raw.brand_name, &title));
        let title = if title.is_empty() { name.clone() } else { title };

        let haystack = [raw.title.as_str(), raw.description.as_str(), raw.terms.as_deref().unwrap_or("")].join(" ");

        CleanedFields {
            description: clean_description(&raw.description, &title, code.as_deref()),
            discount_type: raw.discount_type_hint,
            discount_value: raw
                .discount_value_hint
                .as_deref()
                .map(collapse_whitespace)
                .filter(|v| !v.is_empty())
                .or_else(|| extract_discount_value(&raw.title)),
            minimum_order: extract_minimum_order(&haystack),
            category: raw.category.as_deref().map(snap_category),
            details: raw
                .terms
                .as_deref()
                .map(collapse_whitespace)
                .filter(|t| !t.is_empty()),
            link: raw.link.as_deref().and_then(validate_link),
            usage_method: UsageMethod::None,
            name,
            title,
            code,
        }
        .finalize()
    }
}

#[async_trait]
impl Cleaner for RuleBasedCleaner {
    async fn clean(&self, raw: &RawCandidate) -> Result<CleanedFields, CleanError> {
        Ok(self.clean_fields(raw))
    }
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

fn strip_cta(text: &str) -> String {
    CTA_RE.replace_all(text, " ").into_owned()
}

fn squashed(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Uppercase, strip CTA phrases and non-alphanumerics until nothing changes, then
/// reject anything that does not look like a redeemable code.
pub fn validate_code(raw: &str) -> Option<String> {
    let mut current = raw.to_uppercase();
    loop {
        let mut next = CTA_RE.replace_all(&current, "").into_owned();
        next = squashed(&next);
        for phrase in CTA_PHRASES {
            next = next.replace(&squashed(phrase), "");
        }
        if next == current {
            break;
        }
        current = next;
    }

    let len = current.chars().count();
    if !(CODE_MIN_LEN..=CODE_MAX_LEN).contains(&len) {
        return None;
    }
    let first = current.chars().next()?;
    if current.chars().all(|c| c == first) {
        return None;
    }

    let has_digit = current.chars().any(|c| c.is_ascii_digit());
    if !has_digit
        && (len > DIGITLESS_CODE_MAX_LEN || MARKETING_WORDS.iter().any(|w| current.contains(w)))
    {
        return None;
    }

    let letters = current.chars().filter(|c| c.is_ascii_alphabetic()).count();
    if !has_digit && letters >= VOWEL_CHECK_MIN_LETTERS {
        let vowels = current.chars().filter(|c| "AEIOU".contains(*c)).count();
        if vowels as f64 / letters as f64 > VOWEL_RATIO_LIMIT {
            return None;
        }
    }

    Some(current)
}

/// Only absolute http(s) urls with a host survive.
pub fn validate_link(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    Some(url.to_string())
}

/// Offer name from a scraped title: codes, urls, CTA text and dates removed.
pub fn clean_name(title: &str, code: Option<&str>, raw_code: Option<&str>) -> Option<String> {
    let mut text = URL_RE.replace_all(title, " ").into_owned();
    for own in [code, raw_code].into_iter().flatten() {
        let own = own.trim();
        if own.len() >= CODE_MIN_LEN {
            text = text.replace(own, " ");
        }
    }
    text = EMBEDDED_CODE_RE
        .replace_all(&text, |caps: &regex::Captures<'_>| {
            let token = &caps[0];
            let has_digit = token.chars().any(|c| c.is_ascii_digit());
            let has_letter = token.chars().any(|c| c.is_ascii_alphabetic());
            if has_digit && has_letter {
                " ".to_string()
            } else {
                token.to_string()
            }
        })
        .into_owned();
    text = strip_cta(&text);
    text = DATE_RE.replace_all(&text, " ").into_owned();

    let name = collapse_whitespace(&text);
    let name = name
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '|' | ':' | ',' | '.'))
        .to_string();
    if name.is_empty() {
        None
    } else {
        Some(truncate_chars(&name, NAME_MAX_CHARS))
    }
}

fn fallback_name(brand: &str, title: &str) -> String {
    if title.is_empty() {
        let name = format!("{} offer", collapse_whitespace(brand));
        truncate_chars(name.trim(), NAME_MAX_CHARS)
    } else {
        truncate_chars(title, NAME_MAX_CHARS)
    }
}

pub fn is_near_duplicate(a: &str, b: &str) -> bool {
    let a = collapse_whitespace(a).to_lowercase();
    let b = collapse_whitespace(b).to_lowercase();
    !a.is_empty() && !b.is_empty() && jaro_winkler(&a, &b) >= DESCRIPTION_TITLE_SIMILARITY
}

pub fn clean_description(description: &str, title: &str, code: Option<&str>) -> Option<String> {
    if is_near_duplicate(description, title) {
        return None;
    }
    let mut text = URL_RE.replace_all(description, " ").into_owned();
    if let Some(code) = code {
        text = text.replace(code, " ");
    }
    let text = collapse_whitespace(&text);
    if text.is_empty() {
        return None;
    }
    if text.chars().count() < DESCRIPTION_MIN_CHARS {
        return Some(format!("{text}. {DESCRIPTION_FILLER}"));
    }
    Some(text)
}

/// Unknown category text maps to `All`; callers keep an absent category absent.
pub fn snap_category(text: &str) -> Category {
    Category::from_label(text).unwrap_or(Category::All)
}

pub fn extract_discount_value(text: &str) -> Option<String> {
    DISCOUNT_VALUE_RE
        .find(text)
        .map(|m| collapse_whitespace(m.as_str()))
}

pub fn extract_minimum_order(text: &str) -> Option<String> {
    MINIMUM_ORDER_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().replace(',', ""))
}
