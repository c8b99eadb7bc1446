//! Shared listing-page machinery: selector fallback chains, the code denylist,
//! discount classification and the sequential catalog loop every site reuses.

use async_trait::async_trait;
use chrono::Utc;
use dealhub_core::{contains_cta_phrase, DiscountType, RawCandidate, CODE_MAX_LEN};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, info_span, warn, Instrument};
use url::Url;

use crate::detail::{DetailExtractor, DetailSelectors};
use crate::{AdapterError, AdapterSettings, ScrapeContext, SourceAdapter};

/// One (brand, path, category) entry in a site's fixed catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogTarget {
    pub brand_name: &'static str,
    pub path: &'static str,
    pub category: &'static str,
}

impl CatalogTarget {
    pub const fn new(brand_name: &'static str, path: &'static str, category: &'static str) -> Self {
        Self {
            brand_name,
            path,
            category,
        }
    }

    pub fn slug(&self) -> String {
        self.brand_name
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect::<String>()
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-")
    }
}

/// Site-specific half of an adapter: where to look and how to read a listing.
pub trait SiteStrategy: Send + Sync {
    fn source_id(&self) -> &'static str;
    fn base_url(&self) -> &'static str;
    fn catalog(&self) -> &'static [CatalogTarget];

    fn parse_listing(
        &self,
        html: &str,
        target: &CatalogTarget,
        base: &Url,
    ) -> Result<Vec<RawCandidate>, AdapterError>;

    /// Detail-page selectors; `None` means the site has nothing worth a browser visit.
    fn detail_selectors(&self) -> Option<&'static DetailSelectors> {
        None
    }
}

/// Prioritized list of selectors for one field; the first non-empty match wins.
#[derive(Debug, Clone)]
pub struct SelectorChain {
    selectors: Vec<Selector>,
}

impl SelectorChain {
    pub fn parse(list: &[&str]) -> Result<Self, AdapterError> {
        let selectors = list
            .iter()
            .map(|raw| {
                Selector::parse(raw).map_err(|e| AdapterError::Selector {
                    selector: (*raw).to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { selectors })
    }

    pub fn first_text(&self, scope: ElementRef<'_>) -> Option<String> {
        self.selectors.iter().find_map(|sel| {
            scope
                .select(sel)
                .find_map(|node| text_or_none(&node.text().collect::<Vec<_>>().join(" ")))
        })
    }

    pub fn first_attr(&self, scope: ElementRef<'_>, attr: &str) -> Option<String> {
        self.selectors.iter().find_map(|sel| {
            scope
                .select(sel)
                .find_map(|node| node.value().attr(attr).and_then(text_or_none))
        })
    }

    /// Elements matched by the first selector in the chain that matches anything.
    pub fn select_all<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        for sel in &self.selectors {
            let found = document.select(sel).collect::<Vec<_>>();
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }
}

pub fn text_or_none(value: &str) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Listing-level code denylist: button labels and over-long text are not codes.
pub fn listing_code(text: Option<String>) -> Option<String> {
    let text = text.and_then(|t| text_or_none(&t))?;
    if contains_cta_phrase(&text) || text.chars().count() > CODE_MAX_LEN {
        return None;
    }
    Some(text)
}

/// Keyword classification applied identically by every adapter, in rule order.
pub fn classify_discount(text: &str) -> DiscountType {
    let lower = text.to_lowercase();
    let has_word = |word: &str| {
        lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|token| token == word)
    };

    if lower.contains('%') {
        DiscountType::Percentage
    } else if ['₹', '$', '€', '£'].iter().any(|c| lower.contains(*c))
        || has_word("rs")
        || has_word("inr")
        || has_word("off")
    {
        DiscountType::Flat
    } else if lower.contains("cashback") {
        DiscountType::Cashback
    } else if lower.contains("free") {
        DiscountType::Freebie
    } else {
        DiscountType::Unknown
    }
}

pub fn absolutize(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    base.join(href).ok().map(|u| u.to_string())
}

/// A site strategy wrapped in the common scraping loop.
pub struct CatalogAdapter<S> {
    strategy: S,
    settings: AdapterSettings,
}

impl<S: SiteStrategy> CatalogAdapter<S> {
    pub fn new(strategy: S, settings: AdapterSettings) -> Self {
        Self { strategy, settings }
    }

    async fn scrape_target(
        &self,
        ctx: &ScrapeContext<'_>,
        base: &Url,
        target: &CatalogTarget,
    ) -> Result<Option<Vec<RawCandidate>>, AdapterError> {
        let url = base.join(target.path)?;
        let Some(html) = ctx.fetcher.fetch_html(url.as_str()).await? else {
            return Ok(None);
        };

        if let Some(archive) = ctx.archive {
            if let Err(err) = archive
                .archive(Utc::now(), self.strategy.source_id(), &target.slug(), &html)
                .await
            {
                warn!(error = %err, "could not archive listing page");
            }
        }

        let mut candidates = self.strategy.parse_listing(&html, target, base)?;

        if self.settings.deep_scrape {
            if let (Some(detail), Some(selectors)) = (ctx.detail, self.strategy.detail_selectors()) {
                self.enrich_from_details(ctx, detail, selectors, &mut candidates)
                    .await;
            }
        }

        Ok(Some(candidates))
    }

    /// Visit up to `max_detail_pages` detail pages for candidates that have no code yet.
    async fn enrich_from_details(
        &self,
        ctx: &ScrapeContext<'_>,
        detail: &dyn DetailExtractor,
        selectors: &DetailSelectors,
        candidates: &mut [RawCandidate],
    ) {
        let mut visited = 0usize;
        for candidate in candidates.iter_mut() {
            if visited >= self.settings.max_detail_pages {
                break;
            }
            if candidate.code.is_some() {
                continue;
            }
            let Some(detail_url) = candidate.detail_url.clone() else {
                continue;
            };

            if visited > 0 {
                ctx.pacing.pause_between_details().await;
            }
            visited += 1;

            match detail.extract_details(&detail_url, selectors).await {
                Ok(page) => {
                    candidate.code = listing_code(page.code);
                    if candidate.terms.is_none() {
                        candidate.terms = page.terms;
                    }
                    if candidate.description.is_empty() {
                        if let Some(description) = page.description {
                            candidate.description = description;
                        }
                    }
                    debug!(%detail_url, found_code = candidate.code.is_some(), "detail page read");
                }
                Err(err) => warn!(%detail_url, error = %err, "detail page extraction failed"),
            }
        }
    }
}

#[async_trait]
impl<S: SiteStrategy> SourceAdapter for CatalogAdapter<S> {
    fn source_id(&self) -> &'static str {
        self.strategy.source_id()
    }

    fn base_url(&self) -> &'static str {
        self.strategy.base_url()
    }

    fn wants_detail_pages(&self) -> bool {
        self.settings.deep_scrape && self.strategy.detail_selectors().is_some()
    }

    async fn scrape(&self, ctx: &ScrapeContext<'_>) -> Result<Vec<RawCandidate>, AdapterError> {
        let base = Url::parse(self.strategy.base_url())?;
        let mut out = Vec::new();

        for (idx, target) in self.strategy.catalog().iter().enumerate() {
            if idx > 0 {
                ctx.pacing.pause_between_targets().await;
            }

            let span = info_span!(
                "scrape_target",
                run_id = %ctx.run_id,
                source_id = self.strategy.source_id(),
                brand = target.brand_name,
            );
            match self.scrape_target(ctx, &base, target).instrument(span).await {
                Ok(Some(candidates)) => {
                    info!(
                        source_id = self.strategy.source_id(),
                        brand = target.brand_name,
                        count = candidates.len(),
                        "parsed listing"
                    );
                    out.extend(candidates);
                }
                Ok(None) => info!(
                    source_id = self.strategy.source_id(),
                    path = target.path,
                    "listing not found, skipping target"
                ),
                Err(err) => warn!(
                    source_id = self.strategy.source_id(),
                    brand = target.brand_name,
                    error = %err,
                    "target failed, continuing with the next one"
                ),
            }
        }

        Ok(out)
    }
}
