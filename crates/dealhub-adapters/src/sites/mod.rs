//! Per-site strategies. Card-based sites share [`parse_cards`]; each module
//! only supplies its catalog and selector fallbacks.

mod cashkaro;
mod coupondunia;
mod desidime;
mod grabon;

pub use cashkaro::CashKaro;
pub use coupondunia::CouponDunia;
pub use desidime::DesiDime;
pub use grabon::GrabOn;

use dealhub_core::RawCandidate;
use scraper::Html;
use url::Url;

use crate::listing::{absolutize, classify_discount, listing_code, CatalogTarget, SelectorChain};
use crate::AdapterError;

/// Selector fallbacks for a listing rendered as one card per offer.
#[derive(Debug, Clone, Copy)]
pub struct CardSelectors {
    pub card: &'static [&'static str],
    pub title: &'static [&'static str],
    pub discount: &'static [&'static str],
    /// Elements carrying the code, either as a `data-code` attribute or as text.
    pub code: &'static [&'static str],
    pub description: &'static [&'static str],
    pub terms: &'static [&'static str],
    /// Outbound merchant link.
    pub link: &'static [&'static str],
    /// Link to the offer's own page on the aggregator.
    pub detail: &'static [&'static str],
}

struct CompiledCards {
    card: SelectorChain,
    title: SelectorChain,
    discount: SelectorChain,
    code: SelectorChain,
    description: SelectorChain,
    terms: SelectorChain,
    link: SelectorChain,
    detail: SelectorChain,
}

impl CardSelectors {
    fn compile(&self) -> Result<CompiledCards, AdapterError> {
        Ok(CompiledCards {
            card: SelectorChain::parse(self.card)?,
            title: SelectorChain::parse(self.title)?,
            discount: SelectorChain::parse(self.discount)?,
            code: SelectorChain::parse(self.code)?,
            description: SelectorChain::parse(self.description)?,
            terms: SelectorChain::parse(self.terms)?,
            link: SelectorChain::parse(self.link)?,
            detail: SelectorChain::parse(self.detail)?,
        })
    }
}

pub fn parse_cards(
    html: &str,
    target: &CatalogTarget,
    base: &Url,
    selectors: &CardSelectors,
) -> Result<Vec<RawCandidate>, AdapterError> {
    let compiled = selectors.compile()?;
    let document = Html::parse_document(html);

    let mut out = Vec::new();
    for card in compiled.card.select_all(&document) {
        let Some(title) = compiled.title.first_text(card) else {
            continue;
        };
        let discount_text = compiled.discount.first_text(card);
        let code = compiled
            .code
            .first_attr(card, "data-code")
            .or_else(|| compiled.code.first_text(card));

        let mut candidate = RawCandidate::new(target.brand_name, title.clone());
        candidate.discount_type_hint = classify_discount(discount_text.as_deref().unwrap_or(&title));
        candidate.discount_value_hint = discount_text;
        candidate.code = listing_code(code);
        candidate.description = compiled.description.first_text(card).unwrap_or_default();
        candidate.terms = compiled.terms.first_text(card);
        candidate.category = Some(target.category.to_string());
        candidate.link = compiled
            .link
            .first_attr(card, "href")
            .and_then(|href| absolutize(base, &href))
            .filter(|link| !is_same_site(base, link));
        candidate.detail_url = compiled
            .detail
            .first_attr(card, "href")
            .and_then(|href| absolutize(base, &href));
        out.push(candidate);
    }
    Ok(out)
}

/// Links back into the aggregator itself are not merchant links.
fn is_same_site(base: &Url, link: &str) -> bool {
    Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .zip(base.host_str())
        .is_some_and(|(host, base_host)| host == base_host)
}


#[cfg(test)]
mod tests {
    use super::*;

    const SELECTORS: CardSelectors = CardSelectors {
        card: &["div.offer"],
        title: &["h3"],
        discount: &[".badge"],
        code: &["[data-code]", ".code"],
        description: &["p"],
        terms: &[".tnc"],
        link: &["a.out"],
        detail: &["a.more"],
    };

    #[test]
    fn cards_without_a_title_are_skipped() {
        let html = r#"
            <div class="offer"><p>orphan</p></div>
            <div class="offer"><h3>Flat 20% off</h3><span class="code">SHOW CODE</span>
              <a class="out" href="https://merchant.example/buy">go</a>
              <a class="more" href="/c/1">more</a></div>"#;
        let base = Url::parse("https://agg.example/").unwrap();
        let target = CatalogTarget::new("Merchant", "/merchant", "Fashion");
        let out = parse_cards(html, &target, &base, &SELECTORS).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].code, None);
        assert_eq!(out[0].link.as_deref(), Some("https://merchant.example/buy"));
        assert_eq!(out[0].detail_url.as_deref(), Some("https://agg.example/c/1"));
        assert_eq!(out[0].category.as_deref(), Some("Fashion"));
    }

    #[test]
    fn aggregator_links_are_not_merchant_links() {
        let html = r#"<div class="offer"><h3>Free shipping</h3><a class="out" href="/out/9">x</a></div>"#;
        let base = Url::parse("https://agg.example/").unwrap();
        let target = CatalogTarget::new("Merchant", "/merchant", "Other");
        let out = parse_cards(html, &target, &base, &SELECTORS).unwrap();
        assert_eq!(out[0].link, None);
        assert_eq!(out[0].discount_type_hint, dealhub_core::DiscountType::Freebie);
    }
}
