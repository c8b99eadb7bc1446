use dealhub_core::RawCandidate;
use url::Url;

use super::{parse_cards, CardSelectors};
use crate::listing::{CatalogTarget, SiteStrategy};
use crate::AdapterError;

/// Cashback portal. Most offers activate through the outbound link, so there is
/// no detail page worth rendering.
pub struct CashKaro;

const CATALOG: &[CatalogTarget] = &[
    CatalogTarget::new("Amazon", "/stores/amazon", "Electronics"),
    CatalogTarget::new("Myntra", "/stores/myntra", "Fashion"),
    CatalogTarget::new("Airtel", "/stores/airtel-recharge", "Recharge"),
    CatalogTarget::new("Pepperfry", "/stores/pepperfry", "Home"),
];

const CARDS: CardSelectors = CardSelectors {
    card: &["div.offer-box", "div.deal-card"],
    title: &["h3.offer-title", "p.deal-title"],
    discount: &["span.cashback-rate", "div.cb-text"],
    code: &["[data-code]", "span.cpn-code"],
    description: &["p.offer-desc"],
    terms: &["div.offer-tnc"],
    link: &["a.activate-btn", "a.shop-now"],
    detail: &[],
};

impl SiteStrategy for CashKaro {
    fn source_id(&self) -> &'static str {
        "cashkaro"
    }

    fn base_url(&self) -> &'static str {
        "https://cashkaro.com/"
    }

    fn catalog(&self) -> &'static [CatalogTarget] {
        CATALOG
    }

    fn parse_listing(
        &self,
        html: &str,
        target: &CatalogTarget,
        base: &Url,
    ) -> Result<Vec<RawCandidate>, AdapterError> {
        parse_cards(html, target, base, &CARDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sites::test_support::listing_fixture;
    use dealhub_core::DiscountType;

    #[test]
    fn parses_cashback_cards() {
        let base = Url::parse(CashKaro.base_url()).unwrap();
        let target = CATALOG[2];
        let out = CashKaro
            .parse_listing(&listing_fixture("cashkaro"), &target, &base)
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].brand_name, "Airtel");
        assert_eq!(out[0].discount_type_hint, DiscountType::Cashback);
        assert_eq!(out[0].discount_value_hint.as_deref(), Some("Extra Cashback"));
        assert_eq!(out[0].link.as_deref(), Some("https://www.airtel.in/prepaid-recharge"));
        assert_eq!(out[0].category.as_deref(), Some("Recharge"));

        assert_eq!(out[1].code.as_deref(), Some("AIRTEL50"));
        assert_eq!(out[1].discount_type_hint, DiscountType::Flat);
        assert!(out.iter().all(|c| c.detail_url.is_none()));
    }

    #[test]
    fn never_asks_for_detail_pages() {
        assert!(CashKaro.detail_selectors().is_none());
    }
}
