use dealhub_core::RawCandidate;
use url::Url;

use super::{parse_cards, CardSelectors};
use crate::detail::DetailSelectors;
use crate::listing::{CatalogTarget, SiteStrategy};
use crate::AdapterError;

pub struct CouponDunia;

const CATALOG: &[CatalogTarget] = &[
    CatalogTarget::new("Flipkart", "/flipkart", "Electronics"),
    CatalogTarget::new("Ajio", "/ajio", "Fashion"),
    CatalogTarget::new("BigBasket", "/bigbasket", "Grocery"),
    CatalogTarget::new("BookMyShow", "/bookmyshow", "Entertainment"),
    CatalogTarget::new("PharmEasy", "/pharmeasy", "Health"),
];

const CARDS: CardSelectors = CardSelectors {
    card: &["div.offer-card", "article.coupon"],
    title: &["div.offer-title", "h3"],
    discount: &["div.offer-discount", ".off-value"],
    code: &["[data-code]", "span.coupon-code"],
    description: &["div.offer-desc", "p.details"],
    terms: &["ul.offer-terms", ".terms"],
    link: &["a.offer-get-code-link", "a.store-link"],
    detail: &["a.offer-title-link", "a.view-details"],
};

const DETAIL: DetailSelectors = DetailSelectors {
    ready: "div.coupon-modal, div.offer-page",
    code: &["[data-code]", "input.coupon-code", "div.code-box"],
    terms: &["div.offer-terms", "ul.terms"],
    title: &["h1", "div.offer-title"],
    description: &["div.offer-desc"],
};

impl SiteStrategy for CouponDunia {
    fn source_id(&self) -> &'static str {
        "coupondunia"
    }

    fn base_url(&self) -> &'static str {
        "https://www.coupondunia.in/"
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

    fn detail_selectors(&self) -> Option<&'static DetailSelectors> {
        Some(&DETAIL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sites::test_support::listing_fixture;
    use dealhub_core::DiscountType;

    #[test]
    fn parses_fixture_listing_with_fallback_selectors() {
        let base = Url::parse(CouponDunia.base_url()).unwrap();
        let target = CATALOG[0];
        let out = CouponDunia
            .parse_listing(&listing_fixture("coupondunia"), &target, &base)
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].title, "Extra 10% Off On SBI Credit Cards");
        assert_eq!(out[0].code.as_deref(), Some("SBI10FK"));
        assert_eq!(out[0].description, "Valid on electronics above 5000 with SBI cards.");
        assert_eq!(out[0].terms.as_deref(), Some("One use per card."));

        // second card only matches the fallback `h3` title and `.off-value` discount
        assert_eq!(out[1].title, "Free Delivery On Plus Orders");
        assert_eq!(out[1].discount_type_hint, DiscountType::Freebie);
        assert_eq!(out[1].link.as_deref(), Some("https://www.flipkart.com/plus"));
        assert_eq!(out[1].code, None);
    }
}
