use dealhub_core::RawCandidate;
use url::Url;

use super::{parse_cards, CardSelectors};
use crate::detail::DetailSelectors;
use crate::listing::{CatalogTarget, SiteStrategy};
use crate::AdapterError;

pub struct GrabOn;

const CATALOG: &[CatalogTarget] = &[
    CatalogTarget::new("Zomato", "/zomato-coupons/", "Food"),
    CatalogTarget::new("Swiggy", "/swiggy-coupons/", "Food"),
    CatalogTarget::new("Myntra", "/myntra-coupons/", "Fashion"),
    CatalogTarget::new("Amazon", "/amazon-coupons/", "Electronics"),
    CatalogTarget::new("MakeMyTrip", "/makemytrip-coupons/", "Travel"),
    CatalogTarget::new("Nykaa", "/nykaa-coupons/", "Beauty"),
];

const CARDS: CardSelectors = CardSelectors {
    card: &["div.gc-box", "li.gc-li", "div.coupon-item"],
    title: &["div.gcbr-r p", "h3", ".coupon-title"],
    discount: &["div.bank span.txt", ".gcbr-l", ".discount"],
    code: &["[data-code]", ".go-cpn-show", ".coupon-code"],
    description: &["div.gcb-det", ".coupon-desc"],
    terms: &["div.gcb-tc", ".tnc"],
    link: &["a[data-url]", "a.go-to-store", "a[rel~=nofollow]"],
    detail: &["a.gcbr-lnk", "a.coupon-detail-link"],
};

const DETAIL: DetailSelectors = DetailSelectors {
    ready: "div.cpn-dtls, div.coupon-detail",
    code: &["[data-code]", "div.cpn-code", "span.code-text"],
    terms: &["div.cpn-tnc", "ul.tnc"],
    title: &["h1"],
    description: &["div.cpn-desc", "p.desc"],
};

impl SiteStrategy for GrabOn {
    fn source_id(&self) -> &'static str {
        "grabon"
    }

    fn base_url(&self) -> &'static str {
        "https://www.grabon.in/"
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
