use dealhub_core::RawCandidate;
use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

use super::{parse_cards, CardSelectors};
use crate::detail::DetailSelectors;
use crate::listing::{absolutize, classify_discount, text_or_none, CatalogTarget, SiteStrategy};
use crate::AdapterError;

/// Community deals site. Listings embed a schema.org `ItemList` as JSON-LD;
/// the rendered cards are only a fallback for pages without it.
pub struct DesiDime;

const CATALOG: &[CatalogTarget] = &[
    CatalogTarget::new("Croma", "/stores/croma", "Electronics"),
    CatalogTarget::new("Domino's", "/stores/dominos", "Food"),
    CatalogTarget::new("Tata CLiQ", "/stores/tatacliq", "Fashion"),
];

const CARDS: CardSelectors = CardSelectors {
    card: &["div.deal-box", "li.deal"],
    title: &["div.deal-dsp a", "h2"],
    discount: &["div.deal-discount"],
    code: &["[data-code]", "span.deal-coupon"],
    description: &["div.deal-text"],
    terms: &[],
    link: &["a.get-deal"],
    detail: &["div.deal-dsp a"],
};

const DETAIL: DetailSelectors = DetailSelectors {
    ready: "div.deal-detail",
    code: &["[data-code]", "div.coupon-code-box span"],
    terms: &["div.deal-terms"],
    title: &["h1.deal-title", "h1"],
    description: &["div.deal-description"],
};

impl SiteStrategy for DesiDime {
    fn source_id(&self) -> &'static str {
        "desidime"
    }

    fn base_url(&self) -> &'static str {
        "https://www.desidime.com/"
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
        let from_json_ld = parse_json_ld(html, target, base)?;
        if !from_json_ld.is_empty() {
            return Ok(from_json_ld);
        }
        parse_cards(html, target, base, &CARDS)
    }

    fn detail_selectors(&self) -> Option<&'static DetailSelectors> {
        Some(&DETAIL)
    }
}

fn parse_json_ld(html: &str, target: &CatalogTarget, base: &Url) -> Result<Vec<RawCandidate>, AdapterError> {
    let selector = Selector::parse("script[type='application/ld+json']").map_err(|e| {
        AdapterError::Selector {
            selector: "script[type='application/ld+json']".to_string(),
            reason: e.to_string(),
        }
    })?;
    let document = Html::parse_document(html);

    let mut out = Vec::new();
    for script in document.select(&selector) {
        let text = script.text().collect::<String>();
        let Ok(json) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        for item in list_items(&json) {
            if let Some(candidate) = candidate_from_item(item, target, base) {
                out.push(candidate);
            }
        }
    }
    Ok(out)
}

/// `ItemList.itemListElement[*].item`, tolerating bare items and `@graph` wrappers.
fn list_items(json: &Value) -> Vec<&Value> {
    if let Some(graph) = json.get("@graph").and_then(Value::as_array) {
        return graph.iter().flat_map(list_items).collect();
    }
    if let Some(array) = json.as_array() {
        return array.iter().flat_map(list_items).collect();
    }
    match json.get("@type").and_then(Value::as_str) {
        Some("ItemList") => json
            .get("itemListElement")
            .and_then(Value::as_array)
            .map(|elements| {
                elements
                    .iter()
                    .map(|el| el.get("item").unwrap_or(el))
                    .collect()
            })
            .unwrap_or_default(),
        Some("Offer") | Some("Product") => vec![json],
        _ => Vec::new(),
    }
}

fn json_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn candidate_from_item(item: &Value, target: &CatalogTarget, base: &Url) -> Option<RawCandidate> {
    let title = json_str(item, "name").and_then(text_or_none)?;

    let mut candidate = RawCandidate::new(target.brand_name, title.clone());
    candidate.description = json_str(item, "description")
        .and_then(text_or_none)
        .unwrap_or_default();
    candidate.discount_type_hint = classify_discount(&title);
    candidate.category = Some(target.category.to_string());
    candidate.detail_url = json_str(item, "url").and_then(|u| absolutize(base, u));
    candidate.link = item
        .get("offers")
        .and_then(|offers| json_str(offers, "url"))
        .and_then(|u| absolutize(base, u));
    Some(candidate)
}
