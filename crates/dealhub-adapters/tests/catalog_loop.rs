use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use dealhub_adapters::{
    classify_discount, AdapterError, AdapterSettings, CatalogAdapter, CatalogTarget, DetailError,
    DetailExtractor, DetailPage, DetailSelectors, PageFetcher, Pacing, ScrapeContext, SourceAdapter,
    SiteStrategy,
};
use dealhub_core::RawCandidate;
use dealhub_storage::{FetchError, ListingArchive};
use url::Url;
use uuid::Uuid;

const TARGETS: &[CatalogTarget] = &[
    CatalogTarget::new("Alpha", "/alpha", "Food"),
    CatalogTarget::new("Beta", "/beta", "Fashion"),
    CatalogTarget::new("Gamma", "/gamma", "Travel"),
];

const DETAIL: DetailSelectors = DetailSelectors {
    ready: "main",
    code: &[".code"],
    terms: &[".terms"],
    title: &["h1"],
    description: &["p"],
};

/// Each listing body is `title|code|detail-path` lines.
struct LineSite;

impl SiteStrategy for LineSite {
    fn source_id(&self) -> &'static str {
        "lines"
    }

    fn base_url(&self) -> &'static str {
        "https://agg.test/"
    }

    fn catalog(&self) -> &'static [CatalogTarget] {
        TARGETS
    }

    fn parse_listing(
        &self,
        html: &str,
        target: &CatalogTarget,
        base: &Url,
    ) -> Result<Vec<RawCandidate>, AdapterError> {
        html.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| {
                let mut parts = line.split('|');
                let title = parts.next().unwrap_or_default().trim();
                if title == "BROKEN" {
                    return Err(AdapterError::Message("unparseable card".into()));
                }
                let mut c = RawCandidate::new(target.brand_name, title);
                c.discount_type_hint = classify_discount(title);
                c.code = parts.next().map(str::trim).filter(|s| !s.is_empty()).map(String::from);
                c.detail_url = parts
                    .next()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|p| base.join(p).map(|u| u.to_string()))
                    .transpose()?;
                Ok(c)
            })
            .collect()
    }

    fn detail_selectors(&self) -> Option<&'static DetailSelectors> {
        Some(&DETAIL)
    }
}

enum Reply {
    Html(&'static str),
    NotFound,
    Fail,
}

struct StubFetcher {
    replies: HashMap<&'static str, Reply>,
    seen: Mutex<Vec<String>>,
}

impl StubFetcher {
    fn new(replies: Vec<(&'static str, Reply)>) -> Self {
        Self {
            replies: replies.into_iter().collect(),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PageFetcher for StubFetcher {
    async fn fetch_html(&self, url: &str) -> Result<Option<String>, FetchError> {
        self.seen.lock().unwrap().push(url.to_string());
        match self.replies.get(url) {
            Some(Reply::Html(body)) => Ok(Some((*body).to_string())),
            Some(Reply::NotFound) | None => Ok(None),
            Some(Reply::Fail) => Err(FetchError::HttpStatus {
                status: 503,
                url: url.to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct StubDetails {
    visited: Mutex<Vec<String>>,
}

#[async_trait]
impl DetailExtractor for StubDetails {
    async fn extract_details(
        &self,
        url: &str,
        _selectors: &DetailSelectors,
    ) -> Result<DetailPage, DetailError> {
        self.visited.lock().unwrap().push(url.to_string());
        if url.ends_with("/broken") {
            return Err(DetailError::SelectorNotFound("main".into()));
        }
        Ok(DetailPage {
            code: Some("DETAIL99".into()),
            terms: Some("Once per user".into()),
            ..Default::default()
        })
    }
}

fn ctx<'a>(fetcher: &'a dyn PageFetcher, detail: Option<&'a dyn DetailExtractor>) -> ScrapeContext<'a> {
    ScrapeContext {
        run_id: Uuid::new_v4(),
        fetcher,
        detail,
        archive: None,
        pacing: Pacing::none(),
    }
}

#[tokio::test]
async fn not_found_target_contributes_nothing() {
    let fetcher = StubFetcher::new(vec![
        ("https://agg.test/alpha", Reply::NotFound),
        ("https://agg.test/beta", Reply::Html("10% off shoes|SHOE10|")),
        ("https://agg.test/gamma", Reply::NotFound),
    ]);
    let adapter = CatalogAdapter::new(LineSite, AdapterSettings::default());
    let out = adapter.scrape(&ctx(&fetcher, None)).await.unwrap();

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].brand_name, "Beta");
    assert_eq!(fetcher.seen.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn failing_middle_target_does_not_stop_the_loop() {
    for middle in [Reply::Fail, Reply::Html("BROKEN")] {
        let fetcher = StubFetcher::new(vec![
            ("https://agg.test/alpha", Reply::Html("Flat ₹50 off|A50|\nFree dessert||")),
            ("https://agg.test/beta", middle),
            ("https://agg.test/gamma", Reply::Html("Cashback on flights|FLY7|")),
        ]);
        let adapter = CatalogAdapter::new(LineSite, AdapterSettings::default());
        let out = adapter.scrape(&ctx(&fetcher, None)).await.unwrap();

        let brands: Vec<_> = out.iter().map(|c| c.brand_name.as_str()).collect();
        assert_eq!(brands, vec!["Alpha", "Alpha", "Gamma"]);
    }
}

#[tokio::test]
async fn deep_scrape_enriches_only_codeless_candidates_up_to_cap() {
    let fetcher = StubFetcher::new(vec![(
        "https://agg.test/alpha",
        Reply::Html(
            "Has code|HAVE1|/d/0\nNeeds code||/d/1\nBroken page||/d/broken\nThird||/d/3\nOver cap||/d/4",
        ),
    )]);
    let details = StubDetails::default();
    let adapter = CatalogAdapter::new(
        LineSite,
        AdapterSettings {
            deep_scrape: true,
            max_detail_pages: 3,
        },
    );
    let out = adapter.scrape(&ctx(&fetcher, Some(&details))).await.unwrap();

    let visited = details.visited.lock().unwrap().clone();
    assert_eq!(
        visited,
        vec![
            "https://agg.test/d/1".to_string(),
            "https://agg.test/d/broken".to_string(),
            "https://agg.test/d/3".to_string(),
        ]
    );
    assert_eq!(out[0].code.as_deref(), Some("HAVE1"));
    assert_eq!(out[1].code.as_deref(), Some("DETAIL99"));
    assert_eq!(out[1].terms.as_deref(), Some("Once per user"));
    assert_eq!(out[2].code, None);
    assert_eq!(out[3].code.as_deref(), Some("DETAIL99"));
    assert_eq!(out[4].code, None);
}

#[tokio::test]
async fn deep_scrape_without_a_session_is_listing_only() {
    let fetcher = StubFetcher::new(vec![("https://agg.test/alpha", Reply::Html("Needs code||/d/1"))]);
    let adapter = CatalogAdapter::new(
        LineSite,
        AdapterSettings {
            deep_scrape: true,
            max_detail_pages: 5,
        },
    );
    let out = adapter.scrape(&ctx(&fetcher, None)).await.unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].code, None);
}

#[tokio::test]
async fn listing_pages_are_archived_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let archive = ListingArchive::new(dir.path());
    let fetcher = StubFetcher::new(vec![("https://agg.test/gamma", Reply::Html("Trip deal|TRIP5|"))]);
    let adapter = CatalogAdapter::new(LineSite, AdapterSettings::default());

    let mut context = ctx(&fetcher, None);
    context.archive = Some(&archive);
    adapter.scrape(&context).await.unwrap();

    let source_dir = dir.path().join("lines");
    let day_dirs: Vec<_> = std::fs::read_dir(&source_dir).unwrap().collect();
    assert_eq!(day_dirs.len(), 1);
    let day = day_dirs[0].as_ref().unwrap().path();
    let files: Vec<_> = std::fs::read_dir(day).unwrap().map(|e| e.unwrap().file_name()).collect();
    assert_eq!(files.len(), 1);
    assert!(files[0].to_string_lossy().starts_with("gamma-"));
}
