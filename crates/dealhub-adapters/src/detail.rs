//! Detail-page extraction through a run-scoped headless browser.
//!
//! Listing pages often hide the real code behind a "Show Code" button that only
//! resolves on the offer's own page. A [`BrowserSession`] is opened at most once
//! per run, shared by every adapter that asked for it, and closed when the run
//! ends whatever the outcome.

use std::time::Duration;

use async_trait::async_trait;
use scraper::Html;
use thiserror::Error;

use crate::listing::{text_or_none, SelectorChain};

#[derive(Debug, Error)]
pub enum DetailError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("detail page timed out after {0:?}")]
    Timeout(Duration),
    #[error("selector `{0}` never appeared")]
    SelectorNotFound(String),
    #[error("invalid detail selector: {0}")]
    Selector(String),
    #[error("crate built without the `render` feature")]
    RenderDisabled,
}

/// Per-site selectors for a detail page. Each list is tried in order.
#[derive(Debug, Clone, Copy)]
pub struct DetailSelectors {
    /// Element whose presence means the page has rendered.
    pub ready: &'static str,
    pub code: &'static [&'static str],
    pub terms: &'static [&'static str],
    pub title: &'static [&'static str],
    pub description: &'static [&'static str],
}

/// Fields read from a detail page. Everything is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailPage {
    pub code: Option<String>,
    pub terms: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl DetailPage {
    /// Read the configured fields from rendered detail-page HTML.
    pub fn from_html(html: &str, selectors: &DetailSelectors) -> Result<Self, DetailError> {
        let document = Html::parse_document(html);
        let root = document.root_element();
        let chain = |list: &[&str]| {
            SelectorChain::parse(list).map_err(|e| DetailError::Selector(e.to_string()))
        };

        let code_chain = chain(selectors.code)?;
        let code = code_chain
            .first_attr(root, "data-code")
            .or_else(|| code_chain.first_attr(root, "value"))
            .or_else(|| code_chain.first_text(root));

        Ok(Self {
            code: code.and_then(|c| text_or_none(&c)),
            terms: chain(selectors.terms)?.first_text(root),
            title: chain(selectors.title)?.first_text(root),
            description: chain(selectors.description)?.first_text(root),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetailOptions {
    pub selector_timeout: Duration,
    pub navigation_timeout: Duration,
}

impl Default for DetailOptions {
    fn default() -> Self {
        Self {
            selector_timeout: Duration::from_secs(5),
            navigation_timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
pub trait DetailExtractor: Send + Sync {
    async fn extract_details(
        &self,
        url: &str,
        selectors: &DetailSelectors,
    ) -> Result<DetailPage, DetailError>;
}

#[cfg(feature = "render")]
pub use browser::BrowserSession;

#[cfg(feature = "render")]
mod browser {
    use std::time::Duration;

    use async_trait::async_trait;
    use chromiumoxide::browser::{Browser, BrowserConfig};
    use futures_util::StreamExt;
    use tokio::task::JoinHandle;
    use tracing::{debug, info, warn};

    use super::{DetailError, DetailExtractor, DetailOptions, DetailPage, DetailSelectors};

    const READY_POLL: Duration = Duration::from_millis(250);

    pub struct BrowserSession {
        browser: Browser,
        handler: JoinHandle<()>,
        options: DetailOptions,
    }

    impl BrowserSession {
        pub async fn launch(options: DetailOptions) -> Result<Self, DetailError> {
            let config = BrowserConfig::builder()
                .request_timeout(options.navigation_timeout)
                .build()
                .map_err(DetailError::Launch)?;
            let (browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|e| DetailError::Launch(e.to_string()))?;

            let handler = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if let Err(e) = event {
                        debug!("browser handler event error: {e}");
                        break;
                    }
                }
            });

            info!("browser session opened");
            Ok(Self {
                browser,
                handler,
                options,
            })
        }

        /// Shut the browser down. Errors are logged; the session is gone either way.
        pub async fn close(mut self) {
            if let Err(e) = self.browser.close().await {
                warn!(error = %e, "browser close failed");
            }
            if let Err(e) = self.browser.wait().await {
                debug!(error = %e, "browser wait failed");
            }
            self.handler.abort();
            info!("browser session closed");
        }
    }

    impl Drop for BrowserSession {
        fn drop(&mut self) {
            self.handler.abort();
        }
    }

    #[async_trait]
    impl DetailExtractor for BrowserSession {
        async fn extract_details(
            &self,
            url: &str,
            selectors: &DetailSelectors,
        ) -> Result<DetailPage, DetailError> {
            let nav_timeout = self.options.navigation_timeout;
            let page = tokio::time::timeout(nav_timeout, self.browser.new_page(url))
                .await
                .map_err(|_| DetailError::Timeout(nav_timeout))?
                .map_err(|e| DetailError::Navigation(e.to_string()))?;

            let sel_timeout = self.options.selector_timeout;
            let ready = tokio::time::timeout(sel_timeout, async {
                loop {
                    if page.find_element(selectors.ready).await.is_ok() {
                        break;
                    }
                    tokio::time::sleep(READY_POLL).await;
                }
            })
            .await;

            let outcome = match ready {
                Err(_) => Err(DetailError::SelectorNotFound(selectors.ready.to_string())),
                Ok(()) => match page.content().await {
                    Ok(html) => DetailPage::from_html(&html, selectors),
                    Err(e) => Err(DetailError::Navigation(e.to_string())),
                },
            };

            if let Err(e) = page.close().await {
                debug!(error = %e, "page close failed");
            }
            outcome
        }
    }
}

#[cfg(not(feature = "render"))]
pub use disabled::BrowserSession;

#[cfg(not(feature = "render"))]
mod disabled {
    use async_trait::async_trait;

    use super::{DetailError, DetailExtractor, DetailOptions, DetailPage, DetailSelectors};

    /// Stand-in that never launches; deep scraping is skipped without `render`.
    pub struct BrowserSession {
        _private: (),
    }

    impl BrowserSession {
        pub async fn launch(_options: DetailOptions) -> Result<Self, DetailError> {
            Err(DetailError::RenderDisabled)
        }

        pub async fn close(self) {}
    }

    #[async_trait]
    impl DetailExtractor for BrowserSession {
        async fn extract_details(
            &self,
            _url: &str,
            _selectors: &DetailSelectors,
        ) -> Result<DetailPage, DetailError> {
            Err(DetailError::RenderDisabled)
        }
    }
}
