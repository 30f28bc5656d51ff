//! Raw post extraction for stacksift.
//!
//! [`DataExtractor`] runs an ordered chain of [`ExtractionStrategy`]s against a
//! loaded search page and returns the first non-empty, de-duplicated set of
//! raw records. [`post_content_from_html`] pulls body content out of a single
//! post page.

pub mod post_content;
pub mod strategies;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use stacksift_browser::BrowserPage;
use stacksift_shared::{RawRecord, capture_timestamp, dedup_by_id, stamp_record};

pub use post_content::post_content_from_html;
pub use strategies::{
    DomStrategy, ExtractionStrategy, FrameworkStateStrategy, PageDataStrategy, PreloadsStrategy,
    default_chain, page_data_from_html, placeholder_id, posts_from_dom, posts_from_page_data,
};

/// Counts loaded result cards: the first selector with any matches wins.
const POST_COUNT_SCRIPT: &str = r#"(() => {
    const selectors = [
        '[class*="SearchResult"]',
        '[class*="post-preview"]',
        '[data-testid="search-result"]',
        'article[class*="post"]',
        '[class*="reader2-post"]'
    ];
    for (const selector of selectors) {
        const n = document.querySelectorAll(selector).length;
        if (n > 0) return n;
    }
    return 0;
})()"#;

/// Ordered fallback chain of extraction strategies.
pub struct DataExtractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl DataExtractor {
    /// The built-in chain: framework state, page data, preloads, DOM.
    pub fn new() -> Self {
        Self::with_strategies(default_chain())
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Records from the first strategy that finds any, de-duplicated by `id`
    /// and stamped with `keyword` and the extraction time. Empty when every
    /// strategy comes up empty or fails.
    #[instrument(skip_all, fields(keyword = %keyword))]
    pub async fn extract_posts(&self, page: &dyn BrowserPage, keyword: &str) -> Vec<RawRecord> {
        let mut found = Vec::new();
        for strategy in &self.strategies {
            match strategy.extract(page).await {
                Ok(records) if !records.is_empty() => {
                    debug!(strategy = strategy.name(), count = records.len(), "strategy matched");
                    found = records;
                    break;
                }
                Ok(_) => debug!(strategy = strategy.name(), "strategy found nothing"),
                Err(e) => debug!(strategy = strategy.name(), error = %e, "strategy failed"),
            }
        }

        let scraped_at = capture_timestamp();
        let mut posts = dedup_by_id(found);
        for post in &mut posts {
            stamp_record(post, keyword, &scraped_at);
        }
        info!(count = posts.len(), "extracted posts");
        posts
    }

    /// Number of result cards currently rendered, or 0 if the page can't say.
    pub async fn post_count(&self, page: &dyn BrowserPage) -> usize {
        match page.evaluate(POST_COUNT_SCRIPT).await {
            Ok(Value::Number(n)) => n.as_u64().unwrap_or(0) as usize,
            Ok(other) => {
                debug!(value = %other, "unexpected post count");
                0
            }
            Err(e) => {
                warn!(error = %e, "post count failed");
                0
            }
        }
    }
}

impl Default for DataExtractor {
    fn default() -> Self {
        Self::new()
    }
}
