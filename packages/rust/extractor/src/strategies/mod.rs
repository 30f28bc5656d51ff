//! Structured-data extraction strategies for search result pages.
//!
//! Each strategy reads posts from one place the platform leaves them. The
//! [`DataExtractor`](crate::DataExtractor) tries them in priority order and
//! keeps the first non-empty answer; the DOM scraper is the last resort.

mod dom;
mod framework_state;
mod page_data;
mod preloads;

use async_trait::async_trait;
use scraper::Selector;

use stacksift_browser::BrowserPage;
use stacksift_shared::{RawRecord, Result};

pub use dom::{DomStrategy, placeholder_id, posts_from_dom};
pub use framework_state::FrameworkStateStrategy;
pub use page_data::{PageDataStrategy, page_data_from_html, posts_from_page_data};
pub use preloads::PreloadsStrategy;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One way of pulling raw post records out of a loaded page.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    /// Human-readable strategy name for tracing.
    fn name(&self) -> &str;

    /// Records found on the page. An empty vec means "try the next strategy";
    /// errors are treated the same way by the caller.
    async fn extract(&self, page: &dyn BrowserPage) -> Result<Vec<RawRecord>>;
}

/// The built-in chain, highest fidelity first.
pub fn default_chain() -> Vec<Box<dyn ExtractionStrategy>> {
    vec![
        Box::new(FrameworkStateStrategy),
        Box::new(PageDataStrategy),
        Box::new(PreloadsStrategy),
        Box::new(DomStrategy),
    ]
}

/// Parse a CSS selector known at compile time.
pub(crate) fn css(selector: &str) -> Option<Selector> {
    Selector::parse(selector).ok()
}
