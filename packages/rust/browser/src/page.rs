//! The browser automation boundary.
//!
//! [`BrowserPage`] is everything the pipeline needs from a tab. [`PageSource`]
//! hands out fresh pages wrapped in a [`PageSession`], which closes the page
//! (and its browsing context) on every exit path.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use stacksift_shared::{Result, StackSiftError};

/// Interval between polls in the default [`BrowserPage::wait_for_selector`].
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Response observation
// ---------------------------------------------------------------------------

/// A network response body captured while a page was loading.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedResponse {
    pub url: String,
    pub content_type: String,
    pub body: String,
}

/// Which responses a page should report.
#[derive(Debug, Clone)]
pub struct ResponseFilter {
    /// The URL must contain at least one of these fragments.
    pub url_contains: Vec<String>,
    /// The content type must contain this fragment.
    pub content_type_contains: String,
}

impl ResponseFilter {
    /// JSON responses from API or search endpoints.
    pub fn json_api() -> Self {
        Self {
            url_contains: vec!["api".into(), "search".into()],
            content_type_contains: "json".into(),
        }
    }

    pub fn matches(&self, url: &str, content_type: &str) -> bool {
        content_type.contains(&self.content_type_contains)
            && self.url_contains.iter().any(|fragment| url.contains(fragment))
    }
}

// ---------------------------------------------------------------------------
// BrowserPage
// ---------------------------------------------------------------------------

/// A single browser tab.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate and wait until the document is parsed.
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Wait until outstanding requests quiet down. Returns
    /// [`StackSiftError::Timeout`] if the page never settled.
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<()>;

    /// Wait until `selector` matches at least one element.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        let script = format!(
            "document.querySelector({}) !== null",
            serde_json::to_string(selector)?
        );
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.evaluate(&script).await?.as_bool() == Some(true) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(StackSiftError::Timeout(format!(
                    "selector {selector:?} not found after {timeout:?}"
                )));
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    /// Evaluate a script and return its JSON-serializable result.
    /// Promises are awaited; `undefined` becomes `null`.
    async fn evaluate(&self, script: &str) -> Result<Value>;

    /// Serialized HTML of the current document.
    async fn content(&self) -> Result<String>;

    /// The page's current URL, if it has one.
    async fn url(&self) -> Result<Option<String>>;

    async fn scroll_to_bottom(&self) -> Result<()> {
        self.evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await
            .map(|_| ())
    }

    async fn scroll_height(&self) -> Result<u64> {
        let height = self.evaluate("document.body.scrollHeight").await?;
        height
            .as_u64()
            .or_else(|| height.as_f64().map(|h| h as u64))
            .ok_or_else(|| StackSiftError::Browser(format!("unexpected scroll height: {height}")))
    }

    /// Turn image/font request blocking on or off.
    async fn block_assets(&self, block: bool) -> Result<()>;

    /// Start reporting responses that match `filter`. Bodies arrive in the
    /// order their loads finish; the channel closes with the page.
    async fn observe_responses(
        &self,
        filter: ResponseFilter,
    ) -> Result<mpsc::UnboundedReceiver<ObservedResponse>>;

    /// Close the page, and its browsing context if the page owns one.
    async fn close(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// PageSource / PageSession
// ---------------------------------------------------------------------------

/// Hands out fresh, isolated pages.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// A page in its own browsing context with all resources allowed.
    async fn open_page(&self) -> Result<PageSession>;

    /// Like [`PageSource::open_page`], with image and font requests blocked.
    async fn open_blocking_page(&self) -> Result<PageSession>;
}

/// Scoped ownership of an open page.
///
/// Prefer [`PageSession::close`]. A session dropped without it (early return,
/// panic, cancelled future) spawns the close on the current tokio runtime.
pub struct PageSession {
    page: Arc<dyn BrowserPage>,
    closed: bool,
}

impl PageSession {
    pub fn new(page: impl BrowserPage + 'static) -> Self {
        Self {
            page: Arc::new(page),
            closed: false,
        }
    }

    /// Close the page, consuming the session.
    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        self.page.close().await
    }
}

impl Deref for PageSession {
    type Target = dyn BrowserPage;

    fn deref(&self) -> &Self::Target {
        self.page.as_ref()
    }
}

impl Drop for PageSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let page = Arc::clone(&self.page);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        warn!(error = %e, "background page close failed");
                    } else {
                        debug!("page closed in background");
                    }
                });
            }
            Err(_) => warn!("page session dropped outside a tokio runtime; page left open"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedPage;
    use serde_json::json;

    #[test]
    fn json_api_filter() {
        let filter = ResponseFilter::json_api();
        assert!(filter.matches("https://substack.com/api/v1/post/search?q=ai", "application/json"));
        assert!(filter.matches("https://substack.com/search/ai", "application/json; charset=utf-8"));
        assert!(!filter.matches("https://substack.com/api/v1/search", "text/html"));
        assert!(!filter.matches("https://cdn.example.com/app.js", "application/json"));
    }

    #[tokio::test]
    async fn explicit_close_closes_once() {
        let page = ScriptedPage::new();
        let log = page.log();
        let session = PageSession::new(page);
        session.close().await.expect("close");
        tokio::task::yield_now().await;
        assert_eq!(log.close_count(), 1);
    }

    #[tokio::test]
    async fn dropped_session_closes_in_background() {
        let page = ScriptedPage::new();
        let log = page.log();
        {
            let _session = PageSession::new(page);
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(log.close_count(), 1);
    }

    /// Implements only the required methods so the defaults are exercised.
    struct EvalOnly(Value);

    #[async_trait]
    impl BrowserPage for EvalOnly {
        async fn goto(&self, _url: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }
        async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<()> {
            Ok(())
        }
        async fn evaluate(&self, _script: &str) -> Result<Value> {
            Ok(self.0.clone())
        }
        async fn content(&self) -> Result<String> {
            Ok(String::new())
        }
        async fn url(&self) -> Result<Option<String>> {
            Ok(None)
        }
        async fn block_assets(&self, _block: bool) -> Result<()> {
            Ok(())
        }
        async fn observe_responses(
            &self,
            _filter: ResponseFilter,
        ) -> Result<mpsc::UnboundedReceiver<ObservedResponse>> {
            let (_tx, rx) = mpsc::unbounded_channel();
            Ok(rx)
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn default_selector_wait_returns_when_found() {
        EvalOnly(json!(true))
            .wait_for_selector("article", Duration::from_millis(500))
            .await
            .expect("found");
    }

    #[tokio::test(start_paused = true)]
    async fn default_selector_wait_times_out() {
        let err = EvalOnly(json!(false))
            .wait_for_selector("article", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StackSiftError::Timeout(_)));
    }

    #[tokio::test]
    async fn default_scroll_height_accepts_floats() {
        assert_eq!(EvalOnly(json!(2048.0)).scroll_height().await.expect("height"), 2048);
        assert!(EvalOnly(json!("tall")).scroll_height().await.is_err());
    }
}
