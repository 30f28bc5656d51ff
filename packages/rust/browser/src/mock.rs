//! Scripted in-memory pages for tests.
//!
//! A [`ScriptedPage`] answers `evaluate` calls by matching a fragment of the
//! script, serves canned HTML per URL, and records what the code under test
//! did to it in a shared [`PageLog`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use stacksift_shared::{Result, StackSiftError};

use crate::page::{BrowserPage, ObservedResponse, PageSession, PageSource, ResponseFilter};

#[derive(Debug, Clone)]
struct Script {
    evaluations: Vec<(String, std::result::Result<Value, String>)>,
    html: String,
    html_by_url: Vec<(String, String)>,
    failing_urls: Vec<String>,
    heights: Vec<u64>,
    network_idle: bool,
    selector_found: bool,
    responses: Vec<ObservedResponse>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            evaluations: Vec::new(),
            html: "<html><body></body></html>".into(),
            html_by_url: Vec::new(),
            failing_urls: Vec::new(),
            heights: vec![1000],
            network_idle: true,
            selector_found: true,
            responses: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// PageLog
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LogState {
    visited: Vec<String>,
    evaluated: Vec<String>,
    asset_blocking: Vec<bool>,
    scrolls: usize,
    opened: usize,
    closed: usize,
}

/// What happened to every page cloned from the same script.
#[derive(Debug, Clone, Default)]
pub struct PageLog(Arc<Mutex<LogState>>);

impl PageLog {
    fn state(&self) -> MutexGuard<'_, LogState> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// URLs passed to `goto`, in call order.
    pub fn visited(&self) -> Vec<String> {
        self.state().visited.clone()
    }

    /// Scripts passed to `evaluate`, in call order.
    pub fn evaluated(&self) -> Vec<String> {
        self.state().evaluated.clone()
    }

    /// Number of evaluated scripts containing `fragment`.
    pub fn evaluations_containing(&self, fragment: &str) -> usize {
        self.state()
            .evaluated
            .iter()
            .filter(|s| s.contains(fragment))
            .count()
    }

    /// Every `block_assets` argument, in call order.
    pub fn asset_blocking(&self) -> Vec<bool> {
        self.state().asset_blocking.clone()
    }

    pub fn scroll_count(&self) -> usize {
        self.state().scrolls
    }

    pub fn open_count(&self) -> usize {
        self.state().opened
    }

    pub fn close_count(&self) -> usize {
        self.state().closed
    }
}

// ---------------------------------------------------------------------------
// ScriptedPage
// ---------------------------------------------------------------------------

/// A page whose behaviour is fixed up front.
pub struct ScriptedPage {
    script: Arc<Script>,
    log: PageLog,
    current_url: Mutex<Option<String>>,
    scrolls: AtomicUsize,
}

impl Default for ScriptedPage {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPage {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Script::default()),
            log: PageLog::default(),
            current_url: Mutex::new(None),
            scrolls: AtomicUsize::new(0),
        }
    }

    fn edit(mut self, f: impl FnOnce(&mut Script)) -> Self {
        f(Arc::make_mut(&mut self.script));
        self
    }

    /// Answer scripts containing `fragment` with `value`. Earlier rules win.
    pub fn on_evaluate(self, fragment: &str, value: Value) -> Self {
        let fragment = fragment.to_string();
        self.edit(|s| s.evaluations.push((fragment, Ok(value))))
    }

    /// Fail scripts containing `fragment`.
    pub fn fail_evaluate(self, fragment: &str, message: &str) -> Self {
        let entry = (fragment.to_string(), Err(message.to_string()));
        self.edit(|s| s.evaluations.push(entry))
    }

    /// HTML returned by `content` when no URL-specific HTML matches.
    pub fn with_html(self, html: &str) -> Self {
        let html = html.to_string();
        self.edit(|s| s.html = html)
    }

    /// HTML returned by `content` after navigating to a URL containing `fragment`.
    pub fn with_html_for(self, fragment: &str, html: &str) -> Self {
        let entry = (fragment.to_string(), html.to_string());
        self.edit(|s| s.html_by_url.push(entry))
    }

    /// Make `goto` fail for URLs containing `fragment`.
    pub fn fail_navigation_to(self, fragment: &str) -> Self {
        let fragment = fragment.to_string();
        self.edit(|s| s.failing_urls.push(fragment))
    }

    /// Scroll heights reported after 0, 1, 2, ... scrolls. The last one repeats.
    pub fn with_heights(self, heights: &[u64]) -> Self {
        let heights = heights.to_vec();
        self.edit(|s| s.heights = heights)
    }

    /// Make every network-idle wait time out.
    pub fn never_idle(self) -> Self {
        self.edit(|s| s.network_idle = false)
    }

    /// Make every selector wait time out.
    pub fn selectors_missing(self) -> Self {
        self.edit(|s| s.selector_found = false)
    }

    /// Responses delivered to `observe_responses` subscribers that match their filter.
    pub fn with_response(self, url: &str, content_type: &str, body: &str) -> Self {
        let response = ObservedResponse {
            url: url.into(),
            content_type: content_type.into(),
            body: body.into(),
        };
        self.edit(|s| s.responses.push(response))
    }

    pub fn log(&self) -> PageLog {
        self.log.clone()
    }

    /// A new page with the same script and log, and fresh navigation state.
    pub fn fresh(&self) -> Self {
        Self {
            script: Arc::clone(&self.script),
            log: self.log.clone(),
            current_url: Mutex::new(None),
            scrolls: AtomicUsize::new(0),
        }
    }

    fn current_url(&self) -> Option<String> {
        self.current_url
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl BrowserPage for ScriptedPage {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<()> {
        self.log.state().visited.push(url.to_string());
        if self.script.failing_urls.iter().any(|f| url.contains(f.as_str())) {
            return Err(StackSiftError::Navigation(format!("scripted failure for {url}")));
        }
        *self
            .current_url
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(url.to_string());
        Ok(())
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<()> {
        if self.script.network_idle {
            Ok(())
        } else {
            Err(StackSiftError::Timeout(format!("network idle after {timeout:?}")))
        }
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        if self.script.selector_found {
            Ok(())
        } else {
            Err(StackSiftError::Timeout(format!(
                "selector {selector:?} after {timeout:?}"
            )))
        }
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        self.log.state().evaluated.push(script.to_string());
        let rule = self
            .script
            .evaluations
            .iter()
            .find(|(fragment, _)| script.contains(fragment.as_str()));
        match rule {
            Some((_, Ok(value))) => Ok(value.clone()),
            Some((_, Err(message))) => Err(StackSiftError::Browser(message.clone())),
            None => Ok(Value::Null),
        }
    }

    async fn content(&self) -> Result<String> {
        let url = self.current_url().unwrap_or_default();
        let html = self
            .script
            .html_by_url
            .iter()
            .find(|(fragment, _)| url.contains(fragment.as_str()))
            .map(|(_, html)| html.clone())
            .unwrap_or_else(|| self.script.html.clone());
        Ok(html)
    }

    async fn url(&self) -> Result<Option<String>> {
        Ok(self.current_url())
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        self.scrolls.fetch_add(1, Ordering::SeqCst);
        self.log.state().scrolls += 1;
        Ok(())
    }

    async fn scroll_height(&self) -> Result<u64> {
        let heights = &self.script.heights;
        let index = self.scrolls.load(Ordering::SeqCst).min(heights.len().saturating_sub(1));
        Ok(heights.get(index).copied().unwrap_or(0))
    }

    async fn block_assets(&self, block: bool) -> Result<()> {
        self.log.state().asset_blocking.push(block);
        Ok(())
    }

    async fn observe_responses(
        &self,
        filter: ResponseFilter,
    ) -> Result<mpsc::UnboundedReceiver<ObservedResponse>> {
        let (tx, rx) = mpsc::unbounded_channel();
        for response in &self.script.responses {
            if filter.matches(&response.url, &response.content_type) {
                let _ = tx.send(response.clone());
            }
        }
        Ok(rx)
    }

    async fn close(&self) -> Result<()> {
        self.log.state().closed += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedSource
// ---------------------------------------------------------------------------

/// A [`PageSource`] that hands out fresh copies of one scripted page.
pub struct ScriptedSource {
    template: ScriptedPage,
    fail_open: bool,
}

impl ScriptedSource {
    pub fn new(template: ScriptedPage) -> Self {
        Self {
            template,
            fail_open: false,
        }
    }

    /// A source whose every open fails, like a browser that will not launch.
    pub fn failing() -> Self {
        Self {
            template: ScriptedPage::new(),
            fail_open: true,
        }
    }

    pub fn log(&self) -> PageLog {
        self.template.log()
    }

    fn open(&self) -> Result<ScriptedPage> {
        if self.fail_open {
            return Err(StackSiftError::Browser("scripted launch failure".into()));
        }
        self.template.log.state().opened += 1;
        Ok(self.template.fresh())
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn open_page(&self) -> Result<PageSession> {
        Ok(PageSession::new(self.open()?))
    }

    async fn open_blocking_page(&self) -> Result<PageSession> {
        let page = self.open()?;
        page.block_assets(true).await?;
        Ok(PageSession::new(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn first_matching_rule_wins() {
        let page = ScriptedPage::new()
            .on_evaluate("posts", json!([1]))
            .on_evaluate("posts.length", json!(99));
        assert_eq!(page.evaluate("window.posts.length").await.expect("eval"), json!([1]));
        assert_eq!(page.evaluate("unknown()").await.expect("eval"), Value::Null);
        assert_eq!(page.log().evaluated().len(), 2);
    }

    #[tokio::test]
    async fn content_follows_navigation() {
        let page = ScriptedPage::new()
            .with_html("<p>default</p>")
            .with_html_for("/p/one", "<p>one</p>");
        assert_eq!(page.content().await.expect("content"), "<p>default</p>");
        page.goto("https://x.substack.com/p/one", Duration::from_secs(1))
            .await
            .expect("goto");
        assert_eq!(page.content().await.expect("content"), "<p>one</p>");
    }

    #[tokio::test]
    async fn source_shares_log_across_pages() {
        let source = ScriptedSource::new(ScriptedPage::new());
        let a = source.open_page().await.expect("open");
        let b = source.open_blocking_page().await.expect("open");
        a.close().await.expect("close");
        b.close().await.expect("close");
        let log = source.log();
        assert_eq!(log.open_count(), 2);
        assert_eq!(log.close_count(), 2);
        assert_eq!(log.asset_blocking(), vec![true]);
    }
}
