//! Browser process lifecycle and isolated context creation.

use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use stacksift_shared::{Result, StackSiftError};

use crate::cdp::{CdpPage, cdp_error};
use crate::page::{BrowserPage, PageSession, PageSource};

/// Desktop Chrome user agent presented by every context.
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Viewport of every page, in CSS pixels.
pub const VIEWPORT: (u32, u32) = (1920, 1080);

const LAUNCH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-dev-shm-usage",
    "--ignore-certificate-errors",
];

struct Running {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// BrowserManager
// ---------------------------------------------------------------------------

/// Owns one Chrome process and hands out isolated pages from it.
pub struct BrowserManager {
    headless: bool,
    state: Mutex<Option<Running>>,
}

impl BrowserManager {
    pub fn new(headless: bool) -> Self {
        Self {
            headless,
            state: Mutex::new(None),
        }
    }

    pub fn headless(&self) -> bool {
        self.headless
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Launch the browser. Calling it again while running does nothing.
    #[instrument(skip_all, fields(headless = self.headless))]
    pub async fn start(&self) -> Result<()> {
        self.browser().await.map(|_| ())
    }

    /// Close the browser and stop its event handler. Safe to call when stopped.
    #[instrument(skip_all)]
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.state.lock().await.take() else {
            return Ok(());
        };

        match Arc::try_unwrap(running.browser) {
            Ok(mut browser) => {
                if let Err(e) = browser.close().await {
                    warn!(error = %e, "browser close failed");
                }
                if let Err(e) = browser.wait().await {
                    debug!(error = %e, "browser wait failed");
                }
            }
            Err(_) => warn!("pages still open at shutdown; browser closes with the last one"),
        }
        running.handler.abort();
        info!("browser stopped");
        Ok(())
    }

    async fn launch(&self) -> Result<Running> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(VIEWPORT.0, VIEWPORT.1)
            .args(LAUNCH_ARGS.iter().copied());
        if !self.headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| StackSiftError::Browser(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| StackSiftError::Browser(format!("failed to launch browser: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler event error");
                }
            }
            debug!("CDP handler finished");
        });

        info!("browser started");
        Ok(Running {
            browser: Arc::new(browser),
            handler,
        })
    }

    /// The running browser, launching it first if needed.
    async fn browser(&self) -> Result<Arc<Browser>> {
        let mut state = self.state.lock().await;
        if let Some(running) = state.as_ref() {
            return Ok(Arc::clone(&running.browser));
        }
        let running = self.launch().await?;
        let browser = Arc::clone(&running.browser);
        *state = Some(running);
        Ok(browser)
    }

    /// A fresh isolated browsing context. Starts the browser if needed.
    pub async fn new_context(&self) -> Result<ContextSession> {
        let browser = self.browser().await?;
        let created = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(cdp_error)?;
        debug!("browsing context created");
        Ok(ContextSession {
            browser,
            id: Some(created.result.browser_context_id.clone()),
        })
    }

    /// A page in its own context; closing the page disposes the context.
    pub async fn new_page(&self, block_assets: bool) -> Result<PageSession> {
        let context = self.new_context().await?;
        let page = context.into_owned_page().await?;
        if block_assets {
            if let Err(e) = page.block_assets(true).await {
                let _ = page.close().await;
                return Err(e);
            }
        }
        Ok(PageSession::new(page))
    }
}

#[async_trait]
impl PageSource for BrowserManager {
    async fn open_page(&self) -> Result<PageSession> {
        self.new_page(false).await
    }

    async fn open_blocking_page(&self) -> Result<PageSession> {
        self.new_page(true).await
    }
}

// ---------------------------------------------------------------------------
// ContextSession
// ---------------------------------------------------------------------------

/// `about:blank` target opened inside browsing context `id`.
fn blank_target_in(id: &BrowserContextId) -> CreateTargetParams {
    let mut target = CreateTargetParams::new("about:blank");
    target.browser_context_id = Some(id.clone());
    target
}

/// Scoped ownership of a browsing context.
///
/// Pages opened here close independently; [`ContextSession::close`] disposes
/// the context and anything still open in it. Dropping without closing
/// spawns the disposal on the current tokio runtime.
pub struct ContextSession {
    browser: Arc<Browser>,
    id: Option<BrowserContextId>,
}

impl ContextSession {
    async fn create_page(&self, owned: bool) -> Result<CdpPage> {
        let id = self
            .id
            .clone()
            .ok_or_else(|| StackSiftError::Browser("context already closed".into()))?;
        let page = self
            .browser
            .new_page(blank_target_in(&id))
            .await
            .map_err(cdp_error)?;

        let (width, height) = VIEWPORT;
        page.execute(SetDeviceMetricsOverrideParams::new(
            i64::from(width),
            i64::from(height),
            1.0,
            false,
        ))
        .await
        .map_err(cdp_error)?;
        page.execute(SetUserAgentOverrideParams::new(USER_AGENT))
            .await
            .map_err(cdp_error)?;

        Ok(CdpPage::new(
            page,
            Arc::clone(&self.browser),
            owned.then_some(id),
        ))
    }

    /// Open a page in this context.
    pub async fn new_page(&self) -> Result<PageSession> {
        Ok(PageSession::new(self.create_page(false).await?))
    }

    /// Open a page that takes over the context's lifetime.
    async fn into_owned_page(mut self) -> Result<CdpPage> {
        let page = self.create_page(true).await?;
        self.id = None;
        Ok(page)
    }

    /// Dispose the context.
    pub async fn close(mut self) -> Result<()> {
        match self.id.take() {
            Some(id) => {
                self.browser
                    .execute(DisposeBrowserContextParams::new(id))
                    .await
                    .map_err(cdp_error)?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for ContextSession {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let browser = Arc::clone(&self.browser);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = browser.execute(DisposeBrowserContextParams::new(id)).await {
                        warn!(error = %e, "background context disposal failed");
                    }
                });
            }
            Err(_) => warn!("context session dropped outside a tokio runtime"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_target_carries_context_id() {
        let id = BrowserContextId::new("ctx-1");
        let target = blank_target_in(&id);
        assert_eq!(target.url, "about:blank");
        assert_eq!(target.browser_context_id, Some(id));
    }

    #[tokio::test]
    async fn stop_without_start_is_noop() {
        let manager = BrowserManager::new(true);
        assert!(!manager.is_running().await);
        manager.stop().await.expect("stop");
        manager.stop().await.expect("second stop");
        assert!(!manager.is_running().await);
    }

    #[test]
    fn launch_args_hide_automation() {
        assert!(LAUNCH_ARGS.contains(&"--disable-blink-features=AutomationControlled"));
        assert!(USER_AGENT.contains("Chrome/120"));
    }

    /// Needs a local Chrome/Chromium.
    #[tokio::test]
    #[ignore]
    async fn launches_and_evaluates() {
        let manager = BrowserManager::new(true);
        manager.start().await.expect("start");
        manager.start().await.expect("idempotent start");

        let page = manager.open_blocking_page().await.expect("page");
        page.goto("data:text/html,<title>stacksift</title><p>hi</p>", std::time::Duration::from_secs(10))
            .await
            .expect("goto");
        let title = page.evaluate("document.title").await.expect("evaluate");
        assert_eq!(title, serde_json::json!("stacksift"));
        let width = page.evaluate("window.innerWidth").await.expect("evaluate");
        assert_eq!(width, serde_json::json!(1920));
        page.close().await.expect("close");

        let context = manager.new_context().await.expect("context");
        let inner = context.new_page().await.expect("page in context");
        inner.close().await.expect("close page");
        context.close().await.expect("close context");

        manager.stop().await.expect("stop");
        assert!(!manager.is_running().await);
    }
}
