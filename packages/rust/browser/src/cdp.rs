//! [`BrowserPage`] over the Chrome DevTools Protocol.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFinished, EventResponseReceived, GetResponseBodyParams,
    SetBlockedUrLsParams,
};
use chromiumoxide::cdp::browser_protocol::target::DisposeBrowserContextParams;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use stacksift_shared::{Result, StackSiftError};

use crate::page::{BrowserPage, ObservedResponse, ResponseFilter};

/// Extensions whose requests are dropped on asset-blocking pages.
pub const BLOCKED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "woff", "woff2", "ttf", "eot",
];

pub(crate) fn cdp_error(e: CdpError) -> StackSiftError {
    StackSiftError::Browser(e.to_string())
}

/// URL patterns for `Network.setBlockedURLs`, with and without a query string.
pub(crate) fn blocked_url_patterns() -> Vec<String> {
    BLOCKED_EXTENSIONS
        .iter()
        .flat_map(|ext| [format!("*.{ext}"), format!("*.{ext}?*")])
        .collect()
}

/// Resolves once `document.readyState` is complete and the resource-timing
/// entry count has held still for a second, or after `timeout_ms`.
fn network_idle_script(timeout: Duration) -> String {
    let timeout_ms = timeout.as_millis().min(u128::from(u64::MAX)) as u64;
    format!(
        r#"(async () => {{
            const timeoutMs = {timeout_ms};
            const idleMs = 1000;
            const interval = 250;
            const start = Date.now();
            const count = () => {{
                try {{ return performance.getEntriesByType('resource').length; }} catch (_) {{ return 0; }}
            }};
            let last = count();
            let stable = 0;
            while (Date.now() - start < timeoutMs) {{
                await new Promise(r => setTimeout(r, interval));
                const current = count();
                if (document.readyState === 'complete' && current === last) {{
                    stable += interval;
                    if (stable >= idleMs) return true;
                }} else {{
                    stable = 0;
                }}
                last = current;
            }}
            return false;
        }})()"#
    )
}

/// Background tasks tied to one page. Aborted on close or drop.
#[derive(Debug, Default)]
struct ObserverTasks(Mutex<Vec<JoinHandle<()>>>);

impl ObserverTasks {
    fn track(&self, handle: JoinHandle<()>) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
    }

    /// Abort every tracked task. Returns how many were still running.
    fn abort_all(&self) -> usize {
        let handles: Vec<_> = self
            .0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        handles
            .into_iter()
            .filter(|handle| !handle.is_finished())
            .map(|handle| handle.abort())
            .count()
    }
}

impl Drop for ObserverTasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// A Chrome tab, optionally owning the browsing context it lives in.
pub struct CdpPage {
    page: Page,
    browser: Arc<Browser>,
    owned_context: Option<BrowserContextId>,
    observers: ObserverTasks,
}

impl CdpPage {
    pub(crate) fn new(page: Page, browser: Arc<Browser>, owned_context: Option<BrowserContextId>) -> Self {
        Self {
            page,
            browser,
            owned_context,
            observers: ObserverTasks::default(),
        }
    }
}

#[async_trait]
impl BrowserPage for CdpPage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(StackSiftError::Navigation(format!("{url}: {e}"))),
            Err(_) => Err(StackSiftError::Timeout(format!(
                "navigation to {url} exceeded {timeout:?}"
            ))),
        }
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<()> {
        // Small grace so the in-page timer expires before ours.
        let outer = timeout + Duration::from_millis(500);
        let settled = tokio::time::timeout(outer, self.evaluate(&network_idle_script(timeout)))
            .await
            .map_err(|_| StackSiftError::Timeout(format!("network idle after {timeout:?}")))??;
        if settled.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(StackSiftError::Timeout(format!(
                "network still busy after {timeout:?}"
            )))
        }
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let params = EvaluateParams::builder()
            .expression(script)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(StackSiftError::Browser)?;
        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(cdp_error)?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn content(&self) -> Result<String> {
        self.page.content().await.map_err(cdp_error)
    }

    async fn url(&self) -> Result<Option<String>> {
        self.page.url().await.map_err(cdp_error)
    }

    async fn block_assets(&self, block: bool) -> Result<()> {
        let patterns = if block { blocked_url_patterns() } else { Vec::new() };
        self.page
            .execute(EnableParams::default())
            .await
            .map_err(cdp_error)?;
        self.page
            .execute(SetBlockedUrLsParams::new(patterns))
            .await
            .map_err(cdp_error)?;
        Ok(())
    }

    async fn observe_responses(
        &self,
        filter: ResponseFilter,
    ) -> Result<mpsc::UnboundedReceiver<ObservedResponse>> {
        self.page
            .execute(EnableParams::default())
            .await
            .map_err(cdp_error)?;
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(cdp_error)?;
        let mut finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(cdp_error)?;

        let page = self.page.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        let observer = tokio::spawn(async move {
            // request id -> (url, mime type) for matching responses still loading
            let mut pending: HashMap<String, (String, String)> = HashMap::new();
            loop {
                tokio::select! {
                    Some(event) = responses.next() => {
                        let response = &event.response;
                        if filter.matches(&response.url, &response.mime_type) {
                            pending.insert(
                                event.request_id.inner().clone(),
                                (response.url.clone(), response.mime_type.clone()),
                            );
                        }
                    }
                    Some(event) = finished.next() => {
                        let Some((url, content_type)) = pending.remove(event.request_id.inner()) else {
                            continue;
                        };
                        match page.execute(GetResponseBodyParams::new(event.request_id.clone())).await {
                            Ok(body) if !body.result.base64_encoded => {
                                let observed = ObservedResponse {
                                    url,
                                    content_type,
                                    body: body.result.body.clone(),
                                };
                                if tx.send(observed).is_err() {
                                    break;
                                }
                            }
                            Ok(_) => debug!(%url, "skipping binary response body"),
                            Err(e) => debug!(%url, error = %e, "response body unavailable"),
                        }
                    }
                    else => break,
                }
            }
        });
        self.observers.track(observer);

        Ok(rx)
    }

    async fn close(&self) -> Result<()> {
        let aborted = self.observers.abort_all();
        if aborted > 0 {
            debug!(aborted, "stopped response observers");
        }
        let page_closed = self.page.clone().close().await.map_err(cdp_error);
        if let Some(context_id) = &self.owned_context {
            if let Err(e) = self
                .browser
                .execute(DisposeBrowserContextParams::new(context_id.clone()))
                .await
            {
                warn!(error = %e, "failed to dispose browsing context");
            }
        }
        page_closed
    }
}
