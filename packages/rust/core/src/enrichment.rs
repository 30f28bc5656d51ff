//! Post content enrichment.
//!
//! Visits each post's permalink in a fresh page and merges the full body
//! (HTML, structured JSON, word count, a few engagement fields) into the
//! raw record found on the search page.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use stacksift_browser::PageSource;
use stacksift_extractor::post_content_from_html;
use stacksift_shared::{FetchSettings, RawRecord, Result, StackSiftError};

/// Fetches full post content through a shared [`PageSource`].
pub struct PostFetcher {
    pages: Arc<dyn PageSource>,
    settings: FetchSettings,
}

impl PostFetcher {
    pub fn new(pages: Arc<dyn PageSource>, settings: FetchSettings) -> Self {
        Self { pages, settings }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Load `url` and extract its body content.
    ///
    /// Navigation failure is an error; a slow network-idle wait is not.
    pub async fn try_fetch_post_content(&self, url: &str) -> Result<RawRecord> {
        let page = self.pages.open_blocking_page().await?;

        let content = async {
            page.block_assets(false).await?;
            page.goto(url, self.settings.navigation_timeout).await?;
            if let Err(e) = page.wait_for_network_idle(self.settings.idle_timeout).await {
                debug!(%url, error = %e, "post page never went idle");
            }
            let html = page.content().await?;
            Ok::<_, StackSiftError>(post_content_from_html(&html))
        }
        .await;

        if let Err(e) = page.close().await {
            debug!(%url, error = %e, "post page close failed");
        }
        content
    }

    /// Like [`PostFetcher::try_fetch_post_content`], but logs failures and
    /// returns an empty map instead.
    pub async fn fetch_post_content(&self, url: &str) -> RawRecord {
        match self.try_fetch_post_content(url).await {
            Ok(content) => content,
            Err(e) => {
                warn!(%url, error = %e, "failed to fetch post content");
                RawRecord::new()
            }
        }
    }

    /// Merge full content into every post that has a `canonical_url`.
    ///
    /// At most `max_concurrent` fetches run at once, each preceded by the
    /// configured delay once it is admitted. Output order matches input
    /// order; a post whose fetch fails is returned unchanged, and null
    /// values never overwrite existing keys.
    #[instrument(skip_all, fields(count = posts.len(), max_concurrent = max_concurrent))]
    pub async fn enrich_posts(
        &self,
        posts: Vec<RawRecord>,
        fetch_content: bool,
        max_concurrent: usize,
    ) -> Vec<RawRecord> {
        if !fetch_content || posts.is_empty() {
            return posts;
        }

        info!(count = posts.len(), "enriching posts");
        let gate = Semaphore::new(max_concurrent.max(1));

        let fetches = posts.into_iter().map(|post| {
            let gate = &gate;
            async move {
                let Some(url) = post
                    .get("canonical_url")
                    .and_then(Value::as_str)
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
                else {
                    return post;
                };

                let Ok(_permit) = gate.acquire().await else {
                    return post;
                };
                tokio::time::sleep(self.settings.delay).await;

                match self.try_fetch_post_content(&url).await {
                    Ok(content) => merge_content(post, content),
                    Err(e) => {
                        warn!(%url, error = %e, "post enrichment failed, keeping original");
                        post
                    }
                }
            }
        });

        let enriched = join_all(fetches).await;
        info!(count = enriched.len(), "posts enriched");
        enriched
    }
}

/// Overlay `content` on `post`, skipping nulls.
fn merge_content(mut post: RawRecord, content: RawRecord) -> RawRecord {
    for (key, value) in content {
        if !value.is_null() {
            post.insert(key, value);
        }
    }
    post
}
