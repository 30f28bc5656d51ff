//! Search orchestration: one keyword in, one [`SearchResult`] out.
//!
//! 1. Wait for the rate limiter
//! 2. Open an isolated page and start capturing JSON API responses
//! 3. Load the search page and let it settle
//! 4. Scroll for more results if the capture is short of the limit
//! 5. Take captured records, or fall back to the extraction chain
//! 6. Truncate, enrich, convert to typed posts

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use stacksift_browser::{
    BrowserPage, ObservedResponse, PageSource, ResponseFilter, ScrollHandler,
};
use stacksift_extractor::DataExtractor;
use stacksift_shared::{
    AppConfig, FetchSettings, Post, RawRecord, Result, ScrollSettings, SearchResult,
    capture_timestamp, is_truthy, record_id, stamp_record,
};

use crate::enrichment::PostFetcher;
use crate::rate_limit::RateLimiter;

const SEARCH_URL_BASE: &str = "https://substack.com/search/";

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const LOAD_IDLE_TIMEOUT: Duration = Duration::from_secs(15);
const INITIAL_SETTLE: Duration = Duration::from_secs(2);
const RESULTS_TIMEOUT: Duration = Duration::from_secs(10);
const TRAILING_SETTLE: Duration = Duration::from_secs(1);

/// Anything that looks like a rendered result list.
const RESULTS_SELECTOR: &str =
    r#"[class*="SearchResult"], [class*="post-preview"], article, [class*="reader2"]"#;

/// The all-posts search URL for `keyword`.
pub fn search_url(keyword: &str) -> String {
    format!(
        "{SEARCH_URL_BASE}{}?searching=all_posts",
        urlencoding::encode(keyword)
    )
}

/// Post records in an API response body: a top-level array, or the first
/// non-empty `posts`, `results` or `items` array. Entries without an `id`
/// are skipped.
pub fn records_from_response_body(body: &str) -> Vec<RawRecord> {
    let Ok(data) = serde_json::from_str::<Value>(body) else {
        return Vec::new();
    };
    let items = match data {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            let key = ["posts", "results", "items"]
                .into_iter()
                .find(|k| map.get(*k).is_some_and(is_truthy));
            match key.and_then(|k| map.remove(k)) {
                Some(Value::Array(items)) => items,
                _ => return Vec::new(),
            }
        }
        _ => return Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) if record_id(&map).is_some() => Some(map),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callbacks for multi-keyword runs.
pub trait SearchProgress: Send + Sync {
    /// A keyword's search is starting.
    fn keyword_started(&self, keyword: &str, index: usize, total: usize);
    /// A keyword's search finished (possibly with zero posts).
    fn keyword_finished(&self, result: &SearchResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl SearchProgress for SilentProgress {
    fn keyword_started(&self, _keyword: &str, _index: usize, _total: usize) {}
    fn keyword_finished(&self, _result: &SearchResult) {}
}

// ---------------------------------------------------------------------------
// Response capture
// ---------------------------------------------------------------------------

/// Records parsed from observed API responses, in arrival order.
struct ResponseCapture {
    responses: Option<mpsc::UnboundedReceiver<ObservedResponse>>,
    records: Vec<RawRecord>,
}

impl ResponseCapture {
    async fn attach(page: &dyn BrowserPage) -> Self {
        let responses = match page.observe_responses(ResponseFilter::json_api()).await {
            Ok(rx) => Some(rx),
            Err(e) => {
                warn!(error = %e, "response capture unavailable");
                None
            }
        };
        Self {
            responses,
            records: Vec::new(),
        }
    }

    /// Pull in everything delivered so far. Returns the running total.
    fn drain(&mut self) -> usize {
        if let Some(rx) = self.responses.as_mut() {
            while let Ok(response) = rx.try_recv() {
                let records = records_from_response_body(&response.body);
                if !records.is_empty() {
                    debug!(url = %response.url, count = records.len(), "captured API posts");
                    self.records.extend(records);
                }
            }
        }
        self.records.len()
    }
}

// ---------------------------------------------------------------------------
// SearchScraper
// ---------------------------------------------------------------------------

/// Runs keyword searches against the platform's search page.
pub struct SearchScraper {
    pages: Arc<dyn PageSource>,
    scroller: ScrollHandler,
    extractor: Arc<DataExtractor>,
    fetcher: PostFetcher,
    limiter: Arc<RateLimiter>,
    fetch_content: bool,
}

impl SearchScraper {
    pub fn new(
        pages: Arc<dyn PageSource>,
        limiter: Arc<RateLimiter>,
        extractor: Arc<DataExtractor>,
        config: &AppConfig,
    ) -> Self {
        let fetcher = PostFetcher::new(Arc::clone(&pages), FetchSettings::from(config));
        Self {
            pages,
            scroller: ScrollHandler::new(ScrollSettings::from(config)),
            extractor,
            fetcher,
            limiter,
            fetch_content: config.search.fetch_content,
        }
    }

    /// Search one keyword.
    ///
    /// `fetch_content` overrides the configured enrichment default. Page
    /// trouble degrades to fewer posts; only failing to open a page at all
    /// is an error.
    #[instrument(skip_all, fields(keyword = %keyword, limit = limit))]
    pub async fn search(
        &self,
        keyword: &str,
        limit: usize,
        fetch_content: Option<bool>,
    ) -> Result<SearchResult> {
        let started = Instant::now();
        let should_fetch = fetch_content.unwrap_or(self.fetch_content);

        self.limiter.acquire().await;

        let url = search_url(keyword);
        info!(keyword, limit, %url, "starting search");

        let page = self.pages.open_page().await?;
        let mut raw_posts = self.collect_raw_posts(&*page, keyword, &url, limit).await;
        if let Err(e) = page.close().await {
            debug!(error = %e, "search page close failed");
        }

        raw_posts.truncate(limit);

        if should_fetch && !raw_posts.is_empty() {
            let max_concurrent = self.fetcher.settings().max_concurrent;
            raw_posts = self
                .fetcher
                .enrich_posts(raw_posts, true, max_concurrent)
                .await;
        }

        let posts = into_posts(raw_posts, keyword);
        let result = SearchResult::new(keyword, posts, started.elapsed());
        info!(
            keyword,
            total_results = result.total_results,
            duration_secs = result.duration_seconds,
            "search complete"
        );
        Ok(result)
    }

    /// Search each keyword in turn. A keyword that fails yields an empty result.
    pub async fn search_multiple(
        &self,
        keywords: &[String],
        limit: usize,
        fetch_content: Option<bool>,
    ) -> Vec<SearchResult> {
        self.search_multiple_with_progress(keywords, limit, fetch_content, &SilentProgress)
            .await
    }

    pub async fn search_multiple_with_progress(
        &self,
        keywords: &[String],
        limit: usize,
        fetch_content: Option<bool>,
        progress: &dyn SearchProgress,
    ) -> Vec<SearchResult> {
        let mut results = Vec::with_capacity(keywords.len());
        for (index, keyword) in keywords.iter().enumerate() {
            progress.keyword_started(keyword, index, keywords.len());
            let result = match self.search(keyword, limit, fetch_content).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(keyword = %keyword, error = %e, "search failed");
                    SearchResult::empty(keyword.as_str())
                }
            };
            progress.keyword_finished(&result);
            results.push(result);
        }
        results
    }

    async fn collect_raw_posts(
        &self,
        page: &dyn BrowserPage,
        keyword: &str,
        url: &str,
        limit: usize,
    ) -> Vec<RawRecord> {
        let mut capture = ResponseCapture::attach(page).await;

        match page.goto(url, NAVIGATION_TIMEOUT).await {
            Ok(()) => {
                if let Err(e) = page.wait_for_network_idle(LOAD_IDLE_TIMEOUT).await {
                    warn!(error = %e, "initial load did not settle");
                }
            }
            Err(e) => warn!(error = %e, "initial load failed"),
        }

        tokio::time::sleep(INITIAL_SETTLE).await;

        if let Err(e) = page.wait_for_selector(RESULTS_SELECTOR, RESULTS_TIMEOUT).await {
            warn!(keyword, error = %e, "no results rendered");
        }

        let initial = self.extractor.post_count(page).await;
        let captured = capture.drain();
        info!(count = initial, captured, "initial results");

        if captured < limit {
            self.scroller
                .scroll_to_load_results(page, limit, || self.extractor.post_count(page))
                .await;
            tokio::time::sleep(TRAILING_SETTLE).await;
            info!(captured = capture.drain(), "after scroll");
        }

        let scraped_at = capture_timestamp();
        let mut raw_posts = if capture.records.is_empty() {
            self.extractor.extract_posts(page, keyword).await
        } else {
            capture.records
        };
        for post in &mut raw_posts {
            stamp_record(post, keyword, &scraped_at);
        }
        info!(count = raw_posts.len(), "raw posts collected");
        raw_posts
    }
}

/// Typed posts from raw records: strict parse, then minimal, then dropped.
fn into_posts(raw_posts: Vec<RawRecord>, keyword: &str) -> Vec<Post> {
    raw_posts
        .into_iter()
        .filter_map(|raw| match Post::from_record(&raw) {
            Ok(post) => Some(post),
            Err(e) => {
                warn!(post_id = ?raw.get("id"), error = %e, "post validation failed");
                match Post::minimal(&raw, keyword) {
                    Ok(post) => Some(post),
                    Err(e) => {
                        warn!(error = %e, "dropping unusable record");
                        None
                    }
                }
            }
        })
        .collect()
}
