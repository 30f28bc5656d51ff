//! Search orchestration for stacksift.
//!
//! Ties the browser, extraction chain, rate limiter and content fetcher
//! together into keyword searches (`SearchScraper::search`).

pub mod enrichment;
pub mod rate_limit;
pub mod search;

pub use enrichment::PostFetcher;
pub use rate_limit::RateLimiter;
pub use search::{SearchProgress, SearchScraper, SilentProgress, records_from_response_body, search_url};
