//! Shared types, error model, and configuration for stacksift.
//!
//! This crate is the foundation depended on by all other stacksift crates.
//! It provides:
//! - [`StackSiftError`], the unified error type
//! - Domain types ([`Post`], [`SearchResult`], [`BatchSearchResult`], [`RawRecord`])
//! - Configuration ([`AppConfig`], runtime settings, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BrowserConfig, FetchConfig, FetchSettings, OutputConfig, RateLimitConfig,
    RateLimitSettings, ScrollConfig, ScrollSettings, SearchConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from, validate_config,
};
pub use error::{Result, StackSiftError};
pub use types::{
    AudioItem, BatchSearchResult, DEFAULT_AUDIENCE, DEFAULT_POST_TYPE, PodcastFields, Post,
    PostTag, Publication, PublicationUser, PublishedByline, RawRecord, SearchResult,
    capture_timestamp, dedup_by_id, is_truthy, record_id, records_with_id, stamp_record,
};
