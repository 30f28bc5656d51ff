//! Application configuration for stacksift.
//!
//! User config lives at `~/.stacksift/stacksift.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StackSiftError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "stacksift.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".stacksift";

// ---------------------------------------------------------------------------
// Config structs (matching stacksift.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Browser process settings.
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Search defaults and bounds.
    #[serde(default)]
    pub search: SearchConfig,

    /// Infinite-scroll pacing.
    #[serde(default)]
    pub scroll: ScrollConfig,

    /// Search request pacing.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Post content enrichment.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// JSON output.
    #[serde(default)]
    pub output: OutputConfig,
}

/// `[browser]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run Chrome without a visible window.
    #[serde(default = "default_true")]
    pub headless: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self { headless: true }
    }
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Posts per keyword when no limit is given.
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Upper bound accepted for `--limit`.
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Visit each post permalink for its full body.
    #[serde(default = "default_true")]
    pub fetch_content: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            fetch_content: true,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_limit() -> usize {
    50
}
fn default_max_limit() -> usize {
    200
}

/// `[scroll]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrollConfig {
    /// Pause after each scroll, in ms.
    #[serde(default = "default_scroll_delay")]
    pub delay_ms: u64,

    /// Wall-clock cap for one scroll session, in ms.
    #[serde(default = "default_scroll_timeout")]
    pub timeout_ms: u64,

    /// Stop after this many scrolls that change neither height nor count.
    #[serde(default = "default_max_no_change")]
    pub max_no_change_iterations: u32,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_scroll_delay(),
            timeout_ms: default_scroll_timeout(),
            max_no_change_iterations: default_max_no_change(),
        }
    }
}

fn default_scroll_delay() -> u64 {
    1000
}
fn default_scroll_timeout() -> u64 {
    30_000
}
fn default_max_no_change() -> u32 {
    3
}

/// `[rate_limit]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Searches allowed per window.
    #[serde(default = "default_rate_requests")]
    pub requests: usize,

    /// Window length in seconds.
    #[serde(default = "default_rate_window")]
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: default_rate_requests(),
            window_seconds: default_rate_window(),
        }
    }
}

fn default_rate_requests() -> usize {
    10
}
fn default_rate_window() -> u64 {
    60
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Simultaneous post page fetches.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Pause before each post page fetch, in ms.
    #[serde(default = "default_fetch_delay")]
    pub delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            delay_ms: default_fetch_delay(),
        }
    }
}

fn default_max_concurrent() -> usize {
    3
}
fn default_fetch_delay() -> u64 {
    500
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for JSON result files.
    #[serde(default = "default_output_dir")]
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> String {
    "./output".into()
}

// ---------------------------------------------------------------------------
// Runtime settings (derived from config, overridable by CLI flags)
// ---------------------------------------------------------------------------

/// Runtime scroll settings.
#[derive(Debug, Clone)]
pub struct ScrollSettings {
    pub delay: Duration,
    pub timeout: Duration,
    pub max_no_change_iterations: u32,
    /// Bound on each best-effort network-idle wait between scrolls.
    pub idle_timeout: Duration,
}

impl Default for ScrollSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ScrollSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            delay: Duration::from_millis(config.scroll.delay_ms),
            timeout: Duration::from_millis(config.scroll.timeout_ms),
            max_no_change_iterations: config.scroll.max_no_change_iterations,
            idle_timeout: Duration::from_secs(5),
        }
    }
}

/// Runtime rate limiter settings.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub max_requests: usize,
    pub window: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for RateLimitSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_requests: config.rate_limit.requests,
            window: Duration::from_secs(config.rate_limit.window_seconds),
        }
    }
}

/// Runtime enrichment settings.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub max_concurrent: usize,
    pub delay: Duration,
    pub navigation_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for FetchSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_concurrent: config.fetch.max_concurrent,
            delay: Duration::from_millis(config.fetch.delay_ms),
            navigation_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(10),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.stacksift/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| StackSiftError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.stacksift/stacksift.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| StackSiftError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        StackSiftError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| StackSiftError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| StackSiftError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| StackSiftError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject values that would stall or disable the pipeline.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.search.max_limit == 0 {
        return Err(StackSiftError::config("search.max_limit must be at least 1"));
    }
    if config.search.default_limit == 0 || config.search.default_limit > config.search.max_limit
    {
        return Err(StackSiftError::config(format!(
            "search.default_limit must be between 1 and {}",
            config.search.max_limit
        )));
    }
    if config.rate_limit.requests == 0 {
        return Err(StackSiftError::config("rate_limit.requests must be at least 1"));
    }
    if config.fetch.max_concurrent == 0 {
        return Err(StackSiftError::config("fetch.max_concurrent must be at least 1"));
    }
    if config.scroll.max_no_change_iterations == 0 {
        return Err(StackSiftError::config(
            "scroll.max_no_change_iterations must be at least 1",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_no_change_iterations"));
        assert!(toml_str.contains("./output"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.search.default_limit, 50);
        assert_eq!(parsed.search.max_limit, 200);
        assert_eq!(parsed.rate_limit.requests, 10);
        assert!(parsed.browser.headless);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[scroll]
delay_ms = 250

[fetch]
max_concurrent = 5
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.scroll.delay_ms, 250);
        assert_eq!(config.scroll.max_no_change_iterations, 3);
        assert_eq!(config.fetch.max_concurrent, 5);
        assert_eq!(config.fetch.delay_ms, 500);
        assert_eq!(config.output.dir, "./output");
    }

    #[test]
    fn runtime_settings_from_app_config() {
        let app = AppConfig::default();

        let scroll = ScrollSettings::from(&app);
        assert_eq!(scroll.delay, Duration::from_secs(1));
        assert_eq!(scroll.timeout, Duration::from_secs(30));

        let rate = RateLimitSettings::from(&app);
        assert_eq!(rate.max_requests, 10);
        assert_eq!(rate.window, Duration::from_secs(60));

        let fetch = FetchSettings::from(&app);
        assert_eq!(fetch.max_concurrent, 3);
        assert_eq!(fetch.delay, Duration::from_millis(500));
    }

    #[test]
    fn validation_rejects_zero_concurrency() {
        let mut config = AppConfig::default();
        config.fetch.max_concurrent = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("max_concurrent"));
    }

    #[test]
    fn validation_rejects_default_above_max() {
        let mut config = AppConfig::default();
        config.search.default_limit = 500;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn load_from_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[rate_limit]\nrequests = 4\nwindow_seconds = 10\n")
            .expect("write config");

        let config = load_config_from(&path).expect("load");
        assert_eq!(config.rate_limit.requests, 4);
        assert_eq!(config.rate_limit.window_seconds, 10);
    }
}
