//! JSON file output for search results.
//!
//! [`JsonWriter`] owns an output directory and writes one pretty-printed
//! file per keyword search, or a single combined file for a batch. Every
//! write goes to a hidden temp file first and is renamed into place.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use stacksift_shared::{RawRecord, Result, SearchResult, StackSiftError};

/// Default file name for [`JsonWriter::write_all_posts_combined`].
pub const COMBINED_FILE_NAME: &str = "all_posts.json";

const MAX_STEM_LEN: usize = 50;

/// Make `text` safe for use as a file name stem.
///
/// Anything other than a word character (Unicode letter, digit or `_`)
/// or `-` becomes `_`, runs of `_` collapse, leading and trailing `_` are
/// trimmed, and the result is capped at 50 characters.
pub fn sanitize_filename(text: &str) -> String {
    static UNSAFE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^\w\-]").expect("valid regex"));
    static UNDERSCORES_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"_+").expect("valid regex"));

    let replaced = UNSAFE_RE.replace_all(text, "_");
    let collapsed = UNDERSCORES_RE.replace_all(&replaced, "_");
    collapsed
        .trim_matches('_')
        .chars()
        .take(MAX_STEM_LEN)
        .collect()
}

/// Writes search output into a single directory.
#[derive(Debug, Clone)]
pub struct JsonWriter {
    output_dir: PathBuf,
}

impl JsonWriter {
    /// Use `output_dir`, creating it if needed.
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir).map_err(|e| StackSiftError::io(&output_dir, e))?;
        Ok(Self { output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `<keyword>_<YYYYMMDD_HHMMSS>.json`, stamped with the current UTC time.
    fn timestamped_name(keyword: &str) -> String {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        format!("{}_{timestamp}.json", sanitize_filename(keyword))
    }

    /// Write one keyword's result. Returns the file path.
    pub fn write_search_result(&self, result: &SearchResult) -> Result<PathBuf> {
        let path = self.output_dir.join(Self::timestamped_name(&result.keyword));
        write_json(&path, result)?;
        info!(path = %path.display(), posts = result.posts.len(), "saved search result");
        Ok(path)
    }

    /// Write unvalidated records for `keyword`. Returns the file path.
    pub fn write_posts(&self, posts: &[RawRecord], keyword: &str) -> Result<PathBuf> {
        let path = self.output_dir.join(Self::timestamped_name(keyword));
        write_json(&path, posts)?;
        info!(path = %path.display(), count = posts.len(), "saved posts");
        Ok(path)
    }

    /// Write every post from `results` as one flat array.
    ///
    /// `filename` defaults to [`COMBINED_FILE_NAME`].
    pub fn write_all_posts_combined(
        &self,
        results: &[SearchResult],
        filename: Option<&str>,
    ) -> Result<PathBuf> {
        let path = self
            .output_dir
            .join(filename.unwrap_or(COMBINED_FILE_NAME));
        let posts: Vec<_> = results.iter().flat_map(|r| r.posts.iter()).collect();
        write_json(&path, &posts)?;
        info!(
            path = %path.display(),
            total_posts = posts.len(),
            keywords = results.len(),
            "saved combined posts"
        );
        Ok(path)
    }
}

/// Pretty-print `data` to `path` via a temp file and rename.
fn write_json<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| StackSiftError::Storage(format!("JSON serialization failed: {e}")))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&temp, json).map_err(|e| StackSiftError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| StackSiftError::io(path, e))?;
    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}
