//! Posts in the `window._preloads` global.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use stacksift_browser::BrowserPage;
use stacksift_shared::{RawRecord, Result, records_with_id};

use super::ExtractionStrategy;

const PRELOADS_SCRIPT: &str =
    "(() => window._preloads ? JSON.stringify(window._preloads) : null)()";

/// Reads `window._preloads.posts`.
pub struct PreloadsStrategy;

#[async_trait]
impl ExtractionStrategy for PreloadsStrategy {
    fn name(&self) -> &str {
        "preloads"
    }

    async fn extract(&self, page: &dyn BrowserPage) -> Result<Vec<RawRecord>> {
        let Value::String(serialized) = page.evaluate(PRELOADS_SCRIPT).await? else {
            return Ok(Vec::new());
        };
        let preloads: Value = serde_json::from_str(&serialized)?;
        let posts = match preloads.get("posts") {
            Some(Value::Array(posts)) => posts.clone(),
            _ => Vec::new(),
        };
        let records = records_with_id(posts);
        debug!(count = records.len(), "preload posts");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stacksift_browser::mock::ScriptedPage;

    #[tokio::test]
    async fn reads_posts_key() {
        let preloads = json!({"posts": [{"id": 5}, {"id": 6}], "pub": {"id": 1}}).to_string();
        let page = ScriptedPage::new().on_evaluate("_preloads", json!(preloads));
        let records = PreloadsStrategy.extract(&page).await.expect("extract");
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn absent_global_yields_nothing() {
        let page = ScriptedPage::new();
        assert!(PreloadsStrategy.extract(&page).await.expect("extract").is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_an_error() {
        let page = ScriptedPage::new().on_evaluate("_preloads", json!("{broken"));
        assert!(PreloadsStrategy.extract(&page).await.is_err());
    }
}
