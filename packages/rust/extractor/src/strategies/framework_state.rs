//! Posts held in the React component tree.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use stacksift_browser::BrowserPage;
use stacksift_shared::{RawRecord, Result, StackSiftError, dedup_by_id, records_with_id};

use super::ExtractionStrategy;

/// Walks fiber nodes from the app root (then from each result-like element)
/// collecting `memoizedProps.post` and `memoizedProps.posts`.
const FIBER_WALK_SCRIPT: &str = r#"(() => {
    const MAX_DEPTH = 20;
    const fromElement = (element) => {
        if (!element) return [];
        const key = Object.keys(element).find(k => k.startsWith('__reactFiber'));
        if (!key) return [];
        const walk = (node, depth) => {
            if (!node || depth > MAX_DEPTH) return [];
            let found = [];
            const props = node.memoizedProps;
            if (props) {
                if (props.post && props.post.id) found.push(props.post);
                if (Array.isArray(props.posts)) found = found.concat(props.posts);
            }
            found = found.concat(walk(node.child, depth + 1));
            found = found.concat(walk(node.sibling, depth + 1));
            return found;
        };
        return walk(element[key], 0);
    };

    let posts = fromElement(document.getElementById('__next') || document.getElementById('root'));
    if (posts.length === 0) {
        const elements = document.querySelectorAll('[class*="SearchResult"], [class*="search-result"], article');
        for (const el of elements) posts = posts.concat(fromElement(el));
    }

    const seen = new Set();
    const unique = posts.filter(p => {
        if (!p || !p.id || seen.has(p.id)) return false;
        seen.add(p.id);
        return true;
    });
    // Fiber props can hold functions and cycles; keep only what survives JSON.
    return unique.map(p => {
        try { return JSON.parse(JSON.stringify(p)); } catch (_) { return null; }
    }).filter(Boolean);
})()"#;

/// Reads posts from React fiber `memoizedProps`.
pub struct FrameworkStateStrategy;

#[async_trait]
impl ExtractionStrategy for FrameworkStateStrategy {
    fn name(&self) -> &str {
        "framework_state"
    }

    async fn extract(&self, page: &dyn BrowserPage) -> Result<Vec<RawRecord>> {
        let value = page.evaluate(FIBER_WALK_SCRIPT).await?;
        let posts = match value {
            Value::Array(items) => items,
            Value::Null => return Ok(Vec::new()),
            other => {
                return Err(StackSiftError::Extraction(format!(
                    "fiber walk returned {}",
                    type_name(&other)
                )));
            }
        };
        let records = dedup_by_id(records_with_id(posts));
        debug!(count = records.len(), "framework state posts");
        Ok(records)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stacksift_browser::mock::ScriptedPage;

    #[tokio::test]
    async fn duplicate_ids_collapse() {
        let page = ScriptedPage::new().on_evaluate(
            "__reactFiber",
            json!([
                {"id": 1, "title": "first"},
                {"id": 2, "title": "second"},
                {"id": 1, "title": "again"},
                {"title": "no id"},
            ]),
        );
        let records = FrameworkStateStrategy.extract(&page).await.expect("extract");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["title"], "first");
    }

    #[tokio::test]
    async fn null_means_nothing_found() {
        let page = ScriptedPage::new();
        assert!(FrameworkStateStrategy.extract(&page).await.expect("extract").is_empty());
    }

    #[tokio::test]
    async fn unexpected_shape_is_an_error() {
        let page = ScriptedPage::new().on_evaluate("__reactFiber", json!("oops"));
        assert!(FrameworkStateStrategy.extract(&page).await.is_err());
    }
}
