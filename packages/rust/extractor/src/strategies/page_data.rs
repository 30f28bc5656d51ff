//! Posts embedded in the server-rendered page-data script.

use async_trait::async_trait;
use scraper::Html;
use serde_json::Value;
use tracing::debug;

use stacksift_browser::BrowserPage;
use stacksift_shared::{RawRecord, Result, is_truthy, records_with_id};

use super::{ExtractionStrategy, css};

/// Parse the JSON inside `script#__NEXT_DATA__`, if the page has one.
pub fn page_data_from_html(html: &str) -> Option<Value> {
    let selector = css("script#__NEXT_DATA__")?;
    let doc = Html::parse_document(html);
    let script = doc.select(&selector).next()?;
    let text: String = script.text().collect();
    match serde_json::from_str(text.trim()) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(error = %e, "page data script is not valid JSON");
            None
        }
    }
}

/// Find the post list in page data. Checks, in order, `pageProps.posts`,
/// `pageProps.results`, `pageProps.searchData.posts`, then the first
/// dehydrated query whose data carries a non-empty `posts`.
pub fn posts_from_page_data(data: &Value) -> Vec<Value> {
    let Some(page_props) = data.pointer("/props/pageProps") else {
        return Vec::new();
    };

    let direct = ["/posts", "/results", "/searchData/posts"]
        .iter()
        .filter_map(|path| page_props.pointer(path))
        .find(|v| is_truthy(v));
    if let Some(Value::Array(posts)) = direct {
        return posts.clone();
    }

    page_props
        .pointer("/dehydratedState/queries")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|query| query.pointer("/state/data/posts"))
        .find_map(|posts| match posts {
            Value::Array(items) if !items.is_empty() => Some(items.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

/// Reads posts from the `__NEXT_DATA__` script.
pub struct PageDataStrategy;

#[async_trait]
impl ExtractionStrategy for PageDataStrategy {
    fn name(&self) -> &str {
        "page_data"
    }

    async fn extract(&self, page: &dyn BrowserPage) -> Result<Vec<RawRecord>> {
        let html = page.content().await?;
        let Some(data) = page_data_from_html(&html) else {
            return Ok(Vec::new());
        };
        let records = records_with_id(posts_from_page_data(&data));
        debug!(count = records.len(), "page data posts");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stacksift_browser::mock::ScriptedPage;

    fn wrap(page_props: Value) -> String {
        format!(
            r#"<html><body><div id="__next"></div><script id="__NEXT_DATA__" type="application/json">{}</script></body></html>"#,
            json!({"props": {"pageProps": page_props}})
        )
    }

    #[test]
    fn tries_paths_in_order() {
        let data = json!({"props": {"pageProps": {
            "posts": [],
            "results": [{"id": 2}],
            "searchData": {"posts": [{"id": 3}]}
        }}});
        assert_eq!(posts_from_page_data(&data), vec![json!({"id": 2})]);

        let data = json!({"props": {"pageProps": {"searchData": {"posts": [{"id": 3}]}}}});
        assert_eq!(posts_from_page_data(&data), vec![json!({"id": 3})]);
    }

    #[test]
    fn falls_back_to_dehydrated_queries() {
        let data = json!({"props": {"pageProps": {"dehydratedState": {"queries": [
            {"state": {"data": ["not", "an", "object"]}},
            {"state": {"data": {"posts": []}}},
            {"state": {"data": {"posts": [{"id": 7}, {"id": 8}]}}},
            {"state": {"data": {"posts": [{"id": 9}]}}}
        ]}}}});
        let posts = posts_from_page_data(&data);
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0]["id"], 7);
    }

    #[test]
    fn missing_props_yield_nothing() {
        assert!(posts_from_page_data(&json!({"page": "/search"})).is_empty());
        assert!(posts_from_page_data(&json!({"props": {"pageProps": {"posts": "x"}}})).is_empty());
    }

    #[test]
    fn invalid_script_json_is_ignored() {
        let html = r#"<script id="__NEXT_DATA__">{not json</script>"#;
        assert!(page_data_from_html(html).is_none());
        assert!(page_data_from_html("<html></html>").is_none());
    }

    #[tokio::test]
    async fn extracts_from_page_html() {
        let page = ScriptedPage::new().with_html(&wrap(json!({
            "posts": [{"id": 11, "title": "A"}, {"title": "no id"}, {"id": 12, "title": "B"}]
        })));
        let records = PageDataStrategy.extract(&page).await.expect("extract");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["title"], "B");
    }
}
