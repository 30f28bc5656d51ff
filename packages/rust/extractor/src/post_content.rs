//! Full-content extraction from an individual post page.

use scraper::Html;
use serde_json::Value;

use stacksift_shared::{RawRecord, is_truthy};

use crate::strategies::{css, page_data_from_html};

/// Body fields copied from the page-data post when present.
const BODY_FIELDS: &[&str] = &["body_html", "body_json", "wordcount"];

/// Extra fields copied only when truthy.
const EXTRA_FIELDS: &[&str] = &["reactions", "comment_count", "restacks", "audio_items"];

/// Containers that hold the rendered post body, most specific first.
const BODY_SELECTORS: &[&str] = &[
    ".body.markup",
    r#"[class*="post-content"]"#,
    r#"[class*="body-markup"]"#,
    "article .body",
    ".post-body",
    r#"[class*="reader2-post-body"]"#,
];

/// Pull body content out of a post page.
///
/// Prefers `props.pageProps.post` from the page-data script, then falls
/// back to the inner HTML of the first matching body container. Never
/// returns null values; an empty map means nothing was found.
pub fn post_content_from_html(html: &str) -> RawRecord {
    let mut content = RawRecord::new();

    if let Some(Value::Object(post)) =
        page_data_from_html(html).and_then(|data| data.pointer("/props/pageProps/post").cloned())
    {
        for key in BODY_FIELDS {
            if let Some(value) = post.get(*key).filter(|v| !v.is_null()) {
                content.insert((*key).to_string(), value.clone());
            }
        }
        for key in EXTRA_FIELDS {
            if let Some(value) = post.get(*key).filter(|v| is_truthy(v)) {
                content.insert((*key).to_string(), value.clone());
            }
        }
    }

    let has_body = content.get("body_html").is_some_and(is_truthy);
    if !has_body {
        if let Some(body) = body_from_dom(html) {
            content.insert("body_html".into(), Value::String(body));
        }
    }

    content
}

fn body_from_dom(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    BODY_SELECTORS
        .iter()
        .filter_map(|s| css(s))
        .find_map(|selector| doc.select(&selector).next().map(|el| el.inner_html()))
        .filter(|body| !body.is_empty())
}
