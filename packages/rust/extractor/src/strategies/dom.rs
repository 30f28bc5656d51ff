//! Last-resort scraping of rendered result cards.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use stacksift_browser::BrowserPage;
use stacksift_shared::{
    DEFAULT_AUDIENCE, DEFAULT_POST_TYPE, RawRecord, Result, StackSiftError, capture_timestamp,
};

use super::{ExtractionStrategy, css};

/// Where relative permalinks resolve when the page has no URL.
const FALLBACK_BASE: &str = "https://substack.com/";

const CARD: &str = r#"[class*="SearchResult"], [class*="post-preview"], [data-testid="search-result"], article[class*="post"]"#;
const PERMALINK: &str = r#"a[href*="/p/"]"#;
const TITLE: &str = r#"h2, h3, [class*="title"]"#;
const SUBTITLE: &str = r#"[class*="subtitle"], [class*="description"], p[class*="preview"]"#;
const COVER: &str = r#"img[src*="substackcdn"], img[src*="substack"]"#;
const AUTHOR: &str = r#"[class*="author"], [class*="byline"]"#;
const PUBLICATION: &str = r#"[class*="publication"]"#;
const DATE: &str = r#"time, [class*="date"]"#;

/// Stable, non-canonical id for a post known only by its permalink.
///
/// Always negative (real platform ids are positive) and within the 53-bit
/// range JSON consumers can hold exactly.
pub fn placeholder_id(permalink: &Url) -> i64 {
    let key = format!("{}{}", permalink.host_str().unwrap_or_default(), permalink.path());
    let digest = Sha256::digest(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let magnitude = (u64::from_be_bytes(head) & ((1u64 << 53) - 1)) as i64;
    -magnitude.max(1)
}

struct CardSelectors {
    card: Selector,
    permalink: Selector,
    title: Selector,
    subtitle: Selector,
    cover: Selector,
    author: Selector,
    publication: Selector,
    date: Selector,
}

impl CardSelectors {
    fn new() -> Option<Self> {
        Some(Self {
            card: css(CARD)?,
            permalink: css(PERMALINK)?,
            title: css(TITLE)?,
            subtitle: css(SUBTITLE)?,
            cover: css(COVER)?,
            author: css(AUTHOR)?,
            publication: css(PUBLICATION)?,
            date: css(DATE)?,
        })
    }
}

fn text_of(card: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    let el = card.select(selector).next()?;
    let text = el.text().collect::<String>().trim().to_string();
    Some(text)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Build raw records from result cards in `html`. Cards without both a
/// title and a `/p/` permalink are skipped.
pub fn posts_from_dom(html: &str, base: &Url) -> Vec<RawRecord> {
    let Some(sel) = CardSelectors::new() else {
        return Vec::new();
    };
    let doc = Html::parse_document(html);
    let mut records = Vec::new();

    for card in doc.select(&sel.card) {
        let permalink = card
            .select(&sel.permalink)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| base.join(href).ok());
        let title = non_empty(text_of(&card, &sel.title));
        let (Some(permalink), Some(title)) = (permalink, title) else {
            continue;
        };

        let slug = permalink
            .path()
            .split("/p/")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .unwrap_or_default()
            .to_string();
        let subtitle = text_of(&card, &sel.subtitle);
        let cover_image = card
            .select(&sel.cover)
            .next()
            .and_then(|img| img.value().attr("src"))
            .and_then(|src| base.join(src).ok())
            .map(|url| url.to_string());
        let author = non_empty(text_of(&card, &sel.author));
        let publication = non_empty(text_of(&card, &sel.publication));
        let post_date = card
            .select(&sel.date)
            .next()
            .and_then(|el| {
                el.value()
                    .attr("datetime")
                    .map(str::to_string)
                    .or_else(|| Some(el.text().collect::<String>().trim().to_string()))
            })
            .filter(|d| !d.is_empty())
            .unwrap_or_else(capture_timestamp);

        let bylines = match author {
            Some(name) => {
                let users = match publication {
                    Some(pub_name) => json!([{
                        "id": 0,
                        "user_id": 0,
                        "publication_id": 0,
                        "role": "",
                        "publication": {"id": 0, "name": pub_name, "subdomain": ""}
                    }]),
                    None => json!([]),
                };
                json!([{"id": 0, "name": name, "publicationUsers": users}])
            }
            None => json!([]),
        };

        let record = json!({
            "id": placeholder_id(&permalink),
            "publication_id": 0,
            "title": title,
            "slug": slug,
            "canonical_url": permalink.to_string(),
            "subtitle": subtitle,
            "description": subtitle,
            "truncated_body_text": subtitle,
            "cover_image": cover_image,
            "post_date": post_date,
            "type": DEFAULT_POST_TYPE,
            "audience": DEFAULT_AUDIENCE,
            "publishedBylines": bylines,
        });
        if let Value::Object(map) = record {
            records.push(map);
        }
    }

    records
}

/// Scrapes visible result cards.
pub struct DomStrategy;

#[async_trait]
impl ExtractionStrategy for DomStrategy {
    fn name(&self) -> &str {
        "dom"
    }

    async fn extract(&self, page: &dyn BrowserPage) -> Result<Vec<RawRecord>> {
        let html = page.content().await?;
        let base = match page.url().await? {
            Some(url) => Url::parse(&url).ok(),
            None => None,
        };
        let base = match base {
            Some(base) => base,
            None => Url::parse(FALLBACK_BASE)
                .map_err(|e| StackSiftError::Extraction(format!("fallback base URL: {e}")))?,
        };
        let records = posts_from_dom(&html, &base);
        debug!(count = records.len(), "DOM posts");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stacksift_browser::mock::ScriptedPage;
    use stacksift_shared::Post;

    fn base() -> Url {
        Url::parse("https://substack.com/search/ai?searching=all_posts").expect("url")
    }

    #[test]
    fn placeholder_ids_are_stable_and_negative() {
        let a = Url::parse("https://one.substack.com/p/hello").expect("url");
        let b = Url::parse("https://two.substack.com/p/hello").expect("url");
        assert_eq!(placeholder_id(&a), placeholder_id(&a));
        assert!(placeholder_id(&a) < 0);
        assert!(placeholder_id(&a) >= -(1i64 << 53));
        assert_ne!(placeholder_id(&a), placeholder_id(&b));
    }

    #[test]
    fn parses_fixture_cards() {
        let html = std::fs::read_to_string("../../../fixtures/html/search_results.html")
            .expect("read fixture");
        let records = posts_from_dom(&html, &base());

        // Four cards; one lacks a permalink and one lacks a title.
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first["title"], "The Future of AI Agents");
        assert_eq!(first["slug"], "future-of-ai-agents");
        assert_eq!(
            first["canonical_url"],
            "https://aiweekly.substack.com/p/future-of-ai-agents"
        );
        assert_eq!(first["subtitle"], "What changes when models can act");
        assert_eq!(first["post_date"], "2025-01-15T08:00:00.000Z");
        assert_eq!(first["publishedBylines"][0]["name"], "Sam Rivera");
        assert_eq!(
            first["publishedBylines"][0]["publicationUsers"][0]["publication"]["name"],
            "AI Weekly"
        );

        let second = &records[1];
        assert_eq!(
            second["canonical_url"],
            "https://substack.com/p/local-models-at-home"
        );
        assert_eq!(second["post_date"], "Jan 3");
        assert_eq!(second["publishedBylines"], serde_json::json!([]));
    }

    #[test]
    fn dom_records_parse_strictly() {
        let html = std::fs::read_to_string("../../../fixtures/html/search_results.html")
            .expect("read fixture");
        for mut record in posts_from_dom(&html, &base()) {
            record.insert("keyword".into(), "ai".into());
            Post::from_record(&record).expect("DOM record is a valid post");
        }
    }

    #[tokio::test]
    async fn strategy_uses_page_url_as_base() {
        let html = r#"<div class="post-preview"><a href="/p/relative">x</a><h3>Relative</h3></div>"#;
        let page = ScriptedPage::new().with_html(html);
        page.goto("https://writer.substack.com/archive", std::time::Duration::from_secs(1))
            .await
            .expect("goto");
        let records = DomStrategy.extract(&page).await.expect("extract");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["canonical_url"], "https://writer.substack.com/p/relative");
    }
}
