//! Core domain types: posts, search results, and raw extraction records.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StackSiftError};

/// Default post `type` when the platform omits it.
pub const DEFAULT_POST_TYPE: &str = "newsletter";

/// Default post `audience` when the platform omits it.
pub const DEFAULT_AUDIENCE: &str = "everyone";

// ---------------------------------------------------------------------------
// RawRecord
// ---------------------------------------------------------------------------

/// An untyped post record as captured from a network response, page state, or the DOM.
pub type RawRecord = Map<String, Value>;

/// JSON truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Return the record's `id` if it is present and truthy.
pub fn record_id(record: &RawRecord) -> Option<&Value> {
    record.get("id").filter(|id| is_truthy(id))
}

/// Keep only JSON objects that carry a usable `id`.
pub fn records_with_id(values: Vec<Value>) -> Vec<RawRecord> {
    values
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(map) if record_id(&map).is_some() => Some(map),
            _ => None,
        })
        .collect()
}

/// Drop records whose `id` was already seen, keeping the first occurrence.
pub fn dedup_by_id(records: Vec<RawRecord>) -> Vec<RawRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| match record_id(r) {
            Some(id) => seen.insert(id.to_string()),
            None => false,
        })
        .collect()
}

/// Current UTC time in the `scrapedAt` wire format.
pub fn capture_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Stamp a record with its search keyword and capture time.
///
/// Both fields are overwritten, so a record's `scrapedAt` always reflects
/// this run rather than whatever the platform or an earlier run put there.
pub fn stamp_record(record: &mut RawRecord, keyword: &str, scraped_at: &str) {
    record.insert("keyword".into(), Value::String(keyword.to_string()));
    record.insert("scrapedAt".into(), Value::String(scraped_at.to_string()));
}

// ---------------------------------------------------------------------------
// Nested post metadata
// ---------------------------------------------------------------------------

/// Publication details attached to a byline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub id: i64,
    pub name: String,
    pub subdomain: String,
    #[serde(default)]
    pub custom_domain: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub hero_text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A user's role in a publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicationUser {
    pub id: i64,
    pub user_id: i64,
    pub publication_id: i64,
    pub role: String,
    #[serde(default = "default_true")]
    pub public: bool,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub publication: Option<Publication>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

/// Author/byline information for a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedByline {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(rename = "publicationUsers", default)]
    pub publication_users: Vec<PublicationUser>,
    #[serde(default)]
    pub is_guest: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Post tag/category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostTag {
    pub id: String,
    pub publication_id: i64,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Podcast-specific metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodcastFields {
    pub post_id: i64,
    #[serde(default)]
    pub podcast_episode_number: Option<i64>,
    #[serde(default)]
    pub podcast_season_number: Option<i64>,
    #[serde(default)]
    pub podcast_episode_type: Option<String>,
    #[serde(default)]
    pub free_podcast_url: Option<String>,
    #[serde(default)]
    pub free_podcast_duration: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Text-to-speech or voiceover audio attached to a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioItem {
    pub post_id: i64,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Post
// ---------------------------------------------------------------------------

/// A post found by a keyword search.
///
/// Fields the platform adds that are not modelled here are kept verbatim in
/// [`Post::extra`] and written back out on serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// The search keyword that produced this post.
    pub keyword: String,

    pub id: i64,
    pub publication_id: i64,
    #[serde(rename = "type", default = "default_post_type")]
    pub post_type: String,
    pub slug: String,

    pub title: String,
    #[serde(default)]
    pub social_title: Option<String>,
    #[serde(default)]
    pub search_engine_title: Option<String>,
    #[serde(default)]
    pub search_engine_description: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub truncated_body_text: Option<String>,
    #[serde(default)]
    pub body_json: Option<Value>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub wordcount: Option<i64>,

    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub cover_image_is_square: bool,

    pub canonical_url: String,
    /// Publication date as sent by the platform (usually RFC 3339).
    pub post_date: String,

    #[serde(default = "default_audience")]
    pub audience: String,
    #[serde(default = "default_audience")]
    pub write_comment_permissions: String,

    #[serde(default)]
    pub section_id: Option<i64>,
    #[serde(default)]
    pub section_slug: Option<String>,
    #[serde(default)]
    pub section_name: Option<String>,

    #[serde(default)]
    pub reactions: Option<BTreeMap<String, i64>>,
    #[serde(default)]
    pub restacks: i64,
    #[serde(default)]
    pub reaction_count: i64,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(default)]
    pub child_comment_count: i64,

    #[serde(default)]
    pub podcast_url: Option<String>,
    #[serde(default)]
    pub podcast_duration: Option<f64>,
    #[serde(rename = "podcastFields", default)]
    pub podcast_fields: Option<PodcastFields>,

    #[serde(default)]
    pub voiceover_upload_id: Option<String>,
    #[serde(default)]
    pub has_voiceover: bool,

    #[serde(rename = "postTags", default)]
    pub post_tags: Vec<PostTag>,
    #[serde(rename = "publishedBylines", default)]
    pub published_bylines: Vec<PublishedByline>,
    #[serde(default)]
    pub audio_items: Vec<AudioItem>,

    #[serde(default)]
    pub is_geoblocked: bool,

    /// When the pipeline captured this record.
    #[serde(rename = "scrapedAt", default = "Utc::now")]
    pub scraped_at: DateTime<Utc>,

    /// Platform fields without a typed counterpart.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_post_type() -> String {
    DEFAULT_POST_TYPE.into()
}
fn default_audience() -> String {
    DEFAULT_AUDIENCE.into()
}

impl Post {
    /// Strictly parse a raw record. Unknown keys land in [`Post::extra`].
    pub fn from_record(record: &RawRecord) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(record.clone()))?)
    }

    /// Build a post from the handful of fields every record should have,
    /// defaulting anything missing or malformed.
    ///
    /// Fails only when the record has no `id` at all.
    pub fn minimal(record: &RawRecord, keyword: &str) -> Result<Self> {
        let id_value = record
            .get("id")
            .filter(|v| !v.is_null())
            .ok_or_else(|| StackSiftError::validation("record has no id"))?;

        let scraped_at = record
            .get("scrapedAt")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(Self {
            keyword: keyword.to_string(),
            id: lenient_i64(Some(id_value)).unwrap_or(0),
            publication_id: lenient_i64(record.get("publication_id")).unwrap_or(0),
            post_type: lenient_string(record.get("type")).unwrap_or_else(default_post_type),
            slug: lenient_string(record.get("slug")).unwrap_or_default(),
            title: lenient_string(record.get("title")).unwrap_or_else(|| "Unknown".into()),
            social_title: None,
            search_engine_title: None,
            search_engine_description: None,
            subtitle: None,
            description: None,
            truncated_body_text: None,
            body_json: None,
            body_html: None,
            wordcount: None,
            cover_image: None,
            cover_image_is_square: false,
            canonical_url: lenient_string(record.get("canonical_url")).unwrap_or_default(),
            post_date: lenient_string(record.get("post_date")).unwrap_or_else(capture_timestamp),
            audience: lenient_string(record.get("audience")).unwrap_or_else(default_audience),
            write_comment_permissions: default_audience(),
            section_id: None,
            section_slug: None,
            section_name: None,
            reactions: None,
            restacks: 0,
            reaction_count: 0,
            comment_count: 0,
            child_comment_count: 0,
            podcast_url: None,
            podcast_duration: None,
            podcast_fields: None,
            voiceover_upload_id: None,
            has_voiceover: false,
            post_tags: Vec::new(),
            published_bylines: Vec::new(),
            audio_items: Vec::new(),
            is_geoblocked: false,
            scraped_at,
            extra: Map::new(),
        })
    }
}

/// Integer from a JSON number or numeric string.
fn lenient_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// String from a JSON string, or the textual form of a number/bool.
fn lenient_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// SearchResult
// ---------------------------------------------------------------------------

/// Posts found for a single keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub keyword: String,
    pub total_results: usize,
    pub posts: Vec<Post>,
    pub scraped_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl SearchResult {
    /// Assemble a result stamped with the current time.
    pub fn new(keyword: impl Into<String>, posts: Vec<Post>, elapsed: Duration) -> Self {
        Self {
            keyword: keyword.into(),
            total_results: posts.len(),
            posts,
            scraped_at: Utc::now(),
            duration_seconds: round_seconds(elapsed),
        }
    }

    /// A result with no posts, used when a keyword's search failed outright.
    pub fn empty(keyword: impl Into<String>) -> Self {
        Self::new(keyword, Vec::new(), Duration::ZERO)
    }
}

/// Results for several keywords searched in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSearchResult {
    pub keywords: Vec<String>,
    pub total_results: usize,
    pub results: Vec<SearchResult>,
    pub scraped_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl BatchSearchResult {
    pub fn new(results: Vec<SearchResult>, elapsed: Duration) -> Self {
        Self {
            keywords: results.iter().map(|r| r.keyword.clone()).collect(),
            total_results: results.iter().map(|r| r.total_results).sum(),
            results,
            scraped_at: Utc::now(),
            duration_seconds: round_seconds(elapsed),
        }
    }
}

/// Seconds rounded to two decimals.
fn round_seconds(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn sample_record() -> RawRecord {
        record(json!({
            "keyword": "test",
            "id": 123456,
            "publication_id": 789,
            "title": "Test Post Title",
            "slug": "test-post-title",
            "canonical_url": "https://example.substack.com/p/test-post-title",
            "post_date": "2025-01-01T10:00:00.000Z",
            "type": "newsletter",
            "audience": "everyone",
            "subtitle": "A test subtitle",
            "description": "A test description",
            "wordcount": 1500
        }))
    }

    #[test]
    fn post_from_record() {
        let post = Post::from_record(&sample_record()).expect("parse");
        assert_eq!(post.id, 123456);
        assert_eq!(post.title, "Test Post Title");
        assert_eq!(post.keyword, "test");
        assert_eq!(post.slug, "test-post-title");
        assert_eq!(post.wordcount, Some(1500));
        assert!(post.extra.is_empty());
    }

    #[test]
    fn post_defaults_for_minimal_fields() {
        let raw = record(json!({
            "keyword": "test",
            "id": 1,
            "publication_id": 1,
            "title": "Minimal Post",
            "slug": "minimal-post",
            "canonical_url": "https://example.substack.com/p/minimal",
            "post_date": "2025-02-03T04:05:06Z"
        }));
        let post = Post::from_record(&raw).expect("parse");
        assert_eq!(post.post_type, "newsletter");
        assert_eq!(post.audience, "everyone");
        assert_eq!(post.restacks, 0);
        assert!(post.published_bylines.is_empty());
    }

    #[test]
    fn post_roundtrip_preserves_fields_and_extras() {
        let mut raw = sample_record();
        raw.insert("scrapedAt".into(), json!("2025-01-02T00:00:00.000Z"));
        raw.insert("hasCashtag".into(), json!(true));
        raw.insert("postCountryBlocks".into(), json!([]));
        raw.insert(
            "publishedBylines".into(),
            json!([{
                "id": 9,
                "name": "Jane Writer",
                "publicationUsers": [{
                    "id": 1, "user_id": 9, "publication_id": 789, "role": "admin",
                    "publication": {"id": 789, "name": "Jane's Letter", "subdomain": "jane", "theme": "dark"}
                }]
            }]),
        );

        let post = Post::from_record(&raw).expect("parse");
        assert_eq!(post.extra.get("hasCashtag"), Some(&json!(true)));
        let publication = post.published_bylines[0].publication_users[0]
            .publication
            .as_ref()
            .expect("publication");
        assert_eq!(publication.extra.get("theme"), Some(&json!("dark")));

        let json = serde_json::to_string(&post).expect("serialize");
        let reparsed: Post = serde_json::from_str(&json).expect("reparse");
        assert_eq!(post, reparsed);
    }

    #[test]
    fn strict_parse_rejects_string_id() {
        let mut raw = sample_record();
        raw.insert("id".into(), json!("not-a-number"));
        assert!(Post::from_record(&raw).is_err());
    }

    #[test]
    fn minimal_post_defaults_unparsable_values() {
        let raw = record(json!({
            "id": "42",
            "title": {"nested": true},
            "publication_id": "abc",
            "canonical_url": "https://x.substack.com/p/y"
        }));
        let post = Post::minimal(&raw, "rust").expect("minimal");
        assert_eq!(post.id, 42);
        assert_eq!(post.publication_id, 0);
        assert_eq!(post.title, "Unknown");
        assert_eq!(post.slug, "");
        assert_eq!(post.keyword, "rust");
        assert_eq!(post.post_type, "newsletter");
        assert_eq!(post.audience, "everyone");
        assert!(!post.post_date.is_empty());
    }

    #[test]
    fn minimal_post_requires_id() {
        let raw = record(json!({"title": "No id"}));
        assert!(Post::minimal(&raw, "k").is_err());
    }

    #[test]
    fn record_id_truthiness() {
        assert!(record_id(&record(json!({"id": 5}))).is_some());
        assert!(record_id(&record(json!({"id": "abc"}))).is_some());
        assert!(record_id(&record(json!({"id": 0}))).is_none());
        assert!(record_id(&record(json!({"id": ""}))).is_none());
        assert!(record_id(&record(json!({"id": null}))).is_none());
        assert!(record_id(&record(json!({"title": "x"}))).is_none());
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let records = vec![
            record(json!({"id": 1, "title": "first"})),
            record(json!({"id": 2, "title": "second"})),
            record(json!({"id": 1, "title": "duplicate"})),
        ];
        let deduped = dedup_by_id(records);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0]["title"], "first");
        assert_eq!(deduped[1]["title"], "second");
    }

    #[test]
    fn records_with_id_filters_non_objects() {
        let values = vec![json!({"id": 1}), json!("string"), json!({"title": "no id"}), json!(3)];
        let records = records_with_id(values);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn stamp_replaces_keyword_and_timestamp() {
        let mut rec = record(json!({"id": 1, "keyword": "old", "scrapedAt": "2020-01-01T00:00:00Z"}));
        stamp_record(&mut rec, "ml", "2025-01-01T00:00:00.000Z");
        assert_eq!(rec["keyword"], "ml");
        assert_eq!(rec["scrapedAt"], "2025-01-01T00:00:00.000Z");
        assert_eq!(rec["id"], 1);
    }

    #[test]
    fn search_result_counts_and_rounds() {
        let post = Post::from_record(&sample_record()).expect("parse");
        let result = SearchResult::new("test", vec![post], Duration::from_millis(1234));
        assert_eq!(result.total_results, 1);
        assert_eq!(result.duration_seconds, 1.23);

        let json = serde_json::to_value(&result).expect("serialize");
        assert!(json.get("keyword").is_some());
        assert_eq!(json["posts"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn empty_result_has_no_posts() {
        let result = SearchResult::empty("nothing");
        assert_eq!(result.total_results, 0);
        assert!(result.posts.is_empty());
        assert_eq!(result.duration_seconds, 0.0);
    }

    #[test]
    fn batch_result_sums_totals() {
        let post = Post::from_record(&sample_record()).expect("parse");
        let results = vec![
            SearchResult::new("a", vec![post.clone(), post], Duration::from_secs(1)),
            SearchResult::empty("b"),
        ];
        let batch = BatchSearchResult::new(results, Duration::from_secs(2));
        assert_eq!(batch.keywords, vec!["a", "b"]);
        assert_eq!(batch.total_results, 2);
    }

    #[test]
    fn post_fixture_validates() {
        let fixture = std::fs::read_to_string("../../../fixtures/json/post.fixture.json")
            .expect("read fixture");
        let raw: RawRecord = serde_json::from_str(&fixture).expect("fixture is an object");
        let post = Post::from_record(&raw).expect("deserialize fixture post");
        assert_eq!(post.id, 148_912_345);
        assert_eq!(post.published_bylines.len(), 1);
        assert_eq!(post.post_tags[0].slug, "machine-learning");
        assert_eq!(post.audio_items.len(), 1);
        assert!(post.extra.contains_key("coverImagePalette"));
    }
}
