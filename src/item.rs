use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Open enrichment bag attached to every item.
///
/// Producers and consumers agree on well-known keys:
/// - `tweet`:           raw source payload the item was built from
/// - `tweet_error_url`: why no url could be extracted from the payload
/// - `article`:         `{title, text, url}` set by the article fetcher
/// - `article_error`:   why the article fetch failed
/// - `original_url`:    url before a processor rewrote it
pub type Extra = BTreeMap<String, Value>;

/// Canonical unit of collected content.
///
/// This struct is the single format exchanged between:
/// - Collectors (producers)
/// - The processing pipeline
/// - Storage backends (persisted as the `data` field of a record)
/// - Aggregators
///
/// The serialized form is a flat record with explicit keys
/// `{provider, category, text, url, extra}`. `extra` is always
/// written, even when empty, and defaults to empty when reading.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Item {
    /// Source identifier (e.g. "twitter"). May be empty, but storage
    /// backends refuse items without one.
    #[serde(default)]
    pub provider: String,

    /// Classification tag, usually the matching track.
    #[serde(default)]
    pub category: Option<String>,

    /// Free text content.
    #[serde(default)]
    pub text: Option<String>,

    /// Resource url. Processors may rewrite it (unshortening, canonicalization).
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub extra: Extra,
}

impl Item {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..Self::default()
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Flat record representation.
    pub fn to_record(&self) -> Value {
        serde_json::json!({
            "provider": self.provider,
            "category": self.category,
            "text": self.text,
            "url": self.url,
            "extra": self.extra,
        })
    }

    pub fn from_record(record: Value) -> Result<Self> {
        serde_json::from_value(record).context("decoding item record")
    }
}

/// One persisted line: `{"timestamp": <unix seconds>, "data": <item record>}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StoredRecord {
    pub timestamp: i64,
    pub data: Item,
}

impl StoredRecord {
    pub fn new(timestamp: i64, data: Item) -> Self {
        Self { timestamp, data }
    }

    /// Serializes the record as a single newline-terminated line.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self).context("encoding stored record")?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).context("decoding stored record")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_round_trip_keeps_extra() {
        let mut item = Item::new("twitter")
            .with_category("free steam game")
            .with_text("grab it")
            .with_url("https://store.example.com/app/1");
        item.extra.insert("article".into(), json!({"title": "t", "keywords": ["a", 1, null]}));
        item.extra.insert("score".into(), json!(0.25));

        let back = Item::from_record(item.to_record()).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn missing_extra_defaults_to_empty() {
        let item = Item::from_record(json!({"provider": "p", "url": "u"})).unwrap();
        assert!(item.extra.is_empty());
        assert_eq!(item.category, None);
        assert_eq!(item.to_record()["extra"], json!({}));
    }

    #[test]
    fn stored_line_is_newline_terminated() {
        let rec = StoredRecord::new(42, Item::new("p"));
        let line = rec.to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(StoredRecord::from_line(line.trim_end()).unwrap(), rec);
    }
}
