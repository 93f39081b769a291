//! Tweet-shaped payload handling shared by every source.
//!
//! - Track rules: `"free steam -scam"` → words `[free, steam]`, exclusions `[scam]`
//! - Category inference over the full searchable surface of a tweet
//! - Url selection across retweet / quote / extended wrappers
//!
//! Payloads are externally supplied, so every recursive walk is capped
//! at `MAX_DEPTH` levels of nesting.

use anyhow::{Result, bail};
use log::debug;
use serde_json::{Value, json};

use crate::item::Item;
use crate::util;

pub const MAX_DEPTH: usize = 8;

const NESTED: [&str; 2] = ["retweeted_status", "quoted_status"];

/// One configured track: a phrase of required words plus exclusions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// Raw configuration string, as sent to server-side filters
    pub raw: String,
    /// Phrase without exclusion tokens; used as the category name
    pub phrase: String,
    words: Vec<String>,
    exclusions: Vec<String>,
}

impl Track {
    /// Parses a track string. Tokens written `-word` become exclusions.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut phrase = Vec::new();
        let mut exclusions = Vec::new();
        for token in raw.split_whitespace() {
            match token.strip_prefix('-') {
                Some(word) if !word.is_empty() => exclusions.push(word.to_lowercase()),
                _ => phrase.push(token),
            }
        }
        if phrase.is_empty() {
            bail!("track '{}' has no required word", raw);
        }
        Ok(Self {
            raw: raw.trim().to_string(),
            phrase: phrase.join(" "),
            words: phrase.iter().map(|w| w.to_lowercase()).collect(),
            exclusions,
        })
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn exclusions(&self) -> &[String] {
        &self.exclusions
    }

    /// `lowered` must already be lowercase.
    fn matches(&self, lowered: &str) -> bool {
        self.words.iter().all(|w| lowered.contains(w.as_str()))
            && !self.exclusions.iter().any(|x| lowered.contains(x.as_str()))
    }
}

/// Ordered set of tracks, parsed once at collector construction.
#[derive(Debug, Clone, Default)]
pub struct TrackSet {
    tracks: Vec<Track>,
}

impl TrackSet {
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Result<Self> {
        let tracks = raw
            .iter()
            .map(|t| Track::parse(t.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tracks })
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Most specific matching track: the one with the most words,
    /// first declared wins ties.
    pub fn category_for(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        let mut best: Option<&Track> = None;
        for track in &self.tracks {
            if !track.matches(&lowered) {
                continue;
            }
            if best.is_none_or(|b| b.words.len() < track.words.len()) {
                best = Some(track);
            }
        }
        best.map(|t| t.phrase.as_str())
    }
}

fn str_at<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str)
}

fn array_at<'a>(v: &'a Value, key: &str) -> &'a [Value] {
    v.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Text contributed by a tweet's own entities.
pub fn entities_text(tweet: &Value) -> String {
    let Some(entities) = tweet.get("entities") else {
        return String::new();
    };
    let mut parts: Vec<&str> = Vec::new();
    for tag in array_at(entities, "hashtags") {
        parts.extend(str_at(tag, "text").or_else(|| str_at(tag, "tag")));
    }
    for key in ["urls", "media"] {
        for url in array_at(entities, key) {
            parts.extend(str_at(url, "expanded_url"));
            parts.extend(str_at(url, "display_url"));
        }
    }
    for mention in array_at(entities, "user_mentions") {
        parts.extend(str_at(mention, "screen_name"));
    }
    for mention in array_at(entities, "mentions") {
        parts.extend(str_at(mention, "username"));
    }
    parts.join(" ")
}

/// Everything the source's own search matches against: text, extended
/// text, nested retweet / quote text and entity-derived text.
pub fn searchable_text(tweet: &Value) -> String {
    let mut parts = Vec::new();
    collect_text(tweet, 0, &mut parts);
    parts.retain(|p| !p.is_empty());
    parts.join(" ")
}

fn collect_text(tweet: &Value, depth: usize, parts: &mut Vec<String>) {
    if depth > MAX_DEPTH {
        return;
    }
    parts.push(str_at(tweet, "text").unwrap_or_default().to_string());
    if let Some(extended) = tweet.get("extended_tweet") {
        parts.push(str_at(extended, "full_text").unwrap_or_default().to_string());
        parts.push(entities_text(extended));
    }
    for key in NESTED {
        if let Some(nested) = tweet.get(key) {
            collect_text(nested, depth + 1, parts);
        }
    }
    parts.push(entities_text(tweet));
}

/// Distinct expanded urls reachable through extended / retweeted /
/// quoted wrappers, in discovery order.
pub fn url_stack(tweet: &Value) -> Vec<String> {
    let mut urls = Vec::new();
    collect_urls(tweet, 0, &mut urls);
    let mut distinct: Vec<String> = Vec::with_capacity(urls.len());
    for url in urls {
        if !distinct.contains(&url) {
            distinct.push(url);
        }
    }
    distinct
}

fn collect_urls(tweet: &Value, depth: usize, urls: &mut Vec<String>) {
    if depth > MAX_DEPTH {
        return;
    }
    if let Some(extended) = tweet.get("extended_tweet") {
        collect_urls(extended, depth + 1, urls);
    }
    for key in NESTED {
        if let Some(nested) = tweet.get(key) {
            collect_urls(nested, depth + 1, urls);
        }
    }
    if let Some(entities) = tweet.get("entities") {
        for url in array_at(entities, "urls") {
            if let Some(expanded) = str_at(url, "expanded_url") {
                urls.push(expanded.to_string());
            }
        }
    }
}

fn is_low_priority(url: &str, low_priority: &[String]) -> bool {
    let Some(host) = util::url_host(url) else {
        return false;
    };
    low_priority.iter().any(|domain| {
        let domain = domain.to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{}", domain))
    })
}

/// Picks the best candidate: the first one, unless it sits on a
/// low-priority domain and a later candidate does not.
pub fn select_url(candidates: &[String], low_priority: &[String]) -> Option<String> {
    let mut best: Option<&String> = None;
    for url in candidates {
        match best {
            None => best = Some(url),
            Some(current)
                if is_low_priority(current, low_priority)
                    && !is_low_priority(url, low_priority) =>
            {
                best = Some(url)
            }
            Some(_) => {}
        }
    }
    best.cloned()
}

/// Url of a tweet, preferring the retweeted status's own url over the
/// wrapper's.
pub fn tweet_url(tweet: &Value, low_priority: &[String]) -> Option<String> {
    tweet
        .get("retweeted_status")
        .and_then(|rt| select_url(&url_stack(rt), low_priority))
        .or_else(|| select_url(&url_stack(tweet), low_priority))
}

/// Builds items from tweet-shaped payloads.
///
/// Two payload shapes are understood:
/// - filtered-stream envelopes `{"data": {...}, "matching_rules": [{"tag": ...}]}`
///   where the server already classified the tweet
/// - plain tweets, classified locally against the configured tracks
#[derive(Debug, Clone)]
pub struct TweetParser {
    provider: String,
    tracks: TrackSet,
    low_priority: Vec<String>,
}

impl TweetParser {
    pub fn new(provider: &str, tracks: TrackSet, low_priority: Vec<String>) -> Self {
        Self {
            provider: provider.to_string(),
            tracks,
            low_priority,
        }
    }

    pub fn tracks(&self) -> &TrackSet {
        &self.tracks
    }

    /// Whether a JSON payload looks like tweet data at all
    /// (heartbeats and acks do not).
    pub fn is_tweet(payload: &Value) -> bool {
        payload.get("matching_rules").is_some()
            || payload.get("text").is_some()
            || payload.get("extended_tweet").is_some()
    }

    pub fn parse(&self, payload: &Value) -> Option<Item> {
        if let (Some(rules), Some(data)) = (
            payload.get("matching_rules").and_then(Value::as_array),
            payload.get("data"),
        ) {
            return Some(self.parse_envelope(payload, rules, data));
        }
        if payload.get("text").is_some() || payload.get("extended_tweet").is_some() {
            return self.parse_tweet(payload);
        }
        None
    }

    fn parse_envelope(&self, payload: &Value, rules: &[Value], data: &Value) -> Item {
        let category = rules
            .first()
            .and_then(|r| str_at(r, "tag"))
            .map(str::to_string)
            .or_else(|| {
                self.tracks
                    .category_for(&searchable_text(data))
                    .map(str::to_string)
            });

        let mut item = Item::new(self.provider.as_str());
        item.category = category;
        item.text = str_at(data, "text").map(str::to_string);

        let urls = data
            .get("entities")
            .and_then(|e| e.get("urls"))
            .and_then(Value::as_array);
        match urls {
            None => {
                item.extra
                    .insert("tweet_error_url".into(), json!("Key missing entities.urls"));
            }
            Some(list) => match list.first().and_then(|u| str_at(u, "expanded_url")) {
                Some(url) => item.url = Some(url.to_string()),
                None => {
                    item.extra
                        .insert("tweet_error_url".into(), json!("urls without url"));
                }
            },
        }
        item.extra.insert("tweet".into(), payload.clone());
        item
    }

    fn parse_tweet(&self, tweet: &Value) -> Option<Item> {
        let category = self.tracks.category_for(&searchable_text(tweet));
        let url = tweet_url(tweet, &self.low_priority);
        let (Some(category), Some(url)) = (category, url) else {
            debug!(
                "{}: tweet {} skipped (no category or url)",
                self.provider,
                str_at(tweet, "id_str").unwrap_or("?")
            );
            return None;
        };

        let mut item = Item::new(self.provider.as_str())
            .with_category(category)
            .with_url(url);
        item.text = str_at(tweet, "text").map(str::to_string);
        item.extra.insert("tweet".into(), tweet.clone());
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tweet_with(text: &str, urls: &[&str]) -> Value {
        let urls: Vec<Value> = urls.iter().map(|u| json!({"expanded_url": u})).collect();
        json!({"text": text, "entities": {"urls": urls, "hashtags": [], "user_mentions": []}})
    }

    #[test]
    fn negative_tokens_become_exclusions() {
        let track = Track::parse("foo -bar").unwrap();
        assert_eq!(track.phrase, "foo");
        assert_eq!(track.words(), ["foo"]);
        assert_eq!(track.exclusions(), ["bar"]);
        assert!(Track::parse("-only -negatives").is_err());
    }

    #[test]
    fn excluded_word_blocks_category() {
        let tracks = TrackSet::parse(&["foo -bar"]).unwrap();
        assert_eq!(tracks.category_for("some foo here"), Some("foo"));
        assert_eq!(tracks.category_for("some foo and bar here"), None);
    }

    #[test]
    fn longest_track_wins() {
        let tracks = TrackSet::parse(&["free steam", "free steam game"]).unwrap();
        assert_eq!(
            tracks.category_for("FREE Steam GAME giveaway"),
            Some("free steam game")
        );
        let tracks = TrackSet::parse(&["free steam game", "free steam"]).unwrap();
        assert_eq!(tracks.category_for("free steam game"), Some("free steam game"));
        assert_eq!(tracks.category_for("free steam key"), Some("free steam"));
    }

    #[test]
    fn ties_keep_first_declared() {
        let tracks = TrackSet::parse(&["rust lang", "lang rust"]).unwrap();
        assert_eq!(tracks.category_for("rust lang"), Some("rust lang"));
    }

    #[test]
    fn searchable_text_includes_nested_and_entities() {
        let tweet = json!({
            "text": "RT look",
            "entities": {"hashtags": [{"text": "gamedev"}], "urls": [], "user_mentions": [{"screen_name": "steam"}]},
            "retweeted_status": {
                "text": "inner",
                "extended_tweet": {"full_text": "a free game", "entities": {"urls": [{"display_url": "store.example.com"}]}}
            }
        });
        let text = searchable_text(&tweet);
        for needle in ["RT look", "gamedev", "steam", "inner", "a free game", "store.example.com"] {
            assert!(text.contains(needle), "missing {needle} in {text}");
        }
    }

    #[test]
    fn low_priority_domain_loses() {
        let urls = vec!["http://t.co/x".to_string(), "http://real-site.com/y".to_string()];
        let low = vec!["t.co".to_string()];
        assert_eq!(select_url(&urls, &low).as_deref(), Some("http://real-site.com/y"));

        let reversed = vec!["http://real-site.com/y".to_string(), "http://t.co/x".to_string()];
        assert_eq!(select_url(&reversed, &low).as_deref(), Some("http://real-site.com/y"));

        let only_low = vec!["http://t.co/x".to_string()];
        assert_eq!(select_url(&only_low, &low).as_deref(), Some("http://t.co/x"));
        assert_eq!(select_url(&[], &low), None);
    }

    #[test]
    fn retweet_url_is_preferred() {
        let mut outer = tweet_with("RT", &["https://outer.example.com/a"]);
        outer["retweeted_status"] = tweet_with("orig", &["https://inner.example.com/b"]);
        assert_eq!(
            tweet_url(&outer, &[]).as_deref(),
            Some("https://inner.example.com/b")
        );

        outer["retweeted_status"] = tweet_with("orig", &[]);
        assert_eq!(
            tweet_url(&outer, &[]).as_deref(),
            Some("https://outer.example.com/a")
        );
    }

    #[test]
    fn url_stack_is_depth_capped() {
        let mut tweet = tweet_with("leaf", &["https://deep.example.com"]);
        for _ in 0..(MAX_DEPTH + 5) {
            tweet = json!({"text": "wrap", "quoted_status": tweet});
        }
        assert!(url_stack(&tweet).is_empty());
        assert!(!searchable_text(&tweet).contains("leaf"));
    }

    #[test]
    fn plain_tweet_needs_category_and_url() {
        let parser = TweetParser::new(
            "twitter",
            TrackSet::parse(&["drone"]).unwrap(),
            vec!["twitter.com".into()],
        );
        let tweet = tweet_with("new drone footage", &["https://twitter.com/i/1", "https://video.example.com/v"]);
        let item = parser.parse(&tweet).unwrap();
        assert_eq!(item.provider, "twitter");
        assert_eq!(item.category.as_deref(), Some("drone"));
        assert_eq!(item.url.as_deref(), Some("https://video.example.com/v"));
        assert!(item.extra.contains_key("tweet"));

        assert!(parser.parse(&tweet_with("nothing relevant", &["https://a.example.com"])).is_none());
        assert!(parser.parse(&tweet_with("drone without link", &[])).is_none());
    }

    #[test]
    fn envelope_uses_rule_tag_and_records_url_errors() {
        let parser = TweetParser::new("twitter", TrackSet::default(), vec![]);
        let mut payload = json!({
            "data": {"text": "Hello world"},
            "matching_rules": [{"tag": "hello_world"}]
        });
        let item = parser.parse(&payload).unwrap();
        assert_eq!(item.category.as_deref(), Some("hello_world"));
        assert_eq!(item.text.as_deref(), Some("Hello world"));
        assert!(item.url.is_none());
        assert!(item.extra.contains_key("tweet_error_url"));

        payload["data"]["entities"] = json!({"urls": [{"expanded_url": "https://www.google.fr"}]});
        let item = parser.parse(&payload).unwrap();
        assert_eq!(item.url.as_deref(), Some("https://www.google.fr"));
        assert!(!item.extra.contains_key("tweet_error_url"));
    }

    #[test]
    fn heartbeats_are_not_tweets() {
        assert!(!TweetParser::is_tweet(&json!({"op": "heartbeat"})));
        let parser = TweetParser::new("twitter", TrackSet::default(), vec![]);
        assert!(parser.parse(&json!({"op": "ack"})).is_none());
    }
}
