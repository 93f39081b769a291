use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::debug;
use serde::Deserialize;
use serde_json::Value;

use super::adapter::Source;
use super::tweet::{TrackSet, TweetParser};
use crate::collector::{HealthPolicy, SessionContext};
use crate::item::Item;

const SEEN_CAPACITY: usize = 10_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn default_provider() -> String {
    "poll".to_string()
}

fn default_interval_secs() -> u64 {
    60
}

/// `args` of a `poll` collector.
#[derive(Debug, Clone, Deserialize)]
pub struct PollArgs {
    pub url: String,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default)]
    pub track: Vec<String>,

    #[serde(default)]
    pub low_priority_url: Vec<String>,

    #[serde(default)]
    pub health: HealthPolicy,
}

/// Insertion-ordered set that forgets its oldest keys past `cap`.
#[derive(Debug)]
struct SeenSet {
    order: VecDeque<String>,
    keys: HashSet<String>,
    cap: usize,
}

impl SeenSet {
    fn new(cap: usize) -> Self {
        Self {
            order: VecDeque::new(),
            keys: HashSet::new(),
            cap,
        }
    }

    /// true when `key` was not seen before
    fn insert(&mut self, key: String) -> bool {
        if self.keys.contains(&key) {
            return false;
        }
        if self.order.len() >= self.cap {
            if let Some(old) = self.order.pop_front() {
                self.keys.remove(&old);
            }
        }
        self.keys.insert(key.clone());
        self.order.push_back(key);
        true
    }
}

/// HTTP pull source.
///
/// Each session polls `url` every `interval_secs` until stopped. The
/// first failing request ends the session; the collector decides when
/// to try again.
pub struct PollSource {
    args: PollArgs,
    parser: TweetParser,
    http: reqwest::Client,
    seen: Mutex<SeenSet>,
}

fn entries(body: Value) -> Result<Vec<Value>> {
    match body {
        Value::Array(list) => Ok(list),
        Value::Object(mut map) => {
            for key in ["data", "items", "entries"] {
                if let Some(Value::Array(list)) = map.remove(key) {
                    return Ok(list);
                }
            }
            bail!("response has no data/items/entries array")
        }
        other => bail!("unexpected response shape: {}", other),
    }
}

fn first_str(entry: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| entry.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

fn entry_key(entry: &Value) -> Option<String> {
    let payload = entry.get("data").unwrap_or(entry);
    match payload.get("id_str").or_else(|| payload.get("id")) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => first_str(entry, &["url", "link"]),
    }
}

impl PollSource {
    pub fn new(args: PollArgs) -> Result<Self> {
        if args.interval_secs == 0 {
            bail!("poll source needs a positive interval_secs");
        }
        let tracks = TrackSet::parse(&args.track)?;
        let parser = TweetParser::new(&args.provider, tracks, args.low_priority_url.clone());
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building poll http client")?;
        Ok(Self {
            args,
            parser,
            http,
            seen: Mutex::new(SeenSet::new(SEEN_CAPACITY)),
        })
    }

    pub fn from_args(args: &Value) -> Result<Self> {
        let args: PollArgs =
            serde_json::from_value(args.clone()).context("invalid poll collector args")?;
        Self::new(args)
    }

    pub fn health(&self) -> HealthPolicy {
        self.args.health
    }

    /// Maps one response entry to an item.
    ///
    /// Tweet-shaped entries go through the tweet parser. Anything else
    /// is read as a generic feed entry; with tracks configured, entries
    /// matching no track are skipped.
    pub fn to_item(&self, entry: &Value) -> Option<Item> {
        if TweetParser::is_tweet(entry) && entry.get("title").is_none() {
            return self.parser.parse(entry);
        }

        let title = first_str(entry, &["title"]);
        let text = first_str(entry, &["text", "summary", "description"]);
        let url = first_str(entry, &["url", "link"]);

        let category = first_str(entry, &["category"]).or_else(|| {
            let haystack = [title.as_deref(), text.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            self.parser.tracks().category_for(&haystack).map(str::to_string)
        });
        if category.is_none() && !self.parser.tracks().is_empty() {
            return None;
        }

        let mut item = Item::new(self.args.provider.as_str());
        item.category = category;
        item.text = text.or_else(|| title.clone());
        item.url = url;
        if let Some(title) = title {
            item.extra.insert("title".into(), Value::String(title));
        }
        item.extra.insert("entry".into(), entry.clone());
        Some(item)
    }

    /// Entries not seen in any earlier poll.
    pub fn fresh(&self, list: Vec<Value>) -> Vec<Value> {
        let Ok(mut seen) = self.seen.lock() else {
            return list;
        };
        list.into_iter()
            .filter(|e| entry_key(e).is_none_or(|k| seen.insert(k)))
            .collect()
    }

    async fn poll_once(&self) -> Result<Vec<Value>> {
        let resp = self
            .http
            .get(&self.args.url)
            .send()
            .await
            .with_context(|| format!("polling {}", self.args.url))?;
        let status = resp.status();
        if !status.is_success() {
            bail!("polling {} failed ({})", self.args.url, status);
        }
        let body: Value = resp.json().await.context("decoding poll response")?;
        entries(body)
    }
}

#[async_trait::async_trait]
impl Source for PollSource {
    fn provider(&self) -> &str {
        &self.args.provider
    }

    async fn run(&self, ctx: SessionContext) -> Result<()> {
        let interval = Duration::from_secs(self.args.interval_secs);
        let mut shutdown = ctx.shutdown();

        loop {
            let list = tokio::select! {
                _ = shutdown.wait() => return Ok(()),
                res = self.poll_once() => res?,
            };

            let fresh = self.fresh(list);
            debug!("collector {}: {} new entries", ctx.collector(), fresh.len());
            // a successful poll proves the endpoint is alive even when empty
            ctx.touch();
            for entry in &fresh {
                if ctx.is_shutdown() {
                    return Ok(());
                }
                if let Some(item) = self.to_item(entry) {
                    ctx.emit(item);
                }
            }

            tokio::select! {
                _ = shutdown.wait() => return Ok(()),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
