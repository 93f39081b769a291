use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use log::warn;
use serde::Deserialize;
use serde_json::Value;

use super::{ItemScan, Storage, decode_line, ensure_provider};
use crate::item::{Item, StoredRecord};
use crate::util;

const SCAN_COUNT: usize = 200;

/// Redis streams storage.
///
/// Layout:
///     <prefix>:<provider>:<YYYY_MM_DD>   (one stream per provider per day)
///
/// Each entry carries a single `record` field holding the same JSON
/// line the file backend writes. `XADD` is atomic per entry, which
/// gives record-atomic appends across collectors for free.
///
/// The connection is opened lazily and re-opened after an error.
pub struct RedisStorage {
    name: String,
    prefix: String,
    client: redis::Client,
    conn: Arc<Mutex<Option<redis::Connection>>>,
}

#[derive(Debug, Deserialize)]
struct RedisStorageArgs {
    url: String,
    #[serde(default = "default_prefix")]
    prefix: String,
}

fn default_prefix() -> String {
    "items".to_string()
}

impl RedisStorage {
    pub fn new(name: &str, url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url).with_context(|| format!("redis url {}", url))?;
        Ok(Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            client,
            conn: Arc::new(Mutex::new(None)),
        })
    }

    pub fn from_args(name: &str, args: &Value) -> Result<Self> {
        let args: RedisStorageArgs =
            serde_json::from_value(args.clone()).context("redis storage args")?;
        Self::new(name, &args.url, &args.prefix)
    }

    fn segment_key(&self, provider: &str, day: chrono::NaiveDate) -> String {
        format!("{}:{}:{}", self.prefix, provider, util::segment_name(day))
    }

    /// Existing day streams within `days`, grouped by provider in name order.
    fn select_segments(&self, keys: &[String], days: &[chrono::NaiveDate]) -> VecDeque<String> {
        let own = format!("{}:", self.prefix);
        let mut providers: Vec<&str> = keys
            .iter()
            .filter_map(|k| k.strip_prefix(&own))
            .filter_map(|rest| rest.rsplit_once(':').map(|(p, _)| p))
            .collect();
        providers.sort();
        providers.dedup();

        providers
            .iter()
            .flat_map(|p| days.iter().map(move |d| self.segment_key(p, *d)))
            .filter(|k| keys.binary_search(k).is_ok())
            .collect()
    }
}

fn scan_cmd(cursor: u64, pattern: &str) -> redis::Cmd {
    let mut cmd = redis::cmd("SCAN");
    cmd.arg(cursor)
        .arg("MATCH")
        .arg(pattern)
        .arg("COUNT")
        .arg(SCAN_COUNT);
    cmd
}

/// Every key matching `pattern`, walked with a SCAN cursor so the server
/// never blocks on a full keyspace listing. Keys come back sorted and
/// deduplicated (SCAN may repeat a key).
fn scan_keys(c: &mut redis::Connection, pattern: &str) -> redis::RedisResult<Vec<String>> {
    let mut keys = Vec::new();
    let mut cursor = 0;
    loop {
        let (next, batch): (u64, Vec<String>) = scan_cmd(cursor, pattern).query(c)?;
        keys.extend(batch);
        if next == 0 {
            break;
        }
        cursor = next;
    }
    keys.sort();
    keys.dedup();
    Ok(keys)
}

/// Runs a command on the shared connection, reconnecting on demand.
fn with_connection<T>(
    client: &redis::Client,
    conn: &Mutex<Option<redis::Connection>>,
    f: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
) -> Result<T> {
    let mut guard = conn
        .lock()
        .map_err(|_| anyhow!("redis connection lock poisoned"))?;
    if guard.is_none() {
        *guard = Some(client.get_connection().context("connecting to redis")?);
    }
    let Some(connection) = guard.as_mut() else {
        return Err(anyhow!("redis connection unavailable"));
    };
    match f(connection) {
        Ok(v) => Ok(v),
        Err(e) => {
            // Force a fresh connection on the next call
            *guard = None;
            Err(e.into())
        }
    }
}

impl Storage for RedisStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn store_item(&self, item: &Item) -> Result<()> {
        ensure_provider(item)?;
        let record = StoredRecord::new(util::now_secs(), item.clone());
        let key = self.segment_key(&item.provider, util::day_of(record.timestamp));
        let line = serde_json::to_string(&record).context("encoding stored record")?;

        with_connection(&self.client, &self.conn, |c| {
            redis::cmd("XADD")
                .arg(&key)
                .arg("*")
                .arg("record")
                .arg(&line)
                .query::<String>(c)
        })
        .with_context(|| format!("XADD {}", key))?;
        Ok(())
    }

    fn fetch_items(&self, since: i64) -> Result<ItemScan> {
        let pattern = format!("{}:*", self.prefix);
        let keys: Vec<String> = with_connection(&self.client, &self.conn, |c| scan_keys(c, &pattern))
            .with_context(|| format!("SCAN {}", pattern))?;
        let days = util::days_between(since, util::now_secs());
        let segments = self.select_segments(&keys, &days);

        Ok(Box::new(RedisScan {
            client: self.client.clone(),
            conn: self.conn.clone(),
            segments,
            buffered: VecDeque::new(),
            since,
        }))
    }
}

/// Fetches one day stream at a time as the scan advances.
struct RedisScan {
    client: redis::Client,
    conn: Arc<Mutex<Option<redis::Connection>>>,
    segments: VecDeque<String>,
    buffered: VecDeque<Item>,
    since: i64,
}

type StreamEntries = Vec<(String, HashMap<String, String>)>;

impl Iterator for RedisScan {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        loop {
            if let Some(item) = self.buffered.pop_front() {
                return Some(item);
            }
            let key = self.segments.pop_front()?;
            let entries: StreamEntries = match with_connection(&self.client, &self.conn, |c| {
                redis::cmd("XRANGE").arg(&key).arg("-").arg("+").query(c)
            }) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("skipping redis segment {}: {:#}", key, e);
                    continue;
                }
            };
            for (_id, fields) in entries {
                let Some(line) = fields.get("record") else {
                    warn!("entry without record field in {}", key);
                    continue;
                };
                if let Some(record) = decode_line(line, &key) {
                    if record.timestamp >= self.since {
                        self.buffered.push_back(record.data);
                    }
                }
            }
        }
    }
}
