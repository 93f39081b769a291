//! Storage backends
//!
//! Every backend implements the same append + time-windowed scan contract:
//! - `store_item` appends one record, record-atomically, from any task
//! - `fetch_items` lazily yields every item stored at or after a timestamp
//!
//! Backends partition data by provider and by calendar day (UTC), which
//! bounds the scan for a recency window and keeps appends independent.

pub mod file;
pub mod memory;
pub mod redis;

use anyhow::{Result, bail};
use log::warn;

use crate::item::{Item, StoredRecord};
use crate::metrics::{METRICS, bump};

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use redis::RedisStorage;

/// Lazy, finite sequence of stored items. One pass is one full scan.
pub type ItemScan = Box<dyn Iterator<Item = Item> + Send>;

pub trait Storage: Send + Sync {
    /// Configured instance name, used in logs.
    fn name(&self) -> &str;

    /// Durably appends one item.
    ///
    /// CONTRACT:
    /// - Fails when the item has no provider (caller bug)
    /// - Must be safe to call concurrently
    fn store_item(&self, item: &Item) -> Result<()>;

    /// Every item stored at or after `since` (unix seconds).
    ///
    /// Order is chronological within a provider, unspecified across
    /// providers. Malformed records are skipped with a warning.
    fn fetch_items(&self, since: i64) -> Result<ItemScan>;
}

/// Shared precondition of every `store_item` implementation.
pub(crate) fn ensure_provider(item: &Item) -> Result<()> {
    if item.provider.trim().is_empty() {
        bail!("item has no provider (url={:?})", item.url);
    }
    Ok(())
}

/// Decodes one persisted line, counting and logging malformed ones.
///
/// Blank lines are ignored silently.
pub(crate) fn decode_line(line: &str, origin: &str) -> Option<StoredRecord> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match StoredRecord::from_line(trimmed) {
        Ok(record) => Some(record),
        Err(e) => {
            bump(&METRICS.malformed_records);
            warn!("skipping malformed record in {}: {:#}", origin, e);
            None
        }
    }
}
