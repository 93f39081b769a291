//! Scheduled aggregation
//!
//! An aggregator turns a window of stored items into a `Report`. It is
//! bound to:
//! - a cron `schedule` deciding when it runs
//! - a `notify` channel selecting which outputs receive the report

pub mod category;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::item::Item;

pub use category::{CategoryAggregator, ItemFilter};

pub const DEFAULT_WINDOW_SECS: i64 = 24 * 60 * 60;

/// One url inside a category ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub url: String,
    pub count: usize,
    /// Text of the first item seen for this url
    #[serde(rename = "text")]
    pub sample_text: Option<String>,
}

/// Aggregation result handed to outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Unix seconds
    pub generated_at: i64,
    /// Items scanned, including skipped ones
    pub items_seen: usize,
    pub categories: BTreeMap<String, Vec<RankedEntry>>,
}

pub trait Aggregator: Send + Sync {
    fn name(&self) -> &str;

    /// Cron expression, 5 or 6 fields.
    fn schedule(&self) -> &str;

    /// Output channel the report is delivered to.
    fn notify(&self) -> &str;

    /// How far back a run looks.
    fn window_secs(&self) -> i64 {
        DEFAULT_WINDOW_SECS
    }

    /// Pure over its input: the same items in the same order yield the
    /// same report (up to `generated_at`).
    fn aggregate(&self, items: &mut dyn Iterator<Item = Item>) -> Report;
}
