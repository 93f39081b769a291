use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result, bail};
use log::info;
use serde::Deserialize;

use super::{Aggregator, DEFAULT_WINDOW_SECS, RankedEntry, Report};
use crate::config::ComponentConfig;
use crate::item::Item;
use crate::util;

/// Which items take part in a ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemFilter {
    All,
    /// Only items carrying `extra.<key>`
    RequireExtra(String),
}

impl ItemFilter {
    fn accepts(&self, item: &Item) -> bool {
        match self {
            Self::All => true,
            Self::RequireExtra(key) => item.extra.contains_key(key),
        }
    }
}

fn default_top_articles() -> usize {
    3
}

fn default_window_secs() -> i64 {
    DEFAULT_WINDOW_SECS
}

#[derive(Debug, Deserialize)]
struct CategoryArgs {
    #[serde(default = "default_top_articles")]
    top_articles: usize,

    #[serde(default = "default_window_secs")]
    window_secs: i64,
}

/// Ranks urls per category by how often they were collected.
///
/// For every category: group by url in discovery order, count, keep
/// the first item's text as sample, sort by count (descending, ties in
/// discovery order) and keep the top `top_n`.
#[derive(Debug, Clone)]
pub struct CategoryAggregator {
    name: String,
    schedule: String,
    notify: String,
    top_n: usize,
    window_secs: i64,
    filter: ItemFilter,
}

impl CategoryAggregator {
    pub fn new(name: &str, schedule: &str, notify: &str, top_n: usize, filter: ItemFilter) -> Self {
        Self {
            name: name.to_string(),
            schedule: schedule.to_string(),
            notify: notify.to_string(),
            top_n,
            window_secs: DEFAULT_WINDOW_SECS,
            filter,
        }
    }

    pub fn from_config(cfg: &ComponentConfig, filter: ItemFilter) -> Result<Self> {
        let args: CategoryArgs = if cfg.args.is_null() {
            serde_json::from_value(serde_json::json!({}))?
        } else {
            serde_json::from_value(cfg.args.clone())
                .with_context(|| format!("invalid args for aggregator '{}'", cfg.name))?
        };
        if args.window_secs <= 0 {
            bail!("aggregator '{}': window_secs must be positive", cfg.name);
        }
        let (Some(schedule), Some(notify)) = (cfg.schedule.as_deref(), cfg.notify.as_deref())
        else {
            bail!("aggregator '{}' needs a schedule and a notify channel", cfg.name);
        };

        let mut agg = Self::new(&cfg.name, schedule, notify, args.top_articles, filter);
        agg.window_secs = args.window_secs;
        Ok(agg)
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    pub fn filter(&self) -> &ItemFilter {
        &self.filter
    }
}

impl Aggregator for CategoryAggregator {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self) -> &str {
        &self.schedule
    }

    fn notify(&self) -> &str {
        &self.notify
    }

    fn window_secs(&self) -> i64 {
        self.window_secs
    }

    fn aggregate(&self, items: &mut dyn Iterator<Item = Item>) -> Report {
        let mut groups: BTreeMap<String, Vec<RankedEntry>> = BTreeMap::new();
        let mut index: HashMap<(String, String), usize> = HashMap::new();
        let mut seen = 0usize;

        for item in items {
            seen += 1;
            if !self.filter.accepts(&item) {
                continue;
            }
            let (Some(category), Some(url)) = (item.category, item.url) else {
                continue;
            };

            let entries = groups.entry(category.clone()).or_default();
            match index.get(&(category.clone(), url.clone())) {
                Some(&pos) => entries[pos].count += 1,
                None => {
                    index.insert((category, url.clone()), entries.len());
                    entries.push(RankedEntry {
                        url,
                        count: 1,
                        sample_text: item.text,
                    });
                }
            }
        }

        for entries in groups.values_mut() {
            // stable: equal counts keep discovery order
            entries.sort_by(|a, b| b.count.cmp(&a.count));
            entries.truncate(self.top_n);
        }

        info!(
            "aggregator {}: {} items, {} categories",
            self.name,
            seen,
            groups.len()
        );
        Report {
            generated_at: util::now_secs(),
            items_seen: seen,
            categories: groups,
        }
    }
}
