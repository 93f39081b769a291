use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};
use link_digest_collector::aggregator::{Aggregator, CategoryAggregator, ItemFilter, Report};
use link_digest_collector::item::Item;
use link_digest_collector::output::{FileOutput, Output};
use link_digest_collector::run_aggregation;
use link_digest_collector::storage::{ItemScan, MemoryStorage, Storage};

fn item(category: &str, url: &str) -> Item {
    Item::new("twitter")
        .with_category(category)
        .with_url(url)
        .with_text(format!("about {url}"))
}

fn sample_items() -> Vec<Item> {
    let mut items = Vec::new();
    items.extend((0..3).map(|_| item("foo", "A")));
    items.push(item("foo", "B"));
    items.extend((0..2).map(|_| item("bar", "C")));
    items
}

fn daily(top_n: usize) -> Arc<CategoryAggregator> {
    Arc::new(CategoryAggregator::new("daily", "0 8 * * *", "daily", top_n, ItemFilter::All))
}

fn urls_and_counts(report: &Report, category: &str) -> Vec<(String, usize)> {
    report.categories[category]
        .iter()
        .map(|e| (e.url.clone(), e.count))
        .collect()
}

#[test]
fn ranking_per_category() {
    let report = daily(3).aggregate(&mut sample_items().into_iter());

    let categories: Vec<&String> = report.categories.keys().collect();
    assert_eq!(categories, ["bar", "foo"]);
    assert_eq!(urls_and_counts(&report, "bar"), [("C".to_string(), 2)]);
    assert_eq!(
        urls_and_counts(&report, "foo"),
        [("A".to_string(), 3), ("B".to_string(), 1)]
    );
    assert_eq!(report.categories["foo"][0].sample_text.as_deref(), Some("about A"));
}

#[test]
fn report_serializes_in_digest_shape() {
    let report = daily(1).aggregate(&mut sample_items().into_iter());
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["categories"]["foo"][0]["url"], "A");
    assert_eq!(json["categories"]["foo"][0]["count"], 3);
    assert_eq!(json["categories"]["foo"][0]["text"], "about A");
    assert_eq!(json["categories"]["foo"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn scheduled_run_renders_to_accepting_outputs() {
    let storage = Arc::new(MemoryStorage::new("mem"));
    for it in sample_items() {
        storage.store_item(&it).unwrap();
    }
    let dir = tempfile::tempdir().unwrap();
    let file_out = Arc::new(FileOutput::new("files", dir.path()));
    let counting = Arc::new(CountingOutput::new("weekly"));
    let outputs: Vec<Arc<dyn Output>> = vec![file_out.clone(), counting.clone()];

    let report = run_aggregation(storage, daily(3), &outputs).await.unwrap();
    assert_eq!(report.items_seen, 6);

    let written = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(written, 1);
    assert_eq!(counting.rendered.load(Ordering::SeqCst), 0, "other channel");
}

#[tokio::test]
async fn failing_scan_is_contained() {
    let counting = Arc::new(CountingOutput::new("daily"));
    let outputs: Vec<Arc<dyn Output>> = vec![counting.clone()];

    assert!(run_aggregation(Arc::new(BrokenStorage), daily(3), &outputs).await.is_none());
    assert_eq!(counting.rendered.load(Ordering::SeqCst), 0);

    // the next run proceeds normally
    let storage = Arc::new(MemoryStorage::new("mem"));
    assert!(run_aggregation(storage, daily(3), &outputs).await.is_some());
    assert_eq!(counting.rendered.load(Ordering::SeqCst), 1);
}

struct CountingOutput {
    channel: &'static str,
    rendered: AtomicUsize,
}

impl CountingOutput {
    fn new(channel: &'static str) -> Self {
        Self {
            channel,
            rendered: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Output for CountingOutput {
    fn name(&self) -> &str {
        "counting"
    }

    fn accepts(&self, channel: &str) -> bool {
        channel == self.channel
    }

    async fn render(&self, _report: &Report, _channel: &str) -> Result<()> {
        self.rendered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct BrokenStorage;

impl Storage for BrokenStorage {
    fn name(&self) -> &str {
        "broken"
    }

    fn store_item(&self, _item: &Item) -> Result<()> {
        bail!("read-only")
    }

    fn fetch_items(&self, _since: i64) -> Result<ItemScan> {
        bail!("connection refused")
    }
}
