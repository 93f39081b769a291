use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};
use link_digest_collector::item::Item;
use link_digest_collector::pipeline::{ItemHandler, Pipeline, Processor, Require, Verdict};
use link_digest_collector::pipeline::require::Field;
use link_digest_collector::storage::{ItemScan, MemoryStorage, Storage};

/// Storage that only counts how often it is asked to store.
#[derive(Default)]
struct CountingStorage {
    calls: AtomicUsize,
}

impl Storage for CountingStorage {
    fn name(&self) -> &str {
        "counting"
    }

    fn store_item(&self, _item: &Item) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn fetch_items(&self, _since: i64) -> Result<ItemScan> {
        Ok(Box::new(std::iter::empty()))
    }
}

struct FailingStorage;

impl Storage for FailingStorage {
    fn name(&self) -> &str {
        "failing"
    }

    fn store_item(&self, _item: &Item) -> Result<()> {
        bail!("disk full")
    }

    fn fetch_items(&self, _since: i64) -> Result<ItemScan> {
        Ok(Box::new(std::iter::empty()))
    }
}

/// Counts the items reaching it.
#[derive(Default)]
struct Witness {
    seen: AtomicUsize,
}

#[async_trait::async_trait]
impl Processor for Witness {
    fn name(&self) -> &str {
        "witness"
    }

    async fn update_item(&self, _item: &mut Item) -> Result<Verdict> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(Verdict::Keep)
    }
}

struct Tag(&'static str);

#[async_trait::async_trait]
impl Processor for Tag {
    fn name(&self) -> &str {
        "tag"
    }

    async fn update_item(&self, item: &mut Item) -> Result<Verdict> {
        let text = item.text.take().unwrap_or_default();
        item.text = Some(format!("{text}{}", self.0));
        Ok(Verdict::Keep)
    }
}

#[tokio::test]
async fn dropped_item_never_reaches_storage() {
    let storage = Arc::new(CountingStorage::default());
    let witness = Arc::new(Witness::default());
    let pipeline = Pipeline::new(
        vec![
            Arc::new(Require::new("req", vec![Field::Url])),
            witness.clone(),
        ],
        vec![storage.clone()],
    );

    let out = pipeline.process(Item::new("twitter").with_category("c")).await.unwrap();
    assert!(out.is_none());
    assert_eq!(storage.calls.load(Ordering::SeqCst), 0);
    assert_eq!(witness.seen.load(Ordering::SeqCst), 0, "chain must stop at the drop");

    let out = pipeline
        .process(Item::new("twitter").with_url("https://a.example.com"))
        .await
        .unwrap();
    assert!(out.is_some());
    assert_eq!(storage.calls.load(Ordering::SeqCst), 1);
    assert_eq!(witness.seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn processors_run_in_declaration_order() {
    let pipeline = Pipeline::new(
        vec![Arc::new(Tag("a")), Arc::new(Tag("b")), Arc::new(Tag("c"))],
        vec![Arc::new(CountingStorage::default())],
    );
    let out = pipeline.process(Item::new("p")).await.unwrap().unwrap();
    assert_eq!(out.text.as_deref(), Some("abc"));
}

#[tokio::test]
async fn every_storage_is_written_and_failures_surface() {
    let mem = Arc::new(MemoryStorage::new("mem"));
    let pipeline = Pipeline::new(vec![], vec![Arc::new(FailingStorage), mem.clone()]);

    let err = pipeline
        .handle(Item::new("p").with_url("https://a.example.com"))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("disk full"));
    // the healthy storage still got its copy
    assert_eq!(mem.len(), 1);
}
