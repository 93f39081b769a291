//! Item processing pipeline
//!
//! Every collected item flows through:
//! 1. The configured processors, in declaration order, on the same item
//! 2. Every configured storage (terminal step)
//!
//! A processor may rewrite the item, enrich `extra`, or drop it. A
//! failing (or panicking) processor never kills the pipeline: its stage
//! is undone and the next stage sees the item exactly as it was before.

pub mod canonical;
pub mod grabber;
pub mod require;
pub mod unshorten;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use futures_util::FutureExt;
use log::{debug, error, warn};

use crate::item::Item;
use crate::metrics::{METRICS, bump};
use crate::storage::Storage;

pub use canonical::CanonicalUrl;
pub use grabber::UrlGrabber;
pub use require::Require;
pub use unshorten::Unshorten;

/// Outcome of one processing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Drop,
}

#[async_trait::async_trait]
pub trait Processor: Send + Sync {
    /// Configured instance name.
    fn name(&self) -> &str;

    /// Updates the item in place.
    ///
    /// `Drop` stops the chain and nothing is stored. An error leaves the
    /// item unchanged and the chain continues.
    async fn update_item(&self, item: &mut Item) -> Result<Verdict>;
}

/// Anything that consumes items one by one (the pipeline, test sinks).
#[async_trait::async_trait]
pub trait ItemHandler: Send + Sync {
    async fn handle(&self, item: Item) -> Result<()>;
}

pub struct Pipeline {
    processors: Vec<Arc<dyn Processor>>,
    storages: Vec<Arc<dyn Storage>>,
}

impl Pipeline {
    pub fn new(processors: Vec<Arc<dyn Processor>>, storages: Vec<Arc<dyn Storage>>) -> Self {
        Self {
            processors,
            storages,
        }
    }

    pub fn processors(&self) -> &[Arc<dyn Processor>] {
        &self.processors
    }

    pub fn storages(&self) -> &[Arc<dyn Storage>] {
        &self.storages
    }

    /// Runs one item through every stage.
    ///
    /// Returns the stored item, `None` when a processor dropped it, or
    /// the storage error.
    pub async fn process(&self, mut item: Item) -> Result<Option<Item>> {
        for processor in &self.processors {
            let snapshot = item.clone();
            let outcome = AssertUnwindSafe(processor.update_item(&mut item))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(Verdict::Keep)) => {}
                Ok(Ok(Verdict::Drop)) => {
                    debug!("processor {} dropped item {:?}", processor.name(), item.url);
                    bump(&METRICS.items_dropped_pipeline);
                    return Ok(None);
                }
                Ok(Err(e)) => {
                    warn!("processor {} failed: {:#}", processor.name(), e);
                    bump(&METRICS.processor_errors);
                    item = snapshot;
                }
                Err(_) => {
                    error!("processor {} panicked, stage skipped", processor.name());
                    bump(&METRICS.processor_errors);
                    item = snapshot;
                }
            }
        }

        self.store(&item).await?;
        Ok(Some(item))
    }

    /// Writes the item to every storage.
    ///
    /// All storages are attempted; the first failure is returned.
    async fn store(&self, item: &Item) -> Result<()> {
        let storages = self.storages.clone();
        let record = item.clone();
        let failures = tokio::task::spawn_blocking(move || {
            storages
                .iter()
                .filter_map(|s| {
                    s.store_item(&record)
                        .with_context(|| format!("storage {}", s.name()))
                        .err()
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| anyhow!("storage task failed: {}", e))?;

        for _ in &failures {
            bump(&METRICS.store_errors);
        }
        match failures.into_iter().next() {
            Some(first) => Err(first),
            None => {
                bump(&METRICS.items_stored);
                Ok(())
            }
        }
    }
}

#[async_trait::async_trait]
impl ItemHandler for Pipeline {
    async fn handle(&self, item: Item) -> Result<()> {
        self.process(item).await.map(|_| ())
    }
}
