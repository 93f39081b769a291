use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

/// Global runtime metrics for the collector.
///
/// Purpose:
/// - Track running collectors and reconnects
/// - Track item throughput through the pipeline
/// - Track storage and aggregation failures
///
/// Design:
/// - Lock-free (Atomics)
/// - Cheap to update
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // Collectors
    pub collectors_active: AtomicUsize,
    pub reconnects: AtomicUsize,

    // Throughput
    pub items_collected: AtomicUsize,
    pub items_dropped_queue: AtomicUsize,
    pub items_dropped_pipeline: AtomicUsize,
    pub items_stored: AtomicUsize,

    pub processor_errors: AtomicUsize,
    pub store_errors: AtomicUsize,
    pub malformed_records: AtomicUsize,

    // Reporting
    pub aggregations_run: AtomicUsize,
    pub aggregation_errors: AtomicUsize,
    pub reports_rendered: AtomicUsize,
}

impl RuntimeMetrics {
    /// One-line summary used by the periodic reporter.
    pub fn summary(&self) -> String {
        format!(
            "collectors={} reconnects={} collected={} dropped_queue={} dropped_pipeline={} stored={} proc_err={} store_err={} malformed={} agg={} agg_err={} rendered={}",
            self.collectors_active.load(Ordering::Relaxed),
            self.reconnects.load(Ordering::Relaxed),
            self.items_collected.load(Ordering::Relaxed),
            self.items_dropped_queue.load(Ordering::Relaxed),
            self.items_dropped_pipeline.load(Ordering::Relaxed),
            self.items_stored.load(Ordering::Relaxed),
            self.processor_errors.load(Ordering::Relaxed),
            self.store_errors.load(Ordering::Relaxed),
            self.malformed_records.load(Ordering::Relaxed),
            self.aggregations_run.load(Ordering::Relaxed),
            self.aggregation_errors.load(Ordering::Relaxed),
            self.reports_rendered.load(Ordering::Relaxed),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));

/// Shorthand for `METRICS.<counter>.fetch_add(1, Relaxed)`.
pub fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}
