use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures_util::FutureExt;
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::aggregator::{Aggregator, Report};
use crate::collector::{Collector, CollectorStatus, ItemCallback};
use crate::config::Config;
use crate::item::Item;
use crate::metrics::{METRICS, bump};
use crate::offset::OffsetStore;
use crate::output::Output;
use crate::pipeline::Pipeline;
use crate::registry::Registry;
use crate::replay::LineReplayer;
use crate::storage::Storage;
use crate::util;

/// Owns every configured component and drives the process lifetime.
///
/// Responsibilities:
/// - Build components from the configuration (fail fast)
/// - Run configured replays once at startup
/// - Wire each collector to its own queue and pipeline worker
/// - Start collectors and keep them healthy
/// - Fire aggregations on their cron schedule
/// - Shut everything down in order
///
/// It does NOT:
/// - Speak any source protocol (collectors)
/// - Transform or persist items itself (pipeline, storages)
pub struct Orchestrator {
    config: Config,
    collectors: Vec<Arc<dyn Collector>>,
    pipeline: Arc<Pipeline>,
    default_storage: Arc<dyn Storage>,
    aggregators: Vec<Arc<dyn Aggregator>>,
    outputs: Arc<Vec<Arc<dyn Output>>>,
    jobs: Vec<Job>,
}

impl Orchestrator {
    /// Constructs every component.
    ///
    /// Any configuration problem (unknown type, bad args, missing or
    /// duplicated default storage, invalid cron schedule) is returned
    /// before anything starts.
    pub fn build(config: Config, registry: &Registry) -> Result<Self> {
        config.validate()?;
        debug!("registry: {}", registry.describe());

        let mut storages = Vec::with_capacity(config.storages.len());
        let mut default_storage = None;
        for cfg in &config.storages {
            let storage = registry.storage(cfg)?;
            if cfg.default {
                default_storage = Some(storage.clone());
            }
            storages.push(storage);
        }
        let default_storage =
            default_storage.ok_or_else(|| anyhow!("no default storage configured"))?;

        let processors = config
            .processors
            .iter()
            .map(|cfg| registry.processor(cfg))
            .collect::<Result<Vec<_>>>()?;

        let collectors = config
            .collectors
            .iter()
            .map(|cfg| registry.collector(cfg))
            .collect::<Result<Vec<_>>>()?;

        let outputs = Arc::new(
            config
                .outputs
                .iter()
                .map(|cfg| registry.output(cfg))
                .collect::<Result<Vec<_>>>()?,
        );

        let mut aggregators = Vec::with_capacity(config.aggregators.len());
        let mut jobs = Vec::with_capacity(config.aggregators.len());
        for cfg in &config.aggregators {
            let aggregator = registry.aggregator(cfg)?;
            if !outputs.iter().any(|o| o.accepts(aggregator.notify())) {
                warn!(
                    "aggregator {}: no output accepts channel '{}'",
                    aggregator.name(),
                    aggregator.notify()
                );
            }
            jobs.push(aggregation_job(
                default_storage.clone(),
                aggregator.clone(),
                outputs.clone(),
            )?);
            aggregators.push(aggregator);
        }

        info!(
            "built {} collectors, {} storages (default {}), {} processors, {} aggregators, {} outputs",
            collectors.len(),
            storages.len(),
            default_storage.name(),
            processors.len(),
            aggregators.len(),
            outputs.len()
        );

        Ok(Self {
            config,
            collectors,
            pipeline: Arc::new(Pipeline::new(processors, storages)),
            default_storage,
            aggregators,
            outputs,
            jobs,
        })
    }

    pub fn collectors(&self) -> &[Arc<dyn Collector>] {
        &self.collectors
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn default_storage(&self) -> &Arc<dyn Storage> {
        &self.default_storage
    }

    pub fn aggregators(&self) -> &[Arc<dyn Aggregator>] {
        &self.aggregators
    }

    pub fn outputs(&self) -> &[Arc<dyn Output>] {
        &self.outputs
    }

    /// Runs until `shutdown` resolves, then stops everything in order:
    /// collectors, scheduler, queues, pipeline workers.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.run_replays().await;

        let mut scheduler = JobScheduler::new().await.context("creating scheduler")?;
        for job in std::mem::take(&mut self.jobs) {
            scheduler.add(job).await.context("adding aggregation job")?;
        }
        scheduler.start().await.context("starting scheduler")?;

        let (senders, workers) = self.wire_collectors();

        for collector in &self.collectors {
            if collector.start().await.is_err() {
                warn!("collector {}: start failed, health loop will retry", collector.name());
            }
        }

        let reporter = spawn_metrics_reporter(self.config.metrics_interval_secs);

        let mut tick =
            tokio::time::interval(Duration::from_millis(self.config.health_check_interval_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tick.tick() => self.check_collectors(),
            }
        }

        info!("shutting down");
        join_all(self.collectors.iter().map(|c| c.stop())).await;
        if let Err(e) = scheduler.shutdown().await {
            warn!("scheduler shutdown: {}", e);
        }

        // Callbacks only hold weak senders: dropping these closes the queues.
        drop(senders);
        for result in join_all(workers).await {
            if let Err(e) = result {
                error!("pipeline worker failed: {}", e);
            }
        }
        reporter.abort();
        info!("[METRICS] {}", METRICS.summary());
        Ok(())
    }

    async fn run_replays(&self) {
        for replay in &self.config.replay {
            let replayer = LineReplayer::new(
                replay.input.clone(),
                OffsetStore::new(replay.offset_file.clone()),
                replay.batch_size,
            );
            if let Err(e) = replayer.run(self.pipeline.as_ref()).await {
                error!("replay {}: {:#}", replay.input.display(), e);
            }
        }
    }

    /// One bounded queue and one pipeline worker per collector.
    fn wire_collectors(&self) -> (Vec<mpsc::Sender<Item>>, Vec<JoinHandle<()>>) {
        let mut senders = Vec::with_capacity(self.collectors.len());
        let mut workers = Vec::with_capacity(self.collectors.len());

        for collector in &self.collectors {
            let (tx, mut rx) = mpsc::channel::<Item>(self.config.queue_capacity.max(1));
            let weak = tx.downgrade();
            let name = collector.name().to_string();

            let callback: ItemCallback = Arc::new(move |item: Item| {
                let Some(tx) = weak.upgrade() else {
                    debug!("collector {}: queue closed, item discarded", name);
                    return;
                };
                match tx.try_send(item) {
                    Ok(()) => {}
                    Err(TrySendError::Full(item)) => {
                        bump(&METRICS.items_dropped_queue);
                        warn!("collector {}: queue full, dropping {:?}", name, item.url);
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("collector {}: queue closed, item discarded", name);
                    }
                }
            });
            collector.set_callback(callback);

            let pipeline = self.pipeline.clone();
            let name = collector.name().to_string();
            workers.push(tokio::spawn(async move {
                while let Some(item) = rx.recv().await {
                    if let Err(e) = pipeline.process(item).await {
                        error!("collector {}: item not stored: {:#}", name, e);
                    }
                }
                debug!("collector {}: pipeline worker done", name);
            }));
            senders.push(tx);
        }
        (senders, workers)
    }

    fn check_collectors(&self) {
        for collector in &self.collectors {
            match collector.check_status() {
                CollectorStatus::Degraded => {
                    info!("collector {}: degraded, reconnect scheduled", collector.name())
                }
                CollectorStatus::Healthy
                | CollectorStatus::Reconnecting
                | CollectorStatus::Stopped => {}
            }
        }
    }
}

fn aggregation_job(
    storage: Arc<dyn Storage>,
    aggregator: Arc<dyn Aggregator>,
    outputs: Arc<Vec<Arc<dyn Output>>>,
) -> Result<Job> {
    let cron = util::normalize_cron(aggregator.schedule());
    let name = aggregator.name().to_string();
    Job::new_async(cron.as_str(), move |_uuid, _l| {
        let storage = storage.clone();
        let aggregator = aggregator.clone();
        let outputs = outputs.clone();
        Box::pin(async move {
            run_aggregation(storage, aggregator, &outputs).await;
        })
    })
    .with_context(|| format!("aggregator '{}': invalid schedule '{}'", name, cron))
}

fn spawn_metrics_reporter(interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(interval_secs.max(1));
        loop {
            tokio::time::sleep(period).await;
            info!("[METRICS] {}", METRICS.summary());
        }
    })
}

/// One aggregation run: scan the window, aggregate, render to every
/// output accepting the aggregator's channel.
///
/// Failures are logged and counted, never propagated: a bad run must
/// not take the scheduler down. Returns the report when one was built.
pub async fn run_aggregation(
    storage: Arc<dyn Storage>,
    aggregator: Arc<dyn Aggregator>,
    outputs: &[Arc<dyn Output>],
) -> Option<Report> {
    bump(&METRICS.aggregations_run);
    let since = util::now_secs() - aggregator.window_secs();

    let agg = aggregator.clone();
    let built = tokio::task::spawn_blocking(move || -> Result<Report> {
        let mut items = storage
            .fetch_items(since)
            .with_context(|| format!("scanning storage {}", storage.name()))?;
        Ok(agg.aggregate(&mut items))
    })
    .await;

    let report = match built {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            error!("aggregator {}: {:#}", aggregator.name(), e);
            bump(&METRICS.aggregation_errors);
            return None;
        }
        Err(e) => {
            error!("aggregator {}: aggregation task failed: {}", aggregator.name(), e);
            bump(&METRICS.aggregation_errors);
            return None;
        }
    };

    let channel = aggregator.notify();
    for output in outputs.iter().filter(|o| o.accepts(channel)) {
        match AssertUnwindSafe(output.render(&report, channel))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => bump(&METRICS.reports_rendered),
            Ok(Err(e)) => {
                error!("output {}: {:#}", output.name(), e);
                bump(&METRICS.aggregation_errors);
            }
            Err(_) => {
                error!("output {}: panicked while rendering", output.name());
                bump(&METRICS.aggregation_errors);
            }
        }
    }
    Some(report)
}
