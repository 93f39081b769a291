use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use link_digest_collector::collector::{
    Collector, CollectorState, CollectorStatus, HealthPolicy, ItemCallback, SessionCollector,
    SessionContext,
};
use link_digest_collector::item::Item;
use link_digest_collector::sources::Source;

/// Emits one item every few milliseconds until asked to stop, or
/// ends the session on its own after `limit` items.
#[derive(Default)]
struct Ticker {
    limit: Option<usize>,
    fail_prepare: bool,
    runs: AtomicUsize,
    prepares: AtomicUsize,
}

#[async_trait::async_trait]
impl Source for Ticker {
    fn provider(&self) -> &str {
        "ticker"
    }

    async fn prepare(&self) -> Result<()> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        if self.fail_prepare {
            bail!("rules endpoint unreachable");
        }
        Ok(())
    }

    async fn run(&self, ctx: SessionContext) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let mut shutdown = ctx.shutdown();
        let mut emitted = 0;
        loop {
            if self.limit.is_some_and(|l| emitted >= l) {
                return Ok(());
            }
            tokio::select! {
                _ = shutdown.wait() => return Ok(()),
                _ = tokio::time::sleep(Duration::from_millis(5)) => {
                    ctx.emit(Item::new("ticker").with_url(format!("u{emitted}")));
                    emitted += 1;
                }
            }
        }
    }
}

fn quick_retry() -> HealthPolicy {
    HealthPolicy {
        retry_delay: Duration::ZERO,
        ..HealthPolicy::default()
    }
}

fn collecting(collector: &impl Collector) -> Arc<Mutex<Vec<Item>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: ItemCallback = Arc::new(move |item: Item| sink.lock().unwrap().push(item));
    collector.set_callback(callback);
    seen
}

#[tokio::test]
async fn stopped_before_start() {
    let collector = SessionCollector::new("t", Ticker::default(), HealthPolicy::default());
    assert_eq!(collector.check_status(), CollectorStatus::Stopped);
    assert_eq!(collector.state(), CollectorState::Stopped);
    // stopping a collector that never ran is harmless
    collector.stop().await;
    collector.stop().await;
}

#[tokio::test]
async fn emits_while_running_and_never_after_stop() {
    let collector = SessionCollector::new("t", Ticker::default(), HealthPolicy::default());
    let seen = collecting(&collector);

    collector.start().await.unwrap();
    assert_eq!(collector.state(), CollectorState::Running);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(collector.check_status(), CollectorStatus::Healthy);

    collector.stop().await;
    let at_stop = seen.lock().unwrap().len();
    assert!(at_stop > 0);
    assert_eq!(collector.state(), CollectorState::Stopped);
    assert_eq!(collector.check_status(), CollectorStatus::Stopped);

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(seen.lock().unwrap().len(), at_stop);

    // items arrive in emission order
    let urls: Vec<String> = seen.lock().unwrap().iter().filter_map(|i| i.url.clone()).collect();
    let expected: Vec<String> = (0..at_stop).map(|i| format!("u{i}")).collect();
    assert_eq!(urls, expected);
}

#[tokio::test]
async fn dead_session_is_reconnected() {
    let source = Ticker {
        limit: Some(2),
        ..Ticker::default()
    };
    let collector = SessionCollector::new("t", source, quick_retry());
    let seen = collecting(&collector);

    collector.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(collector.source().runs.load(Ordering::SeqCst), 1);

    assert_eq!(collector.check_status(), CollectorStatus::Degraded);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(collector.source().runs.load(Ordering::SeqCst), 2);
    assert_eq!(seen.lock().unwrap().len(), 4);

    collector.stop().await;
    assert_eq!(collector.check_status(), CollectorStatus::Stopped);
}

#[tokio::test]
async fn failed_start_is_retried_by_health_checks() {
    let source = Ticker {
        fail_prepare: true,
        ..Ticker::default()
    };
    let collector = SessionCollector::new("t", source, quick_retry());

    assert!(collector.start().await.is_err());
    assert_eq!(collector.state(), CollectorState::Stopped);
    assert_eq!(collector.source().runs.load(Ordering::SeqCst), 0);

    assert_eq!(collector.check_status(), CollectorStatus::Degraded);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(collector.source().prepares.load(Ordering::SeqCst), 2);

    collector.stop().await;
}

/// Never gets past `prepare`; remembers when each attempt happened.
#[derive(Default)]
struct Refusing {
    attempts: Mutex<Vec<Instant>>,
}

#[async_trait::async_trait]
impl Source for Refusing {
    fn provider(&self) -> &str {
        "refusing"
    }

    async fn prepare(&self) -> Result<()> {
        self.attempts.lock().unwrap().push(Instant::now());
        bail!("auth rejected")
    }

    async fn run(&self, _ctx: SessionContext) -> Result<()> {
        unreachable!("prepare never succeeds")
    }
}

#[tokio::test]
async fn failed_retries_back_off_by_doubling() {
    let policy = HealthPolicy {
        retry_delay: Duration::from_millis(20),
        max_retry_delay: Duration::from_secs(10),
        ..HealthPolicy::default()
    };
    let collector = SessionCollector::new("t", Refusing::default(), policy);
    assert!(collector.start().await.is_err());

    let deadline = Instant::now() + Duration::from_millis(700);
    while Instant::now() < deadline {
        collector.check_status();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    collector.stop().await;

    let attempts = collector.source().attempts.lock().unwrap().clone();
    assert!(attempts.len() >= 4, "only {} attempts", attempts.len());
    let gaps: Vec<f64> = attempts
        .windows(2)
        .map(|w| (w[1] - w[0]).as_secs_f64())
        .collect();
    assert!(gaps[0] >= 0.040, "first retry after {:?}s", gaps[0]);
    for pair in gaps.windows(2) {
        let ratio = pair[1] / pair[0];
        assert!((1.5..=3.0).contains(&ratio), "gaps {gaps:?}");
    }
}

/// Keeps its session open without ever emitting.
#[derive(Default)]
struct Silent {
    runs: AtomicUsize,
}

#[async_trait::async_trait]
impl Source for Silent {
    fn provider(&self) -> &str {
        "silent"
    }

    async fn run(&self, ctx: SessionContext) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        ctx.shutdown().wait().await;
        Ok(())
    }
}

#[tokio::test]
async fn idle_session_is_reconnected() {
    let policy = HealthPolicy {
        idle_timeout: Duration::from_millis(40),
        max_idle_timeout: Duration::from_secs(1),
        ..HealthPolicy::default()
    };
    let collector = SessionCollector::new("t", Silent::default(), policy);
    collector.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(collector.check_status(), CollectorStatus::Healthy);
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(collector.check_status(), CollectorStatus::Degraded);
    assert_eq!(collector.check_status(), CollectorStatus::Reconnecting);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(collector.source().runs.load(Ordering::SeqCst), 2);
    assert_eq!(collector.state(), CollectorState::Running);
    // the idle window doubled after the idle reconnect
    assert_eq!(collector.check_status(), CollectorStatus::Healthy);

    collector.stop().await;
    assert_eq!(collector.state(), CollectorState::Stopped);
}

/// First session dies after one item; later sessions emit until stopped.
/// `prepare` is slow so a reconnect stays in flight for a while.
#[derive(Default)]
struct Flaky {
    runs: AtomicUsize,
    prepares: AtomicUsize,
}

#[async_trait::async_trait]
impl Source for Flaky {
    fn provider(&self) -> &str {
        "flaky"
    }

    async fn prepare(&self) -> Result<()> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }

    async fn run(&self, ctx: SessionContext) -> Result<()> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        ctx.emit(Item::new("flaky").with_url(format!("r{run}")));
        if run == 0 {
            return Ok(());
        }
        let mut shutdown = ctx.shutdown();
        loop {
            tokio::select! {
                _ = shutdown.wait() => return Ok(()),
                _ = tokio::time::sleep(Duration::from_millis(2)) => {
                    ctx.emit(Item::new("flaky").with_url(format!("r{run}")));
                }
            }
        }
    }
}

#[tokio::test]
async fn stop_during_reconnect_leaves_nothing_running() {
    let collector = SessionCollector::new("t", Flaky::default(), quick_retry());
    let seen = collecting(&collector);

    collector.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(collector.check_status(), CollectorStatus::Degraded);

    // the reconnect is now inside its slow prepare
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(collector.source().prepares.load(Ordering::SeqCst), 2);
    collector.stop().await;

    assert_eq!(collector.state(), CollectorState::Stopped);
    assert_eq!(collector.check_status(), CollectorStatus::Stopped);
    let at_stop = seen.lock().unwrap().len();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(seen.lock().unwrap().len(), at_stop);
    assert!(collector.source().runs.load(Ordering::SeqCst) <= 2);
}
