use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use log::{error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::health::{HealthPolicy, Liveness};
use super::{Collector, CollectorState, CollectorStatus, ItemCallback};
use crate::item::Item;
use crate::metrics::{METRICS, bump};
use crate::sources::adapter::Source;

/// Generic collector lifecycle around one `Source`.
///
/// This type owns:
/// - The session task (one tokio task per running session)
/// - The stop signal of that session
/// - Liveness tracking and reconnect decisions
///
/// It does NOT:
/// - Speak any protocol (delegated to the source)
/// - Process items (delegated to the callback)
///
/// GUARANTEES:
/// - At most one session runs at a time
/// - start / stop / reconnect are serialized by a lifecycle lock
/// - After `stop()` returns, the session task has exited and no
///   further item is emitted
///
/// The handle is cheap to clone; clones share the same collector.
pub struct SessionCollector<S: Source> {
    inner: Arc<Inner<S>>,
}

impl<S: Source> Clone for SessionCollector<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<S> {
    name: String,
    source: Arc<S>,
    policy: HealthPolicy,
    callback: Arc<Mutex<Option<ItemCallback>>>,
    liveness: Arc<Liveness>,

    /// Whether the owner wants this collector running.
    desired: AtomicBool,
    reconnecting: AtomicBool,
    state: Mutex<CollectorState>,
    session: Mutex<Option<Session>>,
    lifecycle: tokio::sync::Mutex<()>,
}

struct Session {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl<S: Source> SessionCollector<S> {
    pub fn new(name: &str, source: S, policy: HealthPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                source: Arc::new(source),
                policy,
                callback: Arc::new(Mutex::new(None)),
                liveness: Arc::new(Liveness::default()),
                desired: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                state: Mutex::new(CollectorState::Stopped),
                session: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    fn set_state(&self, next: CollectorState) {
        let Ok(mut state) = self.inner.state.lock() else {
            return;
        };
        match (*state, next) {
            (CollectorState::Stopped, CollectorState::Running) => {
                METRICS.collectors_active.fetch_add(1, Ordering::Relaxed);
            }
            (CollectorState::Running, CollectorState::Stopped) => {
                METRICS.collectors_active.fetch_sub(1, Ordering::Relaxed);
            }
            _ => {}
        }
        *state = next;
    }

    fn session_alive(&self) -> bool {
        self.inner
            .session
            .lock()
            .map(|s| s.as_ref().is_some_and(|s| !s.handle.is_finished()))
            .unwrap_or(false)
    }

    /// Replaces any running session with a fresh one.
    ///
    /// Caller must hold the lifecycle lock.
    async fn launch(&self) -> Result<()> {
        self.stop_session().await;
        self.inner.liveness.record_attempt();

        if let Err(e) = self.inner.source.prepare().await {
            self.inner.liveness.record_failure();
            return Err(e.context(format!("collector {}: preparing source", self.inner.name)));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = SessionContext {
            collector: self.inner.name.clone(),
            callback: self.inner.callback.clone(),
            liveness: self.inner.liveness.clone(),
            shutdown: Shutdown(shutdown_rx),
        };

        let source = self.inner.source.clone();
        let name = self.inner.name.clone();
        let liveness = self.inner.liveness.clone();
        let stop = ctx.shutdown();
        let handle = tokio::spawn(async move {
            match source.run(ctx).await {
                Ok(()) => info!("collector {}: session ended", name),
                Err(e) => warn!("collector {}: session failed: {:#}", name, e),
            }
            // A session that ends without being asked to is one failure
            if !stop.is_set() {
                liveness.record_failure();
            }
        });

        if let Ok(mut session) = self.inner.session.lock() {
            *session = Some(Session {
                shutdown: shutdown_tx,
                handle,
            });
        }
        self.set_state(CollectorState::Running);
        info!("collector {}: session started", self.inner.name);
        Ok(())
    }

    /// Signals the current session to stop and waits for it to exit.
    ///
    /// Caller must hold the lifecycle lock.
    async fn stop_session(&self) {
        let session = self.inner.session.lock().ok().and_then(|mut s| s.take());
        if let Some(session) = session {
            let _ = session.shutdown.send(true);
            if let Err(e) = session.handle.await {
                if e.is_panic() {
                    error!("collector {}: session panicked", self.inner.name);
                }
            }
        }
        self.set_state(CollectorState::Stopped);
    }

    async fn reconnect(&self, reason: &'static str) {
        let _guard = self.inner.lifecycle.lock().await;
        // stop() may have won the race for the lock
        if !self.inner.desired.load(Ordering::SeqCst) {
            return;
        }
        bump(&METRICS.reconnects);
        info!("collector {}: reconnecting ({})", self.inner.name, reason);
        if let Err(e) = self.launch().await {
            error!("{:#}", e);
        }
    }

    /// Spawns one reconnect unless one is already in flight.
    ///
    /// Dead sessions and failed prepares are counted where they happen;
    /// only an idle session still needs its failure recorded here.
    fn schedule_reconnect(&self, reason: &'static str, count_failure: bool) -> CollectorStatus {
        if self.inner.reconnecting.swap(true, Ordering::SeqCst) {
            return CollectorStatus::Reconnecting;
        }
        let failures = if count_failure {
            self.inner.liveness.record_failure()
        } else {
            self.inner.liveness.failures()
        };
        warn!(
            "collector {}: {} (failures={}), scheduling reconnect",
            self.inner.name, reason, failures
        );

        let this = self.clone();
        tokio::spawn(async move {
            this.reconnect(reason).await;
            this.inner.reconnecting.store(false, Ordering::SeqCst);
        });
        CollectorStatus::Degraded
    }
}

#[async_trait::async_trait]
impl<S: Source> Collector for SessionCollector<S> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn set_callback(&self, callback: ItemCallback) {
        if let Ok(mut slot) = self.inner.callback.lock() {
            if slot.is_some() {
                warn!("collector {}: replacing existing callback", self.inner.name);
            }
            *slot = Some(callback);
        }
    }

    async fn start(&self) -> Result<()> {
        self.inner.desired.store(true, Ordering::SeqCst);
        let _guard = self.inner.lifecycle.lock().await;

        let has_callback = self
            .inner
            .callback
            .lock()
            .map(|c| c.is_some())
            .unwrap_or(false);
        if !has_callback {
            warn!("collector {}: started without callback", self.inner.name);
        }

        self.launch().await.inspect_err(|e| error!("{:#}", e))
    }

    fn check_status(&self) -> CollectorStatus {
        if !self.inner.desired.load(Ordering::SeqCst) {
            return CollectorStatus::Stopped;
        }
        if self.inner.reconnecting.load(Ordering::SeqCst) {
            return CollectorStatus::Reconnecting;
        }

        let live = &self.inner.liveness;
        let policy = &self.inner.policy;
        let failures = live.failures();

        if !self.session_alive() {
            if live.since_attempt() >= live.retry_wait(policy, failures) {
                return self.schedule_reconnect("session not running", false);
            }
            return CollectorStatus::Degraded;
        }

        if live.idle_for() > policy.idle_window(failures) {
            return self.schedule_reconnect("no item within idle window", true);
        }

        CollectorStatus::Healthy
    }

    async fn stop(&self) {
        self.inner.desired.store(false, Ordering::SeqCst);
        let _guard = self.inner.lifecycle.lock().await;
        self.stop_session().await;
        info!("collector {}: stopped", self.inner.name);
    }

    fn state(&self) -> CollectorState {
        self.inner
            .state
            .lock()
            .map(|s| *s)
            .unwrap_or(CollectorState::Stopped)
    }
}

/// Stop signal observed by a session task.
#[derive(Clone)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    pub fn is_set(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the session has been asked to stop.
    pub async fn wait(&mut self) {
        while !*self.0.borrow_and_update() {
            if self.0.changed().await.is_err() {
                // Sender gone: the collector itself was dropped
                return;
            }
        }
    }
}

/// Everything a running session needs from its collector.
pub struct SessionContext {
    collector: String,
    callback: Arc<Mutex<Option<ItemCallback>>>,
    liveness: Arc<Liveness>,
    shutdown: Shutdown,
}

impl SessionContext {
    pub fn collector(&self) -> &str {
        &self.collector
    }

    /// Hands one item to the registered callback, exactly once.
    pub fn emit(&self, item: Item) {
        self.liveness.record_item();
        bump(&METRICS.items_collected);

        let callback = self.callback.lock().ok().and_then(|c| c.clone());
        match callback {
            Some(cb) => cb(item),
            None => warn!("collector {}: no callback, item discarded", self.collector),
        }
    }

    /// Marks the source as alive without emitting (heartbeats, empty polls).
    pub fn touch(&self) {
        self.liveness.record_item();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_set()
    }

    /// Independent handle on the stop signal, for use in `select!`.
    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }
}
