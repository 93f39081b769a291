/// Collector module
///
/// This module groups all logic responsible for:
/// - The collector lifecycle contract (start / check_status / stop)
/// - Liveness tracking and reconnect back-off
/// - Handing produced items to the rest of the system
///
/// The collector layer sits between:
/// - Sources (websocket push, HTTP poll, …) which speak a protocol
/// - The pipeline, which only ever sees `Item`s through a callback
///
/// Design notes:
/// - Source-specific logic MUST NOT live here
/// - The orchestrator depends only on the `Collector` trait
pub mod health;
pub mod runner;

use std::sync::Arc;

use anyhow::Result;

use crate::item::Item;

pub use health::HealthPolicy;
pub use runner::{SessionCollector, SessionContext};

/// The single way a collector hands an item to the system.
pub type ItemCallback = Arc<dyn Fn(Item) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Stopped,
    Running,
}

/// Outcome of one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorStatus {
    /// Not started, or stopped on purpose
    Stopped,

    /// Session alive and within its idle window
    Healthy,

    /// Dead or idle session detected; a reconnect was just scheduled
    Degraded,

    /// A previously scheduled reconnect is still in flight
    Reconnecting,
}

#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    /// Configured instance name.
    fn name(&self) -> &str;

    /// Registers the item callback. Must be called before `start`.
    fn set_callback(&self, callback: ItemCallback);

    /// Establishes the session and registers source-side rules.
    ///
    /// On failure the collector stays `Stopped`; the health loop
    /// retries later.
    async fn start(&self) -> Result<()>;

    /// Cheap, non-blocking inspection of liveness signals.
    ///
    /// MUST NOT perform network I/O. A needed reconnect is delegated
    /// to a background task.
    fn check_status(&self) -> CollectorStatus;

    /// Tears the session down. Idempotent. Once this returns no more
    /// items are emitted.
    async fn stop(&self);

    fn state(&self) -> CollectorState;
}
