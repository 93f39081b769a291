use anyhow::Result;

use crate::collector::SessionContext;

/// Source is the abstraction layer between:
/// - The generic collector lifecycle (`SessionCollector`)
/// - One external protocol (websocket stream, HTTP poll, …)
///
/// Each source implementation must:
/// - Open its connection inside `run`
/// - Turn raw payloads into `Item`s and hand them to `ctx.emit`
/// - Return promptly once `ctx.shutdown()` fires
///
/// DESIGN GOALS:
/// - Zero lifecycle logic inside sources
/// - One source type per protocol
/// - Uniform `Item` output across sources
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - The same instance serves every session of its collector
///
#[async_trait::async_trait]
pub trait Source: Send + Sync + 'static {
    /// Provider name stamped on every emitted item (e.g. "twitter").
    fn provider(&self) -> &str;

    /// Registers server-side filter rules before a session starts.
    ///
    /// Called on every (re)start. An error aborts the start.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Runs one session until the stream ends, fails, or shutdown is
    /// requested.
    ///
    /// CONTRACT:
    /// - Returning ends the session; reconnecting is the collector's job
    /// - Must never panic on malformed payloads
    /// - Items are emitted in receipt order
    async fn run(&self, ctx: SessionContext) -> Result<()>;
}
