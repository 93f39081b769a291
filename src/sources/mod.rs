//! Source implementations and their collector factories
//!
//! This module provides:
//! - One `Source` per supported protocol
//! - Tweet payload handling shared by all of them
//! - Factories wrapping a configured source into a `SessionCollector`
//!
//! Protocol-specific logic must live in the dedicated source modules.
//! The orchestrator only ever sees `dyn Collector`.

pub mod adapter;
pub mod poll;
pub mod stream;
pub mod tweet;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::collector::{Collector, SessionCollector};
use crate::config::ComponentConfig;

pub use adapter::Source;
pub use poll::PollSource;
pub use stream::StreamSource;

/// Builds a `stream` collector from its configuration entry.
pub fn stream_collector(cfg: &ComponentConfig) -> Result<Arc<dyn Collector>> {
    let source = StreamSource::from_args(&cfg.args)
        .with_context(|| format!("collector '{}'", cfg.name))?;
    let policy = source.health();
    Ok(Arc::new(SessionCollector::new(&cfg.name, source, policy)))
}

/// Builds a `poll` collector from its configuration entry.
pub fn poll_collector(cfg: &ComponentConfig) -> Result<Arc<dyn Collector>> {
    let source = PollSource::from_args(&cfg.args)
        .with_context(|| format!("collector '{}'", cfg.name))?;
    let policy = source.health();
    Ok(Arc::new(SessionCollector::new(&cfg.name, source, policy)))
}
