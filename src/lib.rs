// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:       Configuration structs loaded from JSON
// - item:         The canonical item and its persisted record
// - util:         Shared helpers (time, day segments, urls, cron)
// - metrics:      Global lock-free runtime counters
// - collector:    Collector lifecycle, health checks, reconnects
// - sources:      Protocol adapters (websocket stream, HTTP poll)
// - pipeline:     Processors and the storing pipeline
// - storage:      Append + time-windowed scan backends
// - offset:       Persisted resume points
// - replay:       Offset-tracked replays into the pipeline
// - aggregator:   Report building from stored items
// - output:       Report delivery
// - registry:     Type identifier → constructor
// - orchestrator: Process wiring and lifetime
//
pub mod aggregator;
pub mod collector;
pub mod config;
pub mod item;
pub mod metrics;
pub mod offset;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod registry;
pub mod replay;
pub mod sources;
pub mod storage;
pub mod util;

pub use config::{Config, load_config};
pub use item::{Item, StoredRecord};
pub use orchestrator::{Orchestrator, run_aggregation};
pub use registry::Registry;
