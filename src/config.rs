use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Top-level structure loaded from `config.json`.
//
// It declares:
// - Named collector / storage / processor / aggregator / output instances
// - Exactly one default storage
// - Logging and loop timings
// - Optional startup replays
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Interval of the collector health-check loop
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    /// Interval of the periodic metrics log line
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,

    /// Capacity of each collector → pipeline queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    pub collectors: Vec<ComponentConfig>,

    pub storages: Vec<ComponentConfig>,

    #[serde(default)]
    pub processors: Vec<ComponentConfig>,

    #[serde(default)]
    pub aggregators: Vec<ComponentConfig>,

    #[serde(default)]
    pub outputs: Vec<ComponentConfig>,

    #[serde(default)]
    pub replay: Vec<ReplayConfig>,
}

fn default_health_check_interval_ms() -> u64 {
    1000
}

fn default_metrics_interval_secs() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    10_000
}

// ------------------------------------------------------------
// Logging configuration
// ------------------------------------------------------------
//
// `level` is an env_logger filter string ("info", "warn,link_digest_collector=debug").
// RUST_LOG takes precedence when set.
//
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

// ------------------------------------------------------------
// Component configuration
// ------------------------------------------------------------
//
// One named instance of a registered component type.
//
// `args` is handed untouched to the constructor registered for `type`.
// `default` is only meaningful for storages, `schedule` and `notify`
// only for aggregators.
//
#[derive(Debug, Deserialize, Clone)]
pub struct ComponentConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub args: Value,

    #[serde(default)]
    pub default: bool,

    #[serde(default)]
    pub schedule: Option<String>,

    #[serde(default)]
    pub notify: Option<String>,
}

impl ComponentConfig {
    pub fn new(name: &str, kind: &str, args: Value) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            args,
            default: false,
            schedule: None,
            notify: None,
        }
    }
}

// ------------------------------------------------------------
// Replay configuration
// ------------------------------------------------------------
//
// A JSONL backlog pushed through the pipeline once at startup,
// resuming from the persisted line offset.
//
#[derive(Debug, Deserialize, Clone)]
pub struct ReplayConfig {
    pub input: PathBuf,

    pub offset_file: PathBuf,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    100
}

impl Config {
    pub fn parse(data: &str) -> Result<Self> {
        let cfg: Config = serde_json::from_str(data).context("parsing configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Structural checks that must hold before anything is constructed.
    ///
    /// A partially configured process must never start.
    pub fn validate(&self) -> Result<()> {
        let defaults = self.storages.iter().filter(|s| s.default).count();
        match defaults {
            1 => {}
            0 => bail!("no default storage configured"),
            n => bail!("{} storages are marked default, exactly one is allowed", n),
        }

        for agg in &self.aggregators {
            if agg.schedule.as_deref().map_or(true, |s| s.trim().is_empty()) {
                bail!("aggregator '{}' has no schedule", agg.name);
            }
            if agg.notify.as_deref().map_or(true, |s| s.trim().is_empty()) {
                bail!("aggregator '{}' has no notify channel", agg.name);
            }
        }

        let sections = [
            ("collector", &self.collectors),
            ("storage", &self.storages),
            ("processor", &self.processors),
            ("aggregator", &self.aggregators),
            ("output", &self.outputs),
        ];
        for (section, entries) in sections {
            let mut seen = std::collections::HashSet::new();
            for entry in entries.iter() {
                if !seen.insert(entry.name.as_str()) {
                    bail!("duplicate {} name '{}'", section, entry.name);
                }
            }
        }

        if self.health_check_interval_ms == 0 {
            bail!("health_check_interval_ms must be positive");
        }
        Ok(())
    }

    pub fn default_storage(&self) -> Option<&ComponentConfig> {
        self.storages.iter().find(|s| s.default)
    }
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads a JSON configuration file from disk, deserializes it into
// the strongly typed `Config` structure and validates it.
//
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading configuration from {}", path.display()))?;
    Config::parse(&data)
}
