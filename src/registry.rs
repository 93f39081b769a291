//! Component registry and factory
//!
//! Maps the `type` of every configuration entry to a constructor.
//!
//! DESIGN:
//! - Component creation happens in one place
//! - The orchestrator resolves components by type identifier only
//! - Callers (and tests) may register extra types before building
//!
//! Type identifiers must be lowercase and stable: they are the `type`
//! field in config.json.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};

use crate::aggregator::{Aggregator, CategoryAggregator, ItemFilter};
use crate::collector::Collector;
use crate::config::ComponentConfig;
use crate::output::{ConsoleOutput, FileOutput, Output, WebhookOutput};
use crate::pipeline::{CanonicalUrl, Processor, Require, Unshorten, UrlGrabber};
use crate::sources;
use crate::storage::{FileStorage, MemoryStorage, RedisStorage, Storage};

/// Constructors of one component family, keyed by type identifier.
struct Factories<T: ?Sized> {
    family: &'static str,
    by_kind: HashMap<String, Box<dyn Fn(&ComponentConfig) -> Result<Arc<T>> + Send + Sync>>,
}

impl<T: ?Sized> Factories<T> {
    fn new(family: &'static str) -> Self {
        Self {
            family,
            by_kind: HashMap::new(),
        }
    }

    fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&ComponentConfig) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        self.by_kind.insert(kind.to_string(), Box::new(factory));
    }

    fn build(&self, cfg: &ComponentConfig) -> Result<Arc<T>> {
        match self.by_kind.get(&cfg.kind) {
            Some(factory) => factory(cfg),
            None => bail!(
                "{} '{}' has unknown type '{}'",
                self.family,
                cfg.name,
                cfg.kind
            ),
        }
    }

    fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.by_kind.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

pub struct Registry {
    collectors: Factories<dyn Collector>,
    storages: Factories<dyn Storage>,
    processors: Factories<dyn Processor>,
    aggregators: Factories<dyn Aggregator>,
    outputs: Factories<dyn Output>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Registry {
    /// A registry without any component type.
    pub fn empty() -> Self {
        Self {
            collectors: Factories::new("collector"),
            storages: Factories::new("storage"),
            processors: Factories::new("processor"),
            aggregators: Factories::new("aggregator"),
            outputs: Factories::new("output"),
        }
    }

    /// Every built-in component type.
    pub fn builtin() -> Self {
        let mut r = Self::empty();

        r.register_collector("stream", sources::stream_collector);
        r.register_collector("poll", sources::poll_collector);

        r.register_storage("file", |c| {
            Ok(Arc::new(FileStorage::from_args(&c.name, &c.args)?) as Arc<dyn Storage>)
        });
        r.register_storage("memory", |c| {
            Ok(Arc::new(MemoryStorage::new(&c.name)) as Arc<dyn Storage>)
        });
        r.register_storage("redis", |c| {
            Ok(Arc::new(RedisStorage::from_args(&c.name, &c.args)?) as Arc<dyn Storage>)
        });

        r.register_processor("unshorten", |c| {
            Ok(Arc::new(Unshorten::from_args(&c.name, &c.args)?) as Arc<dyn Processor>)
        });
        r.register_processor("canonical_url", |c| {
            Ok(Arc::new(CanonicalUrl::from_args(&c.name, &c.args)?) as Arc<dyn Processor>)
        });
        r.register_processor("url_grabber", |c| {
            Ok(Arc::new(UrlGrabber::from_args(&c.name, &c.args)?) as Arc<dyn Processor>)
        });
        r.register_processor("require", |c| {
            Ok(Arc::new(Require::from_args(&c.name, &c.args)?) as Arc<dyn Processor>)
        });

        r.register_aggregator("category", |c| {
            Ok(Arc::new(CategoryAggregator::from_config(c, ItemFilter::All)?) as Arc<dyn Aggregator>)
        });
        r.register_aggregator("article", |c| {
            let filter = ItemFilter::RequireExtra("article".to_string());
            Ok(Arc::new(CategoryAggregator::from_config(c, filter)?) as Arc<dyn Aggregator>)
        });

        r.register_output("console", |c| {
            Ok(Arc::new(ConsoleOutput::from_args(&c.name, &c.args)?) as Arc<dyn Output>)
        });
        r.register_output("file", |c| {
            Ok(Arc::new(FileOutput::from_args(&c.name, &c.args)?) as Arc<dyn Output>)
        });
        r.register_output("webhook", |c| {
            Ok(Arc::new(WebhookOutput::from_args(&c.name, &c.args)?) as Arc<dyn Output>)
        });

        r
    }

    pub fn register_collector<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&ComponentConfig) -> Result<Arc<dyn Collector>> + Send + Sync + 'static,
    {
        self.collectors.register(kind, factory);
    }

    pub fn register_storage<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&ComponentConfig) -> Result<Arc<dyn Storage>> + Send + Sync + 'static,
    {
        self.storages.register(kind, factory);
    }

    pub fn register_processor<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&ComponentConfig) -> Result<Arc<dyn Processor>> + Send + Sync + 'static,
    {
        self.processors.register(kind, factory);
    }

    pub fn register_aggregator<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&ComponentConfig) -> Result<Arc<dyn Aggregator>> + Send + Sync + 'static,
    {
        self.aggregators.register(kind, factory);
    }

    pub fn register_output<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&ComponentConfig) -> Result<Arc<dyn Output>> + Send + Sync + 'static,
    {
        self.outputs.register(kind, factory);
    }

    pub fn collector(&self, cfg: &ComponentConfig) -> Result<Arc<dyn Collector>> {
        self.collectors.build(cfg)
    }

    pub fn storage(&self, cfg: &ComponentConfig) -> Result<Arc<dyn Storage>> {
        self.storages.build(cfg)
    }

    pub fn processor(&self, cfg: &ComponentConfig) -> Result<Arc<dyn Processor>> {
        self.processors.build(cfg)
    }

    pub fn aggregator(&self, cfg: &ComponentConfig) -> Result<Arc<dyn Aggregator>> {
        self.aggregators.build(cfg)
    }

    pub fn output(&self, cfg: &ComponentConfig) -> Result<Arc<dyn Output>> {
        self.outputs.build(cfg)
    }

    /// Registered type identifiers per family, for diagnostics.
    pub fn describe(&self) -> String {
        format!(
            "collectors={:?} storages={:?} processors={:?} aggregators={:?} outputs={:?}",
            self.collectors.kinds(),
            self.storages.kinds(),
            self.processors.kinds(),
            self.aggregators.kinds(),
            self.outputs.kinds(),
        )
    }
}
