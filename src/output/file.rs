use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::Deserialize;
use serde_json::Value;

use super::{Channels, Output};
use crate::aggregator::Report;

#[derive(Debug, Deserialize)]
struct FileOutputArgs {
    dir: PathBuf,

    #[serde(default)]
    channels: Channels,
}

/// Writes every report as pretty JSON to
/// `<dir>/<channel>_<YYYYmmdd_HHMMSS>.json`.
pub struct FileOutput {
    name: String,
    dir: PathBuf,
    channels: Channels,
}

impl FileOutput {
    pub fn new(name: &str, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            dir: dir.into(),
            channels: Channels::default(),
        }
    }

    pub fn from_args(name: &str, args: &Value) -> Result<Self> {
        let args: FileOutputArgs =
            serde_json::from_value(args.clone()).context("invalid file output args")?;
        Ok(Self {
            name: name.to_string(),
            dir: args.dir,
            channels: args.channels,
        })
    }

    pub fn report_path(&self, channel: &str, generated_at: i64) -> PathBuf {
        let at = DateTime::<Utc>::from_timestamp(generated_at, 0).unwrap_or_default();
        self.dir
            .join(format!("{}_{}.json", channel, at.format("%Y%m%d_%H%M%S")))
    }
}

#[async_trait::async_trait]
impl Output for FileOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, channel: &str) -> bool {
        self.channels.accepts(channel)
    }

    async fn render(&self, report: &Report, channel: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.report_path(channel, report.generated_at);
        let body = serde_json::to_vec_pretty(report).context("encoding report")?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!("output {}: report written to {}", self.name, path.display());
        Ok(())
    }
}
