use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;
use serde_json::Value;

use super::{Channels, Output, render_text};
use crate::aggregator::Report;

#[derive(Debug, Default, Deserialize)]
struct ConsoleArgs {
    #[serde(default)]
    channels: Channels,
}

/// Logs a plain-text rendering of each report.
pub struct ConsoleOutput {
    name: String,
    channels: Channels,
}

impl ConsoleOutput {
    pub fn from_args(name: &str, args: &Value) -> Result<Self> {
        let args: ConsoleArgs = if args.is_null() {
            ConsoleArgs::default()
        } else {
            serde_json::from_value(args.clone()).context("invalid console output args")?
        };
        Ok(Self {
            name: name.to_string(),
            channels: args.channels,
        })
    }
}

#[async_trait::async_trait]
impl Output for ConsoleOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, channel: &str) -> bool {
        self.channels.accepts(channel)
    }

    async fn render(&self, report: &Report, channel: &str) -> Result<()> {
        for line in render_text(report, channel).lines() {
            info!("{}", line);
        }
        Ok(())
    }
}
