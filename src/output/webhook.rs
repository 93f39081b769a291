use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::info;
use serde::Deserialize;
use serde_json::{Value, json};

use super::Output;
use crate::aggregator::Report;

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
struct WebhookArgs {
    /// channel → endpoint
    templates: BTreeMap<String, String>,

    #[serde(default)]
    bearer_token: Option<String>,

    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

/// POSTs `{"channel", "report"}` to the endpoint configured for the
/// report's channel. Channels without an endpoint are not accepted.
pub struct WebhookOutput {
    name: String,
    templates: BTreeMap<String, String>,
    bearer_token: Option<String>,
    http: reqwest::Client,
}

impl WebhookOutput {
    pub fn from_args(name: &str, args: &Value) -> Result<Self> {
        let args: WebhookArgs =
            serde_json::from_value(args.clone()).context("invalid webhook output args")?;
        if args.templates.is_empty() {
            bail!("webhook output '{}' has no templates", name);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(args.timeout_secs))
            .build()
            .context("building webhook http client")?;
        Ok(Self {
            name: name.to_string(),
            templates: args.templates,
            bearer_token: args.bearer_token,
            http,
        })
    }
}

#[async_trait::async_trait]
impl Output for WebhookOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, channel: &str) -> bool {
        self.templates.contains_key(channel)
    }

    async fn render(&self, report: &Report, channel: &str) -> Result<()> {
        let Some(endpoint) = self.templates.get(channel) else {
            return Ok(());
        };
        let mut req = self
            .http
            .post(endpoint)
            .json(&json!({"channel": channel, "report": report}));
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("posting report to {}", endpoint))?;
        let status = resp.status();
        if !status.is_success() {
            bail!("webhook {} answered {}", endpoint, status);
        }
        info!("output {}: report sent ({})", self.name, status);
        Ok(())
    }
}
