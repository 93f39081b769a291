use std::io::Read;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_tungstenite::{connect_async, tungstenite::Message, tungstenite::Utf8Bytes};

use super::adapter::Source;
use super::tweet::{TrackSet, TweetParser};
use crate::collector::{HealthPolicy, SessionContext};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const RULES_TIMEOUT: Duration = Duration::from_secs(20);

fn default_provider() -> String {
    "twitter".to_string()
}

/// `args` of a `stream` collector.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamArgs {
    /// Websocket endpoint
    pub url: String,

    pub track: Vec<String>,

    #[serde(default)]
    pub languages: Vec<String>,

    #[serde(default)]
    pub low_priority_url: Vec<String>,

    #[serde(default = "default_provider")]
    pub provider: String,

    /// Filter-rule endpoint; rules are only registered when set
    #[serde(default)]
    pub rules_url: Option<String>,

    #[serde(default)]
    pub bearer_token: Option<String>,

    #[serde(default)]
    pub health: HealthPolicy,
}

/// Websocket push source.
///
/// One session = one websocket connection:
/// - connect, send the subscribe frame
/// - text frames carry JSON, binary frames gzip-compressed JSON
/// - every tweet-shaped payload goes through the `TweetParser`
///
/// When `rules_url` is configured, `prepare` replaces the server-side
/// filter rules before each connection.
pub struct StreamSource {
    args: StreamArgs,
    parser: TweetParser,
    http: reqwest::Client,
}

impl StreamSource {
    pub fn new(args: StreamArgs) -> Result<Self> {
        if args.track.is_empty() {
            bail!("stream source needs at least one track");
        }
        let tracks = TrackSet::parse(&args.track)?;
        let parser = TweetParser::new(&args.provider, tracks, args.low_priority_url.clone());
        let http = reqwest::Client::builder()
            .timeout(RULES_TIMEOUT)
            .build()
            .context("building rules http client")?;
        Ok(Self { args, parser, http })
    }

    pub fn from_args(args: &Value) -> Result<Self> {
        let args: StreamArgs =
            serde_json::from_value(args.clone()).context("invalid stream collector args")?;
        Self::new(args)
    }

    pub fn health(&self) -> HealthPolicy {
        self.args.health
    }

    pub fn subscribe_frame(&self) -> Value {
        json!({
            "op": "subscribe",
            "track": self.args.track,
            "languages": self.args.languages,
        })
    }

    /// Filter rules sent to `rules_url`: one per track, links only,
    /// restricted to the configured languages.
    pub fn rules(&self) -> Vec<Value> {
        let langs = if self.args.languages.is_empty() {
            String::new()
        } else {
            let clause: Vec<String> = self
                .args
                .languages
                .iter()
                .map(|l| format!("lang:{}", l))
                .collect();
            format!(" ({})", clause.join(" OR "))
        };

        self.parser
            .tracks()
            .tracks()
            .iter()
            .map(|t| json!({"value": format!("{} has:links{}", t.raw, langs), "tag": t.phrase}))
            .collect()
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.args.bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send_rules(&self, url: &str, body: Value) -> Result<Value> {
        let resp = self
            .authorized(self.http.post(url))
            .json(&body)
            .send()
            .await
            .context("posting filter rules")?;
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if status.as_u16() > 201 {
            bail!("filter rules rejected ({}): {}", status, body);
        }
        Ok(body)
    }

    async fn register_rules(&self, url: &str) -> Result<()> {
        let resp = self
            .authorized(self.http.get(url))
            .send()
            .await
            .context("fetching filter rules")?;
        let status = resp.status();
        if status.as_u16() > 201 {
            bail!("fetching filter rules failed ({})", status);
        }
        let existing: Value = resp.json().await.context("decoding filter rules")?;

        let ids: Vec<&Value> = existing
            .get("data")
            .and_then(Value::as_array)
            .map(|rules| rules.iter().filter_map(|r| r.get("id")).collect())
            .unwrap_or_default();
        if !ids.is_empty() {
            self.send_rules(url, json!({"delete": {"ids": ids}})).await?;
            debug!("{}: deleted {} filter rules", self.args.provider, ids.len());
        }

        let rules = self.rules();
        let count = rules.len();
        self.send_rules(url, json!({"add": rules})).await?;
        info!("{}: registered {} filter rules", self.args.provider, count);
        Ok(())
    }

    fn handle_payload(&self, ctx: &SessionContext, raw: &str) {
        if raw.trim().is_empty() {
            return;
        }
        let payload: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                debug!("{}: unparseable frame: {}", ctx.collector(), e);
                return;
            }
        };
        if !TweetParser::is_tweet(&payload) {
            return;
        }
        if let Some(item) = self.parser.parse(&payload) {
            ctx.emit(item);
        }
    }
}

pub(crate) fn gunzip(bytes: &[u8]) -> Result<String> {
    let mut out = String::new();
    GzDecoder::new(bytes)
        .read_to_string(&mut out)
        .context("inflating frame")?;
    Ok(out)
}

#[async_trait::async_trait]
impl Source for StreamSource {
    fn provider(&self) -> &str {
        &self.args.provider
    }

    async fn prepare(&self) -> Result<()> {
        match &self.args.rules_url {
            Some(url) => self.register_rules(url).await,
            None => Ok(()),
        }
    }

    async fn run(&self, ctx: SessionContext) -> Result<()> {
        let (ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.args.url.as_str()))
            .await
            .context("connect timed out")?
            .with_context(|| format!("connecting to {}", self.args.url))?;
        let (mut write, mut read) = ws.split();

        write
            .send(Message::Text(Utf8Bytes::from(self.subscribe_frame().to_string())))
            .await
            .context("sending subscribe frame")?;
        info!("collector {}: subscribed to {}", ctx.collector(), self.args.url);

        let mut shutdown = ctx.shutdown();
        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_payload(&ctx, text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => match gunzip(&bytes) {
                        Ok(text) => self.handle_payload(&ctx, &text),
                        Err(e) => warn!("collector {}: {:#}", ctx.collector(), e),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        info!("collector {}: closed by server ({:?})", ctx.collector(), frame);
                        return Ok(());
                    }
                    // ping / pong are answered by tungstenite
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("reading stream"),
                    None => return Ok(()),
                },
            }
        }
    }
}
