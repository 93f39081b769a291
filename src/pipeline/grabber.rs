use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::debug;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Processor, Verdict};
use crate::item::Item;

const HEAD_LIMIT: usize = 50_000;

static OG_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)<meta\s+(?:[^>]*?\s)?(?:property|name)\s*=\s*["']og:title["'][^>]*?\scontent\s*=\s*["']([^"']*)["']"#,
    )
    .unwrap()
});
static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>([^<]+)</title>").unwrap());
static NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript|head|nav|footer)\b[^>]*>.*?</(script|style|noscript|head|nav|footer)>").unwrap()
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());

fn default_timeout_secs() -> u64 {
    15
}

fn default_max_bytes() -> usize {
    2_000_000
}

fn default_max_text_chars() -> usize {
    5_000
}

#[derive(Debug, Deserialize)]
struct GrabberArgs {
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,

    #[serde(default = "default_max_bytes")]
    max_bytes: usize,

    #[serde(default = "default_max_text_chars")]
    max_text_chars: usize,
}

impl Default for GrabberArgs {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_bytes: default_max_bytes(),
            max_text_chars: default_max_text_chars(),
        }
    }
}

/// Title and readable text of an html page.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub title: Option<String>,
    pub text: String,
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Best-effort article extraction: `og:title` or `<title>`, then the
/// page text without markup, scripts and navigation.
pub fn extract_article(html: &str, max_text_chars: usize) -> Article {
    let mut cut = html.len().min(HEAD_LIMIT);
    while !html.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = &html[..cut];

    let title = [&*OG_TITLE, &*TITLE]
        .into_iter()
        .find_map(|re| re.captures(head))
        .and_then(|cap| cap.get(1))
        .map(|m| collapse_whitespace(&decode_entities(m.as_str())))
        .filter(|t| !t.is_empty());

    let body = NOISE.replace_all(html, " ");
    let body = TAG.replace_all(&body, " ");
    let text: String = collapse_whitespace(&decode_entities(&body))
        .chars()
        .take(max_text_chars)
        .collect();

    Article { title, text }
}

/// Reads at most `max_bytes` of the body; the rest is never downloaded.
async fn read_limited(mut resp: reqwest::Response, max_bytes: usize) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    while body.len() < max_bytes {
        let Some(chunk) = resp.chunk().await.context("reading article body")? else {
            break;
        };
        let room = max_bytes - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
    Ok(body)
}

/// `url_grabber` processor: fetches the item's url and attaches the
/// article under `extra.article = {title, text, url}`.
///
/// Fetch failures are recorded in `extra.article_error`; the item is
/// kept either way.
pub struct UrlGrabber {
    name: String,
    http: reqwest::Client,
    max_bytes: usize,
    max_text_chars: usize,
}

impl UrlGrabber {
    pub fn from_args(name: &str, args: &Value) -> Result<Self> {
        let args: GrabberArgs = if args.is_null() {
            GrabberArgs::default()
        } else {
            serde_json::from_value(args.clone()).context("invalid url_grabber args")?
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(args.timeout_secs))
            .build()
            .context("building url_grabber http client")?;
        Ok(Self {
            name: name.to_string(),
            http,
            max_bytes: args.max_bytes,
            max_text_chars: args.max_text_chars,
        })
    }

    async fn fetch(&self, url: &str) -> Result<(String, Article)> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("fetching {}", url))?;
        if !resp.status().is_success() {
            bail!("fetching {} failed ({})", url, resp.status());
        }
        let final_url = resp.url().to_string();
        let body = read_limited(resp, self.max_bytes).await?;
        let html = String::from_utf8_lossy(&body);
        Ok((final_url, extract_article(&html, self.max_text_chars)))
    }
}

#[async_trait::async_trait]
impl Processor for UrlGrabber {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update_item(&self, item: &mut Item) -> Result<Verdict> {
        let Some(url) = item.url.clone() else {
            return Ok(Verdict::Keep);
        };
        match self.fetch(&url).await {
            Ok((final_url, article)) => {
                item.extra.remove("article_error");
                item.extra.insert(
                    "article".into(),
                    json!({"title": article.title, "text": article.text, "url": final_url}),
                );
            }
            Err(e) => {
                debug!("{}: {:#}", self.name, e);
                item.extra
                    .insert("article_error".into(), Value::String(format!("{:#}", e)));
            }
        }
        Ok(Verdict::Keep)
    }
}
