use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::debug;
use reqwest::{Method, StatusCode, redirect};
use serde::Deserialize;
use serde_json::Value;

use super::{Processor, Verdict};
use crate::item::Item;

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_redirects() -> usize {
    10
}

#[derive(Debug, Deserialize)]
struct UnshortenArgs {
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,

    #[serde(default = "default_max_redirects")]
    max_redirects: usize,
}

impl Default for UnshortenArgs {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_redirects: default_max_redirects(),
        }
    }
}

/// `unshorten` processor: replaces the url with the final target of
/// its redirect chain. The previous url is kept in `extra.original_url`.
pub struct Unshorten {
    name: String,
    http: reqwest::Client,
}

impl Unshorten {
    pub fn from_args(name: &str, args: &Value) -> Result<Self> {
        let args: UnshortenArgs = if args.is_null() {
            UnshortenArgs::default()
        } else {
            serde_json::from_value(args.clone()).context("invalid unshorten args")?
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(args.timeout_secs))
            .redirect(redirect::Policy::limited(args.max_redirects))
            .build()
            .context("building unshorten http client")?;
        Ok(Self {
            name: name.to_string(),
            http,
        })
    }

    /// Final url after following redirects.
    ///
    /// Some servers refuse HEAD; those are retried with GET.
    pub async fn resolve(&self, url: &str) -> Result<String> {
        let mut resp = self
            .http
            .request(Method::HEAD, url)
            .send()
            .await
            .with_context(|| format!("resolving {}", url))?;
        if resp.status() == StatusCode::METHOD_NOT_ALLOWED {
            resp = self
                .http
                .get(url)
                .send()
                .await
                .with_context(|| format!("resolving {}", url))?;
        }
        if resp.status().is_server_error() {
            bail!("resolving {} failed ({})", url, resp.status());
        }
        Ok(resp.url().to_string())
    }
}

#[async_trait::async_trait]
impl Processor for Unshorten {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update_item(&self, item: &mut Item) -> Result<Verdict> {
        let Some(url) = item.url.clone() else {
            return Ok(Verdict::Keep);
        };
        let resolved = self.resolve(&url).await?;
        if resolved != url {
            debug!("unshortened {} -> {}", url, resolved);
            item.extra
                .entry("original_url".to_string())
                .or_insert(Value::String(url));
            item.url = Some(resolved);
        }
        Ok(Verdict::Keep)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn args_have_defaults() {
        assert!(Unshorten::from_args("u", &Value::Null).is_ok());
        assert!(Unshorten::from_args("u", &json!({"timeout_secs": 3})).is_ok());
        assert!(Unshorten::from_args("u", &json!({"timeout_secs": "soon"})).is_err());
    }

    #[tokio::test]
    async fn item_without_url_is_kept() {
        let p = Unshorten::from_args("u", &Value::Null).unwrap();
        let mut item = Item::new("t");
        assert_eq!(p.update_item(&mut item).await.unwrap(), Verdict::Keep);
        assert!(item.extra.is_empty());
    }

    #[tokio::test]
    async fn unreachable_url_is_an_error() {
        let p = Unshorten::from_args("u", &json!({"timeout_secs": 2})).unwrap();
        let mut item = Item::new("t").with_url("http://127.0.0.1:9/short");
        assert!(p.update_item(&mut item).await.is_err());
        assert_eq!(item.url.as_deref(), Some("http://127.0.0.1:9/short"));
    }
}
