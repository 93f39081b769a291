use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::{Processor, Verdict};
use crate::item::Item;

const TRACKING_PARAMS: &[&str] = &[
    "_dt", "fbclid", "gclid", "dclid", "igshid", "mc_cid", "mc_eid", "ref", "ref_src", "si",
];

fn is_tracking(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

/// Canonical form of a url, so the same resource shared through
/// different links aggregates under one key.
///
/// - scheme and host lowercased (done by the parser)
/// - fragment dropped
/// - tracking query parameters removed, others kept in order
/// - trailing slash removed from non-root paths
pub fn canonicalize(raw: &str) -> Result<String> {
    let mut parsed = Url::parse(raw.trim()).with_context(|| format!("invalid url '{}'", raw))?;
    parsed.set_fragment(None);

    if parsed.query().is_some() {
        let kept: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(key, _)| !is_tracking(key))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            parsed.set_query(None);
        } else {
            parsed.query_pairs_mut().clear().extend_pairs(kept);
        }
    }

    let path = parsed.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_string();
        parsed.set_path(if trimmed.is_empty() { "/" } else { &trimmed });
    }

    Ok(parsed.to_string())
}

#[derive(Debug, Default, Deserialize)]
struct CanonicalArgs {
    /// Keep the pre-canonical url in `extra.original_url`
    #[serde(default)]
    keep_original: bool,
}

/// `canonical_url` processor.
pub struct CanonicalUrl {
    name: String,
    keep_original: bool,
}

impl CanonicalUrl {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            keep_original: false,
        }
    }

    pub fn from_args(name: &str, args: &Value) -> Result<Self> {
        let args: CanonicalArgs = if args.is_null() {
            CanonicalArgs::default()
        } else {
            serde_json::from_value(args.clone()).context("invalid canonical_url args")?
        };
        Ok(Self {
            name: name.to_string(),
            keep_original: args.keep_original,
        })
    }
}

#[async_trait::async_trait]
impl Processor for CanonicalUrl {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update_item(&self, item: &mut Item) -> Result<Verdict> {
        let Some(url) = item.url.as_deref() else {
            return Ok(Verdict::Keep);
        };
        let canonical = canonicalize(url)?;
        if canonical != url {
            if self.keep_original && !item.extra.contains_key("original_url") {
                item.extra
                    .insert("original_url".into(), Value::String(url.to_string()));
            }
            item.url = Some(canonical);
        }
        Ok(Verdict::Keep)
    }
}
