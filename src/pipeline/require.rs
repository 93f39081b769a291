use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;

use super::{Processor, Verdict};
use crate::item::Item;

/// A field an item must carry to survive the `require` stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Provider,
    Category,
    Text,
    Url,
    /// `extra.<key>`
    Extra(String),
}

impl Field {
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(match raw {
            "provider" => Self::Provider,
            "category" => Self::Category,
            "text" => Self::Text,
            "url" => Self::Url,
            other => match other.strip_prefix("extra.") {
                Some(key) if !key.is_empty() => Self::Extra(key.to_string()),
                _ => bail!("unknown required field '{}'", raw),
            },
        })
    }

    fn present(&self, item: &Item) -> bool {
        fn filled(v: &Option<String>) -> bool {
            v.as_deref().is_some_and(|s| !s.trim().is_empty())
        }
        match self {
            Self::Provider => !item.provider.trim().is_empty(),
            Self::Category => filled(&item.category),
            Self::Text => filled(&item.text),
            Self::Url => filled(&item.url),
            Self::Extra(key) => item.extra.get(key).is_some_and(|v| !v.is_null()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RequireArgs {
    fields: Vec<String>,
}

/// `require` processor: drops items missing any configured field.
pub struct Require {
    name: String,
    fields: Vec<Field>,
}

impl Require {
    pub fn new(name: &str, fields: Vec<Field>) -> Self {
        Self {
            name: name.to_string(),
            fields,
        }
    }

    pub fn from_args(name: &str, args: &Value) -> Result<Self> {
        let args: RequireArgs =
            serde_json::from_value(args.clone()).context("invalid require args")?;
        let fields = args
            .fields
            .iter()
            .map(|f| Field::parse(f))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(name, fields))
    }
}

#[async_trait::async_trait]
impl Processor for Require {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update_item(&self, item: &mut Item) -> Result<Verdict> {
        if self.fields.iter().all(|f| f.present(item)) {
            Ok(Verdict::Keep)
        } else {
            Ok(Verdict::Drop)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_fields() {
        assert_eq!(Field::parse("url").unwrap(), Field::Url);
        assert_eq!(Field::parse("extra.article").unwrap(), Field::Extra("article".into()));
        assert!(Field::parse("extra.").is_err());
        assert!(Field::parse("title").is_err());
    }

    #[tokio::test]
    async fn drops_incomplete_items() {
        let p = Require::from_args("req", &json!({"fields": ["url", "category"]})).unwrap();
        let mut full = Item::new("t").with_url("https://a.example.com").with_category("c");
        assert_eq!(p.update_item(&mut full).await.unwrap(), Verdict::Keep);

        let mut blank = Item::new("t").with_url("  ").with_category("c");
        assert_eq!(p.update_item(&mut blank).await.unwrap(), Verdict::Drop);

        let mut missing = Item::new("t").with_url("https://a.example.com");
        assert_eq!(p.update_item(&mut missing).await.unwrap(), Verdict::Drop);
    }
}
