//! Report outputs
//!
//! An output declares which notification channels it serves and renders
//! every report published on one of them. Outputs never see items, only
//! reports.

pub mod console;
pub mod file;
pub mod webhook;

use std::fmt::Write;

use anyhow::Result;
use serde::Deserialize;

use crate::aggregator::Report;

pub use console::ConsoleOutput;
pub use file::FileOutput;
pub use webhook::WebhookOutput;

#[async_trait::async_trait]
pub trait Output: Send + Sync {
    fn name(&self) -> &str;

    /// Whether reports on `channel` are for this output.
    fn accepts(&self, channel: &str) -> bool;

    async fn render(&self, report: &Report, channel: &str) -> Result<()>;
}

/// Channel subscription shared by outputs that take a `channels` list.
/// An empty list subscribes to every channel.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Channels(pub Vec<String>);

impl Channels {
    pub fn accepts(&self, channel: &str) -> bool {
        self.0.is_empty() || self.0.iter().any(|c| c == channel)
    }
}

/// Plain-text digest of a report, one block per category.
pub fn render_text(report: &Report, channel: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "[{}] {} categories from {} items",
        channel,
        report.categories.len(),
        report.items_seen
    );
    for (category, entries) in &report.categories {
        let _ = writeln!(out, "## {}", category);
        for (rank, entry) in entries.iter().enumerate() {
            let _ = writeln!(out, "{}. ({}) {}", rank + 1, entry.count, entry.url);
            if let Some(text) = entry.sample_text.as_deref() {
                let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
                let _ = writeln!(out, "   {}", line);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::aggregator::RankedEntry;

    #[test]
    fn empty_channel_list_accepts_everything() {
        assert!(Channels::default().accepts("daily"));
        let only = Channels(vec!["weekly".into()]);
        assert!(only.accepts("weekly"));
        assert!(!only.accepts("daily"));
    }

    #[test]
    fn text_rendering_lists_ranked_urls() {
        let mut categories = BTreeMap::new();
        categories.insert(
            "foo".to_string(),
            vec![RankedEntry {
                url: "https://a.example.com".into(),
                count: 3,
                sample_text: Some("hello\nworld".into()),
            }],
        );
        let report = Report {
            generated_at: 0,
            items_seen: 3,
            categories,
        };
        let text = render_text(&report, "daily");
        assert!(text.starts_with("[daily] 1 categories from 3 items"));
        assert!(text.contains("## foo\n1. (3) https://a.example.com\n   hello world\n"));
    }
}
