use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Lines, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

use super::{ItemScan, Storage, decode_line, ensure_provider};
use crate::item::{Item, StoredRecord};
use crate::util;

/// JSONL file storage.
///
/// Layout:
///     <folder>/<provider>/<YYYY_MM_DD>.jsonl
///
/// Each line is one `StoredRecord`. Files are append-only; a line is
/// written with a single `write_all` on an `O_APPEND` handle while
/// holding the writer lock, so concurrent collectors never interleave
/// records.
pub struct FileStorage {
    name: String,
    folder: PathBuf,
    writer: Mutex<()>,
}

#[derive(Debug, Deserialize)]
struct FileStorageArgs {
    folder: PathBuf,
}

impl FileStorage {
    pub fn new(name: &str, folder: impl Into<PathBuf>) -> Result<Self> {
        let folder = folder.into();
        fs::create_dir_all(&folder)
            .with_context(|| format!("creating storage folder {}", folder.display()))?;
        Ok(Self {
            name: name.to_string(),
            folder,
            writer: Mutex::new(()),
        })
    }

    pub fn from_args(name: &str, args: &Value) -> Result<Self> {
        let args: FileStorageArgs =
            serde_json::from_value(args.clone()).context("file storage args")?;
        Self::new(name, args.folder)
    }

    /// The provider names a folder directly under `folder`; anything that
    /// would resolve elsewhere (separators, `..`, hidden names) is refused.
    fn check_provider_dir(provider: &str) -> Result<()> {
        if provider.contains(['/', '\\']) || provider.starts_with('.') {
            bail!("provider {provider:?} is not a valid folder name");
        }
        Ok(())
    }

    fn segment_path(&self, provider: &str, day: chrono::NaiveDate) -> PathBuf {
        self.folder
            .join(provider)
            .join(format!("{}.jsonl", util::segment_name(day)))
    }

    /// Appends a record with an explicit timestamp.
    ///
    /// `store_item` uses the current time; this is the hook used by
    /// replays and tests that need a fixed clock.
    pub fn store_record(&self, record: &StoredRecord) -> Result<()> {
        ensure_provider(&record.data)?;
        let provider = &record.data.provider;
        Self::check_provider_dir(provider)?;
        let path = self.segment_path(provider, util::day_of(record.timestamp));
        let line = record.to_line()?;

        let _guard = self
            .writer
            .lock()
            .map_err(|_| anyhow!("file storage writer lock poisoned"))?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating provider folder {}", dir.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening segment {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("appending to {}", path.display()))?;
        Ok(())
    }

    /// Every existing segment file that may hold records at or after `since`.
    fn segments_since(&self, since: i64) -> Result<VecDeque<PathBuf>> {
        let mut segments = VecDeque::new();
        let days = util::days_between(since, util::now_secs());
        if days.is_empty() {
            return Ok(segments);
        }

        let entries = fs::read_dir(&self.folder)
            .with_context(|| format!("listing {}", self.folder.display()))?;
        let mut providers: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        providers.sort();

        for provider in providers {
            for day in &days {
                let path = self.segment_path(&provider, *day);
                if path.is_file() {
                    segments.push_back(path);
                }
            }
        }
        Ok(segments)
    }
}

impl Storage for FileStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn store_item(&self, item: &Item) -> Result<()> {
        self.store_record(&StoredRecord::new(util::now_secs(), item.clone()))
    }

    fn fetch_items(&self, since: i64) -> Result<ItemScan> {
        let segments = self.segments_since(since)?;
        debug!(
            "storage {}: scanning {} segment(s) since {}",
            self.name,
            segments.len(),
            since
        );
        Ok(Box::new(FileScan {
            segments,
            current: None,
            since,
        }))
    }
}

/// Lazy line-by-line reader over a list of segment files.
struct FileScan {
    segments: VecDeque<PathBuf>,
    current: Option<(String, Lines<BufReader<File>>)>,
    since: i64,
}

impl Iterator for FileScan {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        loop {
            if self.current.is_none() {
                let path = self.segments.pop_front()?;
                match File::open(&path) {
                    Ok(file) => {
                        let origin = path.display().to_string();
                        self.current = Some((origin, BufReader::new(file).lines()));
                    }
                    Err(e) => {
                        warn!("skipping unreadable segment {}: {}", path.display(), e);
                        continue;
                    }
                }
            }

            let Some((origin, lines)) = self.current.as_mut() else {
                continue;
            };
            match lines.next() {
                Some(Ok(line)) => {
                    if let Some(record) = decode_line(&line, origin) {
                        if record.timestamp >= self.since {
                            return Some(record.data);
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!("read error in {}: {}, skipping rest of segment", origin, e);
                    self.current = None;
                }
                None => self.current = None,
            }
        }
    }
}
