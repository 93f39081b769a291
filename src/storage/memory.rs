use std::sync::Mutex;

use anyhow::{Result, anyhow};

use super::{ItemScan, Storage, ensure_provider};
use crate::item::{Item, StoredRecord};
use crate::util;

/// In-process storage with the same contract as the file backend.
///
/// Used for dry runs and tests. Scans snapshot the matching records,
/// so a scan never observes appends made after it started.
#[derive(Default)]
pub struct MemoryStorage {
    name: String,
    records: Mutex<Vec<StoredRecord>>,
}

impl MemoryStorage {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn store_record(&self, record: StoredRecord) -> Result<()> {
        ensure_provider(&record.data)?;
        self.records
            .lock()
            .map_err(|_| anyhow!("memory storage lock poisoned"))?
            .push(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn store_item(&self, item: &Item) -> Result<()> {
        self.store_record(StoredRecord::new(util::now_secs(), item.clone()))
    }

    fn fetch_items(&self, since: i64) -> Result<ItemScan> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow!("memory storage lock poisoned"))?;
        let matching: Vec<Item> = records
            .iter()
            .filter(|r| r.timestamp >= since)
            .map(|r| r.data.clone())
            .collect();
        Ok(Box::new(matching.into_iter()))
    }
}
