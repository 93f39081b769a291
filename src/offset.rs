use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::warn;

/// Persisted resume point of a replay.
///
/// The file holds one plain integer (a line number or a unix
/// timestamp, depending on the replayer). Writes go through a temp file
/// and a rename, so a crash never leaves a torn value behind.
#[derive(Debug, Clone)]
pub struct OffsetStore {
    path: PathBuf,
}

impl OffsetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current offset; 0 when the file is missing or unreadable.
    pub fn load(&self) -> i64 {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!("offset {}: unreadable ({}), starting at 0", self.path.display(), e);
                return 0;
            }
        };
        match raw.trim().parse::<i64>() {
            Ok(v) if v >= 0 => v,
            _ => {
                warn!(
                    "offset {}: invalid content {:?}, starting at 0",
                    self.path.display(),
                    raw.trim()
                );
                0
            }
        }
    }

    /// Overwrites the offset unconditionally.
    pub fn store(&self, offset: i64) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, offset.to_string())
            .with_context(|| format!("writing offset to {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing offset file {}", self.path.display()))?;
        Ok(())
    }

    /// Moves the offset forward to `offset`. Never moves it backward.
    ///
    /// Returns the offset now persisted.
    pub fn advance(&self, offset: i64) -> Result<i64> {
        let current = self.load();
        if offset <= current {
            return Ok(current);
        }
        self.store(offset)?;
        Ok(offset)
    }
}
