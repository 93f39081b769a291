use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::{Result, bail};
use link_digest_collector::item::{Item, StoredRecord};
use link_digest_collector::offset::OffsetStore;
use link_digest_collector::pipeline::ItemHandler;
use link_digest_collector::replay::{LineReplayer, StorageReplayer};
use link_digest_collector::storage::{MemoryStorage, Storage};
use link_digest_collector::util;

/// Records handled urls; fails on the configured url, once.
#[derive(Default)]
struct Recorder {
    handled: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

impl Recorder {
    fn failing_on(url: &str) -> Self {
        Self {
            handled: Mutex::new(Vec::new()),
            fail_on: Mutex::new(Some(url.to_string())),
        }
    }

    fn handled(&self) -> Vec<String> {
        self.handled.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ItemHandler for Recorder {
    async fn handle(&self, item: Item) -> Result<()> {
        let url = item.url.unwrap_or_default();
        {
            let mut fail_on = self.fail_on.lock().unwrap();
            if fail_on.as_deref() == Some(url.as_str()) {
                fail_on.take();
                bail!("simulated crash at {url}");
            }
        }
        self.handled.lock().unwrap().push(url);
        Ok(())
    }
}

fn write_backlog(path: &Path, lines: usize) {
    let mut body = String::new();
    for i in 1..=lines {
        let rec = StoredRecord::new(1_700_000_000 + i as i64, Item::new("twitter").with_url(format!("line{i}")));
        body.push_str(&rec.to_line().unwrap());
    }
    std::fs::write(path, body).unwrap();
}

#[tokio::test]
async fn resumes_after_last_persisted_line() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("backlog.jsonl");
    let offset_file = dir.path().join(".replay_offset");
    write_backlog(&input, 10);

    // batches of 3: lines 1-3 and 4-6 complete, line 7 fails
    let recorder = Recorder::failing_on("line7");
    let replayer = LineReplayer::new(&input, OffsetStore::new(&offset_file), 3);
    assert!(replayer.run(&recorder).await.is_err());
    assert_eq!(OffsetStore::new(&offset_file).load(), 6);

    let rerun = Recorder::default();
    let stats = replayer.run(&rerun).await.unwrap();
    assert_eq!(rerun.handled(), ["line7", "line8", "line9", "line10"]);
    assert_eq!(stats.offset, 10);

    // nothing left on a third run
    let idle = Recorder::default();
    replayer.run(&idle).await.unwrap();
    assert!(idle.handled().is_empty());
}

#[tokio::test]
async fn malformed_lines_are_skipped_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("backlog.jsonl");
    let good = StoredRecord::new(1, Item::new("p").with_url("ok")).to_line().unwrap();
    std::fs::write(&input, format!("{good}{{broken\n\n{}\n", r#"{"provider": "p", "url": "bare"}"#)).unwrap();

    let recorder = Recorder::default();
    let replayer = LineReplayer::new(&input, OffsetStore::new(dir.path().join(".o")), 100);
    let stats = replayer.run(&recorder).await.unwrap();
    assert_eq!(recorder.handled(), ["ok", "bare"]);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.offset, 4);
}

#[tokio::test]
async fn storage_replay_advances_to_scan_start() {
    let dir = tempfile::tempdir().unwrap();
    let offsets = OffsetStore::new(dir.path().join(".ts_offset"));
    let storage = Arc::new(MemoryStorage::new("mem"));
    storage.store_item(&Item::new("p").with_url("a")).unwrap();

    let before = util::now_secs();
    let replayer = StorageReplayer::new(storage.clone(), offsets.clone());
    let recorder = Recorder::default();
    let stats = replayer.run(&recorder).await.unwrap();
    assert_eq!(recorder.handled(), ["a"]);
    assert!(stats.offset >= before);

    // a failing handler leaves the offset where it was
    storage
        .store_record(StoredRecord::new(stats.offset + 1, Item::new("p").with_url("b")))
        .unwrap();
    let failing = Recorder::failing_on("b");
    assert!(replayer.run(&failing).await.is_err());
    assert_eq!(offsets.load(), stats.offset);
}
