use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};
use trail_proto::LocationRecord;

use crate::StoreError;

/// Append-only record storage with reactive reads.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, record: LocationRecord) -> Result<(), StoreError>;
    /// All records, newest first. Updated after every insert or delete.
    fn all(&self) -> watch::Receiver<Vec<LocationRecord>>;
    fn count(&self) -> watch::Receiver<usize>;
    async fn delete_all(&self) -> Result<(), StoreError>;
}

/// One JSON record per line, fsync'd on every insert.
pub struct JsonlRecordStore {
    path: PathBuf,
    file: Mutex<Appender>,
    all_tx: watch::Sender<Vec<LocationRecord>>,
    count_tx: watch::Sender<usize>,
}

struct Appender {
    file: File,
    // the file may end in a partial line; the next append starts a new one
    torn: bool,
}

impl Appender {
    /// A failed append may have left part of `line` behind, so any error
    /// marks the file torn. A spare blank line is skipped on load.
    async fn append(&mut self, line: &[u8]) -> Result<(), StoreError> {
        let res = self.write_line(line).await;
        self.torn = res.is_err();
        res
    }

    async fn write_line(&mut self, line: &[u8]) -> Result<(), StoreError> {
        if self.torn {
            self.file.write_all(b"\n").await?;
        }
        self.file.write_all(line).await?;
        self.file.sync_data().await?;
        Ok(())
    }
}

impl JsonlRecordStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let (mut records, torn_tail) = load_lines(&path).await?;
        records.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
        debug!(path = %path.display(), count = records.len(), "records: opened");

        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        let count = records.len();
        let (all_tx, _) = watch::channel(records);
        let (count_tx, _) = watch::channel(count);

        Ok(Self {
            path,
            file: Mutex::new(Appender { file, torn: torn_tail }),
            all_tx,
            count_tx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn load_lines(path: &Path) -> Result<(Vec<LocationRecord>, bool), StoreError> {
    let data = match fs::read_to_string(path).await {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), false)),
        Err(e) => return Err(e.into()),
    };

    let mut out = Vec::new();
    for (n, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LocationRecord>(line) {
            Ok(r) => out.push(r),
            // a torn final write after a kill is expected; anything else is worth a look
            Err(e) => warn!(line = n + 1, "records: skipping unreadable line: {}", e),
        }
    }
    Ok((out, !data.is_empty() && !data.ends_with('\n')))
}

#[async_trait]
impl RecordStore for JsonlRecordStore {
    async fn insert(&self, record: LocationRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(&record).map_err(|e| StoreError::Encode(e.to_string()))?;
        line.push(b'\n');

        {
            let mut f = self.file.lock().await;
            f.append(&line).await?;

            self.all_tx.send_modify(|all| {
                let at = all.partition_point(|r| r.timestamp() > record.timestamp());
                all.insert(at, record);
            });
            self.count_tx.send_replace(self.all_tx.borrow().len());
        }
        Ok(())
    }

    fn all(&self) -> watch::Receiver<Vec<LocationRecord>> {
        self.all_tx.subscribe()
    }

    fn count(&self) -> watch::Receiver<usize> {
        self.count_tx.subscribe()
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        let mut f = self.file.lock().await;
        f.file.set_len(0).await?;
        f.file.sync_all().await?;
        f.torn = false;
        self.all_tx.send_replace(Vec::new());
        self.count_tx.send_replace(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::OffsetDateTime;

    fn rec(lat: f64, ts: OffsetDateTime) -> LocationRecord {
        LocationRecord::builder(lat, 10.0, ts, "id-1").build().unwrap()
    }

    #[tokio::test]
    async fn insert_updates_count_and_newest_first_list() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonlRecordStore::open(tmp.path().join("records.jsonl")).await.unwrap();
        let mut count = store.count();
        assert_eq!(*count.borrow_and_update(), 0);

        store.insert(rec(1.0, datetime!(2024-01-01 10:00 UTC))).await.unwrap();
        assert!(count.has_changed().unwrap());
        assert_eq!(*count.borrow_and_update(), 1);

        store.insert(rec(2.0, datetime!(2024-01-01 11:00 UTC))).await.unwrap();
        store.insert(rec(3.0, datetime!(2024-01-01 10:30 UTC))).await.unwrap();
        let lats: Vec<f64> = store.all().borrow().iter().map(|r| r.latitude()).collect();
        assert_eq!(lats, vec![2.0, 3.0, 1.0]);
        assert_eq!(*store.count().borrow(), 3);
    }

    #[tokio::test]
    async fn reopen_reads_back_and_skips_torn_line() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("records.jsonl");
        {
            let store = JsonlRecordStore::open(&path).await.unwrap();
            store.insert(rec(1.0, datetime!(2024-01-01 10:00 UTC))).await.unwrap();
            store.insert(rec(2.0, datetime!(2024-01-01 10:05 UTC))).await.unwrap();
        }
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("{\"lat\":4");
        std::fs::write(&path, raw).unwrap();

        let store = JsonlRecordStore::open(&path).await.unwrap();
        assert_eq!(*store.count().borrow(), 2);
        assert_eq!(store.all().borrow()[0].latitude(), 2.0);

        store.insert(rec(3.0, datetime!(2024-01-01 10:10 UTC))).await.unwrap();
        drop(store);
        let store = JsonlRecordStore::open(&path).await.unwrap();
        assert_eq!(*store.count().borrow(), 3);
    }

    #[tokio::test]
    async fn append_after_failed_write_starts_a_fresh_line() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("records.jsonl");
        let store = JsonlRecordStore::open(&path).await.unwrap();
        store.insert(rec(1.0, datetime!(2024-01-01 10:00 UTC))).await.unwrap();

        // what a write cut short by a full disk leaves behind
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"{\"lat\":2.0,\"lo").unwrap();
        }
        store.file.lock().await.torn = true;

        store.insert(rec(3.0, datetime!(2024-01-01 10:10 UTC))).await.unwrap();
        assert!(!store.file.lock().await.torn);
        drop(store);

        let store = JsonlRecordStore::open(&path).await.unwrap();
        let lats: Vec<f64> = store.all().borrow().iter().map(|r| r.latitude()).collect();
        assert_eq!(lats, vec![3.0, 1.0]);
    }

    #[tokio::test]
    async fn delete_all_empties_file_and_views() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("records.jsonl");
        let store = JsonlRecordStore::open(&path).await.unwrap();
        store.insert(rec(1.0, datetime!(2024-01-01 10:00 UTC))).await.unwrap();

        store.delete_all().await.unwrap();
        assert_eq!(*store.count().borrow(), 0);
        assert!(store.all().borrow().is_empty());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        // appends still work after truncation
        store.insert(rec(5.0, datetime!(2024-01-02 10:00 UTC))).await.unwrap();
        drop(store);
        let store = JsonlRecordStore::open(&path).await.unwrap();
        assert_eq!(*store.count().borrow(), 1);
    }
}
