//! Append-only prediction log.
//!
//! One JSON object per line. Records are written once and never rewritten;
//! the in-memory copy only mirrors what is already on disk.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use common::PredictionRecord;
use tracing::warn;

/// Fields supplied by the caller; `id` and `timestamp` are assigned on append.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub filename: Option<String>,
    pub prediction: String,
    pub confidence: f32,
}

struct LogState {
    file: File,
    records: Vec<PredictionRecord>,
    next_id: u64,
}

pub struct HistoryStore {
    path: PathBuf,
    state: Mutex<LogState>,
}

impl HistoryStore {
    /// Open (or create) the log and replay the records already in it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let records = if path.exists() {
            replay(&path)?
        } else {
            Vec::new()
        };
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open history log {}", path.display()))?;

        Ok(Self::from_parts(path, file, records))
    }

    /// Wrap an already opened log handle whose contents are `records`.
    pub(crate) fn from_parts(path: PathBuf, file: File, records: Vec<PredictionRecord>) -> Self {
        let next_id = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        Self {
            path,
            state: Mutex::new(LogState {
                file,
                records,
                next_id,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist a record and return it with its assigned id and timestamp.
    ///
    /// The id is only consumed once the line has been flushed. A failed write
    /// is truncated away, and a log left ending mid-line gets a newline first
    /// so the new record never shares a line with a fragment.
    pub fn append(&self, new: NewRecord) -> Result<PredictionRecord> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("history log lock poisoned"))?;

        let record = PredictionRecord {
            id: state.next_id,
            filename: new.filename,
            prediction: new.prediction,
            confidence: new.confidence,
            timestamp: Utc::now(),
        };

        let mut line = Vec::new();
        if ends_mid_line(&mut state.file)? {
            warn!("History log {} ends mid-line; starting a new line", self.path.display());
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, &record)?;
        line.push(b'\n');

        let before = state.file.metadata()?.len();
        if let Err(e) = state.file.write_all(&line).and_then(|_| state.file.flush()) {
            if let Err(rollback) = state.file.set_len(before) {
                warn!(
                    "Failed to roll back partial write to {}: {}",
                    self.path.display(),
                    rollback
                );
            }
            return Err(anyhow::Error::new(e)
                .context(format!("Failed to append to {}", self.path.display())));
        }

        state.next_id += 1;
        state.records.push(record.clone());
        Ok(record)
    }

    /// Newest first; ties on timestamp are broken by the higher id.
    pub fn query(&self, skip: usize, limit: usize) -> Result<Vec<PredictionRecord>> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("history log lock poisoned"))?;

        let mut ordered: Vec<&PredictionRecord> = state.records.iter().collect();
        ordered.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));

        Ok(ordered
            .into_iter()
            .skip(skip)
            .take(limit)
            .cloned()
            .collect())
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.records.len()).unwrap_or(0)
    }
}

fn ends_mid_line(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn replay(path: &Path) -> Result<Vec<PredictionRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to read history log {}", path.display()))?;

    let mut records = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PredictionRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                "Skipping malformed history line {} in {}: {}",
                lineno + 1,
                path.display(),
                e
            ),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record(prediction: &str, confidence: f32) -> NewRecord {
        NewRecord {
            filename: Some(format!("{prediction}.jpg")),
            prediction: prediction.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_append_assigns_increasing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path().join("history.jsonl")).unwrap();

        let first = store.append(new_record("rust", 0.9)).unwrap();
        let second = store.append(new_record("blight", 0.6)).unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert!(second.timestamp >= first.timestamp);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_query_is_newest_first_with_pagination() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path().join("history.jsonl")).unwrap();
        for i in 0..5 {
            store.append(new_record(&format!("class_{i}"), 0.5)).unwrap();
        }

        let page: Vec<u64> = store.query(0, 2).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(page, vec![5, 4]);

        let page: Vec<u64> = store.query(2, 2).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(page, vec![3, 2]);

        let page: Vec<u64> = store.query(4, 10).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(page, vec![1]);

        assert!(store.query(10, 10).unwrap().is_empty());
        assert!(store.query(0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_replays_and_continues_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/history.jsonl");

        {
            let store = HistoryStore::open(&path).unwrap();
            store.append(new_record("rust", 0.8)).unwrap();
            store.append(new_record("healthy", 0.99)).unwrap();
        }

        let store = HistoryStore::open(&path).unwrap();
        assert_eq!(store.len(), 2);
        let third = store.append(new_record("blight", 0.4)).unwrap();
        assert_eq!(third.id, 3);

        let lines = std::fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 3);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"id":7,"filename":"a.jpg","prediction":"rust","confidence":0.5,"timestamp":"2026-01-02T03:04:05Z"}"#,
                "\n",
                "this line is not json\n",
                "\n"
            ),
        )
        .unwrap();

        let store = HistoryStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.append(new_record("blight", 0.3)).unwrap().id, 8);
    }

    #[test]
    fn test_torn_tail_does_not_swallow_next_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");

        let store = HistoryStore::open(&path).unwrap();
        store.append(new_record("rust", 0.8)).unwrap();

        let mut raw = OpenOptions::new().append(true).open(&path).unwrap();
        raw.write_all(br#"{"id":2,"filena"#).unwrap();
        drop(raw);

        let acknowledged = store.append(new_record("blight", 0.6)).unwrap();
        assert_eq!(acknowledged.id, 2);
        drop(store);

        let reopened = HistoryStore::open(&path).unwrap();
        let ids: Vec<u64> = reopened.query(0, 10).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_torn_tail_at_open_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"id":1,"filename":null,"prediction":"rust","confidence":0.5,"timestamp":"2026-01-02T03:04:05Z"}"#,
                "\n",
                r#"{"id":2,"pred"#
            ),
        )
        .unwrap();

        let store = HistoryStore::open(&path).unwrap();
        assert_eq!(store.append(new_record("healthy", 0.9)).unwrap().id, 2);
        drop(store);

        let reopened = HistoryStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn test_failed_write_is_reported_and_consumes_no_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        std::fs::write(&path, b"").unwrap();

        let read_only = File::open(&path).unwrap();
        let store = HistoryStore::from_parts(path.clone(), read_only, Vec::new());

        let err = store.append(new_record("rust", 0.8)).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to append"));
        assert_eq!(store.len(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
