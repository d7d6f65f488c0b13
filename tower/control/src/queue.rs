//! Durable FIFO queue for one operation type.
//!
//! Layout on disk, per operation:
//! - `queue_<op>.log`: one entry per line, append-only.
//! - `queue_<op>.head`: `<head> <base>`, the sequence number of the current
//!   head entry and of the first line still in the log. Rewritten atomically
//!   (temp file + rename) on every pop.
//!
//! Sequence numbers are absolute and never reused, even after the log is
//! compacted.

use std::{
    collections::VecDeque,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::{
    error::{Result, TowerError},
    model::{OperationType, QueueEntry},
};

/// An entry together with its position in the queue's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedEntry {
    /// Absolute sequence number.
    pub seq: u64,
    /// The entry.
    pub entry: QueueEntry,
}

/// Persistent ordered queue. Not internally synchronized; the tower wraps
/// each store in its own mutex.
#[derive(Debug)]
pub struct QueueStore {
    operation: OperationType,
    log_path: PathBuf,
    head_path: PathBuf,
    log: File,
    log_len: u64,
    entries: VecDeque<QueuedEntry>,
    /// Byte offset where each pending entry's line starts.
    line_starts: VecDeque<u64>,
    head: u64,
    base: u64,
    head_dirty: bool,
    /// Bytes past `log_len` may hold part of a failed append.
    tail_dirty: bool,
}

impl QueueStore {
    /// Opens (or creates) the queue for `operation` under `dir`.
    pub fn open(dir: impl AsRef<Path>, operation: OperationType) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|err| TowerError::storage(format!("creating {}", dir.display()), err))?;
        let log_path = dir.join(format!("queue_{}.log", operation.label()));
        let head_path = dir.join(format!("queue_{}.head", operation.label()));
        let origin = log_path.display().to_string();

        let (mut head, mut base) = read_marker(&head_path)?;
        let raw = match fs::read_to_string(&log_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(TowerError::storage(format!("reading {origin}"), err)),
        };

        // A last line without newline is a torn append that was never acknowledged.
        let complete = raw.rfind('\n').map_or(0, |idx| idx + 1);
        let torn = complete < raw.len();

        let mut lines = Vec::new();
        let mut offset = 0_u64;
        for (idx, line) in raw[..complete].split_inclusive('\n').enumerate() {
            let entry = QueueEntry::parse_line(line)
                .map_err(|reason| TowerError::malformed(&origin, idx + 1, reason))?;
            lines.push((entry, offset));
            offset += line.len() as u64;
        }

        if head < base {
            return Err(TowerError::malformed(
                head_path.display().to_string(),
                1,
                format!("head {head} precedes base {base}"),
            ));
        }
        let count = lines.len() as u64;
        let mut head_dirty = false;
        if head - base > count {
            // Compaction truncated the log but did not record the new base.
            base = head - count;
            head_dirty = true;
        }

        let skip = usize::try_from(head - base).unwrap_or(usize::MAX);
        let mut entries = VecDeque::new();
        let mut line_starts = VecDeque::new();
        for (idx, (entry, start)) in lines.into_iter().enumerate().skip(skip) {
            entries.push_back(QueuedEntry {
                seq: base + idx as u64,
                entry,
            });
            line_starts.push_back(start);
        }
        if entries.is_empty() {
            head = base + count;
        }

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|err| TowerError::storage(format!("opening {origin}"), err))?;
        if torn {
            log.set_len(complete as u64).map_err(|err| {
                TowerError::storage(format!("trimming torn line in {origin}"), err)
            })?;
        }

        let mut store = Self {
            operation,
            log_path,
            head_path,
            log,
            log_len: complete as u64,
            entries,
            line_starts,
            head,
            base,
            head_dirty,
            tail_dirty: false,
        };
        store.sync_head()?;
        Ok(store)
    }

    /// Operation type served by this queue.
    #[must_use]
    pub const fn operation(&self) -> OperationType {
        self.operation
    }

    /// Appends `entry` at the tail and returns its sequence number.
    /// The line is synced to disk before this returns.
    pub fn enqueue(&mut self, entry: QueueEntry) -> Result<u64> {
        self.sync_head()?;
        self.trim_tail()?;
        let seq = self.head + self.entries.len() as u64;
        let start = self.log_len;
        let mut line = entry.to_line();
        line.push('\n');
        let written = self
            .log
            .write_all(line.as_bytes())
            .and_then(|()| self.log.sync_data());
        if let Err(err) = written {
            self.tail_dirty = true;
            let context = match self.trim_tail() {
                Ok(()) => format!("appending to {}", self.log_path.display()),
                Err(trim_err) => format!(
                    "appending to {} (partial line kept until the next append: {trim_err})",
                    self.log_path.display()
                ),
            };
            return Err(TowerError::storage(context, err));
        }
        self.log_len += line.len() as u64;
        self.entries.push_back(QueuedEntry { seq, entry });
        self.line_starts.push_back(start);
        Ok(seq)
    }

    /// Undoes the most recent [`enqueue`](Self::enqueue), which must have
    /// returned `seq`. Used when the audit record for it could not be written.
    pub fn retract(&mut self, seq: u64) -> Result<()> {
        if self.entries.back().map(|last| last.seq) != Some(seq) {
            return Err(TowerError::malformed(
                self.log_path.display().to_string(),
                0,
                format!("entry {seq} is not the tail of the {} queue", self.operation),
            ));
        }
        let start = self.line_starts.back().copied().unwrap_or(self.log_len);
        self.log
            .set_len(start)
            .and_then(|()| self.log.sync_data())
            .map_err(|err| {
                TowerError::storage(format!("retracting from {}", self.log_path.display()), err)
            })?;
        self.entries.pop_back();
        self.line_starts.pop_back();
        self.log_len = start;
        Ok(())
    }

    /// Returns the head entry without removing it.
    pub fn peek_head(&self) -> Result<&QueuedEntry> {
        self.entries
            .front()
            .ok_or(TowerError::QueueEmpty(self.operation))
    }

    /// Removes and returns the head entry.
    ///
    /// The entry leaves memory even if the marker write fails; the store is
    /// then left dirty and the write is retried by the next mutating call
    /// (or [`sync_head`](Self::sync_head)). The error is returned so the
    /// caller can report it.
    pub fn pop_head(&mut self) -> Result<QueuedEntry> {
        let popped = self
            .entries
            .pop_front()
            .ok_or(TowerError::QueueEmpty(self.operation))?;
        self.line_starts.pop_front();
        self.head = popped.seq + 1;
        self.head_dirty = true;
        self.sync_head()?;
        Ok(popped)
    }

    /// Full ordered contents, head first.
    #[must_use]
    pub fn list(&self) -> Vec<QueueEntry> {
        self.entries.iter().map(|queued| queued.entry.clone()).collect()
    }

    /// Pending entries with their sequence numbers, head first.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedEntry> {
        self.entries.iter()
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sequence number the head entry has (or the next entry will get).
    #[must_use]
    pub const fn head_seq(&self) -> u64 {
        self.head
    }

    /// True while a pop has not reached the marker file, or a failed append
    /// has not been trimmed from the log.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.head_dirty || self.tail_dirty
    }

    /// Applies a clearance that was committed to the audit trail but whose
    /// pop never reached disk. Returns whether an entry was removed.
    pub fn advance_past(&mut self, seq: u64) -> Result<bool> {
        match self.entries.front() {
            Some(head) if head.seq == seq => {
                self.pop_head()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Drops every entry and starts an empty log. Sequence numbers keep counting.
    pub fn clear(&mut self) -> Result<()> {
        self.head += self.entries.len() as u64;
        self.entries.clear();
        self.line_starts.clear();
        self.head_dirty = true;
        self.sync_head()
    }

    /// Writes the marker if a previous write failed; compacts a drained log.
    ///
    /// A drained log is truncated only after the marker already names the
    /// final head, so a crash at any step reopens with the same numbering.
    pub fn sync_head(&mut self) -> Result<()> {
        if !self.head_dirty {
            return Ok(());
        }
        write_marker(&self.head_path, self.head, self.base)?;
        if self.entries.is_empty() && self.log_len > 0 {
            self.log
                .set_len(0)
                .and_then(|()| self.log.sync_data())
                .map_err(|err| {
                    TowerError::storage(format!("compacting {}", self.log_path.display()), err)
                })?;
            self.log_len = 0;
            self.tail_dirty = false;
            self.base = self.head;
            write_marker(&self.head_path, self.head, self.base)?;
        }
        self.head_dirty = false;
        Ok(())
    }

    /// Cuts the log back to `log_len` after an append failed midway.
    fn trim_tail(&mut self) -> Result<()> {
        if !self.tail_dirty {
            return Ok(());
        }
        self.log
            .set_len(self.log_len)
            .and_then(|()| self.log.sync_data())
            .map_err(|err| {
                TowerError::storage(
                    format!("trimming failed append in {}", self.log_path.display()),
                    err,
                )
            })?;
        self.tail_dirty = false;
        Ok(())
    }
}

fn read_marker(path: &Path) -> Result<(u64, u64)> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok((0, 0)),
        Err(err) => {
            return Err(TowerError::storage(
                format!("reading {}", path.display()),
                err,
            ))
        }
    };
    let origin = path.display().to_string();
    let mut fields = raw.split_whitespace().map(str::parse::<u64>);
    match (fields.next(), fields.next(), fields.next()) {
        (Some(Ok(head)), Some(Ok(base)), None) => Ok((head, base)),
        _ => Err(TowerError::malformed(origin, 1, "expected `<head> <base>`")),
    }
}

fn write_marker(path: &Path, head: u64, base: u64) -> Result<()> {
    let tmp = path.with_extension("head.tmp");
    let context = || format!("writing {}", path.display());
    let mut file = File::create(&tmp).map_err(|err| TowerError::storage(context(), err))?;
    file.write_all(format!("{head} {base}\n").as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|err| TowerError::storage(context(), err))?;
    fs::rename(&tmp, path).map_err(|err| TowerError::storage(context(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(code: &str) -> QueueEntry {
        QueueEntry {
            flight_code: code.into(),
            scheduled_time: "10:00".into(),
            priority: 1,
            preferred_runway: "09".into(),
            emergency: false,
        }
    }

    fn codes(store: &QueueStore) -> Vec<String> {
        store.list().into_iter().map(|e| e.flight_code).collect()
    }

    #[test]
    fn keeps_insertion_order() {
        let dir = tempdir().unwrap();
        let mut store = QueueStore::open(dir.path(), OperationType::Takeoff).unwrap();
        for code in ["A1", "B2", "C3"] {
            store.enqueue(entry(code)).unwrap();
        }
        assert_eq!(codes(&store), vec!["A1", "B2", "C3"]);
        assert_eq!(store.peek_head().unwrap().entry.flight_code, "A1");
    }

    #[test]
    fn pop_removes_exactly_the_peeked_head() {
        let dir = tempdir().unwrap();
        let mut store = QueueStore::open(dir.path(), OperationType::Landing).unwrap();
        store.enqueue(entry("A1")).unwrap();
        store.enqueue(entry("B2")).unwrap();
        let peeked = store.peek_head().unwrap().clone();
        let popped = store.pop_head().unwrap();
        assert_eq!(peeked, popped);
        assert_eq!(codes(&store), vec!["B2"]);
    }

    #[test]
    fn empty_queue_reports_queue_empty() {
        let dir = tempdir().unwrap();
        let mut store = QueueStore::open(dir.path(), OperationType::Takeoff).unwrap();
        assert!(matches!(store.peek_head(), Err(TowerError::QueueEmpty(_))));
        assert!(matches!(store.pop_head(), Err(TowerError::QueueEmpty(_))));
    }

    #[test]
    fn survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut store = QueueStore::open(dir.path(), OperationType::Takeoff).unwrap();
            for code in ["A1", "B2", "C3"] {
                store.enqueue(entry(code)).unwrap();
            }
            store.pop_head().unwrap();
        }
        let store = QueueStore::open(dir.path(), OperationType::Takeoff).unwrap();
        assert_eq!(codes(&store), vec!["B2", "C3"]);
        assert_eq!(store.peek_head().unwrap().seq, 1);
    }

    #[test]
    fn sequence_numbers_survive_compaction() {
        let dir = tempdir().unwrap();
        let mut store = QueueStore::open(dir.path(), OperationType::Takeoff).unwrap();
        store.enqueue(entry("A1")).unwrap();
        store.enqueue(entry("B2")).unwrap();
        store.pop_head().unwrap();
        store.pop_head().unwrap();
        let log = fs::read_to_string(dir.path().join("queue_takeoff.log")).unwrap();
        assert!(log.is_empty());
        assert_eq!(store.enqueue(entry("C3")).unwrap(), 2);
        drop(store);
        let store = QueueStore::open(dir.path(), OperationType::Takeoff).unwrap();
        assert_eq!(store.peek_head().unwrap().seq, 2);
    }

    #[test]
    fn torn_tail_line_is_dropped() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("queue_takeoff.log"),
            "TAM101;10:00;5;09\nTAM102;10:0",
        )
        .unwrap();
        let mut store = QueueStore::open(dir.path(), OperationType::Takeoff).unwrap();
        assert_eq!(codes(&store), vec!["TAM101"]);
        store.enqueue(entry("TAM103")).unwrap();
        let log = fs::read_to_string(dir.path().join("queue_takeoff.log")).unwrap();
        assert_eq!(log, "TAM101;10:00;5;09\nTAM103;10:00;1;09\n");
    }

    #[test]
    fn corrupt_line_is_malformed_data() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("queue_landing.log"), "TAM101;10:00;high;09\n").unwrap();
        let err = QueueStore::open(dir.path(), OperationType::Landing).unwrap_err();
        assert!(matches!(err, TowerError::MalformedData { line: 1, .. }));
    }

    #[test]
    fn compaction_cut_short_after_truncate_keeps_numbering() {
        let dir = tempdir().unwrap();
        let head_path = dir.path().join("queue_takeoff.head");
        {
            let mut store = QueueStore::open(dir.path(), OperationType::Takeoff).unwrap();
            for code in ["A1", "B2", "C3"] {
                store.enqueue(entry(code)).unwrap();
            }
            store.pop_head().unwrap();
            store.pop_head().unwrap();
            store.pop_head().unwrap();
        }
        assert_eq!(fs::read_to_string(&head_path).unwrap(), "3 3\n");
        // State left when the process dies between truncating the log and
        // writing the final marker: the marker already names the new head.
        fs::write(&head_path, "3 0\n").unwrap();
        let mut store = QueueStore::open(dir.path(), OperationType::Takeoff).unwrap();
        assert!(store.is_empty());
        assert!(!store.is_dirty());
        assert_eq!(fs::read_to_string(&head_path).unwrap(), "3 3\n");
        assert_eq!(store.enqueue(entry("D4")).unwrap(), 3);
    }

    #[test]
    fn compaction_cut_short_before_truncate_keeps_numbering() {
        let dir = tempdir().unwrap();
        // Marker names the final head, the log still holds both cleared lines.
        fs::write(dir.path().join("queue_takeoff.head"), "2 0\n").unwrap();
        fs::write(
            dir.path().join("queue_takeoff.log"),
            "A1;10:00;1;09\nB2;10:00;1;09\n",
        )
        .unwrap();
        let mut store = QueueStore::open(dir.path(), OperationType::Takeoff).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.enqueue(entry("C3")).unwrap(), 2);
        drop(store);
        let store = QueueStore::open(dir.path(), OperationType::Takeoff).unwrap();
        assert_eq!(codes(&store), vec!["C3"]);
        assert_eq!(store.peek_head().unwrap().seq, 2);
    }

    #[test]
    fn leftover_from_failed_append_is_trimmed_before_next_append() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("queue_takeoff.log");
        let mut store = QueueStore::open(dir.path(), OperationType::Takeoff).unwrap();
        store.enqueue(entry("A1")).unwrap();
        OpenOptions::new()
            .append(true)
            .open(&log_path)
            .unwrap()
            .write_all(b"B2;10:0")
            .unwrap();
        store.tail_dirty = true;
        assert!(store.is_dirty());
        assert_eq!(store.enqueue(entry("C3")).unwrap(), 1);
        assert!(!store.is_dirty());
        assert_eq!(
            fs::read_to_string(&log_path).unwrap(),
            "A1;10:00;1;09\nC3;10:00;1;09\n"
        );
    }

    #[test]
    fn retract_undoes_last_append() {
        let dir = tempdir().unwrap();
        let mut store = QueueStore::open(dir.path(), OperationType::Takeoff).unwrap();
        store.enqueue(entry("A1")).unwrap();
        let seq = store.enqueue(entry("B2")).unwrap();
        store.retract(seq).unwrap();
        assert_eq!(codes(&store), vec!["A1"]);
        let log = fs::read_to_string(dir.path().join("queue_takeoff.log")).unwrap();
        assert_eq!(log, "A1;10:00;1;09\n");
        assert!(store.retract(seq).is_err());
    }

    #[test]
    fn advance_past_applies_lost_pop_once() {
        let dir = tempdir().unwrap();
        let mut store = QueueStore::open(dir.path(), OperationType::Takeoff).unwrap();
        store.enqueue(entry("A1")).unwrap();
        store.enqueue(entry("B2")).unwrap();
        assert!(store.advance_past(0).unwrap());
        assert!(!store.advance_past(0).unwrap());
        assert_eq!(codes(&store), vec!["B2"]);
    }
}
