#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Operational JSON-lines logging for tower workstations.
//!
//! This is the diagnostic log: rejected enqueues, skipped weather figures,
//! deferred marker writes, recovery notes. The clearance audit trail lives in
//! `tower-control` and has its own textual format.
//!
//! Each record names the queue, flight, sequence number and runway it is
//! about as top-level fields, so a log can be filtered per flight without
//! digging through free-form metadata.

use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Log severity level.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Per-request detail.
    Debug,
    /// Routine tower activity.
    #[default]
    Info,
    /// Something was skipped or recovered.
    Warn,
    /// A write failed and was deferred.
    Error,
}

impl LogLevel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            other => bail!("unknown log level {other:?}"),
        }
    }
}

/// One line of the operational log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// When the record was created.
    pub timestamp: DateTime<Utc>,
    /// Workstation or component (e.g. `tower`).
    pub station: String,
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// Queue involved (`takeoff` / `landing`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Flight code involved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flight: Option<String>,
    /// Queue sequence number involved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Runway involved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runway: Option<String>,
    /// Anything else worth keeping.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub detail: Map<String, Value>,
}

impl LogRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(station: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            station: station.into(),
            level,
            message: message.into(),
            operation: None,
            flight: None,
            seq: None,
            runway: None,
            detail: Map::new(),
        }
    }

    /// Names the queue.
    #[must_use]
    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Names the flight.
    #[must_use]
    pub fn flight(mut self, flight: impl Into<String>) -> Self {
        self.flight = Some(flight.into());
        self
    }

    /// Names the queue sequence number.
    #[must_use]
    pub const fn seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Names the runway.
    #[must_use]
    pub fn runway(mut self, runway: impl Into<String>) -> Self {
        self.runway = Some(runway.into());
        self
    }

    /// Adds a free-form detail.
    #[must_use]
    pub fn detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }
}

/// Append-only JSON-lines log shared by every thread of a workstation.
/// Records below the configured level are dropped.
#[derive(Debug)]
pub struct OpsLog {
    path: PathBuf,
    min_level: LogLevel,
    writer: Mutex<File>,
}

impl OpsLog {
    /// Opens (or creates) the log, creating parent directories. Every level
    /// is kept until [`with_min_level`](Self::with_min_level) says otherwise.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating log dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening ops log {}", path.display()))?;
        Ok(Self {
            path,
            min_level: LogLevel::Debug,
            writer: Mutex::new(file),
        })
    }

    /// Drops records less severe than `level`.
    #[must_use]
    pub const fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Lowest level written.
    #[must_use]
    pub const fn min_level(&self) -> LogLevel {
        self.min_level
    }

    /// Appends `record` as one line. Returns `false` when the level filter
    /// dropped it.
    pub fn append(&self, record: &LogRecord) -> Result<bool> {
        if record.level < self.min_level {
            return Ok(false);
        }
        let mut line = serde_json::to_string(record).context("encoding log record")?;
        line.push('\n');
        let mut writer = self.writer.lock();
        writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.flush())
            .with_context(|| format!("appending to {}", self.path.display()))?;
        Ok(true)
    }

    /// Log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads every record back from an ops log. A missing file reads as empty.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<LogRecord>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(
            serde_json::from_str(&line)
                .with_context(|| format!("parsing {} line {}", path.display(), idx + 1))?,
        );
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn record_fields_are_top_level() {
        let dir = tempdir().unwrap();
        let log = OpsLog::open(dir.path().join("ops/tower.jsonl")).unwrap();
        log.append(
            &LogRecord::new("tower", LogLevel::Warn, "pilot not found")
                .operation("takeoff")
                .flight("TAM101")
                .detail("pilot", "P-9"),
        )
        .unwrap();
        let content = fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("\"level\":\"WARN\""));
        assert!(content.contains("\"flight\":\"TAM101\""));
        assert!(content.contains("\"detail\":{\"pilot\":\"P-9\"}"));
        assert!(!content.contains("\"runway\""));
    }

    #[test]
    fn level_filter_drops_routine_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tower.jsonl");
        let log = OpsLog::open(&path).unwrap().with_min_level(LogLevel::Warn);
        assert!(!log
            .append(&LogRecord::new("tower", LogLevel::Info, "queue reset"))
            .unwrap());
        assert!(log
            .append(&LogRecord::new("tower", LogLevel::Error, "marker write deferred").seq(4))
            .unwrap());
        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].seq, Some(4));
        assert_eq!(records[0].flight, None);
    }

    #[test]
    fn level_names_parse_loosely() {
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(" error ".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Debug.to_string(), "DEBUG");
    }

    #[test]
    fn missing_log_reads_empty() {
        let dir = tempdir().unwrap();
        assert!(read_records(dir.path().join("absent.jsonl")).unwrap().is_empty());
    }
}
