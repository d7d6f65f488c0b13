//! Append-only audit trail.
//!
//! One line per event:
//!
//! ```text
//! 2026-10-19T10:00:00.000Z | takeoff | TAM102 | 4 | DENIED: runway 27 not OPEN
//! ```
//!
//! Fields are timestamp, operation, flight (`-` when absent), queue sequence
//! number (`-` when absent) and outcome. Shift reports match on the outcome
//! text (`CLEARED`, `DENIED: <reason>`), so this format is a contract.

use std::{
    collections::HashSet,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    error::{Result, TowerError},
    model::OperationType,
};

/// Field separator of an audit line.
pub const FIELD_SEPARATOR: &str = " | ";
/// Outcome text of a clearance.
pub const CLEARED_MARKER: &str = "CLEARED";
/// Outcome prefix of a denial; the reason follows.
pub const DENIED_MARKER: &str = "DENIED: ";
/// Suffix added to the outcome of an emergency clearance.
pub const EMERGENCY_MARKER: &str = "EMERGENCY";
const ENQUEUED_MARKER: &str = "ENQUEUED";
const QUEUE_EMPTY_MARKER: &str = "QUEUE_EMPTY";
const ABSENT: &str = "-";

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AuditOutcome {
    /// Entry appended to a queue.
    Enqueued,
    /// Head entry cleared.
    Cleared {
        /// The flight was flagged emergency at enqueue.
        emergency: bool,
    },
    /// Head entry denied, with the reason text.
    Denied(String),
    /// Clearance requested on an empty queue.
    QueueEmpty,
}

impl AuditOutcome {
    fn render(&self) -> String {
        match self {
            Self::Enqueued => ENQUEUED_MARKER.to_string(),
            Self::Cleared { emergency: false } => CLEARED_MARKER.to_string(),
            Self::Cleared { emergency: true } => format!("{CLEARED_MARKER} {EMERGENCY_MARKER}"),
            Self::Denied(reason) => format!("{DENIED_MARKER}{reason}"),
            Self::QueueEmpty => QUEUE_EMPTY_MARKER.to_string(),
        }
    }

    fn parse(text: &str) -> Option<Self> {
        if let Some(reason) = text.strip_prefix(DENIED_MARKER) {
            return Some(Self::Denied(reason.to_string()));
        }
        match text {
            ENQUEUED_MARKER => Some(Self::Enqueued),
            QUEUE_EMPTY_MARKER => Some(Self::QueueEmpty),
            CLEARED_MARKER => Some(Self::Cleared { emergency: false }),
            other => other
                .strip_prefix(CLEARED_MARKER)
                .filter(|rest| rest.trim() == EMERGENCY_MARKER)
                .map(|_| Self::Cleared { emergency: true }),
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Queue involved.
    pub operation: OperationType,
    /// Flight code; absent for an empty queue.
    pub flight: Option<String>,
    /// Queue sequence number of the entry involved.
    pub seq: Option<u64>,
    /// Outcome.
    pub outcome: AuditOutcome,
}

impl AuditEvent {
    /// Creates an event stamped now, with no flight attached.
    #[must_use]
    pub fn new(operation: OperationType, outcome: AuditOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            flight: None,
            seq: None,
            outcome,
        }
    }

    /// Attaches the flight and its queue sequence number.
    #[must_use]
    pub fn for_entry(mut self, flight: impl Into<String>, seq: u64) -> Self {
        self.flight = Some(flight.into());
        self.seq = Some(seq);
        self
    }

    /// Renders the audit line (without newline).
    #[must_use]
    pub fn to_line(&self) -> String {
        [
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.operation.label().to_string(),
            self.flight.clone().unwrap_or_else(|| ABSENT.into()),
            self.seq.map_or_else(|| ABSENT.into(), |seq| seq.to_string()),
            self.outcome.render(),
        ]
        .join(FIELD_SEPARATOR)
    }

    /// Parses an audit line.
    pub fn parse_line(line: &str) -> Result<Self, String> {
        let fields: Vec<&str> = line.trim_end().splitn(5, FIELD_SEPARATOR).collect();
        let [timestamp, operation, flight, seq, outcome] = fields[..] else {
            return Err(format!("expected 5 fields, found {}", fields.len()));
        };
        let timestamp = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|err| format!("timestamp {timestamp:?}: {err}"))?
            .with_timezone(&Utc);
        let operation = operation.parse::<OperationType>()?;
        let flight = (flight != ABSENT).then(|| flight.to_string());
        let seq = if seq == ABSENT {
            None
        } else {
            Some(seq.parse::<u64>().map_err(|err| format!("seq {seq:?}: {err}"))?)
        };
        let outcome = AuditOutcome::parse(outcome).ok_or_else(|| format!("outcome {outcome:?}"))?;
        Ok(Self {
            timestamp,
            operation,
            flight,
            seq,
            outcome,
        })
    }
}

/// Durable append-only audit log. Appends are serialized and synced to disk
/// before [`record`](Self::record) returns.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<File>,
}

impl AuditLog {
    /// Opens (or creates) the log, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                TowerError::storage(format!("creating {}", parent.display()), err)
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| TowerError::storage(format!("opening {}", path.display()), err))?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    /// Appends one event.
    pub fn record(&self, event: &AuditEvent) -> Result<()> {
        let mut line = event.to_line();
        line.push('\n');
        let mut writer = self.writer.lock();
        writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.sync_data())
            .map_err(|err| {
                TowerError::storage(format!("appending to {}", self.path.display()), err)
            })
    }

    /// Every line written so far, oldest first.
    pub fn lines(&self) -> Result<Vec<String>> {
        read_lines(&self.path)
    }

    /// Every parseable event, oldest first. Lines in other formats are skipped.
    pub fn events(&self) -> Result<Vec<AuditEvent>> {
        Ok(self
            .lines()?
            .iter()
            .filter_map(|line| AuditEvent::parse_line(line).ok())
            .collect())
    }

    /// Latest clearance recorded for `operation`.
    ///
    /// `None` when there is none, or when a later enqueue reused its sequence
    /// number: that clearance then describes an entry no longer in the queue.
    pub fn last_clearance(&self, operation: OperationType) -> Result<Option<AuditEvent>> {
        let mut enqueued_later = HashSet::new();
        for event in self.events()?.into_iter().rev() {
            if event.operation != operation {
                continue;
            }
            match event.outcome {
                AuditOutcome::Enqueued => enqueued_later.extend(event.seq),
                AuditOutcome::Cleared { .. } => {
                    let superseded = event.seq.is_some_and(|seq| enqueued_later.contains(&seq));
                    return Ok((!superseded).then_some(event));
                }
                AuditOutcome::Denied(_) | AuditOutcome::QueueEmpty => {}
            }
        }
        Ok(None)
    }

    /// Log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log over an existing file whose appends always fail.
    #[cfg(test)]
    pub(crate) fn unwritable(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .map_err(|err| TowerError::storage(format!("opening {}", path.display()), err))?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }
}

/// Reads the non-empty lines of an audit file. A missing file reads as empty.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(ToOwned::to_owned)
            .collect()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(TowerError::storage(
            format!("reading {}", path.display()),
            err,
        )),
    }
}
