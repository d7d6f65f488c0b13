#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Broadcast of tower decisions (enqueues, clearances, denials) to other
//! workstations.
//!
//! Every event travels in an [`EventEnvelope`] and is encoded as one JSON
//! object, the event fields flattened next to the envelope fields:
//!
//! ```text
//! {"id":"evt-…","station":"tower","emitted_at":"…","kind":"denied","operation":"takeoff",…}
//! ```

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{fs::OpenOptions, io::AsyncWriteExt};
use uuid::Uuid;

/// Discriminant of a [`TowerEvent`], for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TowerEventKind {
    /// See [`TowerEvent::FlightEnqueued`].
    FlightEnqueued,
    /// See [`TowerEvent::Cleared`].
    Cleared,
    /// See [`TowerEvent::Denied`].
    Denied,
    /// See [`TowerEvent::QueueEmpty`].
    QueueEmpty,
    /// See [`TowerEvent::ReportWritten`].
    ReportWritten,
}

/// Something the tower decided or produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TowerEvent {
    /// A flight joined a queue.
    FlightEnqueued {
        /// Queue label.
        operation: String,
        /// Flight code.
        flight: String,
        /// Queue sequence number.
        seq: u64,
        /// Flagged emergency at enqueue.
        emergency: bool,
    },
    /// The head of a queue was cleared and left the queue.
    Cleared {
        /// Queue label.
        operation: String,
        /// Flight code.
        flight: String,
        /// Queue sequence number.
        seq: u64,
        /// Runway the clearance is for.
        runway: String,
        /// Cleared as an emergency.
        emergency: bool,
    },
    /// The head of a queue was denied and stays queued.
    Denied {
        /// Queue label.
        operation: String,
        /// Flight code.
        flight: String,
        /// Queue sequence number.
        seq: u64,
        /// Runway that was requested.
        runway: String,
        /// Denial reason as written to the audit trail.
        reason: String,
    },
    /// A clearance was requested on an empty queue.
    QueueEmpty {
        /// Queue label.
        operation: String,
    },
    /// A shift report was written.
    ReportWritten {
        /// Report file.
        path: String,
        /// Clearances counted.
        cleared: u64,
        /// Denials counted.
        denied: u64,
        /// Emergency clearances counted.
        emergencies: u64,
    },
}

impl TowerEvent {
    /// Discriminant.
    #[must_use]
    pub const fn kind(&self) -> TowerEventKind {
        match self {
            Self::FlightEnqueued { .. } => TowerEventKind::FlightEnqueued,
            Self::Cleared { .. } => TowerEventKind::Cleared,
            Self::Denied { .. } => TowerEventKind::Denied,
            Self::QueueEmpty { .. } => TowerEventKind::QueueEmpty,
            Self::ReportWritten { .. } => TowerEventKind::ReportWritten,
        }
    }

    /// Flight the event is about, if any.
    #[must_use]
    pub fn flight(&self) -> Option<&str> {
        match self {
            Self::FlightEnqueued { flight, .. }
            | Self::Cleared { flight, .. }
            | Self::Denied { flight, .. } => Some(flight),
            Self::QueueEmpty { .. } | Self::ReportWritten { .. } => None,
        }
    }
}

/// Event as it travels: identified, stamped and attributed to a station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier (`evt-<uuid>`).
    pub id: String,
    /// Workstation that emitted the event.
    pub station: String,
    /// When the event was emitted.
    pub emitted_at: DateTime<Utc>,
    /// The event itself.
    #[serde(flatten)]
    pub event: TowerEvent,
}

impl EventEnvelope {
    /// Wraps `event` with a fresh id and the current time.
    #[must_use]
    pub fn new(station: impl Into<String>, event: TowerEvent) -> Self {
        Self {
            id: format!("evt-{}", Uuid::new_v4()),
            station: station.into(),
            emitted_at: Utc::now(),
            event,
        }
    }
}

/// Destination for tower events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Delivers one event.
    async fn publish(&self, envelope: EventEnvelope) -> Result<()>;
}

/// Keeps the most recent events in memory. Used when the tower is embedded
/// and the host reads decisions back directly.
#[derive(Debug)]
pub struct MemoryEventBus {
    retained: Mutex<VecDeque<EventEnvelope>>,
    capacity: usize,
}

impl MemoryEventBus {
    /// Bus retaining the last `capacity` events (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            retained: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Retained events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EventEnvelope> {
        self.retained.lock().iter().cloned().collect()
    }

    /// Retained events of one kind, oldest first.
    #[must_use]
    pub fn of_kind(&self, kind: TowerEventKind) -> Vec<EventEnvelope> {
        self.retained
            .lock()
            .iter()
            .filter(|envelope| envelope.event.kind() == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(&self, envelope: EventEnvelope) -> Result<()> {
        let mut retained = self.retained.lock();
        if retained.len() == self.capacity {
            retained.pop_front();
        }
        retained.push_back(envelope);
        Ok(())
    }
}

/// Appends one JSON line per event to a shared file other workstations tail.
#[derive(Debug, Clone)]
pub struct FileEventPublisher {
    path: PathBuf,
}

impl FileEventPublisher {
    /// Publisher appending to `path`; parent directories are created now.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating event log dir {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    /// Event log path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventPublisher for FileEventPublisher {
    async fn publish(&self, envelope: EventEnvelope) -> Result<()> {
        let mut line = serde_json::to_vec(&envelope).context("encoding tower event")?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening event log {}", self.path.display()))?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::runtime::Runtime;

    fn denied(flight: &str) -> TowerEvent {
        TowerEvent::Denied {
            operation: "takeoff".into(),
            flight: flight.into(),
            seq: 4,
            runway: "27".into(),
            reason: "runway 27 not OPEN".into(),
        }
    }

    #[test]
    fn envelope_flattens_the_event() {
        let envelope = EventEnvelope::new("tower", denied("TAM102"));
        assert!(envelope.id.starts_with("evt-"));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["kind"], "denied");
        assert_eq!(value["runway"], "27");
        assert_eq!(value["station"], "tower");
        let back: EventEnvelope = serde_json::from_value(value).unwrap();
        assert_eq!(back.event.flight(), Some("TAM102"));
    }

    #[test]
    fn memory_bus_keeps_only_latest() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let bus = MemoryEventBus::new(2);
            for flight in ["TAM101", "TAM102", "GLO9"] {
                bus.publish(EventEnvelope::new("tower", denied(flight)))
                    .await
                    .unwrap();
            }
            bus.publish(EventEnvelope::new(
                "tower",
                TowerEvent::QueueEmpty {
                    operation: "landing".into(),
                },
            ))
            .await
            .unwrap();
            let flights: Vec<_> = bus
                .snapshot()
                .iter()
                .map(|envelope| envelope.event.flight().map(str::to_owned))
                .collect();
            assert_eq!(flights, vec![Some("GLO9".to_owned()), None]);
            assert_eq!(bus.of_kind(TowerEventKind::Denied).len(), 1);
            assert!(bus.of_kind(TowerEventKind::Cleared).is_empty());
        });
    }

    #[test]
    fn file_publisher_appends_json_lines() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let dir = tempdir().unwrap();
            let path = dir.path().join("events/tower.jsonl");
            let publisher = FileEventPublisher::new(&path).unwrap();
            publisher
                .publish(EventEnvelope::new("tower", denied("TAM102")))
                .await
                .unwrap();
            publisher
                .publish(EventEnvelope::new("tower", denied("TAM103")))
                .await
                .unwrap();
            let content = std::fs::read_to_string(path).unwrap();
            let events: Vec<EventEnvelope> = content
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect();
            assert_eq!(events.len(), 2);
            assert_eq!(events[1].event.flight(), Some("TAM103"));
        });
    }
}
