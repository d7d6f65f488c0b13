use std::io;

use thiserror::Error;

use crate::model::OperationType;

/// Convenience alias used across the tower core.
pub type Result<T, E = TowerError> = std::result::Result<T, E>;

/// Errors surfaced by the tower core.
///
/// Clearance denials are not errors; see [`crate::clearance::DenialReason`].
#[derive(Debug, Error)]
pub enum TowerError {
    /// No flight plan with this code.
    #[error("flight {0} not found")]
    FlightNotFound(String),
    /// The flight's aircraft is not in the fleet.
    #[error("aircraft {0} is not registered in the fleet")]
    UnknownAircraft(String),
    /// The queue has no head entry.
    #[error("{0} queue is empty")]
    QueueEmpty(OperationType),
    /// Persistence is unavailable.
    #[error("storage error while {context}: {source}")]
    Storage {
        /// What the tower was doing.
        context: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// Persisted or external data could not be parsed.
    #[error("malformed data in {origin} line {line}: {reason}")]
    MalformedData {
        /// File or source name.
        origin: String,
        /// 1-based line number (0 when unknown).
        line: usize,
        /// Parser message.
        reason: String,
    },
    /// Configuration rejected on load.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TowerError {
    pub(crate) fn storage(context: impl Into<String>, source: io::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn malformed(
        origin: impl Into<String>,
        line: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedData {
            origin: origin.into(),
            line,
            reason: reason.into(),
        }
    }

    /// True for infrastructure faults (storage, corrupt data, configuration),
    /// false for lookup rejections and an empty queue.
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. } | Self::MalformedData { .. } | Self::Config(_)
        )
    }
}
