#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Control tower core: per-operation FIFO queues, the clearance decision
//! procedure, the audit trail it writes and the shift report derived from it.

/// Audit trail of enqueue and clearance outcomes.
pub mod audit;
/// Clearance decision procedure.
pub mod clearance;
/// TOML configuration.
pub mod config;
/// Flight, fleet and pilot lookups.
pub mod directory;
/// Runway status, restriction notices and weather observations.
pub mod environment;
/// Error taxonomy.
pub mod error;
/// Shared domain types.
pub mod model;
/// Textual matching of notices and weather observations.
pub mod notices;
/// Durable per-operation queues.
pub mod queue;
/// Shift report aggregation.
pub mod report;
/// Operational logging and decision broadcast.
pub mod telemetry;
/// Orchestrator tying queues, decisions and the audit trail together.
pub mod tower;

pub use audit::{AuditEvent, AuditLog, AuditOutcome};
pub use clearance::{ClearanceEngine, ClearanceOutcome, Decision, DenialReason, Evaluation};
pub use config::{ClearanceRules, DataFiles, TowerConfig};
pub use directory::{sort_flights, CsvDirectory, Directory, MemoryDirectory, ReferenceData, SortKey};
pub use environment::{
    EnvironmentSnapshot, EnvironmentSource, FileEnvironment, RestrictionNotice, RunwayStatusMap,
    StaticEnvironment, WeatherObservation,
};
pub use error::{Result, TowerError};
pub use model::{AircraftRecord, Flight, OperationType, PilotRecord, QueueEntry, RunwayStatus};
pub use notices::{
    CueRestrictionMatcher, RestrictionMatcher, VisKmParser, VisibilityParser, VisibilityReading,
};
pub use queue::{QueueStore, QueuedEntry};
pub use report::{ReportWindow, ShiftReport};
pub use telemetry::TowerTelemetry;
pub use tower::{QueueStatus, Tower, TowerBuilder, TowerStatus};
