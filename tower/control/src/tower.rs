use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use serde::Serialize;
use tower_logging::LogLevel;

use crate::{
    audit::{AuditEvent, AuditLog, AuditOutcome},
    clearance::{ClearanceEngine, ClearanceOutcome, Decision},
    config::TowerConfig,
    directory::{CsvDirectory, Directory},
    environment::{
        EnvironmentSource, FileEnvironment, RestrictionNotice, RunwayStatusMap, WeatherObservation,
    },
    error::{Result, TowerError},
    model::{OperationType, QueueEntry},
    notices::{CueRestrictionMatcher, RestrictionMatcher, VisKmParser, VisibilityParser},
    queue::{QueueStore, QueuedEntry},
    report::{ReportWindow, ShiftReport},
    telemetry::TowerTelemetry,
};

/// Entries shown per queue by [`Tower::status`].
const STATUS_PREVIEW: usize = 3;

/// Shared tower state. All operations take `&self`; the two queues are
/// locked independently so takeoff and landing traffic never contend.
pub struct Tower {
    directory: Arc<dyn Directory>,
    environment: Arc<dyn EnvironmentSource>,
    engine: ClearanceEngine,
    takeoff: Mutex<QueueStore>,
    landing: Mutex<QueueStore>,
    audit: AuditLog,
    telemetry: TowerTelemetry,
    emergency_markers: Vec<String>,
    report_dir: PathBuf,
}

impl fmt::Debug for Tower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tower")
            .field("audit", &self.audit.path())
            .field("report_dir", &self.report_dir)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

/// Length and first entries of one queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    /// Pending entries.
    pub len: usize,
    /// Entries closest to the head, head first.
    pub next: Vec<QueuedEntry>,
}

/// Workstation overview.
#[derive(Debug, Clone, Serialize)]
pub struct TowerStatus {
    /// Runway availability.
    pub runways: RunwayStatusMap,
    /// Departure queue.
    pub takeoff: QueueStatus,
    /// Arrival queue.
    pub landing: QueueStatus,
    /// Active notices.
    pub restrictions: Vec<RestrictionNotice>,
    /// Weather observations.
    pub weather: Vec<WeatherObservation>,
}

impl Tower {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> TowerBuilder {
        TowerBuilder::default()
    }

    /// Appends the flight to the tail of the `operation` queue.
    ///
    /// The flight must exist and its aircraft must be in the fleet. The
    /// pilot is looked up for the operational log only.
    pub fn enqueue(&self, operation: OperationType, flight_code: &str) -> Result<QueuedEntry> {
        let Some(flight) = self.directory.find_flight(flight_code) else {
            self.telemetry
                .note(LogLevel::Warn, "enqueue rejected: flight not found", |record| {
                    record.operation(operation.label()).flight(flight_code)
                });
            return Err(TowerError::FlightNotFound(flight_code.to_string()));
        };
        if self.directory.find_aircraft(&flight.aircraft).is_none() {
            self.telemetry.note(
                LogLevel::Warn,
                "enqueue rejected: aircraft not in fleet",
                |record| {
                    record
                        .operation(operation.label())
                        .flight(flight_code)
                        .detail("aircraft", flight.aircraft.as_str())
                },
            );
            return Err(TowerError::UnknownAircraft(flight.aircraft));
        }
        if let Some(pilot) = flight.pilot.as_deref().filter(|p| !p.is_empty()) {
            if self.directory.find_pilot(pilot).is_none() {
                self.telemetry.note(LogLevel::Warn, "pilot not found", |record| {
                    record.flight(flight_code).detail("pilot", pilot)
                });
            }
        }

        let emergency = flight.is_emergency(&self.emergency_markers);
        let entry = QueueEntry::from_flight(&flight, operation, emergency);
        let mut store = self.store(operation).lock();
        let seq = store.enqueue(entry.clone())?;
        let event =
            AuditEvent::new(operation, AuditOutcome::Enqueued).for_entry(&entry.flight_code, seq);
        if let Err(err) = self.audit.record(&event) {
            if let Err(retract_err) = store.retract(seq) {
                self.telemetry
                    .note(LogLevel::Error, "could not retract unaudited entry", |record| {
                        record
                            .operation(operation.label())
                            .flight(flight_code)
                            .seq(seq)
                            .detail("error", retract_err.to_string())
                    });
            }
            return Err(err);
        }
        drop(store);

        let queued = QueuedEntry { seq, entry };
        self.telemetry.flight_enqueued(operation, &queued);
        Ok(queued)
    }

    /// Decides on the head of the `operation` queue for `runway`.
    ///
    /// The queue stays locked from reading its head until the decision is
    /// recorded, so one entry is never cleared twice. A clearance is recorded
    /// in the audit trail before the entry leaves the queue.
    pub fn evaluate(&self, operation: OperationType, runway: &str) -> Result<ClearanceOutcome> {
        let mut store = self.store(operation).lock();
        store.sync_head()?;

        let Some(head) = store.iter().next().cloned() else {
            self.audit
                .record(&AuditEvent::new(operation, AuditOutcome::QueueEmpty))?;
            drop(store);
            let outcome = ClearanceOutcome::QueueEmpty { operation };
            self.telemetry.decision(&outcome);
            return Ok(outcome);
        };

        let snapshot = self.environment.snapshot()?;
        let evaluation = self.engine.evaluate(runway, store.len(), &snapshot);
        for observation in &evaluation.skipped_observations {
            self.telemetry.note(
                LogLevel::Warn,
                "skipped unreadable visibility figure",
                |record| record.runway(runway).detail("observation", observation.as_str()),
            );
        }

        let QueuedEntry { seq, entry } = head;
        let outcome = match evaluation.decision {
            Decision::Deny(reason) => {
                self.audit.record(
                    &AuditEvent::new(operation, AuditOutcome::Denied(reason.to_string()))
                        .for_entry(&entry.flight_code, seq),
                )?;
                ClearanceOutcome::Denied {
                    operation,
                    runway: runway.to_string(),
                    seq,
                    entry,
                    reason,
                }
            }
            Decision::Clear => {
                self.audit.record(
                    &AuditEvent::new(
                        operation,
                        AuditOutcome::Cleared {
                            emergency: entry.emergency,
                        },
                    )
                    .for_entry(&entry.flight_code, seq),
                )?;
                if let Err(err) = store.pop_head() {
                    self.telemetry
                        .note(LogLevel::Error, "head marker write deferred", |record| {
                            record
                                .operation(operation.label())
                                .flight(entry.flight_code.as_str())
                                .seq(seq)
                                .detail("error", err.to_string())
                        });
                }
                ClearanceOutcome::Cleared {
                    operation,
                    runway: runway.to_string(),
                    seq,
                    entry,
                }
            }
        };
        drop(store);

        self.telemetry.decision(&outcome);
        Ok(outcome)
    }

    /// Ordered contents of a queue, head first.
    #[must_use]
    pub fn queue(&self, operation: OperationType) -> Vec<QueueEntry> {
        self.store(operation).lock().list()
    }

    /// Number of pending entries in a queue.
    #[must_use]
    pub fn queue_len(&self, operation: OperationType) -> usize {
        self.store(operation).lock().len()
    }

    /// Runways, queue previews, notices and weather as they stand now.
    pub fn status(&self) -> Result<TowerStatus> {
        let env = self.environment.snapshot()?;
        Ok(TowerStatus {
            runways: env.runways,
            takeoff: self.queue_status(OperationType::Takeoff),
            landing: self.queue_status(OperationType::Landing),
            restrictions: env.restrictions,
            weather: env.weather,
        })
    }

    fn queue_status(&self, operation: OperationType) -> QueueStatus {
        let store = self.store(operation).lock();
        QueueStatus {
            len: store.len(),
            next: store.iter().take(STATUS_PREVIEW).cloned().collect(),
        }
    }

    /// Aggregates the audit trail over `window`. Read-only.
    pub fn shift_report(&self, window: ReportWindow) -> Result<ShiftReport> {
        let lines = self.audit.lines()?;
        Ok(ShiftReport::generate(&lines, window))
    }

    /// Aggregates the audit trail and writes the report to a new file.
    pub fn write_shift_report(&self, window: ReportWindow) -> Result<(ShiftReport, PathBuf)> {
        let report = self.shift_report(window)?;
        let path = report.write_to(&self.report_dir)?;
        self.telemetry.report_written(&report, &path);
        Ok((report, path))
    }

    /// Reloads reference data and empties both queues, as for a fresh import.
    pub fn reset_queues(&self) -> Result<()> {
        self.directory.reload()?;
        for operation in OperationType::ALL {
            let mut store = self.store(operation).lock();
            let dropped = store.len();
            store.clear()?;
            self.telemetry.note(LogLevel::Info, "queue reset", |record| {
                record
                    .operation(operation.label())
                    .detail("dropped", dropped)
            });
        }
        Ok(())
    }

    /// Reference data in use.
    #[must_use]
    pub fn directory(&self) -> &dyn Directory {
        self.directory.as_ref()
    }

    /// Audit trail in use.
    #[must_use]
    pub const fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Directory shift reports are written to.
    #[must_use]
    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    const fn store(&self, operation: OperationType) -> &Mutex<QueueStore> {
        match operation {
            OperationType::Takeoff => &self.takeoff,
            OperationType::Landing => &self.landing,
        }
    }
}

/// Builder for [`Tower`]. Anything not injected is derived from the config.
#[derive(Default)]
pub struct TowerBuilder {
    config: TowerConfig,
    directory: Option<Arc<dyn Directory>>,
    environment: Option<Arc<dyn EnvironmentSource>>,
    telemetry: Option<TowerTelemetry>,
    restriction_matcher: Option<Arc<dyn RestrictionMatcher>>,
    visibility_parser: Option<Arc<dyn VisibilityParser>>,
}

impl TowerBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: TowerConfig) -> Self {
        self.config = config;
        self
    }

    /// Injects the reference directory instead of loading the CSV files.
    #[must_use]
    pub fn directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Injects the environment instead of reading the configured files.
    #[must_use]
    pub fn environment(mut self, environment: Arc<dyn EnvironmentSource>) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Sets telemetry.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TowerTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Overrides notice matching.
    #[must_use]
    pub fn restriction_matcher(mut self, matcher: Arc<dyn RestrictionMatcher>) -> Self {
        self.restriction_matcher = Some(matcher);
        self
    }

    /// Overrides visibility parsing.
    #[must_use]
    pub fn visibility_parser(mut self, parser: Arc<dyn VisibilityParser>) -> Self {
        self.visibility_parser = Some(parser);
        self
    }

    /// Opens the queues and the audit trail, then applies any clearance the
    /// audit trail committed but the queue never recorded.
    pub fn build(self) -> Result<Tower> {
        let config = self.config;
        config.validate()?;
        let rules = &config.rules;
        let directory: Arc<dyn Directory> = match self.directory {
            Some(directory) => directory,
            None => Arc::new(CsvDirectory::load(
                config.flights_path(),
                config.fleet_path(),
                config.pilots_path(),
            )?),
        };
        let environment = self.environment.unwrap_or_else(|| {
            Arc::new(FileEnvironment::new(
                config.runways_path(),
                config.notams_path(),
                config.metars_path(),
                rules.open_statuses.clone(),
            ))
        });
        let engine = ClearanceEngine::new(
            self.restriction_matcher.unwrap_or_else(|| {
                Arc::new(CueRestrictionMatcher::new(rules.closure_cues.clone()))
            }),
            self.visibility_parser
                .unwrap_or_else(|| Arc::new(VisKmParser)),
            rules.visibility_threshold_km,
        );
        let telemetry = self.telemetry.unwrap_or_else(TowerTelemetry::disabled);

        let audit = AuditLog::open(config.audit_path())?;
        let mut takeoff = QueueStore::open(config.queue_dir(), OperationType::Takeoff)?;
        let mut landing = QueueStore::open(config.queue_dir(), OperationType::Landing)?;
        for store in [&mut takeoff, &mut landing] {
            reconcile(store, &audit, &telemetry)?;
        }

        Ok(Tower {
            directory,
            environment,
            engine,
            takeoff: Mutex::new(takeoff),
            landing: Mutex::new(landing),
            audit,
            telemetry,
            emergency_markers: rules.emergency_markers.clone(),
            report_dir: config.report_dir.clone(),
        })
    }
}

/// Drops the head entry when the latest clearance for its queue names it.
fn reconcile(store: &mut QueueStore, audit: &AuditLog, telemetry: &TowerTelemetry) -> Result<()> {
    let operation = store.operation();
    let Some(last) = audit.last_clearance(operation)? else {
        return Ok(());
    };
    let (Some(seq), Some(flight)) = (last.seq, last.flight.as_deref()) else {
        return Ok(());
    };
    let head_matches = store
        .iter()
        .next()
        .is_some_and(|head| head.seq == seq && head.entry.flight_code == flight);
    if head_matches && store.advance_past(seq)? {
        telemetry.note(
            LogLevel::Warn,
            "reconciled clearance missing from queue",
            |record| record.operation(operation.label()).flight(flight).seq(seq),
        );
    }
    Ok(())
}
