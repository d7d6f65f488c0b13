//! Operational log and decision broadcast.
//!
//! Separate from the audit trail: nothing here may fail a tower request.
//! Write failures are reported on stderr and otherwise ignored.
//!
//! Events are handed to a single worker thread that owns the publisher, so
//! they reach it in the order the tower produced them and a slow publisher
//! never holds a queue lock. Dropping the last handle publishes whatever is
//! still pending before the worker exits.

use std::{
    fmt,
    path::Path,
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tower_event_bus::{EventEnvelope, EventPublisher, FileEventPublisher, TowerEvent};
use tower_logging::{LogLevel, LogRecord, OpsLog};

use crate::{
    clearance::ClearanceOutcome, config::TowerConfig, model::OperationType, queue::QueuedEntry,
    report::ShiftReport,
};

const DEFAULT_STATION: &str = "tower";

/// Handle to the operational log and the event worker. Cheap to clone.
#[derive(Clone)]
pub struct TowerTelemetry {
    station: Arc<str>,
    ops_log: Option<Arc<OpsLog>>,
    dispatcher: Option<Arc<Dispatcher>>,
}

impl fmt::Debug for TowerTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TowerTelemetry")
            .field("station", &self.station)
            .field("ops_log", &self.ops_log.as_ref().map(|log| log.path()))
            .field("min_level", &self.ops_log.as_ref().map(|log| log.min_level()))
            .field("events", &self.dispatcher.is_some())
            .finish()
    }
}

impl TowerTelemetry {
    /// Telemetry that records nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            station: Arc::from(DEFAULT_STATION),
            ops_log: None,
            dispatcher: None,
        }
    }

    /// Ops log in the configured log directory at the configured level, and
    /// the event log when one is configured.
    pub fn from_config(config: &TowerConfig) -> Result<Self> {
        let ops_log = OpsLog::open(config.ops_log_path())?.with_min_level(config.log_level);
        let telemetry = Self::disabled().with_ops_log(ops_log);
        match &config.event_log {
            Some(path) => telemetry.with_publisher(Arc::new(FileEventPublisher::new(path)?)),
            None => Ok(telemetry),
        }
    }

    /// Writes notes to `ops_log`.
    #[must_use]
    pub fn with_ops_log(mut self, ops_log: OpsLog) -> Self {
        self.ops_log = Some(Arc::new(ops_log));
        self
    }

    /// Starts the event worker delivering to `publisher`.
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Result<Self> {
        self.dispatcher = Some(Arc::new(Dispatcher::spawn(publisher)?));
        Ok(self)
    }

    /// Writes one ops log record; `fill` names the flight, queue and so on.
    pub fn note(
        &self,
        level: LogLevel,
        message: &str,
        fill: impl FnOnce(LogRecord) -> LogRecord,
    ) {
        let Some(ops_log) = &self.ops_log else {
            return;
        };
        let record = fill(LogRecord::new(self.station.as_ref(), level, message));
        if let Err(err) = ops_log.append(&record) {
            eprintln!("tower ops log write failed: {err:#}");
        }
    }

    /// A flight joined a queue.
    pub fn flight_enqueued(&self, operation: OperationType, queued: &QueuedEntry) {
        let flight = &queued.entry.flight_code;
        self.note(LogLevel::Debug, "flight enqueued", |record| {
            record
                .operation(operation.label())
                .flight(flight.as_str())
                .seq(queued.seq)
        });
        self.emit(TowerEvent::FlightEnqueued {
            operation: operation.label().into(),
            flight: flight.clone(),
            seq: queued.seq,
            emergency: queued.entry.emergency,
        });
    }

    /// A clearance request was decided.
    pub fn decision(&self, outcome: &ClearanceOutcome) {
        let event = match outcome {
            ClearanceOutcome::Cleared {
                operation,
                runway,
                seq,
                entry,
            } => {
                self.note(LogLevel::Info, "cleared", |record| {
                    record
                        .operation(operation.label())
                        .flight(entry.flight_code.as_str())
                        .seq(*seq)
                        .runway(runway.as_str())
                });
                TowerEvent::Cleared {
                    operation: operation.label().into(),
                    flight: entry.flight_code.clone(),
                    seq: *seq,
                    runway: runway.clone(),
                    emergency: entry.emergency,
                }
            }
            ClearanceOutcome::Denied {
                operation,
                runway,
                seq,
                entry,
                reason,
            } => {
                let reason = reason.to_string();
                self.note(LogLevel::Info, "denied", |record| {
                    record
                        .operation(operation.label())
                        .flight(entry.flight_code.as_str())
                        .seq(*seq)
                        .runway(runway.as_str())
                        .detail("reason", reason.as_str())
                });
                TowerEvent::Denied {
                    operation: operation.label().into(),
                    flight: entry.flight_code.clone(),
                    seq: *seq,
                    runway: runway.clone(),
                    reason,
                }
            }
            ClearanceOutcome::QueueEmpty { operation } => TowerEvent::QueueEmpty {
                operation: operation.label().into(),
            },
        };
        self.emit(event);
    }

    /// A shift report was written to `path`.
    pub fn report_written(&self, report: &ShiftReport, path: &Path) {
        let path = path.display().to_string();
        self.note(LogLevel::Info, "shift report written", |record| {
            record.detail("path", path.as_str())
        });
        self.emit(TowerEvent::ReportWritten {
            path,
            cleared: report.cleared,
            denied: report.denied,
            emergencies: report.emergencies,
        });
    }

    /// Blocks until every event emitted so far has been handed to the
    /// publisher.
    pub(crate) fn flush(&self) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.flush();
        }
    }

    fn emit(&self, event: TowerEvent) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.send(EventEnvelope::new(self.station.as_ref(), event));
        }
    }
}

enum Dispatch {
    Publish(EventEnvelope),
    Flush(mpsc::Sender<()>),
}

struct Dispatcher {
    queue: Mutex<Option<mpsc::Sender<Dispatch>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    fn spawn(publisher: Arc<dyn EventPublisher>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("starting event runtime")?;
        let (queue, pending) = mpsc::channel::<Dispatch>();
        let worker = thread::Builder::new()
            .name("tower-events".into())
            .spawn(move || {
                for dispatch in pending {
                    match dispatch {
                        Dispatch::Publish(envelope) => {
                            if let Err(err) = runtime.block_on(publisher.publish(envelope)) {
                                eprintln!("tower event publish failed: {err:#}");
                            }
                        }
                        Dispatch::Flush(done) => {
                            if done.send(()).is_err() {
                                eprintln!("tower event flush abandoned");
                            }
                        }
                    }
                }
            })
            .context("spawning event worker")?;
        Ok(Self {
            queue: Mutex::new(Some(queue)),
            worker: Mutex::new(Some(worker)),
        })
    }

    fn send(&self, envelope: EventEnvelope) {
        let delivered = self
            .queue
            .lock()
            .as_ref()
            .is_some_and(|queue| queue.send(Dispatch::Publish(envelope)).is_ok());
        if !delivered {
            eprintln!("tower event worker stopped; event dropped");
        }
    }

    fn flush(&self) {
        let (done, wait) = mpsc::channel();
        let queued = self
            .queue
            .lock()
            .as_ref()
            .is_some_and(|queue| queue.send(Dispatch::Flush(done)).is_ok());
        if queued && wait.recv().is_err() {
            eprintln!("tower event worker stopped before flush");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop once the backlog is published.
        drop(self.queue.lock().take());
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                eprintln!("tower event worker panicked");
            }
        }
    }
}
