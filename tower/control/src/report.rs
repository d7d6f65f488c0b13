use std::{
    fmt,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    audit::{CLEARED_MARKER, DENIED_MARKER, FIELD_SEPARATOR},
    error::{Result, TowerError},
};

/// Case-insensitive emergency cue; covers `EMERGENCY` and `EMERGENCIA`.
const EMERGENCY_CUE: &str = "EMERGENC";

/// Inclusive time bounds for the events a report covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportWindow {
    /// Earliest event included.
    pub from: Option<DateTime<Utc>>,
    /// Latest event included.
    pub to: Option<DateTime<Utc>>,
}

impl ReportWindow {
    /// Unbounded window.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            from: None,
            to: None,
        }
    }

    const fn is_bounded(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }

    fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| ts >= from) && self.to.map_or(true, |to| ts <= to)
    }
}

/// Aggregate of clearance outcomes over an audit history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftReport {
    /// When this report was produced.
    pub generated_at: DateTime<Utc>,
    /// Window requested by the caller.
    pub requested: ReportWindow,
    /// First and last timestamps of the events actually counted.
    pub covered: ReportWindow,
    /// Clearances.
    pub cleared: u64,
    /// Denials.
    pub denied: u64,
    /// Clearances of flights flagged emergency.
    pub emergencies: u64,
    /// Denial reason to count, in first-seen order.
    pub denial_reasons: IndexMap<String, u64>,
}

impl ShiftReport {
    /// Single pass over audit lines. Does not touch the history.
    ///
    /// Lines are classified by their outcome text: `CLEARED...` counts a
    /// clearance, `DENIED: <reason>` a denial bucketed by the exact reason.
    /// Lines whose timestamp cannot be read are only counted by an
    /// unbounded window.
    #[must_use]
    pub fn generate<S: AsRef<str>>(lines: &[S], window: ReportWindow) -> Self {
        let mut report = Self {
            generated_at: Utc::now(),
            requested: window,
            covered: ReportWindow::all(),
            cleared: 0,
            denied: 0,
            emergencies: 0,
            denial_reasons: IndexMap::new(),
        };

        for line in lines {
            let line = line.as_ref().trim_end();
            if line.is_empty() {
                continue;
            }
            let timestamp = line_timestamp(line);
            match timestamp {
                Some(ts) if !window.contains(ts) => continue,
                None if window.is_bounded() => continue,
                _ => {}
            }

            let outcome = line.splitn(5, FIELD_SEPARATOR).nth(4).unwrap_or(line);
            if outcome.starts_with(CLEARED_MARKER) {
                report.cleared += 1;
                if outcome.to_uppercase().contains(EMERGENCY_CUE) {
                    report.emergencies += 1;
                }
            } else if let Some(reason) = outcome.strip_prefix(DENIED_MARKER) {
                report.denied += 1;
                *report.denial_reasons.entry(reason.to_string()).or_insert(0) += 1;
            } else {
                continue;
            }

            if let Some(ts) = timestamp {
                report.covered.from = Some(report.covered.from.map_or(ts, |from| from.min(ts)));
                report.covered.to = Some(report.covered.to.map_or(ts, |to| to.max(ts)));
            }
        }
        report
    }

    /// Plain-text rendering.
    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Writes the rendering to a new file in `dir` and returns its path.
    /// Never overwrites an earlier report.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|err| TowerError::storage(format!("creating {}", dir.display()), err))?;
        let stem = format!("shift_{}", self.generated_at.format("%Y%m%d-%H%M%S"));
        let body = self.render();
        for attempt in 0_u32.. {
            let path = if attempt == 0 {
                dir.join(format!("{stem}.txt"))
            } else {
                dir.join(format!("{stem}-{attempt}.txt"))
            };
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(body.as_bytes())
                        .and_then(|()| file.sync_all())
                        .map_err(|err| {
                            TowerError::storage(format!("writing {}", path.display()), err)
                        })?;
                    return Ok(path);
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                Err(err) => {
                    return Err(TowerError::storage(
                        format!("creating {}", path.display()),
                        err,
                    ))
                }
            }
        }
        Err(TowerError::storage(
            format!("naming report in {}", dir.display()),
            io::Error::new(io::ErrorKind::AlreadyExists, "report names exhausted"),
        ))
    }
}

fn line_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let raw = line.split(FIELD_SEPARATOR).next()?;
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

impl fmt::Display for ShiftReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = |bound: Option<DateTime<Utc>>| {
            bound.map_or_else(|| "-".to_string(), |ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        };
        writeln!(
            f,
            "SHIFT REPORT - {}",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(
            f,
            "Window: {} .. {}\n",
            bound(self.covered.from),
            bound(self.covered.to)
        )?;
        writeln!(f, "Total cleared: {}", self.cleared)?;
        writeln!(f, "Total denied: {}", self.denied)?;
        writeln!(f, "Emergencies handled: {}\n", self.emergencies)?;
        writeln!(f, "Denial reasons:")?;
        for (reason, count) in &self.denial_reasons {
            writeln!(f, "  {reason}: {count}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const HISTORY: &[&str] = &[
        "2026-10-19T09:00:00.000Z | takeoff | TAM101 | 0 | ENQUEUED",
        "2026-10-19T09:05:00.000Z | takeoff | TAM101 | 0 | DENIED: runway 27 not OPEN",
        "2026-10-19T09:10:00.000Z | takeoff | TAM101 | 0 | CLEARED",
        "2026-10-19T09:20:00.000Z | landing | GLO9 | 3 | CLEARED EMERGENCY",
        "2026-10-19T09:30:00.000Z | landing | AZU4 | 4 | DENIED: restricted visibility, single operation only",
        "2026-10-19T09:40:00.000Z | landing | AZU4 | 4 | DENIED: runway 27 not OPEN",
        "2026-10-19T09:50:00.000Z | takeoff | - | - | QUEUE_EMPTY",
    ];

    #[test]
    fn counts_outcomes_and_reasons() {
        let report = ShiftReport::generate(HISTORY, ReportWindow::all());
        assert_eq!(report.cleared, 2);
        assert_eq!(report.denied, 3);
        assert_eq!(report.emergencies, 1);
        assert_eq!(report.denial_reasons["runway 27 not OPEN"], 2);
        assert_eq!(
            report.denial_reasons.keys().next().map(String::as_str),
            Some("runway 27 not OPEN")
        );
        assert_eq!(
            report.covered.from.unwrap().to_rfc3339(),
            "2026-10-19T09:05:00+00:00"
        );
    }

    #[test]
    fn generating_twice_gives_identical_counts() {
        let first = ShiftReport::generate(HISTORY, ReportWindow::all());
        let second = ShiftReport::generate(HISTORY, ReportWindow::all());
        assert_eq!(first.cleared, second.cleared);
        assert_eq!(first.denied, second.denied);
        assert_eq!(first.emergencies, second.emergencies);
        assert_eq!(first.denial_reasons, second.denial_reasons);
        assert_eq!(first.covered, second.covered);
    }

    #[test]
    fn window_limits_events() {
        let window = ReportWindow {
            from: Some("2026-10-19T09:10:00Z".parse().unwrap()),
            to: Some("2026-10-19T09:30:00Z".parse().unwrap()),
        };
        let report = ShiftReport::generate(HISTORY, window);
        assert_eq!(report.cleared, 2);
        assert_eq!(report.denied, 1);
        assert_eq!(report.denial_reasons.len(), 1);
    }

    #[test]
    fn emergency_marker_is_case_insensitive() {
        let lines = ["2026-10-19T09:00:00.000Z | landing | X1 | 0 | CLEARED emergencia"];
        assert_eq!(ShiftReport::generate(&lines, ReportWindow::all()).emergencies, 1);
    }

    #[test]
    fn rendering_lists_totals_then_reasons() {
        let report = ShiftReport::generate(HISTORY, ReportWindow::all());
        let text = report.render();
        let lines: Vec<_> = text.lines().collect();
        assert!(lines[0].starts_with("SHIFT REPORT - 2"));
        assert_eq!(lines[1], "Window: 2026-10-19 09:05:00 .. 2026-10-19 09:40:00");
        assert_eq!(
            &lines[3..],
            &[
                "Total cleared: 2",
                "Total denied: 3",
                "Emergencies handled: 1",
                "",
                "Denial reasons:",
                "  runway 27 not OPEN: 2",
                "  restricted visibility, single operation only: 1",
            ]
        );
        assert_eq!(text, report.to_string());
    }

    #[test]
    fn each_write_creates_a_new_file() {
        let dir = tempdir().unwrap();
        let report = ShiftReport::generate(HISTORY, ReportWindow::all());
        let first = report.write_to(dir.path()).unwrap();
        let second = report.write_to(dir.path()).unwrap();
        assert_ne!(first, second);
        let body = fs::read_to_string(second).unwrap();
        assert!(body.contains("Total cleared: 2"));
        assert!(body.contains("  runway 27 not OPEN: 2"));
    }
}
