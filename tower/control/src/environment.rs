use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TowerError},
    model::RunwayStatus,
};

/// Runway identifier to status, ordered by identifier.
pub type RunwayStatusMap = BTreeMap<String, RunwayStatus>;

/// Free-text operational notice (NOTAM line).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestrictionNotice {
    /// Notice text as published.
    pub text: String,
}

/// Free-text weather observation (METAR line).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WeatherObservation {
    /// Observation text as published.
    pub text: String,
}

/// Everything a single clearance decision reads, captured at one instant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    /// Runway availability.
    pub runways: RunwayStatusMap,
    /// Active notices, in publication order.
    pub restrictions: Vec<RestrictionNotice>,
    /// Weather observations, in publication order.
    pub weather: Vec<WeatherObservation>,
}

/// Read-only view of externally owned airfield state.
///
/// Implementations must be safe to read concurrently without extra locking.
pub trait EnvironmentSource: Send + Sync {
    /// Current runway statuses.
    fn runway_status(&self) -> Result<RunwayStatusMap>;
    /// Active restriction notices.
    fn active_restrictions(&self) -> Result<Vec<RestrictionNotice>>;
    /// Weather observations.
    fn weather_observations(&self) -> Result<Vec<WeatherObservation>>;

    /// Captures all three reads together.
    fn snapshot(&self) -> Result<EnvironmentSnapshot> {
        Ok(EnvironmentSnapshot {
            runways: self.runway_status()?,
            restrictions: self.active_restrictions()?,
            weather: self.weather_observations()?,
        })
    }
}

/// Reads runway, notice and weather files on every call, so callers never
/// see stale state.
#[derive(Debug, Clone)]
pub struct FileEnvironment {
    runways: PathBuf,
    notams: PathBuf,
    metars: PathBuf,
    open_statuses: Vec<String>,
}

impl FileEnvironment {
    /// Creates a reader over the three files. `open_statuses` lists the
    /// status words that mean a runway is open (e.g. `OPEN`, `ABERTA`).
    #[must_use]
    pub fn new(
        runways: impl Into<PathBuf>,
        notams: impl Into<PathBuf>,
        metars: impl Into<PathBuf>,
        open_statuses: Vec<String>,
    ) -> Self {
        Self {
            runways: runways.into(),
            notams: notams.into(),
            metars: metars.into(),
            open_statuses,
        }
    }

    fn status_of(&self, word: &str) -> RunwayStatus {
        if self.open_statuses.iter().any(|open| open == word) {
            RunwayStatus::Open
        } else {
            RunwayStatus::Closed
        }
    }
}

/// Reads the non-empty, trimmed lines of a file. A missing file reads as empty.
fn read_lines(path: &Path) -> Result<Vec<String>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToOwned::to_owned)
            .collect()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(TowerError::storage(
            format!("reading {}", path.display()),
            err,
        )),
    }
}

impl EnvironmentSource for FileEnvironment {
    fn runway_status(&self) -> Result<RunwayStatusMap> {
        let origin = self.runways.display().to_string();
        let raw = match fs::read_to_string(&self.runways) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(RunwayStatusMap::new()),
            Err(err) => return Err(TowerError::storage(format!("reading {origin}"), err)),
        };
        let mut runways = RunwayStatusMap::new();
        for (idx, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((runway, status)) = line.split_once(',') else {
                return Err(TowerError::malformed(
                    &origin,
                    idx + 1,
                    "expected `runway,status`",
                ));
            };
            runways.insert(runway.trim().to_string(), self.status_of(status.trim()));
        }
        Ok(runways)
    }

    fn active_restrictions(&self) -> Result<Vec<RestrictionNotice>> {
        Ok(read_lines(&self.notams)?
            .into_iter()
            .map(|text| RestrictionNotice { text })
            .collect())
    }

    fn weather_observations(&self) -> Result<Vec<WeatherObservation>> {
        Ok(read_lines(&self.metars)?
            .into_iter()
            .map(|text| WeatherObservation { text })
            .collect())
    }
}

/// In-memory environment, updated explicitly by its owner.
#[derive(Debug, Default)]
pub struct StaticEnvironment {
    state: RwLock<EnvironmentSnapshot>,
}

impl StaticEnvironment {
    /// Creates an environment with no runways, notices or observations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a runway's status.
    pub fn set_runway(&self, runway: impl Into<String>, status: RunwayStatus) {
        self.state.write().runways.insert(runway.into(), status);
    }

    /// Publishes a restriction notice.
    pub fn add_restriction(&self, text: impl Into<String>) {
        self.state
            .write()
            .restrictions
            .push(RestrictionNotice { text: text.into() });
    }

    /// Publishes a weather observation.
    pub fn add_weather(&self, text: impl Into<String>) {
        self.state
            .write()
            .weather
            .push(WeatherObservation { text: text.into() });
    }

    /// Withdraws every notice and observation.
    pub fn clear_bulletins(&self) {
        let mut state = self.state.write();
        state.restrictions.clear();
        state.weather.clear();
    }
}

impl EnvironmentSource for StaticEnvironment {
    fn runway_status(&self) -> Result<RunwayStatusMap> {
        Ok(self.state.read().runways.clone())
    }

    fn active_restrictions(&self) -> Result<Vec<RestrictionNotice>> {
        Ok(self.state.read().restrictions.clone())
    }

    fn weather_observations(&self) -> Result<Vec<WeatherObservation>> {
        Ok(self.state.read().weather.clone())
    }

    fn snapshot(&self) -> Result<EnvironmentSnapshot> {
        Ok(self.state.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn file_env(dir: &Path) -> FileEnvironment {
        FileEnvironment::new(
            dir.join("runways.txt"),
            dir.join("notam.txt"),
            dir.join("metar.txt"),
            vec!["OPEN".into(), "ABERTA".into()],
        )
    }

    #[test]
    fn missing_files_read_as_empty() {
        let dir = tempdir().unwrap();
        let snapshot = file_env(dir.path()).snapshot().unwrap();
        assert!(snapshot.runways.is_empty());
        assert!(snapshot.restrictions.is_empty());
        assert!(snapshot.weather.is_empty());
    }

    #[test]
    fn reads_runway_statuses() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("runways.txt"),
            "09,OPEN\n27,CLOSED\n\n10/28, ABERTA\n",
        )
        .unwrap();
        let runways = file_env(dir.path()).runway_status().unwrap();
        assert_eq!(runways["09"], RunwayStatus::Open);
        assert_eq!(runways["27"], RunwayStatus::Closed);
        assert_eq!(runways["10/28"], RunwayStatus::Open);
    }

    #[test]
    fn runway_line_without_status_is_malformed() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("runways.txt"), "09,OPEN\n27\n").unwrap();
        let err = file_env(dir.path()).runway_status().unwrap_err();
        assert!(matches!(err, TowerError::MalformedData { line: 2, .. }));
    }

    #[test]
    fn bulletins_keep_file_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notam.txt"), "RWY 27 CLOSED\n\nTWY B WIP\n").unwrap();
        let notices = file_env(dir.path()).active_restrictions().unwrap();
        let texts: Vec<_> = notices.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(texts, vec!["RWY 27 CLOSED", "TWY B WIP"]);
    }

    #[test]
    fn static_environment_updates() {
        let env = StaticEnvironment::new();
        env.set_runway("09", RunwayStatus::Open);
        env.add_weather("VIS 4KM");
        let snapshot = env.snapshot().unwrap();
        assert_eq!(snapshot.runways.len(), 1);
        assert_eq!(snapshot.weather[0].text, "VIS 4KM");
        env.clear_bulletins();
        assert!(env.weather_observations().unwrap().is_empty());
    }
}
