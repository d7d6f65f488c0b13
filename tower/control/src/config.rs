use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tower_logging::LogLevel;

use crate::{
    clearance::DEFAULT_VISIBILITY_THRESHOLD_KM,
    error::{Result, TowerError},
};

/// Tower deployment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TowerConfig {
    /// Directory holding reference data, environment files and queues.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory holding the audit trail and the operational log.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Directory shift reports are written to.
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
    /// File names inside the data and log directories.
    #[serde(default)]
    pub files: DataFiles,
    /// Clearance and classification rules.
    #[serde(default)]
    pub rules: ClearanceRules,
    /// Optional JSON-lines sink for decision events.
    #[serde(default)]
    pub event_log: Option<PathBuf>,
    /// Least severe level kept in the operational log.
    #[serde(default)]
    pub log_level: LogLevel,
}

impl Default for TowerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_dir: default_log_dir(),
            report_dir: default_report_dir(),
            files: DataFiles::default(),
            rules: ClearanceRules::default(),
            event_log: None,
            log_level: LogLevel::default(),
        }
    }
}

/// File names of every external input and output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFiles {
    /// Flight plans CSV.
    #[serde(default = "default_flights")]
    pub flights: String,
    /// Fleet CSV.
    #[serde(default = "default_fleet")]
    pub fleet: String,
    /// Pilot roster CSV.
    #[serde(default = "default_pilots")]
    pub pilots: String,
    /// Runway status file.
    #[serde(default = "default_runways")]
    pub runways: String,
    /// Restriction notices.
    #[serde(default = "default_notams")]
    pub notams: String,
    /// Weather observations.
    #[serde(default = "default_metars")]
    pub metars: String,
    /// Audit trail.
    #[serde(default = "default_audit")]
    pub audit: String,
    /// Operational JSON log.
    #[serde(default = "default_ops_log")]
    pub ops_log: String,
}

impl Default for DataFiles {
    fn default() -> Self {
        Self {
            flights: default_flights(),
            fleet: default_fleet(),
            pilots: default_pilots(),
            runways: default_runways(),
            notams: default_notams(),
            metars: default_metars(),
            audit: default_audit(),
            ops_log: default_ops_log(),
        }
    }
}

/// Text cues and thresholds the clearance procedure runs on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearanceRules {
    /// Visibility below this many kilometers blocks a busy queue.
    #[serde(default = "default_visibility_threshold_km")]
    pub visibility_threshold_km: u32,
    /// Words marking a notice as a closure.
    #[serde(default = "default_closure_cues")]
    pub closure_cues: Vec<String>,
    /// Runway status words meaning open.
    #[serde(default = "default_open_statuses")]
    pub open_statuses: Vec<String>,
    /// Flight categories treated as emergencies.
    #[serde(default = "default_emergency_markers")]
    pub emergency_markers: Vec<String>,
}

impl Default for ClearanceRules {
    fn default() -> Self {
        Self {
            visibility_threshold_km: default_visibility_threshold_km(),
            closure_cues: default_closure_cues(),
            open_statuses: default_open_statuses(),
            emergency_markers: default_emergency_markers(),
        }
    }
}

impl TowerConfig {
    /// Loads configuration from a TOML file. Relative directories are
    /// resolved against the file's own directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|err| TowerError::storage(format!("reading {}", path.display()), err))?;
        let mut config: Self = toml::from_str(&raw)
            .map_err(|err| TowerError::Config(format!("parsing {}: {err}", path.display())))?;
        config.validate()?;
        let source_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.data_dir = resolve(&source_dir, &config.data_dir);
        config.log_dir = resolve(&source_dir, &config.log_dir);
        config.report_dir = resolve(&source_dir, &config.report_dir);
        if let Some(event_log) = &config.event_log {
            config.event_log = Some(resolve(&source_dir, event_log));
        }
        Ok(config)
    }

    /// Rejects rules the clearance procedure cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.rules.visibility_threshold_km == 0 {
            return Err(TowerError::Config(
                "rules.visibility_threshold_km must be positive".into(),
            ));
        }
        if self.rules.closure_cues.iter().all(|cue| cue.trim().is_empty()) {
            return Err(TowerError::Config("rules.closure_cues is empty".into()));
        }
        if self.rules.open_statuses.iter().all(|s| s.trim().is_empty()) {
            return Err(TowerError::Config("rules.open_statuses is empty".into()));
        }
        Ok(())
    }

    /// Flight plans file.
    #[must_use]
    pub fn flights_path(&self) -> PathBuf {
        self.data_dir.join(&self.files.flights)
    }

    /// Fleet file.
    #[must_use]
    pub fn fleet_path(&self) -> PathBuf {
        self.data_dir.join(&self.files.fleet)
    }

    /// Pilot roster file.
    #[must_use]
    pub fn pilots_path(&self) -> PathBuf {
        self.data_dir.join(&self.files.pilots)
    }

    /// Runway status file.
    #[must_use]
    pub fn runways_path(&self) -> PathBuf {
        self.data_dir.join(&self.files.runways)
    }

    /// Restriction notices file.
    #[must_use]
    pub fn notams_path(&self) -> PathBuf {
        self.data_dir.join(&self.files.notams)
    }

    /// Weather observations file.
    #[must_use]
    pub fn metars_path(&self) -> PathBuf {
        self.data_dir.join(&self.files.metars)
    }

    /// Directory the queue stores live in.
    #[must_use]
    pub fn queue_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Audit trail file.
    #[must_use]
    pub fn audit_path(&self) -> PathBuf {
        self.log_dir.join(&self.files.audit)
    }

    /// Operational JSON log.
    #[must_use]
    pub fn ops_log_path(&self) -> PathBuf {
        self.log_dir.join(&self.files.ops_log)
    }

    /// Reference data files an import cannot do without, in check order.
    #[must_use]
    pub fn required_files(&self) -> Vec<PathBuf> {
        vec![
            self.flights_path(),
            self.fleet_path(),
            self.runways_path(),
        ]
    }
}

fn resolve(base: &Path, candidate: &Path) -> PathBuf {
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_flights() -> String {
    "flight_plans.csv".into()
}

fn default_fleet() -> String {
    "fleet.csv".into()
}

fn default_pilots() -> String {
    "pilots.csv".into()
}

fn default_runways() -> String {
    "runways.txt".into()
}

fn default_notams() -> String {
    "notam.txt".into()
}

fn default_metars() -> String {
    "metar.txt".into()
}

fn default_audit() -> String {
    "tower.log".into()
}

fn default_ops_log() -> String {
    "tower.ops.jsonl".into()
}

const fn default_visibility_threshold_km() -> u32 {
    DEFAULT_VISIBILITY_THRESHOLD_KM
}

fn default_closure_cues() -> Vec<String> {
    vec!["CLOSED".into(), "FECHADA".into()]
}

fn default_open_statuses() -> Vec<String> {
    vec!["OPEN".into(), "ABERTA".into()]
}

fn default_emergency_markers() -> Vec<String> {
    vec!["EMERGENCY".into(), "EMERGENCIA".into()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tower.toml");
        fs::write(&path, "").unwrap();
        let config = TowerConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, dir.path().join("data"));
        assert_eq!(config.audit_path(), dir.path().join("logs").join("tower.log"));
        assert_eq!(config.rules.visibility_threshold_km, 6);
        assert_eq!(config.rules.open_statuses, vec!["OPEN", "ABERTA"]);
        assert!(config.event_log.is_none());
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn overrides_and_absolute_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tower.toml");
        let abs = dir.path().join("elsewhere");
        fs::write(
            &path,
            format!(
                "data_dir = {:?}\nevent_log = \"events.jsonl\"\nlog_level = \"WARN\"\n\n[files]\nflights = \"planos.csv\"\n\n[rules]\nvisibility_threshold_km = 5\n",
                abs.display().to_string()
            ),
        )
        .unwrap();
        let config = TowerConfig::load(&path).unwrap();
        assert_eq!(config.flights_path(), abs.join("planos.csv"));
        assert_eq!(config.fleet_path(), abs.join("fleet.csv"));
        assert_eq!(config.event_log, Some(dir.path().join("events.jsonl")));
        assert_eq!(config.rules.visibility_threshold_km, 5);
        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.rules.closure_cues, vec!["CLOSED", "FECHADA"]);
    }

    #[test]
    fn rejects_zero_threshold() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tower.toml");
        fs::write(&path, "[rules]\nvisibility_threshold_km = 0\n").unwrap();
        assert!(matches!(
            TowerConfig::load(&path).unwrap_err(),
            TowerError::Config(_)
        ));
    }

    #[test]
    fn rejects_empty_open_statuses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tower.toml");
        fs::write(&path, "[rules]\nopen_statuses = []\n").unwrap();
        assert!(matches!(
            TowerConfig::load(&path).unwrap_err(),
            TowerError::Config(_)
        ));
    }

    #[test]
    fn missing_file_is_a_storage_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            TowerConfig::load(dir.path().join("absent.toml")).unwrap_err(),
            TowerError::Storage { .. }
        ));
    }
}
