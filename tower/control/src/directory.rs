use std::{
    collections::HashMap,
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;

use crate::{
    error::{Result, TowerError},
    model::{AircraftRecord, Flight, PilotRecord},
};

/// Lookups the tower needs from imported reference data.
pub trait Directory: Send + Sync {
    /// Flight plan by code.
    fn find_flight(&self, code: &str) -> Option<Flight>;
    /// Fleet record by aircraft identifier.
    fn find_aircraft(&self, id: &str) -> Option<AircraftRecord>;
    /// Pilot by registration.
    fn find_pilot(&self, registration: &str) -> Option<PilotRecord>;
    /// Every flight plan, in import order.
    fn flights(&self) -> Vec<Flight>;
    /// Re-reads the backing data. Sources without backing data do nothing.
    fn reload(&self) -> Result<()> {
        Ok(())
    }
}

/// One consistent set of imported reference data.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    flights: Vec<Flight>,
    fleet: HashMap<String, AircraftRecord>,
    pilots: HashMap<String, PilotRecord>,
}

impl ReferenceData {
    /// Builds a data set from records.
    #[must_use]
    pub fn new(
        flights: Vec<Flight>,
        fleet: impl IntoIterator<Item = AircraftRecord>,
        pilots: impl IntoIterator<Item = PilotRecord>,
    ) -> Self {
        Self {
            flights,
            fleet: fleet.into_iter().map(|a| (a.id.clone(), a)).collect(),
            pilots: pilots
                .into_iter()
                .map(|p| (p.registration.clone(), p))
                .collect(),
        }
    }

    fn find_flight(&self, code: &str) -> Option<Flight> {
        self.flights.iter().find(|f| f.code == code).cloned()
    }
}

/// Reference data read from CSV files, swapped atomically on reload.
#[derive(Debug)]
pub struct CsvDirectory {
    flights_path: PathBuf,
    fleet_path: PathBuf,
    pilots_path: PathBuf,
    data: RwLock<Arc<ReferenceData>>,
}

impl CsvDirectory {
    /// Loads flight plans and fleet (both required) and the pilot roster
    /// (optional; a missing roster loads as empty).
    pub fn load(
        flights: impl Into<PathBuf>,
        fleet: impl Into<PathBuf>,
        pilots: impl Into<PathBuf>,
    ) -> Result<Self> {
        let directory = Self {
            flights_path: flights.into(),
            fleet_path: fleet.into(),
            pilots_path: pilots.into(),
            data: RwLock::new(Arc::default()),
        };
        directory.reload()?;
        Ok(directory)
    }

    /// The data set currently in use.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ReferenceData> {
        Arc::clone(&self.data.read())
    }

    fn read_all(&self) -> Result<ReferenceData> {
        let flights = read_csv::<Flight>(&self.flights_path)?;
        let fleet = read_csv::<AircraftRecord>(&self.fleet_path)?;
        let pilots = if self.pilots_path.exists() {
            read_csv::<PilotRecord>(&self.pilots_path)?
        } else {
            Vec::new()
        };
        Ok(ReferenceData::new(flights, fleet, pilots))
    }
}

impl Directory for CsvDirectory {
    fn find_flight(&self, code: &str) -> Option<Flight> {
        self.snapshot().find_flight(code)
    }

    fn find_aircraft(&self, id: &str) -> Option<AircraftRecord> {
        self.snapshot().fleet.get(id).cloned()
    }

    fn find_pilot(&self, registration: &str) -> Option<PilotRecord> {
        self.snapshot().pilots.get(registration).cloned()
    }

    fn flights(&self) -> Vec<Flight> {
        self.snapshot().flights.clone()
    }

    fn reload(&self) -> Result<()> {
        let fresh = self.read_all()?;
        *self.data.write() = Arc::new(fresh);
        Ok(())
    }
}

fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let origin = path.display().to_string();
    let file =
        File::open(path).map_err(|err| TowerError::storage(format!("opening {origin}"), err))?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);
    let mut records = Vec::new();
    for record in reader.deserialize::<T>() {
        let record = record.map_err(|err| {
            let line = err
                .position()
                .map_or(0, |pos| usize::try_from(pos.line()).unwrap_or(usize::MAX));
            let reason = err.to_string();
            match err.into_kind() {
                csv::ErrorKind::Io(io_err) => {
                    TowerError::storage(format!("reading {origin}"), io_err)
                }
                _ => TowerError::malformed(&origin, line, reason),
            }
        })?;
        records.push(record);
    }
    Ok(records)
}

/// In-memory directory for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    data: RwLock<ReferenceData>,
}

impl MemoryDirectory {
    /// Empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a flight plan.
    pub fn add_flight(&self, flight: Flight) {
        let mut data = self.data.write();
        data.flights.retain(|f| f.code != flight.code);
        data.flights.push(flight);
    }

    /// Adds a fleet record.
    pub fn add_aircraft(&self, aircraft: AircraftRecord) {
        self.data.write().fleet.insert(aircraft.id.clone(), aircraft);
    }

    /// Adds a pilot.
    pub fn add_pilot(&self, pilot: PilotRecord) {
        self.data
            .write()
            .pilots
            .insert(pilot.registration.clone(), pilot);
    }
}

impl Directory for MemoryDirectory {
    fn find_flight(&self, code: &str) -> Option<Flight> {
        self.data.read().find_flight(code)
    }

    fn find_aircraft(&self, id: &str) -> Option<AircraftRecord> {
        self.data.read().fleet.get(id).cloned()
    }

    fn find_pilot(&self, registration: &str) -> Option<PilotRecord> {
        self.data.read().pilots.get(registration).cloned()
    }

    fn flights(&self) -> Vec<Flight> {
        self.data.read().flights.clone()
    }
}

/// Column used to order a flight listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Flight code, ascending.
    #[default]
    Flight,
    /// Departure time, ascending.
    Etd,
    /// Operation category, ascending.
    Kind,
    /// Priority, most urgent first.
    Priority,
}

impl std::str::FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "flight" | "voo" => Ok(Self::Flight),
            "etd" => Ok(Self::Etd),
            "kind" | "tipo" => Ok(Self::Kind),
            "priority" | "prioridade" => Ok(Self::Priority),
            other => Err(format!("unknown sort key {other:?}")),
        }
    }
}

/// Stable sort of a flight listing. Display only; queues are never reordered.
pub fn sort_flights(flights: &mut [Flight], key: SortKey) {
    match key {
        SortKey::Flight => flights.sort_by(|a, b| a.code.cmp(&b.code)),
        SortKey::Etd => flights.sort_by(|a, b| a.etd.cmp(&b.etd)),
        SortKey::Kind => flights.sort_by(|a, b| a.kind.cmp(&b.kind)),
        SortKey::Priority => flights.sort_by(|a, b| b.priority.cmp(&a.priority)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, io};
    use tempfile::tempdir;

    const FLIGHTS: &str = "voo,origem,destino,etd,eta,aeronave,tipo,prioridade,pista_pref\n\
        TAM101,SBGR,SBRJ,10:00,11:00,PR-ABC,REGULAR,5,09\n\
        GLO202,SBRJ,SBGR,09:30,10:30,PR-XYZ,EMERGENCIA,9,27\n";

    fn write_reference(dir: &Path) {
        fs::write(dir.join("flights.csv"), FLIGHTS).unwrap();
        fs::write(dir.join("fleet.csv"), "aeronave,modelo\nPR-ABC,A320\n").unwrap();
    }

    fn load(dir: &Path) -> Result<CsvDirectory> {
        CsvDirectory::load(
            dir.join("flights.csv"),
            dir.join("fleet.csv"),
            dir.join("pilots.csv"),
        )
    }

    #[test]
    fn loads_portuguese_headers() {
        let dir = tempdir().unwrap();
        write_reference(dir.path());
        let directory = load(dir.path()).unwrap();
        let flight = directory.find_flight("GLO202").unwrap();
        assert_eq!(flight.priority, 9);
        assert_eq!(flight.kind, "EMERGENCIA");
        assert_eq!(flight.pilot, None);
        assert!(directory.find_aircraft("PR-ABC").is_some());
        assert!(directory.find_aircraft("PR-XYZ").is_none());
        assert!(directory.find_pilot("P-1").is_none());
    }

    #[test]
    fn reload_picks_up_new_plans() {
        let dir = tempdir().unwrap();
        write_reference(dir.path());
        let directory = load(dir.path()).unwrap();
        let before = directory.snapshot();
        fs::write(
            dir.path().join("flights.csv"),
            format!("{FLIGHTS}AZU303,SBKP,SBGR,12:00,12:40,PR-ABC,REGULAR,1,09\n"),
        )
        .unwrap();
        assert!(directory.find_flight("AZU303").is_none());
        directory.reload().unwrap();
        assert!(directory.find_flight("AZU303").is_some());
        assert_eq!(before.flights.len(), 2);
    }

    #[test]
    fn missing_flight_plans_fail() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load(dir.path()).unwrap_err(),
            TowerError::Storage { source, .. } if source.kind() == io::ErrorKind::NotFound
        ));
    }

    #[test]
    fn bad_priority_is_malformed() {
        let dir = tempdir().unwrap();
        write_reference(dir.path());
        fs::write(
            dir.path().join("flights.csv"),
            "voo,origem,destino,etd,eta,aeronave,tipo,prioridade,pista_pref\n\
             TAM101,SBGR,SBRJ,10:00,11:00,PR-ABC,REGULAR,high,09\n",
        )
        .unwrap();
        assert!(matches!(
            load(dir.path()).unwrap_err(),
            TowerError::MalformedData { line: 2, .. }
        ));
    }

    #[test]
    fn sorts_by_priority_descending() {
        let dir = tempdir().unwrap();
        write_reference(dir.path());
        let mut flights = load(dir.path()).unwrap().flights();
        sort_flights(&mut flights, SortKey::Priority);
        assert_eq!(flights[0].code, "GLO202");
        sort_flights(&mut flights, SortKey::Flight);
        assert_eq!(flights[0].code, "GLO202");
        sort_flights(&mut flights, SortKey::Etd);
        assert_eq!(flights[0].etd, "09:30");
    }
}
