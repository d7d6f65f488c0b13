use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Kind of runway operation a queue serves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Departures.
    Takeoff,
    /// Arrivals.
    Landing,
}

impl OperationType {
    /// Both operation types, in display order.
    pub const ALL: [Self; 2] = [Self::Takeoff, Self::Landing];

    /// Lowercase label used in file names and audit lines.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Takeoff => "takeoff",
            Self::Landing => "landing",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "takeoff" | "decolagem" => Ok(Self::Takeoff),
            "landing" | "pouso" => Ok(Self::Landing),
            other => Err(format!("unknown operation type {other:?}")),
        }
    }
}

/// Flight plan record as imported from the flight plans file. Read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Flight {
    /// Unique flight code.
    #[serde(rename = "flight", alias = "voo")]
    pub code: String,
    /// Origin aerodrome.
    #[serde(alias = "origem")]
    pub origin: String,
    /// Destination aerodrome.
    #[serde(alias = "destino")]
    pub destination: String,
    /// Scheduled departure time.
    pub etd: String,
    /// Scheduled arrival time.
    pub eta: String,
    /// Aircraft identifier, looked up in the fleet.
    #[serde(alias = "aeronave")]
    pub aircraft: String,
    /// Operation category (e.g. `REGULAR`, `EMERGENCIA`).
    #[serde(default, alias = "tipo")]
    pub kind: String,
    /// Informational urgency; higher is more urgent. Never used for queue order.
    #[serde(alias = "prioridade")]
    pub priority: i32,
    /// Runway the crew asked for.
    #[serde(alias = "pista_pref")]
    pub preferred_runway: String,
    /// Pilot registration, when the plan carries one.
    #[serde(default, alias = "piloto")]
    pub pilot: Option<String>,
}

impl Flight {
    /// Time the queue entry is scheduled for: ETD for departures, ETA for arrivals.
    #[must_use]
    pub fn scheduled_time(&self, operation: OperationType) -> &str {
        match operation {
            OperationType::Takeoff => &self.etd,
            OperationType::Landing => &self.eta,
        }
    }

    /// Whether the category carries any of the emergency markers (case-insensitive).
    #[must_use]
    pub fn is_emergency(&self, markers: &[String]) -> bool {
        let kind = self.kind.to_uppercase();
        markers
            .iter()
            .any(|marker| !marker.is_empty() && kind.contains(&marker.to_uppercase()))
    }
}

/// Fleet record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AircraftRecord {
    /// Aircraft identifier (registration or fleet number).
    #[serde(rename = "aircraft", alias = "aeronave")]
    pub id: String,
    /// Aircraft model, if listed.
    #[serde(default, alias = "modelo")]
    pub model: Option<String>,
}

/// Pilot roster record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PilotRecord {
    /// Pilot registration.
    #[serde(alias = "matricula")]
    pub registration: String,
    /// Pilot name.
    #[serde(default, alias = "nome")]
    pub name: Option<String>,
    /// License reference.
    #[serde(default, alias = "licenca")]
    pub license: Option<String>,
}

/// Snapshot of a flight taken at enqueue time.
///
/// Persisted as `flightCode;scheduledTime;priority;preferredRunway`, with a
/// trailing `;EMERGENCY` field only for emergency flights.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueEntry {
    /// Flight code.
    pub flight_code: String,
    /// Scheduled time copied from the flight plan.
    pub scheduled_time: String,
    /// Informational priority.
    pub priority: i32,
    /// Preferred runway.
    pub preferred_runway: String,
    /// Emergency flag captured at enqueue.
    #[serde(default)]
    pub emergency: bool,
}

const EMERGENCY_FIELD: &str = "EMERGENCY";

impl QueueEntry {
    /// Builds the snapshot for a flight entering the given queue.
    #[must_use]
    pub fn from_flight(flight: &Flight, operation: OperationType, emergency: bool) -> Self {
        Self {
            flight_code: flight.code.clone(),
            scheduled_time: flight.scheduled_time(operation).to_string(),
            priority: flight.priority,
            preferred_runway: flight.preferred_runway.clone(),
            emergency,
        }
    }

    /// Renders the persisted line (without newline).
    #[must_use]
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "{};{};{};{}",
            self.flight_code, self.scheduled_time, self.priority, self.preferred_runway
        );
        if self.emergency {
            line.push(';');
            line.push_str(EMERGENCY_FIELD);
        }
        line
    }

    /// Parses a persisted line.
    pub fn parse_line(line: &str) -> Result<Self, String> {
        let fields: Vec<&str> = line.trim().split(';').collect();
        let emergency = match fields.len() {
            4 => false,
            5 if fields[4] == EMERGENCY_FIELD => true,
            5 => return Err(format!("unknown trailing field {:?}", fields[4])),
            n => return Err(format!("expected 4 fields, found {n}")),
        };
        if fields[0].is_empty() {
            return Err("empty flight code".into());
        }
        let priority = fields[2]
            .parse::<i32>()
            .map_err(|err| format!("priority {:?}: {err}", fields[2]))?;
        Ok(Self {
            flight_code: fields[0].to_string(),
            scheduled_time: fields[1].to_string(),
            priority,
            preferred_runway: fields[3].to_string(),
            emergency,
        })
    }
}

/// Runway availability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunwayStatus {
    /// Available for operations.
    Open,
    /// Anything other than open.
    Closed,
}

impl fmt::Display for RunwayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        })
    }
}
