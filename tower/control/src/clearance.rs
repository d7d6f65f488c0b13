use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    environment::EnvironmentSnapshot,
    model::{OperationType, QueueEntry, RunwayStatus},
    notices::{CueRestrictionMatcher, RestrictionMatcher, VisKmParser, VisibilityParser, VisibilityReading},
};

/// Default visibility minimum, in kilometers, for more than one queued operation.
pub const DEFAULT_VISIBILITY_THRESHOLD_KM: u32 = 6;

/// Why the head entry was not cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenialReason {
    /// Runway unknown or not open.
    RunwayNotOpen {
        /// Requested runway.
        runway: String,
    },
    /// A notice closes the runway.
    ActiveRestriction {
        /// Text of the first matching notice.
        notice: String,
    },
    /// Low visibility with more than one operation queued.
    RestrictedVisibility,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunwayNotOpen { runway } => write!(f, "runway {runway} not OPEN"),
            Self::ActiveRestriction { notice } => write!(f, "active restriction: {notice}"),
            Self::RestrictedVisibility => f.write_str("restricted visibility, single operation only"),
        }
    }
}

/// Verdict for the head entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Every check passed.
    Clear,
    /// The first failing check.
    Deny(DenialReason),
}

/// Decision plus the observations the weather check had to skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// The verdict.
    pub decision: Decision,
    /// Observations whose visibility figure could not be read.
    pub skipped_observations: Vec<String>,
}

/// Result of a clearance request, as returned to the workstation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClearanceOutcome {
    /// The head entry was cleared and removed from its queue.
    Cleared {
        /// Queue the entry left.
        operation: OperationType,
        /// Runway it was cleared for.
        runway: String,
        /// Queue sequence number of the entry.
        seq: u64,
        /// The cleared entry.
        entry: QueueEntry,
    },
    /// The head entry stays at the head.
    Denied {
        /// Queue evaluated.
        operation: OperationType,
        /// Requested runway.
        runway: String,
        /// Queue sequence number of the head entry.
        seq: u64,
        /// The head entry.
        entry: QueueEntry,
        /// First failing check.
        reason: DenialReason,
    },
    /// Nothing to evaluate.
    QueueEmpty {
        /// Queue evaluated.
        operation: OperationType,
    },
}

impl ClearanceOutcome {
    /// True only for a clearance.
    #[must_use]
    pub const fn is_cleared(&self) -> bool {
        matches!(self, Self::Cleared { .. })
    }

    /// Denial reason, if denied.
    #[must_use]
    pub const fn denial(&self) -> Option<&DenialReason> {
        match self {
            Self::Denied { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for ClearanceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cleared {
                operation,
                runway,
                entry,
                ..
            } => write!(
                f,
                "{operation} {} - CLEARED runway {runway}",
                entry.flight_code
            ),
            Self::Denied {
                operation,
                entry,
                reason,
                ..
            } => write!(f, "{operation} {} - DENIED: {reason}", entry.flight_code),
            Self::QueueEmpty { operation } => write!(f, "{operation} queue is empty"),
        }
    }
}

/// Evaluates the head entry against runway, restriction and weather state.
///
/// Checks run in that order and stop at the first failure.
#[derive(Debug, Clone)]
pub struct ClearanceEngine {
    restrictions: Arc<dyn RestrictionMatcher>,
    visibility: Arc<dyn VisibilityParser>,
    visibility_threshold_km: u32,
}

impl Default for ClearanceEngine {
    fn default() -> Self {
        Self::new(
            Arc::new(CueRestrictionMatcher::default()),
            Arc::new(VisKmParser),
            DEFAULT_VISIBILITY_THRESHOLD_KM,
        )
    }
}

impl ClearanceEngine {
    /// Creates an engine with explicit matching rules.
    #[must_use]
    pub fn new(
        restrictions: Arc<dyn RestrictionMatcher>,
        visibility: Arc<dyn VisibilityParser>,
        visibility_threshold_km: u32,
    ) -> Self {
        Self {
            restrictions,
            visibility,
            visibility_threshold_km,
        }
    }

    /// Decides on the head entry for `runway`, given how many entries the
    /// queue holds (head included).
    #[must_use]
    pub fn evaluate(&self, runway: &str, queue_len: usize, env: &EnvironmentSnapshot) -> Evaluation {
        let mut skipped_observations = Vec::new();
        let decision = self.decide(runway, queue_len, env, &mut skipped_observations);
        Evaluation {
            decision,
            skipped_observations,
        }
    }

    fn decide(
        &self,
        runway: &str,
        queue_len: usize,
        env: &EnvironmentSnapshot,
        skipped: &mut Vec<String>,
    ) -> Decision {
        if env.runways.get(runway) != Some(&RunwayStatus::Open) {
            return Decision::Deny(DenialReason::RunwayNotOpen {
                runway: runway.to_string(),
            });
        }

        if let Some(notice) = env
            .restrictions
            .iter()
            .find(|notice| self.restrictions.closes_runway(&notice.text, runway))
        {
            return Decision::Deny(DenialReason::ActiveRestriction {
                notice: notice.text.clone(),
            });
        }

        if self.visibility_restricted(env, skipped) && queue_len > 1 {
            return Decision::Deny(DenialReason::RestrictedVisibility);
        }

        Decision::Clear
    }

    /// Scans observations in order; the first figure below the threshold decides.
    fn visibility_restricted(&self, env: &EnvironmentSnapshot, skipped: &mut Vec<String>) -> bool {
        for observation in &env.weather {
            match self.visibility.parse(&observation.text) {
                VisibilityReading::Km(km) if km < self.visibility_threshold_km => return true,
                VisibilityReading::Km(_) | VisibilityReading::Absent => {}
                VisibilityReading::Malformed(_) => skipped.push(observation.text.clone()),
            }
        }
        false
    }
}
