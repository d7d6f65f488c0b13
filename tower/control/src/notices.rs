//! Matching rules for free-text restriction notices and weather observations.
//!
//! Both are plain substring conventions. They sit behind traits so the
//! clearance engine never looks at raw text itself.

use std::fmt;

/// Decides whether a restriction notice closes a runway.
pub trait RestrictionMatcher: Send + Sync + fmt::Debug {
    /// True when `notice` references `runway` and signals a closure.
    fn closes_runway(&self, notice: &str, runway: &str) -> bool;
}

/// Case-sensitive substring matcher: the notice must contain the runway
/// identifier and at least one closure cue.
#[derive(Debug, Clone)]
pub struct CueRestrictionMatcher {
    cues: Vec<String>,
}

impl CueRestrictionMatcher {
    /// Creates a matcher with the given closure cues.
    #[must_use]
    pub fn new(cues: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            cues: cues.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for CueRestrictionMatcher {
    fn default() -> Self {
        Self::new(["CLOSED", "FECHADA"])
    }
}

impl RestrictionMatcher for CueRestrictionMatcher {
    fn closes_runway(&self, notice: &str, runway: &str) -> bool {
        !runway.is_empty()
            && notice.contains(runway)
            && self.cues.iter().any(|cue| notice.contains(cue.as_str()))
    }
}

/// Result of looking for a visibility figure in an observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisibilityReading {
    /// The observation carries no visibility group.
    Absent,
    /// Visibility in kilometers.
    Km(u32),
    /// A visibility group is present but its figure is not a number.
    Malformed(String),
}

/// Extracts a visibility figure from a weather observation.
pub trait VisibilityParser: Send + Sync + fmt::Debug {
    /// Parses one observation.
    fn parse(&self, observation: &str) -> VisibilityReading;
}

/// Reads the figure between `VIS` and `KM`, e.g. `VIS 4KM` or `VIS 10`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VisKmParser;

impl VisibilityParser for VisKmParser {
    fn parse(&self, observation: &str) -> VisibilityReading {
        let Some(after) = observation.split("VIS").nth(1) else {
            return VisibilityReading::Absent;
        };
        let figure = after.split("KM").next().unwrap_or_default().trim();
        figure.parse::<u32>().map_or_else(
            |_| VisibilityReading::Malformed(figure.to_string()),
            VisibilityReading::Km,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_needs_runway_and_cue() {
        let matcher = CueRestrictionMatcher::default();
        assert!(matcher.closes_runway("NOTAM RWY 09 CLOSED FOR WORKS", "09"));
        assert!(matcher.closes_runway("PISTA 27 FECHADA", "27"));
        assert!(!matcher.closes_runway("RWY 09 CLOSED", "27"));
        assert!(!matcher.closes_runway("RWY 09 LIGHTS U/S", "09"));
    }

    #[test]
    fn closure_cue_is_case_sensitive() {
        let matcher = CueRestrictionMatcher::default();
        assert!(!matcher.closes_runway("rwy 09 closed", "09"));
    }

    #[test]
    fn parses_visibility_groups() {
        let parser = VisKmParser;
        assert_eq!(parser.parse("SBGR 101200Z VIS 4KM BR"), VisibilityReading::Km(4));
        assert_eq!(parser.parse("VIS 10"), VisibilityReading::Km(10));
        assert_eq!(parser.parse("SBGR 101200Z 09010KT CAVOK"), VisibilityReading::Absent);
        assert_eq!(
            parser.parse("VIS FOGKM"),
            VisibilityReading::Malformed("FOG".into())
        );
    }
}
