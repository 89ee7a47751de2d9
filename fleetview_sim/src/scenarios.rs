//! Scenario catalogue for the console simulator.

use serde::{Deserialize, Serialize};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// SIM-001: Healthy backend, moving fleet
    SteadyFleet,

    /// SIM-002: Backend drops a share of requests
    FlakyBackend,

    /// SIM-003: Backend returns truncated JSON
    MalformedFeed,

    /// SIM-004: Operator keeps changing filters while polls stream in
    FilterChurn,

    /// SIM-005: Operator keeps selecting vehicles, some of which vanish
    SelectionChurn,

    /// SIM-006: Backend slower than the polling interval
    SlowBackend,

    /// SIM-007: The view is mounted and unmounted repeatedly
    Remount,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SteadyFleet,
            ScenarioId::FlakyBackend,
            ScenarioId::MalformedFeed,
            ScenarioId::FilterChurn,
            ScenarioId::SelectionChurn,
            ScenarioId::SlowBackend,
            ScenarioId::Remount,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SteadyFleet => "steady_fleet",
            ScenarioId::FlakyBackend => "flaky_backend",
            ScenarioId::MalformedFeed => "malformed_feed",
            ScenarioId::FilterChurn => "filter_churn",
            ScenarioId::SelectionChurn => "selection_churn",
            ScenarioId::SlowBackend => "slow_backend",
            ScenarioId::Remount => "remount",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SteadyFleet => "Healthy backend, fleet drives and churns, markers track it",
            ScenarioId::FlakyBackend => "30% of requests fail, last snapshot stays on the map",
            ScenarioId::MalformedFeed => "30% of bodies truncated, treated as failed cycles",
            ScenarioId::FilterChurn => "Random filter every cycle, minimal marker diffs",
            ScenarioId::SelectionChurn => "Random selections and marker clicks, no stale selection",
            ScenarioId::SlowBackend => "Latency 1.5x the interval, ticks skipped, order preserved",
            ScenarioId::Remount => "Five mount/unmount cycles on one page, nothing leaks",
        }
    }

    /// Transport failure rate the scenario runs with, if it overrides the config.
    pub fn failure_rate(&self) -> Option<f64> {
        match self {
            ScenarioId::FlakyBackend => Some(0.3),
            _ => None,
        }
    }

    /// Malformed-body rate the scenario runs with, if it overrides the config.
    pub fn malformed_rate(&self) -> Option<f64> {
        match self {
            ScenarioId::MalformedFeed => Some(0.3),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "steady_fleet" | "steadyfleet" | "sim-001" => Ok(ScenarioId::SteadyFleet),
            "flaky_backend" | "flakybackend" | "sim-002" => Ok(ScenarioId::FlakyBackend),
            "malformed_feed" | "malformedfeed" | "sim-003" => Ok(ScenarioId::MalformedFeed),
            "filter_churn" | "filterchurn" | "sim-004" => Ok(ScenarioId::FilterChurn),
            "selection_churn" | "selectionchurn" | "sim-005" => Ok(ScenarioId::SelectionChurn),
            "slow_backend" | "slowbackend" | "sim-006" => Ok(ScenarioId::SlowBackend),
            "remount" | "sim-007" => Ok(ScenarioId::Remount),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
            assert_eq!(scenario.to_string(), scenario.name());
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("SIM-006".parse::<ScenarioId>(), Ok(ScenarioId::SlowBackend));
        assert_eq!("FlakyBackend".parse::<ScenarioId>(), Ok(ScenarioId::FlakyBackend));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
