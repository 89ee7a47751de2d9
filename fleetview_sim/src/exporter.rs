//! JSON exporter for simulation runs.
//!
//! Writes one frame per poll cycle (what the map showed) plus the full
//! substrate call log, for offline inspection or replay in a browser map.

use crate::map::{LiveMarker, MapOp};
use fleetview_core::{AggregateStats, MarkerColor};
use fleetview_env::EntityId;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    /// Sequence of the snapshot on screen
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,

    /// Entities in the filtered view
    pub visible: usize,

    /// Markers on the map at the end of the cycle
    pub markers: Vec<MarkerFrame>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<EntityId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<AggregateStats>,

    /// Events (failed cycles, invalidated selections, etc.)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

/// One marker as drawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerFrame {
    pub entity: Option<EntityId>,
    pub lat: f64,
    pub lng: f64,
    pub color: MarkerColor,
    pub pulsing: bool,
}

impl From<&LiveMarker> for MarkerFrame {
    fn from(marker: &LiveMarker) -> Self {
        Self {
            entity: marker.entity.clone(),
            lat: marker.at.lat,
            lng: marker.at.lng,
            color: marker.icon.color,
            pulsing: marker.icon.pulsing,
        }
    }
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: Some("warn".to_string()),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Every rendering substrate call, in order
    pub map_ops: Vec<MapOp>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            map_ops: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>, map_ops: Vec<MapOp>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
        self.map_ops = map_ops;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetview_core::MarkerId;

    #[test]
    fn test_export_tracks_duration_and_omits_empty_fields() {
        let mut export = SimExport::new("steady_fleet", 42);
        export.add_frame(SimFrame {
            time_sec: 15.0,
            sequence: Some(2),
            visible: 0,
            markers: Vec::new(),
            selected: None,
            stats: None,
            events: Vec::new(),
        });
        export.finalize(true, None, vec![MapOp::Remove { marker: MarkerId(1) }]);

        assert_eq!(export.duration_sec, 15.0);
        let json = serde_json::to_value(&export).unwrap();
        assert!(json.get("failure_reason").is_none());
        assert!(json["frames"][0].get("events").is_none());
        assert_eq!(json["map_ops"][0]["op"], "remove");
    }
}
