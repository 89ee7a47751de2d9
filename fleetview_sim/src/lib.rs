//! FleetView Deterministic Console Simulator
//!
//! This crate mounts the real tracking console against a simulated dispatch
//! backend and a recording map, and drives both through virtual time.
//!
//! # Core Principle: Everything Is Seeded
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: tokio's paused clock; sleeps resolve instantly, in order
//! - **Backend**: latency, dropped requests and truncated bodies on demand
//! - **Randomness**: fleet movement, faults and operator actions each draw
//!   from a ChaCha stream derived from one 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │                                                             │
//! │  ┌────────────┐  JSON  ┌──────────────┐   ┌─────────────┐   │
//! │  │ FleetWorld │◄───────│ SimTransport │◄──│ FleetConsole│   │
//! │  │ (vehicles) │        │ (faults,     │   │  (polling,  │   │
//! │  └────────────┘        │  latency)    │   │   filters,  │   │
//! │        ▲               └──────────────┘   │   markers)  │   │
//! │        │ step(dt)                         └──────┬──────┘   │
//! │        │                                         │          │
//! │  ┌─────┴──────────┐   invariant checks   ┌───────▼──────┐   │
//! │  │    Operator    │─────────────────────►│ RecordingMap │   │
//! │  │ (clicks, etc.) │◄──── MapProbe ───────│  (op log)    │   │
//! │  └────────────────┘                      └──────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use fleetview_sim::{ScenarioRunner, ScenarioId};
//!
//! let runner = ScenarioRunner::new(42).with_fleet_size(40);
//! let result = runner.run(ScenarioId::FlakyBackend).await;
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod fleet;
mod map;
mod runner;
mod transport;
pub mod scenarios;

pub use context::SimContext;
pub use exporter::{MarkerFrame, SimEvent, SimExport, SimFrame};
pub use fleet::{ChurnRates, FleetWorld, SimVehicle};
pub use map::{count_ops, LiveMarker, MapOp, MapProbe, OpCounts, RecordingMap};
pub use runner::{InvariantViolation, ScenarioMetrics, ScenarioResult, ScenarioRunner, SimConfig};
pub use scenarios::ScenarioId;
pub use transport::{FaultProfile, SimTransport, TransportStats};
