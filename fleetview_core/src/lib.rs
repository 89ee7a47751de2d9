//! FleetView Core - Real-Time Fleet Tracking for the Dispatch Console
//!
//! This library keeps a live map in step with a polled vehicle feed:
//! 1. **Polling**: fixed-cadence snapshots with session-guarded completions
//! 2. **Reconciliation**: incremental marker create/update/remove, never a redraw
//! 3. **Filter & Selection**: pure view derivation and a selection that cannot go stale

pub mod api;
pub mod console;
pub mod filter;
pub mod icon;
pub mod model;
pub mod polling;
pub mod reconcile;
pub mod selection;
pub mod surface;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use api::{DispatchApi, JsonDispatchApi};
pub use console::{ConsoleConfig, ConsoleUpdate, DetailPanel, FleetConsole};
pub use filter::{Connectivity, FilterState, FilteredView, Match, Motion};
pub use icon::{IconParams, MarkerColor, MarkerIcon};
pub use model::{AggregateStats, Category, EntityKind, LatLng, OperationalStatus, Snapshot, TrackedEntity};
pub use polling::{CycleOutcome, PollStatus, PollingConfig, PollingSource};
pub use reconcile::{EngineConfig, MarkerEngine, ReconcileReport};
pub use selection::{Selection, SelectionChange};
pub use surface::{Bounds, MapSurface, MarkerId, RenderError};
