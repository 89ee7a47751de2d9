//! Scenario runner - drives a mounted console through simulated poll cycles.
//!
//! Every scenario mounts a real [`FleetConsole`] on a [`RecordingMap`],
//! backed by [`SimTransport`] serving a seeded [`FleetWorld`]. Virtual time
//! comes from tokio's paused clock, so the polling ticker, backend latency
//! and operator actions interleave identically on every run of a seed.
//!
//! After every cycle the harness checks the console's invariants:
//! - no entity has two live markers
//! - the markers on the map are exactly the positioned entities in view
//! - the selection is always part of the filtered view
//! - the snapshot sequence never goes backwards
//!
//! and after every unmount, that nothing is left on the map.

use crate::context::SimContext;
use crate::exporter::{MarkerFrame, SimEvent, SimExport, SimFrame};
use crate::fleet::FleetWorld;
use crate::map::{count_ops, MapProbe, RecordingMap};
use crate::scenarios::ScenarioId;
use crate::transport::{FaultProfile, SimTransport};

use fleetview_core::{
    Category, Connectivity, ConsoleConfig, ConsoleUpdate, FilterState, FilteredView, FleetConsole,
    JsonDispatchApi, Motion, OperationalStatus, PollStatus, PollingConfig, SelectionChange,
};
use fleetview_env::{EntityId, FleetContext};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

type SimApi = JsonDispatchApi<SimTransport>;
type SimConsole = FleetConsole<SimContext, SimApi, RecordingMap>;

// ============================================================================
// CONFIGURATION & RESULTS
// ============================================================================

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Vehicles in the simulated fleet
    pub fleet_size: usize,

    /// Console polling interval
    pub poll_interval: Duration,

    /// Poll cycles to simulate per scenario
    pub cycles: u64,

    /// Baseline transport failure rate (scenarios may override)
    pub failure_rate: f64,

    /// Baseline truncated-body rate (scenarios may override)
    pub malformed_rate: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            fleet_size: 25,
            poll_interval: Duration::from_secs(15),
            cycles: 20,
            failure_rate: 0.0,
            malformed_rate: 0.0,
        }
    }
}

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Harness cycles executed
    pub total_cycles: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Live markers just before the final unmount
    pub final_marker_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScenarioMetrics {
    pub snapshots_applied: u64,
    pub cycles_failed: u64,
    pub cycles_discarded: u64,
    pub skipped_ticks: u64,
    pub markers_created: u64,
    pub markers_updated: u64,
    pub markers_removed: u64,
    pub render_faults: u64,
    pub selections_made: u64,
    pub selections_invalidated: u64,
    pub details_loaded: u64,
    pub notices: u64,
    pub requests: u64,
    pub mounts: u64,
}

impl ScenarioMetrics {
    fn absorb_status(&mut self, status: &PollStatus) {
        self.snapshots_applied += status.cycles_applied;
        self.cycles_failed += status.cycles_failed;
        self.cycles_discarded += status.cycles_discarded;
        self.skipped_ticks += status.skipped_ticks;
    }
}

/// A broken console invariant or scenario expectation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    #[error("entity {0} has more than one live marker")]
    DuplicateMarker(EntityId),

    #[error("map shows {actual} markers but the view has {expected} positioned entities")]
    MarkerCountMismatch { expected: usize, actual: usize },

    #[error("visible entity {0} has no marker")]
    MissingMarker(EntityId),

    #[error("selection {0} is not in the filtered view")]
    StaleSelection(EntityId),

    #[error("snapshot sequence went backwards ({from} -> {to})")]
    SequenceRegressed { from: u64, to: u64 },

    #[error("{0} markers left on the map after teardown")]
    LeakedMarkers(usize),

    #[error("{0} style registrations not released after teardown")]
    LeakedStyles(isize),

    #[error("map instance not released after teardown")]
    MapNotReleased,

    #[error("map changed after polling stopped ({0} new operations)")]
    ActivityAfterStop(usize),

    #[error("{0}")]
    Expectation(String),
}

fn expect(condition: bool, message: impl FnOnce() -> String) -> Result<(), InvariantViolation> {
    if condition {
        Ok(())
    } else {
        Err(InvariantViolation::Expectation(message()))
    }
}

/// Ids in `view` that should have a marker.
fn positioned_ids(view: &FilteredView) -> HashSet<EntityId> {
    view.entities()
        .filter(|e| e.coordinates().is_some_and(|at| at.is_valid()))
        .map(|e| e.id.clone())
        .collect()
}

/// A random operator filter.
fn random_filter(rng: &mut ChaCha8Rng) -> FilterState {
    let mut filter = FilterState::default();
    if rng.gen_bool(0.4) {
        let status = [
            OperationalStatus::Available,
            OperationalStatus::Busy,
            OperationalStatus::Maintenance,
        ][rng.gen_range(0..3)];
        filter = filter.with_status(status);
    }
    if rng.gen_bool(0.3) {
        filter = filter.with_connectivity(if rng.gen_bool(0.5) {
            Connectivity::Online
        } else {
            Connectivity::Offline
        });
    }
    if rng.gen_bool(0.3) {
        filter = filter.with_motion(if rng.gen_bool(0.5) {
            Motion::Moving
        } else {
            Motion::Stopped
        });
    }
    if rng.gen_bool(0.2) {
        let category = ["car", "van", "crew-cab", "tuk"][rng.gen_range(0..4)];
        filter = filter.with_category(Category::from(category));
    }
    if rng.gen_bool(0.2) {
        filter = filter.with_search(format!("wp-10{}", rng.gen_range(0..3)));
    }
    filter
}

// ============================================================================
// HARNESS
// ============================================================================

/// One scenario's world: backend, map log, and the mounted console.
struct Harness {
    ctx: Arc<SimContext>,
    world: Arc<Mutex<FleetWorld>>,
    transport: Arc<SimTransport>,
    api: Arc<SimApi>,
    probe: MapProbe,
    console: Option<SimConsole>,
    poll_interval: Duration,
    operator: ChaCha8Rng,
    metrics: ScenarioMetrics,
    last_sequence: Option<u64>,
    cycles: u64,
    export: Option<SimExport>,
    events: Vec<SimEvent>,
}

impl Harness {
    fn new(config: &SimConfig, scenario: ScenarioId, export: bool) -> Self {
        // Derive separate seeds for different subsystems
        let world_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let fault_seed = config.seed.wrapping_mul(0x517cc1b727220a95);
        let operator_seed = config.seed ^ 0x2545f4914f6cdd1d;

        let ctx = SimContext::shared(config.seed);
        let world = Arc::new(Mutex::new(FleetWorld::with_fleet(
            world_seed,
            ctx.unix_millis(),
            config.fleet_size,
        )));
        let transport = Arc::new(SimTransport::new(Arc::clone(&world), fault_seed).with_profile(
            FaultProfile {
                failure_rate: scenario.failure_rate().unwrap_or(config.failure_rate),
                malformed_rate: scenario.malformed_rate().unwrap_or(config.malformed_rate),
                latency: Duration::ZERO,
            },
        ));
        let api = Arc::new(JsonDispatchApi::new(Arc::clone(&transport)));

        Self {
            ctx,
            world,
            transport,
            api,
            probe: MapProbe::default(),
            console: None,
            poll_interval: config.poll_interval,
            operator: ChaCha8Rng::seed_from_u64(operator_seed),
            metrics: ScenarioMetrics::default(),
            last_sequence: None,
            cycles: 0,
            export: export.then(|| SimExport::new(scenario.name(), config.seed)),
            events: Vec::new(),
        }
    }

    fn world(&self) -> MutexGuard<'_, FleetWorld> {
        self.world.lock().expect("fleet world mutex poisoned")
    }

    fn console(&mut self) -> Result<&mut SimConsole, InvariantViolation> {
        self.console
            .as_mut()
            .ok_or_else(|| InvariantViolation::Expectation("console is not mounted".to_string()))
    }

    /// Lets spawned cycles that are already due run to completion.
    async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    /// Mounts a console on the shared map log and applies the initial load.
    async fn mount(&mut self) -> Result<ConsoleUpdate, InvariantViolation> {
        let (map, _) = RecordingMap::attached(self.probe.clone());
        let config = ConsoleConfig {
            polling: PollingConfig {
                interval: self.poll_interval,
                ..PollingConfig::default()
            },
            ..ConsoleConfig::default()
        };
        self.console = Some(FleetConsole::new(
            Arc::clone(&self.ctx),
            Arc::clone(&self.api),
            map,
            config,
        ));
        self.metrics.mounts += 1;
        self.last_sequence = None;
        debug!("Mounted console #{}", self.metrics.mounts);
        self.settle().await;
        self.sync()
    }

    /// Stops and releases the console, then checks nothing was left behind.
    fn unmount(&mut self) -> Result<(), InvariantViolation> {
        let Some(mut console) = self.console.take() else {
            return Ok(());
        };
        self.metrics.absorb_status(&console.status());
        console.shutdown();
        drop(console);

        let leaked = self.probe.live_count();
        if leaked > 0 {
            return Err(InvariantViolation::LeakedMarkers(leaked));
        }
        let styles = self.probe.outstanding_styles();
        if styles != 0 {
            return Err(InvariantViolation::LeakedStyles(styles));
        }
        if !self.probe.is_released() {
            return Err(InvariantViolation::MapNotReleased);
        }
        Ok(())
    }

    /// One poll interval: the fleet moves, virtual time passes, the console
    /// applies whatever arrived.
    async fn cycle(&mut self) -> Result<ConsoleUpdate, InvariantViolation> {
        let dt = self.poll_interval;
        self.world().step(dt);
        self.ctx.sleep(dt).await;
        self.cycles += 1;
        self.sync()
    }

    fn sync(&mut self) -> Result<ConsoleUpdate, InvariantViolation> {
        let update = self.console()?.sync();
        self.record(&update);
        self.check()?;
        Ok(update)
    }

    /// Folds an update into the metrics, events and export.
    fn record(&mut self, update: &ConsoleUpdate) {
        let Some(console) = self.console.as_ref() else {
            return;
        };
        self.metrics.markers_created += update.report.created as u64;
        self.metrics.markers_updated += update.report.updated as u64;
        self.metrics.markers_removed += update.report.removed as u64;
        self.metrics.render_faults += update.report.faults as u64;

        match &update.selection {
            SelectionChange::Selected(id) => {
                self.metrics.selections_made += 1;
                self.events.push(SimEvent::info(format!("selected {}", id)));
            }
            SelectionChange::Invalidated(id) => {
                self.metrics.selections_invalidated += 1;
                self.events.push(SimEvent::info(format!("selection {} invalidated", id)));
            }
            _ => {}
        }

        for notice in console.take_notices() {
            self.metrics.notices += 1;
            self.events.push(SimEvent::warn(notice.message));
        }
        if let Some(error) = console.status().last_error {
            self.events.push(SimEvent::warn(format!("last cycle failed: {}", error)));
        }

        if let Some(export) = self.export.as_mut() {
            let view = console.view();
            export.add_frame(SimFrame {
                time_sec: self.ctx.time_secs(),
                sequence: console.sequence(),
                visible: view.map_or(0, FilteredView::len),
                markers: self.probe.live_markers().values().map(MarkerFrame::from).collect(),
                selected: console.selection().current().cloned(),
                stats: console.stats(),
                events: std::mem::take(&mut self.events),
            });
        } else {
            self.events.clear();
        }
    }

    /// Checks the console invariants against the map log.
    fn check(&mut self) -> Result<(), InvariantViolation> {
        let Some(console) = self.console.as_ref() else {
            return Ok(());
        };

        if let Some(id) = self.probe.duplicate_entities().into_iter().next() {
            return Err(InvariantViolation::DuplicateMarker(id));
        }

        let expected = console.view().map(positioned_ids).unwrap_or_default();
        for id in &expected {
            if !console.engine().has_marker(id) {
                return Err(InvariantViolation::MissingMarker(id.clone()));
            }
        }
        let actual = self.probe.live_count();
        if actual != expected.len() {
            return Err(InvariantViolation::MarkerCountMismatch {
                expected: expected.len(),
                actual,
            });
        }

        if let Some(selected) = console.selection().current() {
            let visible = console.view().is_some_and(|v| v.contains(selected));
            if !visible {
                return Err(InvariantViolation::StaleSelection(selected.clone()));
            }
        }

        let sequence = console.sequence();
        if let (Some(from), Some(to)) = (self.last_sequence, sequence) {
            if to < from {
                return Err(InvariantViolation::SequenceRegressed { from, to });
            }
        }
        self.last_sequence = sequence;
        Ok(())
    }

    /// Metrics including the mounted console's polling counters.
    fn totals(&self) -> ScenarioMetrics {
        let mut metrics = self.metrics.clone();
        if let Some(console) = &self.console {
            metrics.absorb_status(&console.status());
        }
        metrics.requests = self.transport.stats().requests;
        metrics
    }

    /// Applies a filter and checks the marker diff matches the view diff.
    fn apply_filter(&mut self, filter: FilterState) -> Result<(), InvariantViolation> {
        let console = self.console()?;
        let before = console.view().map(positioned_ids).unwrap_or_default();
        let update = console.set_filter(filter);
        let after = console.view().map(positioned_ids).unwrap_or_default();

        let created = after.difference(&before).count();
        let removed = before.difference(&after).count();
        expect(
            update.report.created == created && update.report.removed == removed,
            || {
                format!(
                    "filter change did {}/{} creates/removes, view diff needs {}/{}",
                    update.report.created, update.report.removed, created, removed
                )
            },
        )?;
        self.record(&update);
        self.check()
    }
}

// ============================================================================
// RUNNER
// ============================================================================

/// Runs console scenarios.
pub struct ScenarioRunner {
    config: SimConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner with default settings.
    pub fn new(seed: u64) -> Self {
        Self::with_config(SimConfig {
            seed,
            ..SimConfig::default()
        })
    }

    pub fn with_config(config: SimConfig) -> Self {
        Self { config }
    }

    /// Sets the fleet size.
    pub fn with_fleet_size(mut self, fleet_size: usize) -> Self {
        self.config.fleet_size = fleet_size;
        self
    }

    /// Sets the number of poll cycles per scenario.
    pub fn with_cycles(mut self, cycles: u64) -> Self {
        self.config.cycles = cycles;
        self
    }

    /// Sets the polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Runs a scenario and returns the result.
    ///
    /// Must run on a runtime with paused time.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, false).await.0
    }

    /// Runs a scenario and also returns the frame-by-frame export.
    pub async fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        let (result, export) = self.execute(scenario, true).await;
        let export = export.unwrap_or_else(|| SimExport::new(scenario.name(), self.config.seed));
        (result, export)
    }

    async fn execute(&self, scenario: ScenarioId, export: bool) -> (ScenarioResult, Option<SimExport>) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.config.seed);
        let mut harness = Harness::new(&self.config, scenario, export);

        let outcome = match scenario {
            ScenarioId::SteadyFleet => self.run_steady_fleet(&mut harness).await,
            ScenarioId::FlakyBackend => self.run_flaky_backend(&mut harness).await,
            ScenarioId::MalformedFeed => self.run_malformed_feed(&mut harness).await,
            ScenarioId::FilterChurn => self.run_filter_churn(&mut harness).await,
            ScenarioId::SelectionChurn => self.run_selection_churn(&mut harness).await,
            ScenarioId::SlowBackend => self.run_slow_backend(&mut harness).await,
            ScenarioId::Remount => self.run_remount(&mut harness).await,
        };

        let final_marker_count = harness.probe.live_count();
        let teardown = harness.unmount();
        let outcome = outcome.and(teardown);
        let metrics = harness.totals();

        let failure_reason = match &outcome {
            Ok(()) => None,
            Err(violation) => {
                warn!("{} failed: {}", scenario.name(), violation);
                Some(violation.to_string())
            }
        };
        let passed = failure_reason.is_none();

        let export = harness.export.take().map(|mut export| {
            export.finalize(passed, failure_reason.clone(), harness.probe.ops());
            export
        });

        let result = ScenarioResult {
            scenario,
            seed: self.config.seed,
            passed,
            total_cycles: harness.cycles,
            final_time_secs: harness.ctx.time_secs(),
            final_marker_count,
            failure_reason,
            metrics,
        };
        (result, export)
    }

    /// SIM-001: SteadyFleet - healthy backend.
    ///
    /// **Assertion**: every tick lands as a snapshot, nothing is ever redrawn
    /// from scratch, no operator notices.
    async fn run_steady_fleet(&self, h: &mut Harness) -> Result<(), InvariantViolation> {
        info!("SIM-001: SteadyFleet - healthy backend");
        h.mount().await?;

        for cycle in 0..self.config.cycles {
            let update = h.cycle().await?;
            debug!(
                "  cycle {} | seq={:?} | +{} ~{} -{}",
                cycle, update.sequence, update.report.created, update.report.updated, update.report.removed
            );
        }

        let metrics = h.totals();
        expect(metrics.snapshots_applied == self.config.cycles + 1, || {
            format!(
                "{} snapshots applied, expected {}",
                metrics.snapshots_applied,
                self.config.cycles + 1
            )
        })?;
        expect(metrics.notices == 0, || format!("{} notices on a healthy backend", metrics.notices))?;

        // The map was never wiped: removals only ever match departures
        let counts = count_ops(&h.probe.ops());
        expect(counts.removed as u64 == metrics.markers_removed, || {
            format!("{} removals on the map, {} reported", counts.removed, metrics.markers_removed)
        })?;

        info!(
            "✓ SteadyFleet complete: {} snapshots, {} markers created, {} updated",
            metrics.snapshots_applied, metrics.markers_created, metrics.markers_updated
        );
        Ok(())
    }

    /// SIM-002: FlakyBackend - requests fail at random.
    ///
    /// **Assertion**: failed cycles keep the previous snapshot on the map and
    /// only the initial (foreground) load may raise a notice.
    async fn run_flaky_backend(&self, h: &mut Harness) -> Result<(), InvariantViolation> {
        info!("SIM-002: FlakyBackend - {:.0}% request failures", h.transport.profile().failure_rate * 100.0);
        self.run_degraded(h).await?;
        info!("✓ FlakyBackend complete: {} failed cycles survived", h.totals().cycles_failed);
        Ok(())
    }

    /// SIM-003: MalformedFeed - truncated bodies.
    ///
    /// **Assertion**: same as FlakyBackend; bad JSON never reaches the map.
    async fn run_malformed_feed(&self, h: &mut Harness) -> Result<(), InvariantViolation> {
        info!("SIM-003: MalformedFeed - {:.0}% truncated bodies", h.transport.profile().malformed_rate * 100.0);
        self.run_degraded(h).await?;
        expect(h.metrics.render_faults == 0, || {
            format!("{} rendering faults from malformed data", h.metrics.render_faults)
        })?;
        info!("✓ MalformedFeed complete: {} failed cycles survived", h.totals().cycles_failed);
        Ok(())
    }

    async fn run_degraded(&self, h: &mut Harness) -> Result<(), InvariantViolation> {
        h.mount().await?;

        for _ in 0..self.config.cycles {
            let failed_before = h.totals().cycles_failed;
            let markers_before = h.probe.live_markers();
            let sequence_before = h.last_sequence;

            let update = h.cycle().await?;

            if h.totals().cycles_failed > failed_before && update.sequence == sequence_before {
                expect(h.probe.live_markers() == markers_before, || {
                    "a failed cycle changed the map".to_string()
                })?;
            }
        }

        let metrics = h.totals();
        expect(metrics.cycles_failed > 0, || "no cycle failed; fault injection inactive".to_string())?;
        expect(metrics.notices <= 1, || {
            format!("{} notices raised; background failures must stay silent", metrics.notices)
        })?;
        Ok(())
    }

    /// SIM-004: FilterChurn - a new filter every cycle.
    ///
    /// **Assertion**: each filter change creates and removes exactly the
    /// markers that entered and left the view.
    async fn run_filter_churn(&self, h: &mut Harness) -> Result<(), InvariantViolation> {
        info!("SIM-004: FilterChurn - random filter every cycle");
        h.mount().await?;

        for _ in 0..self.config.cycles {
            let filter = random_filter(&mut h.operator);
            debug!("  filter: {:?}", filter);
            h.apply_filter(filter)?;
            h.cycle().await?;
        }

        // Back to everything
        h.apply_filter(FilterState::default())?;
        let visible = h.console()?.view().map_or(0, FilteredView::len);
        let fleet = h.world().len();
        expect(visible == fleet, || {
            format!("cleared filter shows {} of {} vehicles", visible, fleet)
        })?;

        info!("✓ FilterChurn complete: {} markers removed by filters and departures", h.metrics.markers_removed);
        Ok(())
    }

    /// SIM-005: SelectionChurn - clicks, list selections and vanishing vehicles.
    ///
    /// **Assertion**: the selection never outlives its entity in the view,
    /// focusing an unfed vehicle never moves the camera, and detail loads
    /// always match the current selection.
    async fn run_selection_churn(&self, h: &mut Harness) -> Result<(), InvariantViolation> {
        info!("SIM-005: SelectionChurn - operator selects while polls stream");
        h.mount().await?;

        for cycle in 0..self.config.cycles {
            match h.operator.gen_range(0..10) {
                // Click a marker on the map
                0..=4 => {
                    let markers: Vec<_> = h.probe.live_markers().into_keys().collect();
                    if let Some(marker) = markers.choose(&mut h.operator) {
                        h.probe.click(*marker);
                    }
                    h.sync()?;
                }
                // Pick a row from the list, possibly one without a feed
                5..=7 => {
                    let rows: Vec<(EntityId, bool)> = h
                        .console()?
                        .view()
                        .map(|v| v.entities().map(|e| (e.id.clone(), e.coordinates().is_some())).collect())
                        .unwrap_or_default();
                    if let Some((id, positioned)) = rows.choose(&mut h.operator).cloned() {
                        let ops_before = h.probe.op_len();
                        let change = h.console()?.select(id.clone());
                        if let SelectionChange::Selected(_) = change {
                            h.metrics.selections_made += 1;
                            let camera = count_ops(&h.probe.ops_since(ops_before)).camera_moves;
                            expect(positioned || camera == 0, || {
                                format!("selecting unfed {} moved the camera", id)
                            })?;
                        }
                    }
                }
                _ => {
                    h.console()?.clear_selection();
                }
            }

            if let Some(selected) = h.console()?.selection().current().cloned() {
                if h.console()?.load_detail().await.unwrap_or(false) {
                    h.metrics.details_loaded += 1;
                    let shown = h.console()?.detail().map(|d| d.entity.id.clone());
                    expect(shown.as_ref() == Some(&selected), || {
                        format!("detail shows {:?} while {} is selected", shown, selected)
                    })?;
                }
                // Sometimes the selected vehicle leaves the fleet
                if h.operator.gen_bool(0.2) {
                    h.world().retire(&selected);
                }
            }

            if cycle % 3 == 2 {
                let filter = random_filter(&mut h.operator);
                h.apply_filter(filter)?;
            }
            h.cycle().await?;
        }

        let metrics = h.totals();
        expect(metrics.selections_made > 0, || "operator never selected anything".to_string())?;
        info!(
            "✓ SelectionChurn complete: {} selections, {} invalidated, {} details",
            metrics.selections_made, metrics.selections_invalidated, metrics.details_loaded
        );
        Ok(())
    }

    /// SIM-006: SlowBackend - latency longer than the polling interval.
    ///
    /// **Assertion**: overlapping ticks are skipped, the loading flag only
    /// covers the initial load, and snapshots never go backwards even with
    /// a manual refresh racing the schedule.
    async fn run_slow_backend(&self, h: &mut Harness) -> Result<(), InvariantViolation> {
        let latency = self.config.poll_interval.mul_f64(1.5);
        info!("SIM-006: SlowBackend - {:?} latency vs {:?} interval", latency, self.config.poll_interval);
        h.transport.set_profile(FaultProfile {
            latency,
            ..h.transport.profile()
        });

        h.mount().await?;
        expect(h.console()?.source().is_loading(), || "initial load not marked as loading".to_string())?;

        for cycle in 0..self.config.cycles {
            if cycle == self.config.cycles / 2 {
                let (outcome, update) = h.console()?.refresh().await;
                debug!("  manual refresh: {:?}", outcome);
                h.record(&update);
                h.check()?;
            }
            h.cycle().await?;
            if cycle > 1 {
                expect(!h.console()?.source().is_loading(), || {
                    "background cycle raised the loading flag".to_string()
                })?;
            }
        }

        let metrics = h.totals();
        expect(metrics.skipped_ticks > 0, || "no tick was skipped under slow backend".to_string())?;
        expect(metrics.snapshots_applied > 0, || "no snapshot ever landed".to_string())?;
        info!(
            "✓ SlowBackend complete: {} applied, {} ticks skipped",
            metrics.snapshots_applied, metrics.skipped_ticks
        );
        Ok(())
    }

    /// SIM-007: Remount - the view comes and goes.
    ///
    /// **Assertion**: a fetch in flight when polling stops never touches the
    /// map, and each unmount releases every marker and style.
    async fn run_remount(&self, h: &mut Harness) -> Result<(), InvariantViolation> {
        info!("SIM-007: Remount - repeated mount/unmount");
        let mounts = 5;
        let cycles_per_mount = (self.config.cycles / mounts).max(2);
        h.transport.set_profile(FaultProfile {
            latency: self.config.poll_interval / 3,
            ..h.transport.profile()
        });

        for round in 0..mounts {
            h.mount().await?;
            // Initial load is still in flight; wait for it
            h.ctx.sleep(self.config.poll_interval / 2).await;
            h.sync()?;

            for _ in 0..cycles_per_mount {
                h.cycle().await?;
            }
            let marker = h.probe.live_markers().into_keys().next();
            if let Some(marker) = marker {
                h.probe.click(marker);
                h.sync()?;
            }

            // Stop mid-flight: the tick has fired, its response has not
            h.ctx.sleep(self.config.poll_interval / 2 + Duration::from_millis(2)).await;
            h.console()?.stop();
            let sequence = h.last_sequence;
            let ops_after = h.probe.op_len();
            h.ctx.sleep(self.config.poll_interval * 2).await;
            h.sync()?;
            let late = h.probe.op_len() - ops_after;
            if late > 0 || h.last_sequence != sequence {
                return Err(InvariantViolation::ActivityAfterStop(late));
            }
            h.unmount()?;
            debug!("  round {} clean", round);
        }

        let metrics = h.totals();
        expect(metrics.mounts == mounts, || format!("{} mounts, expected {}", metrics.mounts, mounts))?;
        expect(metrics.cycles_discarded > 0, || {
            "no in-flight fetch was discarded at unmount".to_string()
        })?;
        info!(
            "✓ Remount complete: {} mounts, {} late responses discarded",
            metrics.mounts, metrics.cycles_discarded
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(seed: u64) -> ScenarioRunner {
        ScenarioRunner::new(seed).with_fleet_size(12).with_cycles(8)
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_fleet_scenario() {
        let result = runner(42).run(ScenarioId::SteadyFleet).await;

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.snapshots_applied, 9);
        assert!(result.metrics.markers_created > 0);
        assert_eq!(result.total_cycles, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flaky_backend_scenario() {
        let result = runner(42).with_cycles(20).run(ScenarioId::FlakyBackend).await;

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.cycles_failed > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_feed_scenario() {
        let result = runner(7).with_cycles(20).run(ScenarioId::MalformedFeed).await;

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.render_faults, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_churn_scenario() {
        let result = runner(42).run(ScenarioId::FilterChurn).await;
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_churn_scenario() {
        let result = runner(42).with_cycles(12).run(ScenarioId::SelectionChurn).await;

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.selections_made > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_scenario() {
        let result = runner(42).run(ScenarioId::SlowBackend).await;

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.skipped_ticks > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remount_scenario() {
        let result = runner(42).run(ScenarioId::Remount).await;

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.mounts, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_seed_same_metrics() {
        let first = runner(1234).run(ScenarioId::SelectionChurn).await;
        let second = runner(1234).run(ScenarioId::SelectionChurn).await;

        assert_eq!(first.metrics, second.metrics);
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_has_frame_per_sync() {
        let (result, export) = runner(42).with_cycles(4).run_with_export(ScenarioId::SteadyFleet).await;

        assert!(result.passed);
        // Initial load plus one frame per cycle
        assert_eq!(export.frames.len(), 5);
        assert!(export.passed);
        assert!(!export.map_ops.is_empty());
        assert_eq!(export.frames[0].sequence, Some(1));
    }
}
