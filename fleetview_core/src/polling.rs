//! The "POLLING" Data Source - fixed-cadence snapshots of the fleet
//!
//! Each cycle fetches the entity list and the aggregate counters
//! concurrently and publishes them together as one [`Snapshot`]. Either both
//! land or the cycle fails and the previous snapshot stays current.
//!
//! # Lifecycle
//!
//! ```text
//!   new() ──start()──► [session live] ──stop()/drop──► [stopped]
//!                         │    ▲
//!          foreground ────┘    └──── ticker: every `interval`
//!          (initial)                  (skipped while a cycle is in flight)
//! ```
//!
//! Every cycle carries the session it was started under and a sequence
//! number. A completion is dropped if its session has ended, or if a cycle
//! started later has already been applied.

use crate::api::DispatchApi;
use crate::model::{AggregateStats, EntityKind, Snapshot, TrackedEntity};
use fleetview_env::{ApiError, FleetContext, SessionId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Default polling interval (15 seconds).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
/// Keeps a misconfigured interval from turning into a busy loop.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(250);

// ============================================================================
// CONFIGURATION & STATUS
// ============================================================================

/// Configuration for a polling source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Which backend collection to poll (default: all vehicles)
    pub entity_kind: EntityKind,

    /// Time between recurring cycles (default: 15s)
    pub interval: Duration,

    /// Start polling as soon as the source is created (default: true)
    pub auto_start: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            entity_kind: EntityKind::Vehicles,
            interval: DEFAULT_POLL_INTERVAL,
            auto_start: true,
        }
    }
}

impl PollingConfig {
    fn effective_interval(&self) -> Duration {
        self.interval.max(MIN_POLL_INTERVAL)
    }
}

/// Foreground cycles drive the loading indicator and raise notices on
/// failure; background cycles do neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Foreground,
    Background,
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A new snapshot was published
    Applied,
    /// The backend call failed; the previous snapshot stays current
    Failed,
    /// The result arrived after stop() or after a newer cycle was applied
    Discarded,
    /// No cycle was started (source not running, or a tick overlapped)
    Skipped,
}

/// A transient message for the operator, raised by failed foreground loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    pub at_ms: u64,
}

/// Observable state of a polling source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollStatus {
    /// True while a foreground cycle is in flight
    pub is_loading: bool,

    /// Error of the most recent resolved cycle; cleared when a new one starts
    pub last_error: Option<ApiError>,

    /// Unix milliseconds of the last applied snapshot
    pub last_update_at: Option<u64>,

    pub cycles_applied: u64,
    pub cycles_failed: u64,
    pub cycles_discarded: u64,

    /// Recurring ticks dropped because the previous cycle was still running
    pub skipped_ticks: u64,
}

// ============================================================================
// SHARED STATE
// ============================================================================

struct PollState {
    session: Option<SessionId>,
    snapshot: Option<Arc<Snapshot>>,
    status: PollStatus,
    /// Cycles of the live session still awaiting their responses
    in_flight: usize,
    next_sequence: u64,
    applied_sequence: u64,
    loading_sequence: Option<u64>,
    notices: Vec<Notice>,
}

impl PollState {
    fn new() -> Self {
        Self {
            session: None,
            snapshot: None,
            status: PollStatus::default(),
            in_flight: 0,
            next_sequence: 1,
            applied_sequence: 0,
            loading_sequence: None,
            notices: Vec::new(),
        }
    }
}

/// Identity of one started cycle.
#[derive(Debug, Clone, Copy)]
struct CycleTicket {
    session: SessionId,
    sequence: u64,
    mode: FetchMode,
}

struct Shared<Ctx: FleetContext, Api: DispatchApi> {
    ctx: Arc<Ctx>,
    api: Arc<Api>,
    kind: EntityKind,
    state: Mutex<PollState>,
    updates: watch::Sender<Option<Arc<Snapshot>>>,
}

impl<Ctx: FleetContext, Api: DispatchApi> Shared<Ctx, Api> {
    fn lock(&self) -> MutexGuard<'_, PollState> {
        self.state.lock().expect("poll state mutex poisoned")
    }

    /// Registers a cycle under `session`, or returns None if it is not live.
    fn begin_cycle(&self, session: SessionId, mode: FetchMode) -> Option<CycleTicket> {
        let mut state = self.lock();
        if state.session != Some(session) {
            return None;
        }
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.in_flight += 1;
        state.status.last_error = None;
        if mode == FetchMode::Foreground {
            state.status.is_loading = true;
            state.loading_sequence = Some(sequence);
        }
        Some(CycleTicket {
            session,
            sequence,
            mode,
        })
    }

    async fn fetch(&self) -> Result<(Vec<TrackedEntity>, AggregateStats), ApiError> {
        let (entities, stats) = tokio::join!(self.api.list(self.kind), self.api.get_stats());
        Ok((entities?, stats?))
    }

    async fn run_cycle(&self, ticket: CycleTicket) -> CycleOutcome {
        let result = self.fetch().await;
        self.finish_cycle(ticket, result)
    }

    fn finish_cycle(
        &self,
        ticket: CycleTicket,
        result: Result<(Vec<TrackedEntity>, AggregateStats), ApiError>,
    ) -> CycleOutcome {
        let now_ms = self.ctx.unix_millis();
        let mut state = self.lock();
        if state.session == Some(ticket.session) {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        if state.loading_sequence == Some(ticket.sequence) {
            state.loading_sequence = None;
            state.status.is_loading = false;
        }

        if state.session != Some(ticket.session) {
            debug!(
                sequence = ticket.sequence,
                "Discarding cycle from ended session {}", ticket.session
            );
            state.status.cycles_discarded += 1;
            return CycleOutcome::Discarded;
        }
        if ticket.sequence < state.applied_sequence {
            debug!(
                sequence = ticket.sequence,
                applied = state.applied_sequence,
                "Discarding cycle overtaken by a newer one"
            );
            state.status.cycles_discarded += 1;
            return CycleOutcome::Discarded;
        }

        match result {
            Ok((entities, stats)) => {
                let snapshot = Arc::new(Snapshot::new(
                    self.kind,
                    ticket.sequence,
                    now_ms,
                    entities,
                    stats,
                ));
                state.applied_sequence = ticket.sequence;
                state.snapshot = Some(Arc::clone(&snapshot));
                state.status.last_update_at = Some(now_ms);
                state.status.cycles_applied += 1;
                debug!(
                    sequence = ticket.sequence,
                    "Applied snapshot with {} entities",
                    snapshot.len()
                );
                self.updates.send_replace(Some(snapshot));
                CycleOutcome::Applied
            }
            Err(e) => {
                warn!(sequence = ticket.sequence, "Poll cycle failed: {}", e);
                if ticket.mode == FetchMode::Foreground {
                    state.notices.push(Notice {
                        message: format!("Failed to load fleet data: {}", e),
                        at_ms: now_ms,
                    });
                }
                state.status.last_error = Some(e);
                state.status.cycles_failed += 1;
                CycleOutcome::Failed
            }
        }
    }

    fn is_busy(&self) -> bool {
        self.lock().in_flight > 0
    }

    fn note_skipped_tick(&self) {
        self.lock().status.skipped_ticks += 1;
    }
}

/// Spawns one cycle so the caller's cadence is not tied to its completion.
fn spawn_cycle<Ctx: FleetContext, Api: DispatchApi>(shared: &Arc<Shared<Ctx, Api>>, ticket: CycleTicket) {
    let task = Arc::clone(shared);
    shared.ctx.spawn("fleet-poll-cycle", async move {
        task.run_cycle(ticket).await;
    });
}

async fn run_ticker<Ctx: FleetContext, Api: DispatchApi>(
    shared: Arc<Shared<Ctx, Api>>,
    session: SessionId,
    cancelled: Arc<AtomicBool>,
    interval: Duration,
) {
    loop {
        shared.ctx.sleep(interval).await;
        if cancelled.load(Ordering::Acquire) {
            break;
        }
        if shared.is_busy() {
            debug!("Previous cycle still in flight, skipping tick");
            shared.note_skipped_tick();
            continue;
        }
        match shared.begin_cycle(session, FetchMode::Background) {
            Some(ticket) => spawn_cycle(&shared, ticket),
            None => break,
        }
    }
    debug!("Ticker for session {} exited", session);
}

/// Recurring schedule owned by one live session.
struct Ticker {
    session: SessionId,
    cancelled: Arc<AtomicBool>,
}

// ============================================================================
// POLLING SOURCE
// ============================================================================

/// Polls the dispatch backend on a fixed cadence for one mounted view.
///
/// Dropping the source stops it.
pub struct PollingSource<Ctx: FleetContext, Api: DispatchApi> {
    shared: Arc<Shared<Ctx, Api>>,
    config: PollingConfig,
    ticker: Option<Ticker>,
}

impl<Ctx: FleetContext, Api: DispatchApi> PollingSource<Ctx, Api> {
    /// Creates the source; starts it right away if `config.auto_start`.
    ///
    /// Must be called inside a tokio runtime when auto-starting.
    pub fn new(ctx: Arc<Ctx>, api: Arc<Api>, config: PollingConfig) -> Self {
        let (updates, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            ctx,
            api,
            kind: config.entity_kind,
            state: Mutex::new(PollState::new()),
            updates,
        });
        let mut source = Self {
            shared,
            config,
            ticker: None,
        };
        if source.config.auto_start {
            source.start();
        }
        source
    }

    /// Starts a fresh session: an immediate foreground fetch, then a
    /// background fetch every `interval`. Restarts if already running.
    pub fn start(&mut self) -> SessionId {
        let session = SessionId::new();
        self.start_session(session);
        session
    }

    /// [`PollingSource::start`] with a caller-chosen session id.
    pub fn start_session(&mut self, session: SessionId) {
        self.stop();
        {
            let mut state = self.shared.lock();
            state.session = Some(session);
            state.in_flight = 0;
        }

        if let Some(ticket) = self.shared.begin_cycle(session, FetchMode::Foreground) {
            spawn_cycle(&self.shared, ticket);
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let interval = self.config.effective_interval();
        self.shared.ctx.spawn(
            "fleet-poll-ticker",
            run_ticker(Arc::clone(&self.shared), session, Arc::clone(&cancelled), interval),
        );
        self.ticker = Some(Ticker { session, cancelled });
        info!(
            "Polling {:?} every {:?} (session {})",
            self.config.entity_kind, interval, session
        );
    }

    /// Cancels the schedule. Cycles already in flight finish but are dropped.
    pub fn stop(&mut self) {
        let Some(ticker) = self.ticker.take() else {
            return;
        };
        ticker.cancelled.store(true, Ordering::Release);
        let mut state = self.shared.lock();
        if state.session == Some(ticker.session) {
            state.session = None;
            state.in_flight = 0;
        }
        state.status.is_loading = false;
        state.loading_sequence = None;
        info!("Polling stopped (session {})", ticker.session);
    }

    /// Fetches now, outside the schedule, without touching the loading flag.
    pub async fn refresh(&self) -> CycleOutcome {
        self.run_now(FetchMode::Background).await
    }

    /// Fetches now as a blocking load: shows loading and notifies on failure.
    pub async fn load(&self) -> CycleOutcome {
        self.run_now(FetchMode::Foreground).await
    }

    async fn run_now(&self, mode: FetchMode) -> CycleOutcome {
        let Some(session) = self.session() else {
            debug!("Fetch requested while stopped, ignoring");
            return CycleOutcome::Skipped;
        };
        match self.shared.begin_cycle(session, mode) {
            Some(ticket) => self.shared.run_cycle(ticket).await,
            None => CycleOutcome::Skipped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    pub fn session(&self) -> Option<SessionId> {
        self.ticker.as_ref().map(|t| t.session)
    }

    /// The latest applied snapshot (kept while a newer one is in flight).
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.shared.lock().snapshot.clone()
    }

    pub fn status(&self) -> PollStatus {
        self.shared.lock().status.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.lock().status.is_loading
    }

    /// Drains pending operator notices.
    pub fn take_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut self.shared.lock().notices)
    }

    /// Receives every applied snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.shared.updates.subscribe()
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    pub fn api(&self) -> &Arc<Api> {
        &self.shared.api
    }
}

impl<Ctx: FleetContext, Api: DispatchApi> Drop for PollingSource<Ctx, Api> {
    fn drop(&mut self) {
        self.stop();
    }
}
