//! The tracking console: one mounted live-map view.
//!
//! Wires the pieces together in the direction data flows:
//!
//! ```text
//!   PollingSource ──snapshot──► FilterState ──view──► MarkerEngine ──► MapSurface
//!                                    ▲                      │
//!                 Selection ◄────────┴──── marker clicks ◄──┘
//! ```
//!
//! All mutation happens on the caller's task through [`FleetConsole::sync`]
//! and the operator actions; the polling source only publishes snapshots.

use crate::api::DispatchApi;
use crate::filter::{FilterState, FilteredView};
use crate::model::{AggregateStats, Snapshot, TrackedEntity};
use crate::polling::{CycleOutcome, Notice, PollStatus, PollingConfig, PollingSource};
use crate::reconcile::{EngineConfig, MarkerEngine, ReconcileReport};
use crate::selection::{Selection, SelectionChange};
use crate::surface::MapSurface;
use fleetview_env::{ApiError, EntityId, FleetContext};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Settings for one console.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleConfig {
    pub polling: PollingConfig,
    pub engine: EngineConfig,
}

/// What one call into the console changed.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleUpdate {
    pub report: ReconcileReport,
    pub selection: SelectionChange,
    /// Sequence of the snapshot the view now reflects
    pub sequence: Option<u64>,
}

/// Full record of the selected vehicle, loaded on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailPanel {
    pub entity: TrackedEntity,
    pub loaded_at: u64,
}

/// A finished detail fetch, to be handed back to [`FleetConsole::apply_detail`].
#[derive(Debug)]
pub struct DetailResponse {
    id: EntityId,
    result: Result<TrackedEntity, ApiError>,
    loaded_at: u64,
}

pub struct FleetConsole<Ctx: FleetContext, Api: DispatchApi, S: MapSurface> {
    ctx: Arc<Ctx>,
    source: PollingSource<Ctx, Api>,
    engine: MarkerEngine<S>,
    updates: watch::Receiver<Option<Arc<Snapshot>>>,
    clicks: mpsc::UnboundedReceiver<EntityId>,
    snapshot: Option<Arc<Snapshot>>,
    filter: FilterState,
    view: Option<FilteredView>,
    selection: Selection,
    detail: Option<DetailPanel>,
}

impl<Ctx: FleetContext, Api: DispatchApi, S: MapSurface> FleetConsole<Ctx, Api, S> {
    /// Mounts a console on `surface`. Polling starts per `config.polling.auto_start`.
    pub fn new(ctx: Arc<Ctx>, api: Arc<Api>, surface: S, config: ConsoleConfig) -> Self {
        let (click_tx, clicks) = mpsc::unbounded_channel();
        let engine = MarkerEngine::new(surface, config.engine, click_tx);
        let source = PollingSource::new(Arc::clone(&ctx), api, config.polling);
        let updates = source.subscribe();
        Self {
            ctx,
            source,
            engine,
            updates,
            clicks,
            snapshot: None,
            filter: FilterState::default(),
            view: None,
            selection: Selection::default(),
            detail: None,
        }
    }

    /// Applies whatever arrived since the last call: a newer snapshot, then
    /// marker clicks (checked against the refreshed view).
    pub fn sync(&mut self) -> ConsoleUpdate {
        let mut report = ReconcileReport::default();
        let mut selection = SelectionChange::Unchanged;

        if self.updates.has_changed().unwrap_or(false) {
            let latest = self.updates.borrow_and_update().clone();
            if let Some(snapshot) = latest {
                debug!(sequence = snapshot.sequence(), "New snapshot");
                self.snapshot = Some(snapshot);
                let (r, s) = self.rebuild();
                report = r;
                selection = s;
            }
        }

        while let Ok(id) = self.clicks.try_recv() {
            let change = self.select(id);
            if change.is_change() {
                selection = change;
            }
        }

        ConsoleUpdate {
            report,
            selection,
            sequence: self.sequence(),
        }
    }

    /// Re-derives the view for the current snapshot and pushes it to the map.
    fn rebuild(&mut self) -> (ReconcileReport, SelectionChange) {
        let Some(snapshot) = &self.snapshot else {
            return (ReconcileReport::default(), SelectionChange::Unchanged);
        };
        let view = self.filter.apply(snapshot);
        let report = self.engine.reconcile(view.entities());
        let change = self.selection.revalidate(&view);
        if let SelectionChange::Invalidated(id) = &change {
            info!(entity = %id, "Selected entity left the view, selection cleared");
            self.detail = None;
        }
        self.view = Some(view);
        (report, change)
    }

    /// Replaces the filter and reconciles the map against it immediately.
    pub fn set_filter(&mut self, filter: FilterState) -> ConsoleUpdate {
        let (report, selection) = if filter != self.filter {
            self.filter = filter;
            self.rebuild()
        } else {
            (ReconcileReport::default(), SelectionChange::Unchanged)
        };
        ConsoleUpdate {
            report,
            selection,
            sequence: self.sequence(),
        }
    }

    /// Selects an entity from a list row or marker click, focusing the map on
    /// it when it has a marker. Ids outside the current view are ignored.
    pub fn select(&mut self, id: EntityId) -> SelectionChange {
        let visible = self.view.as_ref().is_some_and(|v| v.contains(&id));
        if !visible {
            debug!(entity = %id, "Ignoring selection outside the view");
            return SelectionChange::Unchanged;
        }
        let change = self.selection.select(id);
        if change.is_change() {
            self.detail = None;
            self.engine.focus(self.selection.current());
        }
        change
    }

    /// Deselects. The camera stays where it is.
    pub fn clear_selection(&mut self) -> SelectionChange {
        self.detail = None;
        self.selection.clear()
    }

    pub fn fit_all(&mut self) -> bool {
        self.engine.fit_all()
    }

    /// Starts fetching the selected vehicle's full record.
    ///
    /// The returned future owns everything it needs, so it can run on any
    /// task; pass its output to [`FleetConsole::apply_detail`].
    pub fn request_detail(&self) -> Option<impl Future<Output = DetailResponse> + Send + 'static> {
        let id = self.selection.current()?.clone();
        let api = Arc::clone(self.source.api());
        let ctx = Arc::clone(&self.ctx);
        Some(async move {
            let result = api.get_vehicle(&id).await;
            DetailResponse {
                id,
                result,
                loaded_at: ctx.unix_millis(),
            }
        })
    }

    /// Installs a finished detail fetch. Returns Ok(false) if the selection
    /// moved on while it was in flight.
    pub fn apply_detail(&mut self, response: DetailResponse) -> Result<bool, ApiError> {
        if !self.selection.is_selected(&response.id) {
            debug!(entity = %response.id, "Discarding detail for deselected entity");
            return Ok(false);
        }
        let entity = response.result?;
        self.detail = Some(DetailPanel {
            entity,
            loaded_at: response.loaded_at,
        });
        Ok(true)
    }

    /// Fetches and installs the selected vehicle's detail in one step.
    pub async fn load_detail(&mut self) -> Result<bool, ApiError> {
        match self.request_detail() {
            Some(request) => {
                let response = request.await;
                self.apply_detail(response)
            }
            None => Ok(false),
        }
    }

    /// Manual refresh: fetch now, then apply the result.
    pub async fn refresh(&mut self) -> (CycleOutcome, ConsoleUpdate) {
        let outcome = self.source.refresh().await;
        (outcome, self.sync())
    }

    pub fn start(&mut self) {
        self.source.start();
    }

    pub fn stop(&mut self) {
        self.source.stop();
    }

    /// Unmounts: stops polling and releases every map resource.
    pub fn shutdown(&mut self) {
        self.source.stop();
        self.engine.shutdown();
        self.view = None;
        self.detail = None;
        self.selection.clear();
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn view(&self) -> Option<&FilteredView> {
        self.view.as_ref()
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// The selected entity as of the latest snapshot.
    pub fn selected_entity(&self) -> Option<&TrackedEntity> {
        self.selection.resolve(self.view.as_ref()?)
    }

    pub fn detail(&self) -> Option<&DetailPanel> {
        self.detail.as_ref()
    }

    /// Backend-wide counters from the latest snapshot.
    pub fn stats(&self) -> Option<AggregateStats> {
        self.snapshot.as_ref().map(|s| *s.stats())
    }

    /// Counters over the filtered view only.
    pub fn visible_stats(&self) -> Option<AggregateStats> {
        self.view.as_ref().map(FilteredView::stats)
    }

    pub fn sequence(&self) -> Option<u64> {
        self.snapshot.as_ref().map(|s| s.sequence())
    }

    pub fn status(&self) -> PollStatus {
        self.source.status()
    }

    pub fn take_notices(&self) -> Vec<Notice> {
        self.source.take_notices()
    }

    pub fn source(&self) -> &PollingSource<Ctx, Api> {
        &self.source
    }

    pub fn engine(&self) -> &MarkerEngine<S> {
        &self.engine
    }
}
