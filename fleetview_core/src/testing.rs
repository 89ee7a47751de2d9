//! In-memory rendering substrate and fixtures shared by the unit tests.

use crate::icon::MarkerIcon;
use crate::model::{Category, LatLng, OperationalStatus, Position, TrackedEntity};
use crate::surface::{Bounds, ClickSink, MapSurface, MarkerId, RenderError};
use fleetview_env::EntityId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Op {
    InstallStyles,
    Create(LatLng, MarkerIcon),
    Update(MarkerId, Option<LatLng>, Option<MarkerIcon>),
    Remove(MarkerId),
    SetView(LatLng, u8),
    OpenPopup(MarkerId),
    FitBounds(Bounds, u32),
    ReleaseStyles,
    Release,
}

#[derive(Default)]
pub(crate) struct TestSurface {
    pub(crate) log: Arc<Mutex<Vec<Op>>>,
    pub(crate) live: HashMap<MarkerId, LatLng>,
    pub(crate) sinks: HashMap<MarkerId, (EntityId, ClickSink)>,
    pub(crate) fail_styles: bool,
    pub(crate) fail_click_binding: bool,
    next_id: u64,
}

impl TestSurface {
    /// A surface that records into `log`, which outlives it.
    pub(crate) fn with_log(log: Arc<Mutex<Vec<Op>>>) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub(crate) fn ops(&self) -> Vec<Op> {
        self.log.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
        self.ops().iter().filter(|op| pred(op)).count()
    }

    pub(crate) fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    pub(crate) fn click(&self, marker: MarkerId) {
        let (id, sink) = &self.sinks[&marker];
        sink.send(id.clone()).unwrap();
    }

    fn record(&self, op: Op) {
        self.log.lock().unwrap().push(op);
    }
}

impl MapSurface for TestSurface {
    fn install_styles(&mut self) -> Result<(), RenderError> {
        if self.fail_styles {
            return Err(RenderError::Substrate("stylesheet blocked".to_string()));
        }
        self.record(Op::InstallStyles);
        Ok(())
    }

    fn create_marker(&mut self, at: LatLng, icon: &MarkerIcon) -> Result<MarkerId, RenderError> {
        if !at.is_valid() {
            return Err(RenderError::InvalidCoordinates { lat: at.lat, lng: at.lng });
        }
        self.next_id += 1;
        let id = MarkerId(self.next_id);
        self.live.insert(id, at);
        self.record(Op::Create(at, *icon));
        Ok(id)
    }

    fn update_marker(
        &mut self,
        marker: MarkerId,
        at: Option<LatLng>,
        icon: Option<&MarkerIcon>,
    ) -> Result<(), RenderError> {
        if !self.live.contains_key(&marker) {
            return Err(RenderError::UnknownMarker(marker));
        }
        if let Some(at) = at {
            if !at.is_valid() {
                return Err(RenderError::InvalidCoordinates { lat: at.lat, lng: at.lng });
            }
            self.live.insert(marker, at);
        }
        self.record(Op::Update(marker, at, icon.copied()));
        Ok(())
    }

    fn remove_marker(&mut self, marker: MarkerId) -> Result<(), RenderError> {
        self.live
            .remove(&marker)
            .ok_or(RenderError::UnknownMarker(marker))?;
        self.sinks.remove(&marker);
        self.record(Op::Remove(marker));
        Ok(())
    }

    fn on_marker_click(
        &mut self,
        marker: MarkerId,
        entity: EntityId,
        sink: ClickSink,
    ) -> Result<(), RenderError> {
        if self.fail_click_binding {
            return Err(RenderError::Substrate("click handler rejected".to_string()));
        }
        self.sinks.insert(marker, (entity, sink));
        Ok(())
    }

    fn fit_bounds(&mut self, bounds: Bounds, padding_px: u32) {
        self.record(Op::FitBounds(bounds, padding_px));
    }

    fn set_view(&mut self, at: LatLng, zoom: u8) {
        self.record(Op::SetView(at, zoom));
    }

    fn open_popup(&mut self, marker: MarkerId) -> Result<(), RenderError> {
        self.record(Op::OpenPopup(marker));
        Ok(())
    }

    fn release_styles(&mut self) {
        self.record(Op::ReleaseStyles);
    }

    fn release(&mut self) {
        self.record(Op::Release);
    }
}

pub(crate) fn vehicle(id: &str, lat: f64, lng: f64, speed: f64, online: bool) -> TrackedEntity {
    TrackedEntity {
        id: EntityId::from(id),
        display_label: id.to_string(),
        category: Category::from("car"),
        status: OperationalStatus::Available,
        has_position_feed: true,
        position: Some(Position {
            lat: Some(lat),
            lng: Some(lng),
            speed_kph: speed,
            heading_deg: 0.0,
            ignition_on: true,
            is_online: online,
            last_update_at: 0,
            stop_since: None,
        }),
        assigned_operator: None,
        associated_task: None,
    }
}

pub(crate) fn unfed(id: &str) -> TrackedEntity {
    let mut e = vehicle(id, 0.0, 0.0, 0.0, false);
    e.has_position_feed = false;
    e.position = None;
    e
}

pub(crate) fn is_create(op: &Op) -> bool {
    matches!(op, Op::Create(..))
}

pub(crate) fn is_update(op: &Op) -> bool {
    matches!(op, Op::Update(..))
}

pub(crate) fn is_remove(op: &Op) -> bool {
    matches!(op, Op::Remove(..))
}
