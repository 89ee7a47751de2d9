//! In-memory rendering substrate that records every call.
//!
//! `RecordingMap` is handed to the marker engine (which owns it); a cloned
//! [`MapProbe`] stays with the harness to inspect the log, simulate marker
//! clicks and check for leaks after teardown.

use fleetview_core::surface::ClickSink;
use fleetview_core::{Bounds, LatLng, MapSurface, MarkerIcon, MarkerId, RenderError};
use fleetview_env::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// One recorded substrate call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MapOp {
    InstallStyles,
    Create {
        marker: MarkerId,
        at: LatLng,
        icon: MarkerIcon,
    },
    Update {
        marker: MarkerId,
        at: Option<LatLng>,
        icon: Option<MarkerIcon>,
    },
    Remove {
        marker: MarkerId,
    },
    BindClick {
        marker: MarkerId,
        entity: EntityId,
    },
    FitBounds {
        bounds: Bounds,
        padding_px: u32,
    },
    SetView {
        at: LatLng,
        zoom: u8,
    },
    OpenPopup {
        marker: MarkerId,
    },
    ReleaseStyles,
    Release,
}

/// A marker currently on the map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveMarker {
    pub at: LatLng,
    pub icon: MarkerIcon,
    pub entity: Option<EntityId>,
}

/// Per-kind operation counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OpCounts {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub camera_moves: usize,
    pub popups: usize,
}

#[derive(Default)]
struct MapLog {
    ops: Vec<MapOp>,
    live: BTreeMap<MarkerId, LiveMarker>,
    clicks: HashMap<MarkerId, ClickSink>,
    styles_installed: usize,
    styles_released: usize,
    released: bool,
    next_id: u64,
}

/// Inspection handle onto a [`RecordingMap`]'s log.
#[derive(Clone, Default)]
pub struct MapProbe {
    log: Arc<Mutex<MapLog>>,
}

impl MapProbe {
    fn lock(&self) -> MutexGuard<'_, MapLog> {
        self.log.lock().expect("map log mutex poisoned")
    }

    pub fn ops(&self) -> Vec<MapOp> {
        self.lock().ops.clone()
    }

    /// Ops recorded since the log had `from` entries.
    pub fn ops_since(&self, from: usize) -> Vec<MapOp> {
        self.lock().ops.get(from..).map(<[MapOp]>::to_vec).unwrap_or_default()
    }

    pub fn op_len(&self) -> usize {
        self.lock().ops.len()
    }

    pub fn counts(&self) -> OpCounts {
        count_ops(&self.lock().ops)
    }

    pub fn live_markers(&self) -> BTreeMap<MarkerId, LiveMarker> {
        self.lock().live.clone()
    }

    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// Entities that have more than one live marker.
    pub fn duplicate_entities(&self) -> Vec<EntityId> {
        let log = self.lock();
        let mut seen: HashMap<&EntityId, usize> = HashMap::new();
        for marker in log.live.values() {
            if let Some(entity) = &marker.entity {
                *seen.entry(entity).or_default() += 1;
            }
        }
        let mut dupes: Vec<EntityId> = seen
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(id, _)| id.clone())
            .collect();
        dupes.sort();
        dupes
    }

    /// Style installs minus releases; zero once a mount is fully torn down.
    pub fn outstanding_styles(&self) -> isize {
        let log = self.lock();
        log.styles_installed as isize - log.styles_released as isize
    }

    pub fn is_released(&self) -> bool {
        self.lock().released
    }

    /// Simulates the operator clicking `marker`. Returns false if the
    /// marker has no click binding.
    pub fn click(&self, marker: MarkerId) -> bool {
        let log = self.lock();
        match (log.clicks.get(&marker), log.live.get(&marker)) {
            (Some(sink), Some(LiveMarker { entity: Some(entity), .. })) => sink.send(entity.clone()).is_ok(),
            _ => false,
        }
    }
}

/// Counts create/update/remove and camera operations in `ops`.
pub fn count_ops(ops: &[MapOp]) -> OpCounts {
    let mut counts = OpCounts::default();
    for op in ops {
        match op {
            MapOp::Create { .. } => counts.created += 1,
            MapOp::Update { .. } => counts.updated += 1,
            MapOp::Remove { .. } => counts.removed += 1,
            MapOp::SetView { .. } | MapOp::FitBounds { .. } => counts.camera_moves += 1,
            MapOp::OpenPopup { .. } => counts.popups += 1,
            _ => {}
        }
    }
    counts
}

/// The simulated map library.
pub struct RecordingMap {
    probe: MapProbe,
}

impl RecordingMap {
    /// Creates a map with a fresh log.
    pub fn new() -> (Self, MapProbe) {
        Self::attached(MapProbe::default())
    }

    /// Creates a map that appends to an existing log, as a remounted view
    /// reusing the page would.
    pub fn attached(probe: MapProbe) -> (Self, MapProbe) {
        probe.lock().released = false;
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }

    fn with_log<R>(&self, f: impl FnOnce(&mut MapLog) -> R) -> R {
        f(&mut self.probe.lock())
    }
}

impl MapSurface for RecordingMap {
    fn install_styles(&mut self) -> Result<(), RenderError> {
        self.with_log(|log| {
            log.styles_installed += 1;
            log.ops.push(MapOp::InstallStyles);
        });
        Ok(())
    }

    fn create_marker(&mut self, at: LatLng, icon: &MarkerIcon) -> Result<MarkerId, RenderError> {
        if !at.is_valid() {
            return Err(RenderError::InvalidCoordinates {
                lat: at.lat,
                lng: at.lng,
            });
        }
        let icon = *icon;
        Ok(self.with_log(|log| {
            log.next_id += 1;
            let marker = MarkerId(log.next_id);
            log.live.insert(
                marker,
                LiveMarker {
                    at,
                    icon,
                    entity: None,
                },
            );
            log.ops.push(MapOp::Create { marker, at, icon });
            marker
        }))
    }

    fn update_marker(
        &mut self,
        marker: MarkerId,
        at: Option<LatLng>,
        icon: Option<&MarkerIcon>,
    ) -> Result<(), RenderError> {
        if let Some(at) = at {
            if !at.is_valid() {
                return Err(RenderError::InvalidCoordinates {
                    lat: at.lat,
                    lng: at.lng,
                });
            }
        }
        let icon = icon.copied();
        self.with_log(|log| {
            let live = log
                .live
                .get_mut(&marker)
                .ok_or(RenderError::UnknownMarker(marker))?;
            if let Some(at) = at {
                live.at = at;
            }
            if let Some(icon) = icon {
                live.icon = icon;
            }
            log.ops.push(MapOp::Update { marker, at, icon });
            Ok(())
        })
    }

    fn remove_marker(&mut self, marker: MarkerId) -> Result<(), RenderError> {
        self.with_log(|log| {
            log.live
                .remove(&marker)
                .ok_or(RenderError::UnknownMarker(marker))?;
            log.clicks.remove(&marker);
            log.ops.push(MapOp::Remove { marker });
            Ok(())
        })
    }

    fn on_marker_click(
        &mut self,
        marker: MarkerId,
        entity: EntityId,
        sink: ClickSink,
    ) -> Result<(), RenderError> {
        self.with_log(|log| {
            let live = log
                .live
                .get_mut(&marker)
                .ok_or(RenderError::UnknownMarker(marker))?;
            live.entity = Some(entity.clone());
            log.clicks.insert(marker, sink);
            log.ops.push(MapOp::BindClick { marker, entity });
            Ok(())
        })
    }

    fn fit_bounds(&mut self, bounds: Bounds, padding_px: u32) {
        self.with_log(|log| log.ops.push(MapOp::FitBounds { bounds, padding_px }));
    }

    fn set_view(&mut self, at: LatLng, zoom: u8) {
        self.with_log(|log| log.ops.push(MapOp::SetView { at, zoom }));
    }

    fn open_popup(&mut self, marker: MarkerId) -> Result<(), RenderError> {
        self.with_log(|log| {
            if !log.live.contains_key(&marker) {
                return Err(RenderError::UnknownMarker(marker));
            }
            log.ops.push(MapOp::OpenPopup { marker });
            Ok(())
        })
    }

    fn release_styles(&mut self) {
        self.with_log(|log| {
            log.styles_released += 1;
            log.ops.push(MapOp::ReleaseStyles);
        });
    }

    fn release(&mut self) {
        self.with_log(|log| {
            log.clicks.clear();
            log.released = true;
            log.ops.push(MapOp::Release);
        });
    }
}
