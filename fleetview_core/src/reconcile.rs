//! The "RECONCILE" Engine - keeps the map's markers in step with the fleet
//!
//! Every filtered snapshot is diffed against the marker table:
//! 1. Positioned entities without a marker get one (with a click binding)
//! 2. Existing markers move and/or restyle only when something changed
//! 3. Markers whose entity left the visible set are destroyed
//!
//! The table is private; the map is never cleared and redrawn, so open
//! popups and the camera survive every poll.

use crate::icon::{IconParams, MarkerIcon};
use crate::model::{LatLng, TrackedEntity};
use crate::surface::{Bounds, ClickSink, MapSurface, MarkerId, RenderError};
use fleetview_env::EntityId;
use geo::{BoundingRect, MultiPoint, Point};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Camera settings for the marker engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Zoom level used when focusing a selected vehicle (default: 16, street level)
    pub focus_zoom: u8,

    /// Padding around "fit all" bounds in pixels (default: 50)
    pub fit_padding_px: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            focus_zoom: 16,
            fit_padding_px: 50,
        }
    }
}

// ============================================================================
// MARKER HANDLE (Internal State)
// ============================================================================

/// One live marker and what it was last drawn with.
#[derive(Debug, Clone)]
struct MarkerHandle {
    marker: MarkerId,
    position: LatLng,
    params: IconParams,
}

/// Operation counts for one reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    /// Marker operations the substrate refused (skipped, retried next pass)
    pub faults: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.removed == 0
    }
}

// ============================================================================
// MARKER ENGINE
// ============================================================================

/// Owns the marker table and the map surface for one mounted view.
pub struct MarkerEngine<S: MapSurface> {
    surface: S,
    config: EngineConfig,
    handles: HashMap<EntityId, MarkerHandle>,
    clicks: ClickSink,
    styles_installed: bool,
    live: bool,
}

impl<S: MapSurface> MarkerEngine<S> {
    /// Takes ownership of `surface` and installs the marker styles.
    ///
    /// Marker clicks are reported on `clicks`.
    pub fn new(mut surface: S, config: EngineConfig, clicks: ClickSink) -> Self {
        let styles_installed = match surface.install_styles() {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to install marker styles: {}", e);
                false
            }
        };
        Self {
            surface,
            config,
            handles: HashMap::new(),
            clicks,
            styles_installed,
            live: true,
        }
    }

    /// Brings the marker table in line with `entities`.
    ///
    /// Entities without coordinates are ignored (and lose their marker if
    /// they had one). A refused marker operation is logged and counted in
    /// `faults`; the rest of the pass continues.
    pub fn reconcile<'a, I>(&mut self, entities: I) -> ReconcileReport
    where
        I: IntoIterator<Item = &'a TrackedEntity>,
    {
        let mut report = ReconcileReport::default();
        if !self.live {
            debug!("Reconcile after shutdown ignored");
            return report;
        }

        // Stage 1: visible positioned set, first occurrence wins
        let mut visible: Vec<(&TrackedEntity, LatLng)> = Vec::new();
        let mut seen: HashSet<EntityId> = HashSet::new();
        for entity in entities {
            let Some(at) = entity.coordinates() else {
                continue;
            };
            if !seen.insert(entity.id.clone()) {
                debug!(entity = %entity.id, "Duplicate entity in snapshot, keeping first");
                continue;
            }
            visible.push((entity, at));
        }

        // Stage 2: removals
        let departed: Vec<EntityId> = self
            .handles
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in departed {
            if self.destroy(&id) {
                report.removed += 1;
            } else {
                report.faults += 1;
            }
        }

        // Stage 3: updates and creations
        for (entity, at) in visible {
            let params = IconParams::of(entity);

            if let Some(handle) = self.handles.get_mut(&entity.id) {
                let moved = handle.position != at;
                let restyled = handle.params != params;
                if !moved && !restyled {
                    continue;
                }
                let icon = restyled.then(|| MarkerIcon::derive(&params));
                match self
                    .surface
                    .update_marker(handle.marker, moved.then_some(at), icon.as_ref())
                {
                    Ok(()) => {
                        handle.position = at;
                        handle.params = params;
                        report.updated += 1;
                        continue;
                    }
                    // Gone from the map: forget the handle and draw it afresh
                    Err(RenderError::UnknownMarker(marker)) => {
                        warn!(entity = %entity.id, "Marker {} lost by the map, recreating", marker);
                        self.handles.remove(&entity.id);
                    }
                    Err(e) => {
                        warn!(entity = %entity.id, "Marker update skipped: {}", e);
                        report.faults += 1;
                        continue;
                    }
                }
            }

            match self.create(&entity.id, at, params) {
                Ok(()) => report.created += 1,
                Err(e) => {
                    warn!(entity = %entity.id, "Marker creation skipped: {}", e);
                    report.faults += 1;
                }
            }
        }

        if !report.is_noop() {
            debug!(
                "Reconciled: +{} ~{} -{} ({} faults, {} live)",
                report.created,
                report.updated,
                report.removed,
                report.faults,
                self.handles.len()
            );
        }
        report
    }

    fn create(&mut self, id: &EntityId, at: LatLng, params: IconParams) -> Result<(), RenderError> {
        let icon = MarkerIcon::derive(&params);
        let marker = self.surface.create_marker(at, &icon)?;
        if let Err(e) = self
            .surface
            .on_marker_click(marker, id.clone(), self.clicks.clone())
        {
            // No handle without a click binding
            if let Err(remove_err) = self.surface.remove_marker(marker) {
                warn!(entity = %id, "Unbound marker {} left on the map: {}", marker, remove_err);
            }
            return Err(e);
        }
        self.handles.insert(
            id.clone(),
            MarkerHandle {
                marker,
                position: at,
                params,
            },
        );
        Ok(())
    }

    /// Removes one marker. Returns false if the substrate refused, in which
    /// case the handle is kept so the next pass retries.
    fn destroy(&mut self, id: &EntityId) -> bool {
        let Some(handle) = self.handles.get(id) else {
            return true;
        };
        match self.surface.remove_marker(handle.marker) {
            Ok(()) | Err(RenderError::UnknownMarker(_)) => {
                self.handles.remove(id);
                true
            }
            Err(e) => {
                warn!(entity = %id, "Marker removal failed: {}", e);
                false
            }
        }
    }

    /// Centers the camera on the selected entity's marker and opens its popup.
    ///
    /// Returns true if the camera moved. Clearing the selection, or selecting
    /// something without a marker, leaves the view alone.
    pub fn focus(&mut self, selected: Option<&EntityId>) -> bool {
        if !self.live {
            return false;
        }
        let Some(id) = selected else {
            return false;
        };
        let Some(handle) = self.handles.get(id) else {
            debug!(entity = %id, "Selected entity has no marker, camera unchanged");
            return false;
        };
        self.surface.set_view(handle.position, self.config.focus_zoom);
        if let Err(e) = self.surface.open_popup(handle.marker) {
            warn!(entity = %id, "Popup failed to open: {}", e);
        }
        true
    }

    /// Frames every live marker. No-op (returns false) if there are none.
    pub fn fit_all(&mut self) -> bool {
        if !self.live {
            return false;
        }
        let points = MultiPoint::new(
            self.handles
                .values()
                .map(|h| Point::new(h.position.lng, h.position.lat))
                .collect(),
        );
        let Some(rect) = points.bounding_rect() else {
            return false;
        };
        let bounds = Bounds {
            south_west: LatLng::new(rect.min().y, rect.min().x),
            north_east: LatLng::new(rect.max().y, rect.max().x),
        };
        self.surface.fit_bounds(bounds, self.config.fit_padding_px);
        true
    }

    /// Destroys every marker, then the styles and the map instance.
    /// Idempotent; also run on drop.
    pub fn shutdown(&mut self) {
        if !self.live {
            return;
        }
        let ids: Vec<EntityId> = self.handles.keys().cloned().collect();
        let mut leaked = 0;
        for id in ids {
            if !self.destroy(&id) {
                leaked += 1;
            }
        }
        if leaked > 0 {
            warn!("{} markers could not be removed before release", leaked);
        }
        self.handles.clear();
        if self.styles_installed {
            self.surface.release_styles();
            self.styles_installed = false;
        }
        self.surface.release();
        self.live = false;
        info!("Marker engine shut down");
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn marker_count(&self) -> usize {
        self.handles.len()
    }

    pub fn has_marker(&self, id: &EntityId) -> bool {
        self.handles.contains_key(id)
    }

    pub fn marker_of(&self, id: &EntityId) -> Option<MarkerId> {
        self.handles.get(id).map(|h| h.marker)
    }

    pub fn position_of(&self, id: &EntityId) -> Option<LatLng> {
        self.handles.get(id).map(|h| h.position)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read-only access to the substrate (inspection, tests).
    pub fn surface(&self) -> &S {
        &self.surface
    }
}

impl<S: MapSurface> Drop for MarkerEngine<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icon::MarkerColor;
    use crate::testing::{is_create, is_remove, is_update, unfed, vehicle, Op, TestSurface};
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    fn engine() -> (MarkerEngine<TestSurface>, mpsc::UnboundedReceiver<EntityId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MarkerEngine::new(TestSurface::default(), EngineConfig::default(), tx), rx)
    }

    #[test]
    fn test_creates_only_positioned_entities() {
        let (mut engine, _rx) = engine();
        let snapshot = vec![vehicle("V1", 7.0, 80.0, 0.0, true), unfed("V2")];

        let report = engine.reconcile(&snapshot);

        assert_eq!(report.created, 1);
        assert_eq!(engine.marker_count(), 1);
        assert!(engine.has_marker(&EntityId::from("V1")));
        assert!(!engine.has_marker(&EntityId::from("V2")));
        assert_eq!(engine.surface().ops()[0], Op::InstallStyles);
    }

    #[test]
    fn test_moving_vehicle_gets_single_position_update() {
        let (mut engine, _rx) = engine();
        engine.reconcile(&[vehicle("V1", 7.0, 80.0, 40.0, true)]);
        engine.surface().clear_log();

        let report = engine.reconcile(&[vehicle("V1", 7.1, 80.1, 45.0, true)]);

        assert_eq!(report, ReconcileReport { created: 0, updated: 1, removed: 0, faults: 0 });
        let marker = engine.marker_of(&EntityId::from("V1")).unwrap();
        assert_eq!(
            engine.surface().ops(),
            vec![Op::Update(marker, Some(LatLng::new(7.1, 80.1)), None)]
        );
    }

    #[test]
    fn test_going_offline_restyles_without_moving() {
        let (mut engine, _rx) = engine();
        engine.reconcile(&[vehicle("V1", 7.0, 80.0, 40.0, true)]);
        engine.surface().clear_log();

        let report = engine.reconcile(&[vehicle("V1", 7.0, 80.0, 40.0, false)]);

        assert_eq!(report.updated, 1);
        let ops = engine.surface().ops();
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            Op::Update(_, None, Some(icon)) => assert_eq!(icon.color, MarkerColor::Gray),
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[test]
    fn test_same_snapshot_twice_is_noop() {
        let (mut engine, _rx) = engine();
        let snapshot = vec![
            vehicle("V1", 7.0, 80.0, 40.0, true),
            vehicle("V2", 7.2, 80.2, 0.0, true),
        ];
        engine.reconcile(&snapshot);
        engine.surface().clear_log();

        let report = engine.reconcile(&snapshot);

        assert!(report.is_noop());
        assert!(engine.surface().ops().is_empty());
    }

    #[test]
    fn test_departed_and_unfed_entities_are_removed() {
        let (mut engine, _rx) = engine();
        engine.reconcile(&[
            vehicle("V1", 7.0, 80.0, 0.0, true),
            vehicle("V2", 7.1, 80.1, 0.0, true),
            vehicle("V3", 7.2, 80.2, 0.0, true),
        ]);
        engine.surface().clear_log();

        // V2 disappears, V3 loses its feed
        let report = engine.reconcile(&[vehicle("V1", 7.0, 80.0, 0.0, true), unfed("V3")]);

        assert_eq!(report.removed, 2);
        assert_eq!(engine.surface().count(is_remove), 2);
        assert_eq!(engine.marker_count(), 1);
    }

    #[test]
    fn test_rendering_fault_skips_only_that_entity() {
        let (mut engine, _rx) = engine();
        let report = engine.reconcile(&[
            vehicle("V1", 7.0, 80.0, 0.0, true),
            vehicle("BAD", 123.0, 80.0, 0.0, true),
            vehicle("V3", 7.2, 80.2, 0.0, true),
        ]);

        assert_eq!(report.created, 2);
        assert_eq!(report.faults, 1);
        assert!(!engine.has_marker(&EntityId::from("BAD")));

        // Retried on the next pass once the fix is sane
        let report = engine.reconcile(&[
            vehicle("V1", 7.0, 80.0, 0.0, true),
            vehicle("BAD", 7.3, 80.3, 0.0, true),
            vehicle("V3", 7.2, 80.2, 0.0, true),
        ]);
        assert_eq!(report.created, 1);
        assert_eq!(engine.marker_count(), 3);
    }

    #[test]
    fn test_marker_lost_by_map_is_recreated() {
        let (mut engine, _rx) = engine();
        engine.reconcile(&[vehicle("V1", 7.0, 80.0, 40.0, true)]);
        let lost = engine.marker_of(&EntityId::from("V1")).unwrap();
        engine.surface.live.remove(&lost);

        let report = engine.reconcile(&[vehicle("V1", 7.1, 80.1, 40.0, true)]);

        assert_eq!(report.created, 1);
        assert_eq!(report.faults, 0);
        let marker = engine.marker_of(&EntityId::from("V1")).unwrap();
        assert_ne!(marker, lost);
        assert_eq!(engine.surface().live.get(&marker), Some(&LatLng::new(7.1, 80.1)));

        // Later passes are clean again
        assert!(engine.reconcile(&[vehicle("V1", 7.1, 80.1, 40.0, true)]).is_noop());
        assert!(engine.focus(Some(&EntityId::from("V1"))));
        assert_eq!(engine.surface().ops().last(), Some(&Op::OpenPopup(marker)));
    }

    #[test]
    fn test_failed_click_binding_leaves_no_marker() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut surface = TestSurface::default();
        surface.fail_click_binding = true;
        let mut engine = MarkerEngine::new(surface, EngineConfig::default(), tx);

        let report = engine.reconcile(&[vehicle("V1", 7.0, 80.0, 0.0, true)]);

        assert_eq!(report.faults, 1);
        assert!(!engine.has_marker(&EntityId::from("V1")));
        assert!(engine.surface().live.is_empty());
        assert_eq!(engine.surface().count(is_create), 1);
        assert_eq!(engine.surface().count(is_remove), 1);
    }

    #[test]
    fn test_styles_released_only_if_installed() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut surface = TestSurface::default();
        surface.fail_styles = true;
        let mut engine = MarkerEngine::new(surface, EngineConfig::default(), tx);
        engine.reconcile(&[vehicle("V1", 7.0, 80.0, 0.0, true)]);

        engine.shutdown();

        let ops = engine.surface().ops();
        assert!(!ops.contains(&Op::InstallStyles));
        assert!(!ops.contains(&Op::ReleaseStyles));
        assert_eq!(ops.last(), Some(&Op::Release));
    }

    #[test]
    fn test_duplicate_ids_get_one_marker() {
        let (mut engine, _rx) = engine();
        let report = engine.reconcile(&[
            vehicle("V1", 7.0, 80.0, 0.0, true),
            vehicle("V1", 7.5, 80.5, 0.0, true),
        ]);
        assert_eq!(report.created, 1);
        assert_eq!(engine.position_of(&EntityId::from("V1")), Some(LatLng::new(7.0, 80.0)));
    }

    #[test]
    fn test_focus_moves_camera_and_opens_popup() {
        let (mut engine, _rx) = engine();
        engine.reconcile(&[vehicle("V1", 7.0, 80.0, 0.0, true)]);
        engine.surface().clear_log();
        let marker = engine.marker_of(&EntityId::from("V1")).unwrap();

        assert!(engine.focus(Some(&EntityId::from("V1"))));
        assert_eq!(
            engine.surface().ops(),
            vec![Op::SetView(LatLng::new(7.0, 80.0), 16), Op::OpenPopup(marker)]
        );
    }

    #[test]
    fn test_focus_without_marker_or_selection_does_nothing() {
        let (mut engine, _rx) = engine();
        engine.reconcile(&[unfed("V2")]);
        engine.surface().clear_log();

        assert!(!engine.focus(Some(&EntityId::from("V2"))));
        assert!(!engine.focus(None));
        assert!(engine.surface().ops().is_empty());
    }

    #[test]
    fn test_fit_all() {
        let (mut engine, _rx) = engine();
        assert!(!engine.fit_all());

        engine.reconcile(&[
            vehicle("V1", 6.9, 79.8, 0.0, true),
            vehicle("V2", 7.3, 80.6, 0.0, true),
            vehicle("V3", 7.1, 80.0, 0.0, false),
        ]);
        engine.surface().clear_log();

        assert!(engine.fit_all());
        match &engine.surface().ops()[0] {
            Op::FitBounds(bounds, padding) => {
                assert_eq!(*padding, 50);
                assert_relative_eq!(bounds.south_west.lat, 6.9);
                assert_relative_eq!(bounds.south_west.lng, 79.8);
                assert_relative_eq!(bounds.north_east.lat, 7.3);
                assert_relative_eq!(bounds.north_east.lng, 80.6);
            }
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[test]
    fn test_marker_click_reports_entity() {
        let (mut engine, mut rx) = engine();
        engine.reconcile(&[vehicle("V1", 7.0, 80.0, 0.0, true)]);
        let marker = engine.marker_of(&EntityId::from("V1")).unwrap();

        engine.surface().click(marker);

        assert_eq!(rx.try_recv().unwrap(), EntityId::from("V1"));
    }

    #[test]
    fn test_shutdown_releases_everything_once() {
        let (mut engine, _rx) = engine();
        engine.reconcile(&[
            vehicle("V1", 7.0, 80.0, 0.0, true),
            vehicle("V2", 7.1, 80.1, 0.0, true),
        ]);
        engine.surface().clear_log();

        engine.shutdown();
        engine.shutdown();

        let ops = engine.surface().ops();
        assert_eq!(ops.iter().filter(|op| is_remove(op)).count(), 2);
        assert_eq!(ops[ops.len() - 2..], [Op::ReleaseStyles, Op::Release]);
        assert!(engine.surface().live.is_empty());
        assert!(!engine.is_live());

        // Further snapshots are ignored
        assert!(engine.reconcile(&[vehicle("V3", 7.0, 80.0, 0.0, true)]).is_noop());
    }

    #[test]
    fn test_drop_runs_shutdown() {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let surface = TestSurface::with_log(Arc::clone(&log));
            let (tx, _rx) = mpsc::unbounded_channel();
            let mut engine = MarkerEngine::new(surface, EngineConfig::default(), tx);
            engine.reconcile(&[vehicle("V1", 7.0, 80.0, 0.0, true)]);
        }
        let ops = log.lock().unwrap().clone();
        assert_eq!(ops.iter().filter(|op| is_create(op)).count(), 1);
        assert_eq!(ops.iter().filter(|op| is_remove(op)).count(), 1);
        assert_eq!(ops.last(), Some(&Op::Release));
    }

    // ------------------------------------------------------------------------
    // Property: operation counts equal the set difference between snapshots
    // ------------------------------------------------------------------------

    fn arb_fleet() -> impl Strategy<Value = Vec<TrackedEntity>> {
        proptest::collection::btree_map(
            0u8..24,
            (0u8..4, any::<bool>(), any::<bool>()),
            0..16,
        )
        .prop_map(|m| {
            m.into_iter()
                .map(|(id, (step, online, moving))| {
                    let speed = if moving { 30.0 } else { 0.0 };
                    vehicle(
                        &format!("V{}", id),
                        7.0 + step as f64 * 0.01,
                        80.0,
                        speed,
                        online,
                    )
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_operation_counts_match_diff(s1 in arb_fleet(), s2 in arb_fleet()) {
            let (mut engine, _rx) = engine();
            engine.reconcile(&s1);
            engine.surface().clear_log();

            engine.reconcile(&s2);

            let ids1: HashSet<_> = s1.iter().map(|e| e.id.clone()).collect();
            let ids2: HashSet<_> = s2.iter().map(|e| e.id.clone()).collect();
            let expected_creates = ids2.difference(&ids1).count();
            let expected_removes = ids1.difference(&ids2).count();
            let expected_updates = s2
                .iter()
                .filter(|e2| {
                    s1.iter().find(|e1| e1.id == e2.id).is_some_and(|e1| {
                        e1.coordinates() != e2.coordinates() || IconParams::of(e1) != IconParams::of(e2)
                    })
                })
                .count();

            let surface = engine.surface();
            prop_assert_eq!(surface.count(is_create), expected_creates);
            prop_assert_eq!(surface.count(is_remove), expected_removes);
            prop_assert_eq!(surface.count(is_update), expected_updates);
            prop_assert_eq!(surface.live.len(), ids2.len());
            prop_assert_eq!(engine.marker_count(), ids2.len());
        }
    }
}
