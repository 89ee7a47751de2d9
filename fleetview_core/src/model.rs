//! Fleet data model: tracked entities, positions, snapshots and counters.
//!
//! Field names follow the backend's camelCase JSON so the same types are
//! used for decoding and for the in-memory snapshot.

use fleetview_env::EntityId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ENUMS & SMALL VALUE TYPES
// ============================================================================

/// Operational status of a vehicle as set by dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationalStatus {
    Available,
    Busy,
    Maintenance,
}

/// Which backend collection a polling source tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    /// Every vehicle in the fleet (`getAllVehicles`)
    Vehicles,
    /// Rides currently in progress, each carrying its vehicle (`getActiveRides`)
    ActiveTasks,
}

/// Vehicle type as reported by the backend (e.g. "car", "van", "crew-cab").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(pub String);

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bulk categories get the truck glyph on the map.
    pub fn is_bulk(&self) -> bool {
        matches!(
            self.0.to_ascii_lowercase().as_str(),
            "van" | "crew-cab" | "crew_cab" | "crewcab"
        )
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True if both components are finite and inside the WGS84 range.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

// ============================================================================
// POSITION
// ============================================================================

/// Last GPS fix of a vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    #[serde(default)]
    pub lat: Option<f64>,

    #[serde(default)]
    pub lng: Option<f64>,

    /// Ground speed in km/h; anything above zero counts as moving
    #[serde(default)]
    pub speed_kph: f64,

    #[serde(default)]
    pub heading_deg: f64,

    #[serde(default)]
    pub ignition_on: bool,

    /// Whether the tracker has reported recently enough to be considered live
    #[serde(default)]
    pub is_online: bool,

    /// Unix milliseconds of the fix
    pub last_update_at: u64,

    /// Unix milliseconds since which the vehicle has been standing still
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_since: Option<u64>,
}

impl Position {
    /// Both coordinates, if the fix carries them.
    pub fn coordinates(&self) -> Option<LatLng> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(LatLng::new(lat, lng)),
            _ => None,
        }
    }

    pub fn is_moving(&self) -> bool {
        self.speed_kph > 0.0
    }

    /// How long the vehicle has been stopped, as of `now_ms`.
    pub fn stopped_for(&self, now_ms: u64) -> Option<Duration> {
        if self.is_moving() {
            return None;
        }
        self.stop_since
            .map(|since| Duration::from_millis(now_ms.saturating_sub(since)))
    }

    /// Age of the fix as of `now_ms`.
    pub fn age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.last_update_at))
    }

    /// True if the fix is older than `threshold`.
    pub fn is_stale(&self, now_ms: u64, threshold: Duration) -> bool {
        self.age(now_ms) > threshold
    }
}

// ============================================================================
// TRACKED ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Ride metadata carried by entities from the active-rides feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub task_id: String,
    pub task_status: String,
    #[serde(default)]
    pub requester: Option<String>,
    #[serde(default)]
    pub eta_minutes: Option<u32>,
}

/// Violations of the entity shape invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("entity {0} has a position but no position feed")]
    PositionWithoutFeed(EntityId),

    #[error("entity {0} has only one of lat/lng")]
    UnpairedCoordinates(EntityId),
}

/// A vehicle, or a ride together with its vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEntity {
    pub id: EntityId,

    /// Human-facing label, usually the vehicle number
    pub display_label: String,

    pub category: Category,

    pub status: OperationalStatus,

    #[serde(default)]
    pub has_position_feed: bool,

    #[serde(default)]
    pub position: Option<Position>,

    #[serde(default)]
    pub assigned_operator: Option<Operator>,

    #[serde(default)]
    pub associated_task: Option<TaskInfo>,
}

impl TrackedEntity {
    /// Checks the position invariants.
    pub fn validate(&self) -> Result<(), ModelError> {
        let Some(position) = &self.position else {
            return Ok(());
        };
        if !self.has_position_feed {
            return Err(ModelError::PositionWithoutFeed(self.id.clone()));
        }
        if position.lat.is_some() != position.lng.is_some() {
            return Err(ModelError::UnpairedCoordinates(self.id.clone()));
        }
        Ok(())
    }

    /// Map coordinates, present only for fed entities with a full fix.
    pub fn coordinates(&self) -> Option<LatLng> {
        if !self.has_position_feed {
            return None;
        }
        self.position.as_ref().and_then(Position::coordinates)
    }

    pub fn is_online(&self) -> bool {
        self.has_position_feed && self.position.as_ref().is_some_and(|p| p.is_online)
    }

    pub fn is_moving(&self) -> bool {
        self.position.as_ref().is_some_and(Position::is_moving)
    }

    pub fn speed_kph(&self) -> f64 {
        self.position.as_ref().map_or(0.0, |p| p.speed_kph)
    }

    pub fn operator_name(&self) -> Option<&str> {
        self.assigned_operator.as_ref().map(|o| o.name.as_str())
    }
}

// ============================================================================
// AGGREGATE STATS & SNAPSHOT
// ============================================================================

/// Fleet counters as reported by `getStats`, or derived locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub online: u32,
    pub moving: u32,
    pub stopped: u32,
    pub offline: u32,
    pub total: u32,
    pub active_tasks: u32,
}

impl AggregateStats {
    /// Counts the given entities the same way the backend does.
    ///
    /// `offline` only counts entities that have a feed; unfed entities
    /// contribute to `total` alone.
    pub fn from_entities<'a, I>(entities: I) -> Self
    where
        I: IntoIterator<Item = &'a TrackedEntity>,
    {
        let mut stats = Self::default();
        for entity in entities {
            stats.total += 1;
            if entity.associated_task.is_some() {
                stats.active_tasks += 1;
            }
            if !entity.has_position_feed {
                continue;
            }
            if entity.is_online() {
                stats.online += 1;
                if entity.is_moving() {
                    stats.moving += 1;
                } else {
                    stats.stopped += 1;
                }
            } else {
                stats.offline += 1;
            }
        }
        stats
    }
}

/// One successful poll cycle's result. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    kind: EntityKind,
    sequence: u64,
    captured_at: u64,
    entities: Vec<TrackedEntity>,
    stats: AggregateStats,
}

impl Snapshot {
    pub fn new(
        kind: EntityKind,
        sequence: u64,
        captured_at: u64,
        entities: Vec<TrackedEntity>,
        stats: AggregateStats,
    ) -> Self {
        Self {
            kind,
            sequence,
            captured_at,
            entities,
            stats,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Cycle number within the issuing source (monotonic by start order).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Unix milliseconds at which the cycle completed.
    pub fn captured_at(&self) -> u64 {
        self.captured_at
    }

    pub fn entities(&self) -> &[TrackedEntity] {
        &self.entities
    }

    pub fn stats(&self) -> &AggregateStats {
        &self.stats
    }

    pub fn get(&self, id: &EntityId) -> Option<&TrackedEntity> {
        self.entities.iter().find(|e| &e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vehicle(id: &str, speed: f64, online: bool) -> TrackedEntity {
        TrackedEntity {
            id: EntityId::from(id),
            display_label: format!("WP-{}", id),
            category: Category::from("car"),
            status: OperationalStatus::Available,
            has_position_feed: true,
            position: Some(Position {
                lat: Some(7.0),
                lng: Some(80.0),
                speed_kph: speed,
                heading_deg: 0.0,
                ignition_on: speed > 0.0,
                is_online: online,
                last_update_at: 1_000,
                stop_since: None,
            }),
            assigned_operator: None,
            associated_task: None,
        }
    }

    #[test]
    fn test_decode_backend_json() {
        let json = r#"{
            "id": "V1",
            "displayLabel": "CAB-4471",
            "category": "van",
            "status": "busy",
            "hasPositionFeed": true,
            "position": {
                "lat": 6.9271, "lng": 79.8612, "speedKph": 42.5, "headingDeg": 90.0,
                "ignitionOn": true, "isOnline": true, "lastUpdateAt": 1700000000000
            },
            "assignedOperator": { "name": "Nimal Perera", "phone": "+94770000000" }
        }"#;
        let entity: TrackedEntity = serde_json::from_str(json).unwrap();
        assert_eq!(entity.status, OperationalStatus::Busy);
        assert!(entity.category.is_bulk());
        assert_eq!(entity.coordinates(), Some(LatLng::new(6.9271, 79.8612)));
        assert!(entity.is_online());
        assert!(entity.is_moving());
        assert_eq!(entity.operator_name(), Some("Nimal Perera"));
        assert!(entity.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_position_without_feed() {
        let mut entity = vehicle("V1", 0.0, true);
        entity.has_position_feed = false;
        assert_eq!(
            entity.validate(),
            Err(ModelError::PositionWithoutFeed(EntityId::from("V1")))
        );
        assert_eq!(entity.coordinates(), None);
        assert!(!entity.is_online());
    }

    #[test]
    fn test_validate_rejects_unpaired_coordinates() {
        let mut entity = vehicle("V2", 0.0, true);
        if let Some(p) = entity.position.as_mut() {
            p.lng = None;
        }
        assert_eq!(
            entity.validate(),
            Err(ModelError::UnpairedCoordinates(EntityId::from("V2")))
        );
    }

    #[test]
    fn test_stopped_for() {
        let mut entity = vehicle("V3", 0.0, true);
        let position = entity.position.as_mut().unwrap();
        position.stop_since = Some(60_000);
        assert_eq!(position.stopped_for(180_000), Some(Duration::from_secs(120)));

        position.speed_kph = 12.0;
        assert_eq!(position.stopped_for(180_000), None);
    }

    #[test]
    fn test_staleness() {
        let entity = vehicle("V4", 0.0, true);
        let position = entity.position.as_ref().unwrap();
        assert!(!position.is_stale(5_000, Duration::from_secs(10)));
        assert!(position.is_stale(20_000, Duration::from_secs(10)));
    }

    #[test]
    fn test_stats_from_entities() {
        let mut unfed = vehicle("V9", 0.0, false);
        unfed.has_position_feed = false;
        unfed.position = None;

        let entities = vec![
            vehicle("V1", 30.0, true),
            vehicle("V2", 0.0, true),
            vehicle("V3", 0.0, false),
            unfed,
        ];
        let stats = AggregateStats::from_entities(&entities);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.online, 2);
        assert_eq!(stats.moving, 1);
        assert_eq!(stats.stopped, 1);
        assert_eq!(stats.offline, 1);
        assert_eq!(stats.active_tasks, 0);
    }

    #[test]
    fn test_latlng_validity() {
        assert!(LatLng::new(7.0, 80.0).is_valid());
        assert!(!LatLng::new(91.0, 80.0).is_valid());
        assert!(!LatLng::new(f64::NAN, 80.0).is_valid());
    }
}
