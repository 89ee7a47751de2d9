//! Dispatch backend calls used by the tracking core.
//!
//! [`DispatchApi`] is the typed contract; [`JsonDispatchApi`] implements it
//! over any [`JsonTransport`] by decoding the JSON envelopes and checking the
//! entity invariants. A response that fails either step is a
//! `MalformedResponse`, never a panic.

use crate::model::{AggregateStats, EntityKind, TrackedEntity};
use async_trait::async_trait;
use fleetview_env::{ApiError, EntityId, JsonTransport};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;

pub const ACTIVE_RIDES_PATH: &str = "/rides/active";
pub const VEHICLES_PATH: &str = "/vehicles";
pub const STATS_PATH: &str = "/stats";

/// Path of the single-vehicle lookup.
pub fn vehicle_path(id: &EntityId) -> String {
    format!("{}/{}", VEHICLES_PATH, id)
}

/// Typed view of the dispatch backend.
#[async_trait]
pub trait DispatchApi: Send + Sync + 'static {
    /// Rides in progress, each with its vehicle.
    async fn get_active_rides(&self) -> Result<Vec<TrackedEntity>, ApiError>;

    /// Every vehicle in the fleet.
    async fn get_all_vehicles(&self) -> Result<Vec<TrackedEntity>, ApiError>;

    /// Fleet-wide counters.
    async fn get_stats(&self) -> Result<AggregateStats, ApiError>;

    /// A single vehicle, for the detail panel.
    async fn get_vehicle(&self, id: &EntityId) -> Result<TrackedEntity, ApiError>;

    /// The entity list for the given kind.
    async fn list(&self, kind: EntityKind) -> Result<Vec<TrackedEntity>, ApiError> {
        match kind {
            EntityKind::Vehicles => self.get_all_vehicles().await,
            EntityKind::ActiveTasks => self.get_active_rides().await,
        }
    }
}

#[derive(Deserialize)]
struct RidesEnvelope {
    rides: Vec<TrackedEntity>,
}

#[derive(Deserialize)]
struct VehiclesEnvelope {
    vehicles: Vec<TrackedEntity>,
}

#[derive(Deserialize)]
struct StatsEnvelope {
    stats: AggregateStats,
}

#[derive(Deserialize)]
struct VehicleEnvelope {
    vehicle: TrackedEntity,
}

/// [`DispatchApi`] over a raw JSON transport.
pub struct JsonDispatchApi<T: JsonTransport> {
    transport: Arc<T>,
}

impl<T: JsonTransport> JsonDispatchApi<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    async fn fetch<E: DeserializeOwned>(&self, path: &str) -> Result<E, ApiError> {
        let body = self.transport.get(path).await?;
        decode(path, &body)
    }
}

fn decode<E: DeserializeOwned>(path: &str, body: &[u8]) -> Result<E, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::malformed(format!("{}: {}", path, e)))
}

fn validated(entities: Vec<TrackedEntity>) -> Result<Vec<TrackedEntity>, ApiError> {
    for entity in &entities {
        entity
            .validate()
            .map_err(|e| ApiError::malformed(e.to_string()))?;
    }
    Ok(entities)
}

#[async_trait]
impl<T: JsonTransport> DispatchApi for JsonDispatchApi<T> {
    async fn get_active_rides(&self) -> Result<Vec<TrackedEntity>, ApiError> {
        let envelope: RidesEnvelope = self.fetch(ACTIVE_RIDES_PATH).await?;
        validated(envelope.rides)
    }

    async fn get_all_vehicles(&self) -> Result<Vec<TrackedEntity>, ApiError> {
        let envelope: VehiclesEnvelope = self.fetch(VEHICLES_PATH).await?;
        validated(envelope.vehicles)
    }

    async fn get_stats(&self) -> Result<AggregateStats, ApiError> {
        let envelope: StatsEnvelope = self.fetch(STATS_PATH).await?;
        Ok(envelope.stats)
    }

    async fn get_vehicle(&self, id: &EntityId) -> Result<TrackedEntity, ApiError> {
        let envelope: VehicleEnvelope = self.fetch(&vehicle_path(id)).await?;
        envelope
            .vehicle
            .validate()
            .map_err(|e| ApiError::malformed(e.to_string()))?;
        Ok(envelope.vehicle)
    }
}
