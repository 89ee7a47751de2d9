//! Ground truth fleet for simulation.
//!
//! The FleetWorld is what the dispatch backend "knows":
//! - Where every vehicle is and how fast it is going
//! - Which trackers are reporting (online) and which vehicles have none
//! - Operational status, drivers and rides in progress
//!
//! All randomness comes from one seeded ChaCha8 stream, so a seed fully
//! determines every snapshot the backend will ever serve.

use fleetview_core::model::{Operator, Position, TaskInfo};
use fleetview_core::{AggregateStats, Category, OperationalStatus, TrackedEntity};
use fleetview_env::EntityId;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Operating area (greater Colombo): south-west and north-east corners.
const AREA_MIN: (f64, f64) = (6.80, 79.80);
const AREA_MAX: (f64, f64) = (7.10, 80.10);

const KM_PER_DEGREE: f64 = 111.0;

const CATEGORIES: [&str; 4] = ["car", "van", "crew-cab", "tuk"];
const DRIVERS: [&str; 6] = ["Nimal Perera", "Kamal Silva", "Ayesha Fernando", "Ruwan Jayasuriya", "Dilani Costa", "Saman Kumara"];

/// Per-step event probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChurnRates {
    /// Online tracker drops out
    pub go_offline: f64,
    /// Offline tracker comes back
    pub come_online: f64,
    /// Moving vehicle stops
    pub stop: f64,
    /// Stopped vehicle pulls away
    pub pull_away: f64,
    /// Dispatch changes the vehicle's status
    pub status_change: f64,
    /// One vehicle leaves the fleet and a new one joins
    pub replace: f64,
}

impl Default for ChurnRates {
    fn default() -> Self {
        Self {
            go_offline: 0.02,
            come_online: 0.3,
            stop: 0.1,
            pull_away: 0.15,
            status_change: 0.03,
            replace: 0.05,
        }
    }
}

/// A vehicle in the simulated fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimVehicle {
    pub id: EntityId,
    pub label: String,
    pub category: Category,
    pub status: OperationalStatus,
    pub has_feed: bool,
    pub lat: f64,
    pub lng: f64,
    pub speed_kph: f64,
    pub heading_deg: f64,
    pub is_online: bool,
    pub last_fix_ms: u64,
    pub stop_since: Option<u64>,
    pub driver: Option<String>,
    pub ride: Option<String>,
}

impl SimVehicle {
    /// The vehicle as the backend serves it.
    pub fn to_entity(&self) -> TrackedEntity {
        let position = self.has_feed.then(|| Position {
            lat: Some(self.lat),
            lng: Some(self.lng),
            speed_kph: self.speed_kph,
            heading_deg: self.heading_deg,
            ignition_on: self.speed_kph > 0.0,
            is_online: self.is_online,
            last_update_at: self.last_fix_ms,
            stop_since: self.stop_since,
        });
        TrackedEntity {
            id: self.id.clone(),
            display_label: self.label.clone(),
            category: self.category.clone(),
            status: self.status,
            has_position_feed: self.has_feed,
            position,
            assigned_operator: self.driver.as_ref().map(|name| Operator {
                name: name.clone(),
                phone: Some("+94 77 000 0000".to_string()),
            }),
            associated_task: self.ride.as_ref().map(|ride| TaskInfo {
                task_id: ride.clone(),
                task_status: "in_progress".to_string(),
                requester: Some("Operations".to_string()),
                eta_minutes: Some(12),
            }),
        }
    }

    fn is_moving(&self) -> bool {
        self.is_online && self.speed_kph > 0.0
    }
}

/// The simulated dispatch backend's state.
pub struct FleetWorld {
    rng: ChaCha8Rng,
    vehicles: BTreeMap<u64, SimVehicle>,
    next_id: u64,
    /// Unix milliseconds
    time_ms: u64,
    rates: ChurnRates,
    heading_noise: Normal<f64>,
}

impl FleetWorld {
    /// Creates an empty world whose clock starts at `epoch_ms`.
    pub fn new(seed: u64, epoch_ms: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            vehicles: BTreeMap::new(),
            next_id: 1,
            time_ms: epoch_ms,
            rates: ChurnRates::default(),
            heading_noise: Normal::new(0.0, 15.0).expect("valid heading noise"),
        }
    }

    /// Creates a world populated with `fleet_size` vehicles.
    pub fn with_fleet(seed: u64, epoch_ms: u64, fleet_size: usize) -> Self {
        let mut world = Self::new(seed, epoch_ms);
        for _ in 0..fleet_size {
            world.spawn_vehicle();
        }
        world
    }

    pub fn set_rates(&mut self, rates: ChurnRates) {
        self.rates = rates;
    }

    /// Adds a vehicle at a random spot and returns its id.
    pub fn spawn_vehicle(&mut self) -> EntityId {
        let n = self.next_id;
        self.next_id += 1;

        let id = EntityId::new(format!("veh-{:04}", n));
        let category = CATEGORIES[self.rng.gen_range(0..CATEGORIES.len())];
        let has_feed = self.rng.gen_bool(0.9);
        let moving = self.rng.gen_bool(0.5);
        let status = match self.rng.gen_range(0..10) {
            0 => OperationalStatus::Maintenance,
            1..=3 => OperationalStatus::Busy,
            _ => OperationalStatus::Available,
        };
        let vehicle = SimVehicle {
            id: id.clone(),
            label: format!("WP-{}", 1000 + n),
            category: Category::from(category),
            status,
            has_feed,
            lat: self.rng.gen_range(AREA_MIN.0..AREA_MAX.0),
            lng: self.rng.gen_range(AREA_MIN.1..AREA_MAX.1),
            speed_kph: if moving { self.rng.gen_range(10.0..60.0) } else { 0.0 },
            heading_deg: self.rng.gen_range(0.0..360.0),
            is_online: has_feed && self.rng.gen_bool(0.85),
            last_fix_ms: self.time_ms,
            stop_since: (!moving).then_some(self.time_ms),
            driver: DRIVERS.choose(&mut self.rng).map(|d| d.to_string()),
            ride: (status == OperationalStatus::Busy).then(|| format!("ride-{}", n)),
        };
        self.vehicles.insert(n, vehicle);
        id
    }

    /// Removes a vehicle from the fleet. Returns false if it was not there.
    pub fn retire(&mut self, id: &EntityId) -> bool {
        let key = self
            .vehicles
            .iter()
            .find(|(_, v)| &v.id == id)
            .map(|(k, _)| *k);
        match key {
            Some(k) => self.vehicles.remove(&k).is_some(),
            None => false,
        }
    }

    /// Advances the world by `dt`: vehicles drive, stop, drop out and churn.
    pub fn step(&mut self, dt: Duration) {
        self.time_ms += dt.as_millis() as u64;
        let now = self.time_ms;
        let hours = dt.as_secs_f64() / 3600.0;
        let rates = self.rates;

        for vehicle in self.vehicles.values_mut() {
            if !vehicle.has_feed {
                continue;
            }

            if vehicle.is_online {
                if self.rng.gen_bool(rates.go_offline) {
                    vehicle.is_online = false;
                    continue;
                }
            } else {
                if self.rng.gen_bool(rates.come_online) {
                    vehicle.is_online = true;
                }
                continue;
            }

            if vehicle.speed_kph > 0.0 {
                if self.rng.gen_bool(rates.stop) {
                    vehicle.speed_kph = 0.0;
                    vehicle.stop_since = Some(now);
                }
            } else if self.rng.gen_bool(rates.pull_away) {
                vehicle.speed_kph = self.rng.gen_range(10.0..60.0);
                vehicle.stop_since = None;
            }

            if vehicle.is_moving() {
                vehicle.heading_deg =
                    (vehicle.heading_deg + self.heading_noise.sample(&mut self.rng)).rem_euclid(360.0);
                let km = vehicle.speed_kph * hours;
                let heading = vehicle.heading_deg.to_radians();
                vehicle.lat += km * heading.cos() / KM_PER_DEGREE;
                vehicle.lng += km * heading.sin() / (KM_PER_DEGREE * vehicle.lat.to_radians().cos());
                // Turn back at the edge of the operating area
                if !(AREA_MIN.0..AREA_MAX.0).contains(&vehicle.lat)
                    || !(AREA_MIN.1..AREA_MAX.1).contains(&vehicle.lng)
                {
                    vehicle.lat = vehicle.lat.clamp(AREA_MIN.0, AREA_MAX.0);
                    vehicle.lng = vehicle.lng.clamp(AREA_MIN.1, AREA_MAX.1);
                    vehicle.heading_deg = (vehicle.heading_deg + 180.0).rem_euclid(360.0);
                }
            }
            vehicle.last_fix_ms = now;

            if self.rng.gen_bool(rates.status_change) {
                vehicle.status = match vehicle.status {
                    OperationalStatus::Available => OperationalStatus::Busy,
                    OperationalStatus::Busy => OperationalStatus::Available,
                    OperationalStatus::Maintenance => OperationalStatus::Available,
                };
                vehicle.ride = (vehicle.status == OperationalStatus::Busy)
                    .then(|| format!("ride-{}-{}", vehicle.id, now));
            }
        }

        if !self.vehicles.is_empty() && self.rng.gen_bool(rates.replace) {
            let keys: Vec<u64> = self.vehicles.keys().copied().collect();
            if let Some(key) = keys.choose(&mut self.rng) {
                self.vehicles.remove(key);
            }
            self.spawn_vehicle();
        }
    }

    /// Unix milliseconds of the world clock.
    pub fn time_ms(&self) -> u64 {
        self.time_ms
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    pub fn vehicles(&self) -> impl Iterator<Item = &SimVehicle> {
        self.vehicles.values()
    }

    /// Every vehicle, in id order (`getAllVehicles`).
    pub fn entities(&self) -> Vec<TrackedEntity> {
        self.vehicles.values().map(SimVehicle::to_entity).collect()
    }

    /// Vehicles with a ride in progress (`getActiveRides`).
    pub fn active_rides(&self) -> Vec<TrackedEntity> {
        self.vehicles
            .values()
            .filter(|v| v.ride.is_some())
            .map(SimVehicle::to_entity)
            .collect()
    }

    pub fn entity(&self, id: &EntityId) -> Option<TrackedEntity> {
        self.vehicles.values().find(|v| &v.id == id).map(SimVehicle::to_entity)
    }

    /// Backend counters (`getStats`).
    pub fn stats(&self) -> AggregateStats {
        AggregateStats::from_entities(&self.entities())
    }
}
