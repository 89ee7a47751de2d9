//! Simulated dispatch backend with fault injection.

use crate::fleet::FleetWorld;
use async_trait::async_trait;
use fleetview_core::api::{ACTIVE_RIDES_PATH, STATS_PATH, VEHICLES_PATH};
use fleetview_env::{ApiError, EntityId, JsonTransport};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Fault knobs for the simulated backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FaultProfile {
    /// Probability that a request fails at the transport level (0.0 - 1.0)
    pub failure_rate: f64,

    /// Probability that a response body is cut short (0.0 - 1.0)
    pub malformed_rate: f64,

    /// Fixed response latency
    pub latency: Duration,
}

/// Request counters, for scenario metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    pub requests: u64,
    pub failed: u64,
    pub malformed: u64,
    pub not_found: u64,
}

struct FaultState {
    rng: ChaCha8Rng,
    profile: FaultProfile,
    fail_next: usize,
    stats: TransportStats,
}

enum Verdict {
    Serve,
    Fail,
    Truncate,
}

/// Serves the [`FleetWorld`] as JSON the way the dispatch backend would.
pub struct SimTransport {
    world: Arc<Mutex<FleetWorld>>,
    faults: Mutex<FaultState>,
}

impl SimTransport {
    /// Creates a transport over `world` with its own fault RNG stream.
    pub fn new(world: Arc<Mutex<FleetWorld>>, fault_seed: u64) -> Self {
        Self {
            world,
            faults: Mutex::new(FaultState {
                rng: ChaCha8Rng::seed_from_u64(fault_seed),
                profile: FaultProfile::default(),
                fail_next: 0,
                stats: TransportStats::default(),
            }),
        }
    }

    pub fn with_profile(self, profile: FaultProfile) -> Self {
        self.set_profile(profile);
        self
    }

    pub fn set_profile(&self, profile: FaultProfile) {
        self.lock().profile = profile;
    }

    pub fn profile(&self) -> FaultProfile {
        self.lock().profile
    }

    /// Forces the next `n` requests to fail regardless of the profile.
    pub fn fail_next(&self, n: usize) {
        self.lock().fail_next = n;
    }

    pub fn stats(&self) -> TransportStats {
        self.lock().stats
    }

    pub fn world(&self) -> &Arc<Mutex<FleetWorld>> {
        &self.world
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FaultState> {
        self.faults.lock().expect("fault state mutex poisoned")
    }

    /// Decides this request's fate up front so the RNG stream does not
    /// depend on task interleaving after the latency sleep.
    fn roll(&self) -> (Verdict, Duration) {
        let mut state = self.lock();
        state.stats.requests += 1;
        let latency = state.profile.latency;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            state.stats.failed += 1;
            return (Verdict::Fail, latency);
        }
        let FaultProfile {
            failure_rate,
            malformed_rate,
            ..
        } = state.profile;
        if state.rng.gen_bool(failure_rate.clamp(0.0, 1.0)) {
            state.stats.failed += 1;
            return (Verdict::Fail, latency);
        }
        if state.rng.gen_bool(malformed_rate.clamp(0.0, 1.0)) {
            state.stats.malformed += 1;
            return (Verdict::Truncate, latency);
        }
        (Verdict::Serve, latency)
    }

    fn render(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let world = self.world.lock().expect("fleet world mutex poisoned");
        let body = match path {
            VEHICLES_PATH => serde_json::json!({ "vehicles": world.entities() }),
            ACTIVE_RIDES_PATH => serde_json::json!({ "rides": world.active_rides() }),
            STATS_PATH => serde_json::json!({ "stats": world.stats() }),
            _ => {
                let vehicle = path
                    .strip_prefix(VEHICLES_PATH)
                    .and_then(|rest| rest.strip_prefix('/'))
                    .and_then(|id| world.entity(&EntityId::from(id)));
                match vehicle {
                    Some(vehicle) => serde_json::json!({ "vehicle": vehicle }),
                    None => {
                        drop(world);
                        self.lock().stats.not_found += 1;
                        return Err(ApiError::status(404, path));
                    }
                }
            }
        };
        serde_json::to_vec(&body).map_err(|e| ApiError::transport(e.to_string()))
    }
}

#[async_trait]
impl JsonTransport for SimTransport {
    async fn get(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let (verdict, latency) = self.roll();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match verdict {
            Verdict::Fail => {
                debug!("Injected transport failure for {}", path);
                Err(ApiError::transport(format!("connection reset ({})", path)))
            }
            Verdict::Truncate => {
                debug!("Injected truncated body for {}", path);
                let mut body = self.render(path)?;
                body.truncate(body.len() / 2);
                Ok(body)
            }
            Verdict::Serve => self.render(path),
        }
    }
}
