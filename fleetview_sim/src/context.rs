//! Simulation context implementing FleetContext for deterministic runs.

use async_trait::async_trait;
use fleetview_env::FleetContext;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Simulation context backed by tokio's paused clock.
///
/// Run inside a runtime with time paused: `sleep` then never waits on the
/// wall clock, the scheduler jumps straight to the next timer, and every
/// run with the same seed sees the same interleaving.
///
/// - `now()` is virtual time since the context was created
/// - `system_time()` maps virtual time onto a fixed epoch
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Virtual time zero
    start: Instant,

    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            start: Instant::now(),
            epoch: UNIX_EPOCH + Duration::from_secs(1704067200), // 2024-01-01 00:00:00 UTC
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::new(seed))
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Virtual time in seconds, for logs and exports.
    pub fn time_secs(&self) -> f64 {
        self.now().as_secs_f64()
    }
}

#[async_trait]
impl FleetContext for SimContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::trace!("spawn {}", name);
        tokio::spawn(future);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sim_context_time() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.sleep(Duration::from_secs(1)).await;
        assert_eq!(ctx.now(), Duration::from_secs(1));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(ctx.now(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sim_context_epoch() {
        let ctx = SimContext::new(7);
        assert_eq!(ctx.unix_millis(), 1_704_067_200_000);

        ctx.sleep(Duration::from_secs(15)).await;
        assert_eq!(ctx.unix_millis(), 1_704_067_215_000);
        assert_eq!(ctx.seed(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sim_context_spawn_runs_on_virtual_clock() {
        let ctx = SimContext::shared(1);
        let (tx, rx) = tokio::sync::oneshot::channel();
        let inner = std::sync::Arc::clone(&ctx);
        ctx.spawn("probe", async move {
            inner.sleep(Duration::from_secs(60)).await;
            let _ = tx.send(inner.now());
        });

        let fired_at = rx.await.unwrap();
        assert_eq!(fired_at, Duration::from_secs(60));
    }
}
