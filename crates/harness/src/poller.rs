//! Readiness polling with an injectable clock

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ServiceAddress;
use crate::probe::Prober;

/// Source of time for the poller; swapped for a manual clock in tests
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `tokio::time`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Repeatedly probes an address until it answers or a deadline passes
#[derive(Clone)]
pub struct ReadinessPoller {
    prober: Arc<dyn Prober>,
    clock: Arc<dyn Clock>,
}

impl ReadinessPoller {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self::with_clock(prober, Arc::new(SystemClock))
    }

    pub fn with_clock(prober: Arc<dyn Prober>, clock: Arc<dyn Clock>) -> Self {
        Self { prober, clock }
    }

    /// Probe immediately, then every `interval`, until the address is
    /// reachable (`true`) or `deadline` has elapsed (`false`).
    ///
    /// The last sleep is clipped to the remaining time, and a probe still
    /// pending at `deadline + interval` counts as unreachable, so the call
    /// returns within `deadline + interval` however slow the prober is.
    pub async fn await_ready(
        &self,
        address: &ServiceAddress,
        interval: Duration,
        deadline: Duration,
    ) -> bool {
        let start = self.clock.now();
        let mut attempts = 0usize;

        loop {
            attempts += 1;

            let spent = self.clock.now().duration_since(start);
            let budget = (deadline + interval).saturating_sub(spent);
            let reachable = tokio::time::timeout(budget, self.prober.is_reachable(address))
                .await
                .unwrap_or(false);

            if reachable {
                debug!(
                    "{} ready after {} attempt(s) ({} ms)",
                    address,
                    attempts,
                    self.clock.now().duration_since(start).as_millis()
                );
                return true;
            }

            if attempts == 1 {
                info!("Waiting for {} to accept connections...", address);
            }

            let elapsed = self.clock.now().duration_since(start);
            if elapsed >= deadline {
                warn!(
                    "{} not ready after {} attempt(s) in {} ms",
                    address,
                    attempts,
                    elapsed.as_millis()
                );
                return false;
            }

            self.clock.sleep(interval.min(deadline - elapsed)).await;
        }
    }
}
