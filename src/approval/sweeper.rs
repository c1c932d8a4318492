//! Background timeout sweep.
//!
//! Periodically expires pending approvals whose deadline passed without a
//! decision. The sweep itself is just [`ApprovalEngine::sweep_expired`]; this
//! type owns the loop, the interval, and graceful shutdown.

use super::engine::ApprovalEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Runs the expiry sweep on a fixed interval until shutdown.
pub struct TimeoutSweeper {
    engine: Arc<ApprovalEngine>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl TimeoutSweeper {
    /// Creates a sweeper.
    #[must_use]
    pub fn new(engine: Arc<ApprovalEngine>, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            engine,
            interval,
            shutdown,
        }
    }

    /// Runs until the shutdown token is cancelled, with one final sweep on
    /// the way out so restarts never inherit overdue pending records this
    /// process already saw.
    pub async fn run(&self) {
        info!(interval_secs = self.interval.as_secs(), "Timeout sweeper started");

        let mut ticker = tokio::time::interval(self.interval);
        // Don't catch up on missed ticks
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!("Timeout sweeper shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }

        self.sweep_once().await;
        info!("Timeout sweeper stopped");
    }

    async fn sweep_once(&self) {
        match self.engine.sweep_expired().await {
            Ok(0) => {}
            Ok(expired) => info!(expired, "Expired overdue approvals"),
            Err(e) => warn!(error = %e, "Expiry sweep failed"),
        }
    }
}
