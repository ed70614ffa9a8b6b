//! Optional background eviction of idle browse sessions.
//!
//! Eviction also runs at the start of every browse call; the sweeper only
//! adds a bound on how long an idle gateway keeps dead sessions around.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::service::QueueGateway;

/// Periodic idle-session sweep running on its own task
pub struct SessionSweeper {
    task: JoinHandle<()>,
}

impl SessionSweeper {
    /// Spawns a sweep every `interval`. The first sweep runs one interval in.
    pub fn spawn(gateway: Arc<QueueGateway>, interval: Duration) -> Self {
        info!(interval_secs = interval.as_secs(), "Browse session sweeper started");
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if gateway.is_shut_down() {
                    break;
                }
                let evicted = gateway.evict_idle_sessions().await;
                debug!(evicted, "Browse session sweep finished");
            }
        });
        Self { task }
    }

    /// Stops the sweeper task.
    pub fn stop(self) {
        self.task.abort();
        info!("Browse session sweeper stopped");
    }
}
