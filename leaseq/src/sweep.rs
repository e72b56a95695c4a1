//! Periodic reclamation of expired messages
//!
//! Expiry is already enforced lazily by every queue operation; this task only
//! frees the memory of messages nobody touches again.

use leaseq_queue::QueueState;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Spawn the sweep task. A zero interval disables it.
pub fn spawn_expiry_sweep(state: Arc<QueueState>, every: Duration) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        info!("Expiry sweep disabled");
        return None;
    }

    info!(interval_secs = every.as_secs(), "Starting expiry sweep");
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let purged = state.queue().purge_expired();
            if purged > 0 {
                debug!(queue = %state.queue().name(), purged = purged, "Swept expired messages");
            }
        }
    }))
}
