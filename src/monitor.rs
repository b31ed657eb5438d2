//! Periodic idle detection.
//!
//! Every tick the monitor samples [`ActivityState`]; once no client has
//! been connected for the idle threshold it asks the coordinator to shut
//! the server down. It only reads atomics, so it never contends with
//! connection handlers.

use crate::activity::{ActivitySnapshot, ActivityState};
use crate::shutdown::{ShutdownCoordinator, ShutdownReason};
use std::sync::Arc;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Whether `snapshot` shows the server idle for at least `threshold`.
pub fn is_idle(snapshot: &ActivitySnapshot, now: Instant, threshold: Duration) -> bool {
    snapshot.active == 0 && snapshot.idle_for(now) >= threshold
}

/// Background task to shut the server down after a period without clients.
pub async fn run(
    activity: Arc<ActivityState>,
    coordinator: Arc<ShutdownCoordinator>,
    interval: Duration,
    idle_threshold: Duration,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        interval_ms = interval.as_millis() as u64,
        idle_threshold_ms = idle_threshold.as_millis() as u64,
        "Activity monitor started"
    );

    loop {
        ticker.tick().await;
        let snapshot = activity.snapshot();

        if is_idle(&snapshot, Instant::now(), idle_threshold) {
            info!(
                idle_threshold_ms = idle_threshold.as_millis() as u64,
                "No clients connected for the idle threshold"
            );
            coordinator.shutdown(ShutdownReason::Idle);
            return;
        }

        debug!(active = snapshot.active, "Activity check");
    }
}
