use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use resole_order::AssignmentEngine;

/// Periodically re-attempt assignment of orders left pending. A zero
/// interval disables the sweep.
pub fn start_assignment_sweep(engine: Arc<AssignmentEngine>, every: Duration) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        info!("Assignment sweep disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; checkout already tried assignment.
        ticker.tick().await;

        info!(interval_seconds = every.as_secs(), "Assignment sweep worker started");
        loop {
            ticker.tick().await;
            match engine.sweep().await {
                Ok(report) if report.assigned > 0 => {
                    info!(assigned = report.assigned, "Sweep assigned pending orders");
                }
                Ok(_) => {}
                Err(e) => error!("Assignment sweep failed: {}", e),
            }
        }
    }))
}
