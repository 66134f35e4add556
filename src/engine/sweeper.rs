use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::state::AppState;

/// Periodically expires elapsed broadcasts so orders reach the manual queue
/// without anyone polling for them.
pub async fn run_expiry_sweeper(state: Arc<AppState>, every: Duration) {
    info!(interval_secs = every.as_secs(), "expiry sweeper started");

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match state.engine.tick() {
            Ok(expired) if !expired.is_empty() => {
                info!(count = expired.len(), "expired unclaimed broadcasts");
            }
            Ok(_) => {}
            Err(err) => error!(error = %err, "expiry sweep failed"),
        }
    }
}
