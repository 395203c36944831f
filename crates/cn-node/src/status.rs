//! Periodic runner health log.

use std::time::Duration;

use cn_runner::Runner;
use tokio::time;

/// Log the runner's health every `interval`, forever. Intended to be raced
/// against the shutdown signal in `main`.
pub async fn run(runner: &Runner, interval: Duration) {
    // `interval` panics on a zero period.
    let mut ticker = time::interval(interval.max(Duration::from_secs(1)));
    // Skip the first tick (fires immediately).
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let health = runner.health();
        if health.is_degraded() {
            tracing::warn!(
                state = ?health.state,
                failed_loops = ?health.failed_loops,
                "runner degraded"
            );
        } else {
            tracing::debug!(state = ?health.state, "runner healthy");
        }
    }
}
