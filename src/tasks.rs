//! Periodic housekeeping for the detector and the gate.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::gate::AuditGate;
use crate::raid::RaidDetector;

/// `tokio::time::interval` panics on a zero period.
const MIN_TICK: Duration = Duration::from_millis(1);

/// Fire due raid-alert resets every `tick`.
///
/// Resets also fire lazily on the next detector call; this loop just closes
/// alerts promptly for guilds that have gone quiet.
pub fn spawn_reset_driver(detector: Arc<RaidDetector>, tick: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick.max(MIN_TICK));
        loop {
            interval.tick().await;
            let reset = detector.fire_due_resets().await;
            if !reset.is_empty() {
                tracing::debug!(count = reset.len(), "Raid alerts reset by driver");
            }
        }
    })
}

/// Sweep expired reports and stale rate-limit records at the gate's interval.
pub fn spawn_sweep_task<V>(gate: Arc<AuditGate<V>>) -> JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(gate.sweep_interval().max(MIN_TICK));
        // The first tick completes immediately; nothing to sweep at startup.
        interval.tick().await;
        loop {
            interval.tick().await;
            let report = gate.sweep();
            if report.expired_reports > 0 || report.stale_rate_limits > 0 {
                tracing::info!(
                    expired_reports = report.expired_reports,
                    stale_rate_limits = report.stale_rate_limits,
                    "Gate sweep completed"
                );
            }
        }
    })
}
