//! Bastion service host.
//!
//! Builds the raid detector and audit gate, runs their housekeeping tasks, and
//! serves health and stats until interrupted.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bastion::audit::AuditReport;
use bastion::clock::{Clock, SystemClock};
use bastion::config::BastionConfig;
use bastion::error::{BastionError, Result};
use bastion::gate::AuditGate;
use bastion::health::{spawn_health_server, HealthState};
use bastion::raid::RaidDetector;
use bastion::tasks::{spawn_reset_driver, spawn_sweep_task};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    // RUST_LOG overrides the default info level, e.g. RUST_LOG=bastion=debug
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Bastion starting...");

    let config = BastionConfig::from_env()?;
    tracing::info!(
        join_threshold = config.raid.join_threshold,
        join_window_ms = config.raid.join_window.as_millis() as u64,
        cache_ttl_secs = config.gate.cache_ttl.as_secs(),
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let detector = Arc::new(RaidDetector::with_config(config.raid.clone(), clock.clone()));
    tracing::info!("Raid detector initialized");

    let gate: Arc<AuditGate<AuditReport>> =
        Arc::new(AuditGate::with_config(config.gate.clone(), clock));
    tracing::info!("Audit gate initialized");

    spawn_reset_driver(detector.clone(), config.raid_reset_tick);
    spawn_sweep_task(gate.clone());
    tracing::info!("Background tasks spawned");

    spawn_health_server(
        config.health_port,
        HealthState {
            detector: detector.clone(),
            gate: gate.clone(),
        },
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| BastionError::Io(format!("Failed to listen for shutdown: {}", e)))?;

    let stats = gate.stats();
    tracing::info!(
        cached_reports = stats.cache_size,
        rate_limit_records = stats.rate_limit_entry_count,
        "Bastion shutting down"
    );

    Ok(())
}
