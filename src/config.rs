//! Configuration loading from environment.
//!
//! Numeric settings fall back to their defaults when unset or unparsable.
//! Command cooldowns come from a JSON file or a `name=secs` list and are
//! merged over the built-in table.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{BastionError, Result};
use crate::gate::GateConfig;
use crate::raid::RaidConfig;

/// Main configuration for the bastion service.
#[derive(Debug, Clone)]
pub struct BastionConfig {
    /// Anti-raid thresholds.
    pub raid: RaidConfig,
    /// Report cache and command cooldowns.
    pub gate: GateConfig,
    /// How often the reset driver fires due raid-alert resets.
    pub raid_reset_tick: Duration,
    /// Port for the health and stats server.
    pub health_port: u16,
}

impl Default for BastionConfig {
    fn default() -> Self {
        Self {
            raid: RaidConfig::default(),
            gate: GateConfig::default(),
            raid_reset_tick: Duration::from_secs(1),
            health_port: 8080,
        }
    }
}

impl BastionConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional environment variables:
    /// - `RAID_JOIN_THRESHOLD`: Joins that raise an alert (default: 10, negative clamps to 0)
    /// - `RAID_WINDOW_MS`: Sliding window width (default: 30000, negative clamps to 0)
    /// - `RAID_COOLDOWN_SECS`: Alert suppression period (default: 300)
    /// - `RAID_ENABLED`: Monitoring for newly seen guilds (default: true)
    /// - `AUDIT_CACHE_TTL_SECS`: Report cache TTL (default: 21600)
    /// - `AUDIT_CACHE_CAPACITY`: Maximum cached reports (default: 10000)
    /// - `DEFAULT_COMMAND_COOLDOWN_SECS`: Cooldown for unlisted commands (default: 60)
    /// - `COMMAND_COOLDOWNS_PATH`: JSON object of command name to seconds
    /// - `COMMAND_COOLDOWNS`: Comma-separated `name=secs` overrides
    /// - `RATE_LIMIT_RETENTION_SECS`: Sweep age for rate-limit records (default: 3600)
    /// - `SWEEP_INTERVAL_SECS`: Background sweep interval (default: 1800)
    /// - `RAID_RESET_TICK_SECS`: Reset driver interval (default: 1)
    /// - `HEALTH_PORT`: Health/stats server port (default: 8080)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let raid = RaidConfig {
            join_threshold: env_i64("RAID_JOIN_THRESHOLD")
                .map(clamp_u32)
                .unwrap_or(defaults.raid.join_threshold),
            join_window: env_i64("RAID_WINDOW_MS")
                .map(|ms| Duration::from_millis(u64::try_from(ms).unwrap_or(0)))
                .unwrap_or(defaults.raid.join_window),
            alert_cooldown: env_secs("RAID_COOLDOWN_SECS").unwrap_or(defaults.raid.alert_cooldown),
            enabled_by_default: env_bool("RAID_ENABLED")
                .unwrap_or(defaults.raid.enabled_by_default),
        };

        let gate = GateConfig {
            cache_ttl: env_secs("AUDIT_CACHE_TTL_SECS").unwrap_or(defaults.gate.cache_ttl),
            cache_capacity: env_parse("AUDIT_CACHE_CAPACITY")
                .unwrap_or(defaults.gate.cache_capacity),
            command_cooldowns: load_command_cooldowns(defaults.gate.command_cooldowns)?,
            default_cooldown: env_secs("DEFAULT_COMMAND_COOLDOWN_SECS")
                .unwrap_or(defaults.gate.default_cooldown),
            rate_limit_retention: env_secs("RATE_LIMIT_RETENTION_SECS")
                .unwrap_or(defaults.gate.rate_limit_retention),
            sweep_interval: env_secs("SWEEP_INTERVAL_SECS")
                .unwrap_or(defaults.gate.sweep_interval),
        };

        Ok(Self {
            raid,
            gate,
            raid_reset_tick: env_secs("RAID_RESET_TICK_SECS").unwrap_or(defaults.raid_reset_tick),
            health_port: env_parse("HEALTH_PORT").unwrap_or(defaults.health_port),
        })
    }
}

fn env_parse<T: std::str::FromStr>(var_name: &str) -> Option<T> {
    env::var(var_name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_i64(var_name: &str) -> Option<i64> {
    env_parse(var_name)
}

fn env_secs(var_name: &str) -> Option<Duration> {
    env_parse::<u64>(var_name).map(Duration::from_secs)
}

fn env_bool(var_name: &str) -> Option<bool> {
    env::var(var_name)
        .ok()
        .and_then(|s| match s.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

/// Negative thresholds mean "always trigger".
fn clamp_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

/// Merge cooldown overrides from file and environment over `base`.
fn load_command_cooldowns(
    mut base: HashMap<String, Duration>,
) -> Result<HashMap<String, Duration>> {
    if let Ok(path) = env::var("COMMAND_COOLDOWNS_PATH") {
        base.extend(load_cooldowns_from_file(&path)?);
    }

    if let Ok(list) = env::var("COMMAND_COOLDOWNS") {
        base.extend(parse_cooldown_list(&list)?);
    }

    Ok(base)
}

/// Load cooldowns from a JSON object file, e.g. `{"audit": 600}`.
fn load_cooldowns_from_file(path: &str) -> Result<HashMap<String, Duration>> {
    let path = Path::new(path);
    let content = fs::read_to_string(path)
        .map_err(|e| BastionError::Config(format!("Failed to read cooldowns file: {}", e)))?;

    let secs: HashMap<String, u64> = serde_json::from_str(&content)
        .map_err(|e| BastionError::Config(format!("Failed to parse cooldowns file: {}", e)))?;

    Ok(secs
        .into_iter()
        .map(|(name, secs)| (name, Duration::from_secs(secs)))
        .collect())
}

/// Parse a comma-separated `name=secs` list.
fn parse_cooldown_list(list: &str) -> Result<HashMap<String, Duration>> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, secs) = entry.split_once('=').ok_or_else(|| {
                BastionError::Config(format!("Cooldown entry missing '=': {}", entry))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(BastionError::Config(format!(
                    "Cooldown entry missing command name: {}",
                    entry
                )));
            }
            let secs: u64 = secs.trim().parse().map_err(|_| {
                BastionError::Config(format!("Invalid cooldown seconds: {}", entry))
            })?;
            Ok((name.to_string(), Duration::from_secs(secs)))
        })
        .collect()
}
