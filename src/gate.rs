//! Cache and rate-limit gate in front of audit report generation.
//!
//! The two halves are independent. Callers consult the rate limit first and
//! the cache second; see [`crate::audit::AuditService`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::cache::{ReportCache, DEFAULT_REPORT_CAPACITY, DEFAULT_REPORT_TTL};
use crate::clock::Clock;
use crate::rate_limit::{
    default_command_cooldowns, CommandRateLimiter, RateLimitDecision, DEFAULT_COMMAND_COOLDOWN,
};

/// Gate configuration.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// How long a generated report is served from cache (default: 6 hours).
    pub cache_ttl: Duration,
    /// Maximum number of cached reports (default: 10,000).
    pub cache_capacity: u64,
    /// Per-command cooldowns.
    pub command_cooldowns: HashMap<String, Duration>,
    /// Cooldown for commands not listed above (default: 60 seconds).
    pub default_cooldown: Duration,
    /// Minimum age before a rate-limit record is swept (default: 1 hour).
    pub rate_limit_retention: Duration,
    /// Interval of the background sweep (default: 30 minutes).
    pub sweep_interval: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_REPORT_TTL,
            cache_capacity: DEFAULT_REPORT_CAPACITY,
            command_cooldowns: default_command_cooldowns(),
            default_cooldown: DEFAULT_COMMAND_COOLDOWN,
            rate_limit_retention: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(1800),
        }
    }
}

/// Gate statistics for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct GateStats {
    /// Cached reports, including expired ones not yet evicted.
    pub cache_size: u64,
    /// Tracked `(guild, command)` rate-limit records.
    pub rate_limit_entry_count: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Cache hit rate (0.0 to 1.0).
    pub hit_rate: f64,
}

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_reports: usize,
    pub stale_rate_limits: usize,
}

/// Read-through cache plus per-command cooldown for one report namespace.
pub struct AuditGate<V> {
    cache: ReportCache<V>,
    limiter: CommandRateLimiter,
    rate_limit_retention: Duration,
    sweep_interval: Duration,
}

impl<V> AuditGate<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(GateConfig::default(), clock)
    }

    pub fn with_config(config: GateConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: ReportCache::with_config(config.cache_ttl, config.cache_capacity, clock.clone()),
            limiter: CommandRateLimiter::with_cooldowns(
                config.command_cooldowns,
                config.default_cooldown,
                clock,
            ),
            rate_limit_retention: config.rate_limit_retention,
            sweep_interval: config.sweep_interval,
        }
    }

    /// Admit or deny a command invocation, spending the slot on admission.
    ///
    /// The slot is spent even if the caller then finds a cached report.
    pub fn check_rate_limit(&self, guild_id: &str, command: &str) -> RateLimitDecision {
        let decision = self.limiter.check(guild_id, command);
        if let RateLimitDecision::Denied { remaining_seconds } = decision {
            tracing::debug!(
                guild_id = %guild_id,
                command = %command,
                remaining_seconds = remaining_seconds,
                "Command throttled"
            );
        }
        decision
    }

    /// Rate-limit decision without spending the slot.
    pub fn peek_rate_limit(&self, guild_id: &str, command: &str) -> RateLimitDecision {
        self.limiter.peek(guild_id, command)
    }

    pub fn cooldown_for(&self, command: &str) -> Duration {
        self.limiter.cooldown_for(command)
    }

    pub fn get_cached(&self, guild_id: &str) -> Option<V> {
        self.cache.get(guild_id)
    }

    pub fn set_cached(&self, guild_id: &str, payload: V) {
        self.cache.insert(guild_id, payload);
    }

    pub fn invalidate(&self, guild_id: &str) {
        self.cache.invalidate(guild_id);
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            cache_size: self.cache.len(),
            rate_limit_entry_count: self.limiter.len(),
            cache_hits: self.cache.hits(),
            cache_misses: self.cache.misses(),
            hit_rate: self.cache.hit_rate(),
        }
    }

    /// Evict expired reports and stale rate-limit records.
    pub fn sweep(&self) -> SweepReport {
        SweepReport {
            expired_reports: self.cache.evict_expired(),
            stale_rate_limits: self.limiter.evict_stale(self.rate_limit_retention),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }
}
