//! Audit report pipeline.
//!
//! Runs a report-requesting command through the gate in a fixed order:
//! rate limit, then cache, then the expensive generator. Generator calls are
//! additionally capped by a process-wide AI quota.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use governor::clock::{Clock as _, DefaultClock};
use governor::{Quota, RateLimiter as GovRateLimiter};
use serde::{Deserialize, Serialize};

use crate::error::{BastionError, ErrorContext, Result};
use crate::gate::AuditGate;
use crate::rate_limit::RateLimitDecision;

/// Rate limiter type alias.
type RateLimiter = GovRateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// A generated audit report for one guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub guild_id: String,
    /// Overall health score, 0-100.
    pub score: u8,
    pub summary: String,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Produces a fresh report, typically by prompting an LLM.
pub trait ReportGenerator: Send + Sync {
    fn generate(&self, guild_id: &str) -> impl Future<Output = Result<AuditReport>> + Send;
}

/// What a report command resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditOutcome {
    /// Cooldown still running; nothing was generated.
    Throttled { remaining_seconds: u64 },
    /// Served from cache.
    Cached(AuditReport),
    /// Newly generated and cached.
    Fresh(AuditReport),
}

impl AuditOutcome {
    pub fn report(&self) -> Option<&AuditReport> {
        match self {
            Self::Throttled { .. } => None,
            Self::Cached(report) | Self::Fresh(report) => Some(report),
        }
    }

    /// Short notice for the invoking user, if one is warranted.
    pub fn notice(&self, command: &str) -> Option<String> {
        match self {
            Self::Throttled { remaining_seconds } => Some(format!(
                "Please wait {}s before using /{} again.",
                remaining_seconds, command
            )),
            Self::Cached(report) => Some(format!(
                "Showing cached report from {}.",
                report.generated_at.format("%Y-%m-%d %H:%M UTC")
            )),
            Self::Fresh(_) => None,
        }
    }
}

/// Runs report commands through the gate and the generator.
pub struct AuditService<G> {
    gate: Arc<AuditGate<AuditReport>>,
    generator: G,
    ai_quota: Arc<RateLimiter>,
}

impl<G: ReportGenerator> AuditService<G> {
    /// Create a service allowing 60 generator calls per minute.
    pub fn new(gate: Arc<AuditGate<AuditReport>>, generator: G) -> Self {
        Self::with_ai_quota(gate, generator, 60)
    }

    pub fn with_ai_quota(
        gate: Arc<AuditGate<AuditReport>>,
        generator: G,
        requests_per_minute: u32,
    ) -> Self {
        let quota =
            Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));

        Self {
            gate,
            generator,
            ai_quota: Arc::new(GovRateLimiter::direct(quota)),
        }
    }

    pub fn gate(&self) -> &Arc<AuditGate<AuditReport>> {
        &self.gate
    }

    /// Resolve a report command for a guild.
    ///
    /// `force_refresh` skips the cache and replaces the cached report. The
    /// rate-limit slot is spent on admission whether or not the cache hits.
    pub async fn run(
        &self,
        guild_id: &str,
        command: &str,
        force_refresh: bool,
    ) -> Result<AuditOutcome> {
        if let RateLimitDecision::Denied { remaining_seconds } =
            self.gate.check_rate_limit(guild_id, command)
        {
            return Ok(AuditOutcome::Throttled { remaining_seconds });
        }

        if force_refresh {
            self.gate.invalidate(guild_id);
        } else if let Some(report) = self.gate.get_cached(guild_id) {
            tracing::debug!(guild_id = %guild_id, command = %command, "Serving cached report");
            return Ok(AuditOutcome::Cached(report));
        }

        let context = ErrorContext::new("generate_report")
            .with_guild_id(guild_id)
            .with_command(command);

        if let Err(not_until) = self.ai_quota.check() {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            let err = BastionError::RateLimited {
                retry_after_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            };
            err.log_with_context(&context);
            return Err(err);
        }

        let report = match self.generator.generate(guild_id).await {
            Ok(report) => report,
            Err(err) => {
                err.log_with_context(&context);
                return Err(err);
            }
        };

        self.gate.set_cached(guild_id, report.clone());
        tracing::info!(
            guild_id = %guild_id,
            command = %command,
            score = report.score,
            "Audit report generated"
        );

        Ok(AuditOutcome::Fresh(report))
    }
}
