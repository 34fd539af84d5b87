//! Per-guild, per-command cooldowns.
//!
//! Each `(guild, command)` pair remembers the last admitted invocation. A new
//! invocation is admitted once the command's cooldown has passed; denials do
//! not move the window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::clock::{duration_ms, Clock};

/// Cooldown for commands without an explicit entry.
pub const DEFAULT_COMMAND_COOLDOWN: Duration = Duration::from_secs(60);

/// Built-in cooldowns for the report-generating commands.
pub fn default_command_cooldowns() -> HashMap<String, Duration> {
    [
        ("audit", 600),
        ("mee6", 300),
        ("security", 300),
        ("schema", 300),
        ("scalecheck", 300),
        ("testi", 600),
    ]
    .into_iter()
    .map(|(name, secs)| (name.to_string(), Duration::from_secs(secs)))
    .collect()
}

/// Admission decision for a command invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Denied {
        /// Whole seconds until the command is admitted again, rounded up.
        remaining_seconds: u64,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

type RateLimitKey = (String, String);

/// Cooldown tracker keyed by `(guild_id, command_name)`.
pub struct CommandRateLimiter {
    last_invoked: DashMap<RateLimitKey, u64>,
    cooldowns: HashMap<String, Duration>,
    default_cooldown: Duration,
    clock: Arc<dyn Clock>,
}

impl CommandRateLimiter {
    /// Limiter with the built-in cooldown table.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_cooldowns(default_command_cooldowns(), DEFAULT_COMMAND_COOLDOWN, clock)
    }

    pub fn with_cooldowns(
        cooldowns: HashMap<String, Duration>,
        default_cooldown: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            last_invoked: DashMap::new(),
            cooldowns,
            default_cooldown,
            clock,
        }
    }

    /// Cooldown configured for a command.
    pub fn cooldown_for(&self, command: &str) -> Duration {
        self.cooldowns
            .get(command)
            .copied()
            .unwrap_or(self.default_cooldown)
    }

    fn decide(&self, command: &str, last: u64, now: u64) -> RateLimitDecision {
        let cooldown_ms = duration_ms(self.cooldown_for(command));
        let elapsed = now.saturating_sub(last);

        if elapsed >= cooldown_ms {
            RateLimitDecision::Allowed
        } else {
            RateLimitDecision::Denied {
                remaining_seconds: (cooldown_ms - elapsed).div_ceil(1000),
            }
        }
    }

    /// Check and, if admitted, spend the slot.
    ///
    /// The check and the timestamp update happen under the entry's shard lock.
    pub fn check(&self, guild_id: &str, command: &str) -> RateLimitDecision {
        let now = self.clock.now_ms();
        let key = (guild_id.to_string(), command.to_string());

        match self.last_invoked.entry(key) {
            Entry::Occupied(mut entry) => {
                let decision = self.decide(command, *entry.get(), now);
                if decision.is_allowed() {
                    entry.insert(now);
                }
                decision
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                RateLimitDecision::Allowed
            }
        }
    }

    /// Same decision as [`check`](Self::check) without spending the slot.
    pub fn peek(&self, guild_id: &str, command: &str) -> RateLimitDecision {
        let now = self.clock.now_ms();
        let key = (guild_id.to_string(), command.to_string());

        match self.last_invoked.get(&key) {
            Some(last) => self.decide(command, *last, now),
            None => RateLimitDecision::Allowed,
        }
    }

    /// Drop records older than `retention`, or the command's own cooldown if
    /// that is longer. Returns how many were removed.
    pub fn evict_stale(&self, retention: Duration) -> usize {
        let now = self.clock.now_ms();
        let before = self.last_invoked.len();

        self.last_invoked.retain(|(_, command), last| {
            let keep_for = duration_ms(retention.max(self.cooldown_for(command)));
            now.saturating_sub(*last) < keep_for
        });

        before.saturating_sub(self.last_invoked.len())
    }

    pub fn len(&self) -> usize {
        self.last_invoked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_invoked.is_empty()
    }
}
