//! Raid detection by join velocity.
//!
//! Keeps a sliding window of join timestamps per guild and raises a one-shot
//! alert when the window fills past a threshold. Once raised, the alert stays
//! open for a fixed cooldown so a sustained raid produces one notification.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::clock::{duration_ms, Clock, TimerQueue};

/// Outcome of evaluating a guild's current join count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaidDecision {
    /// Below threshold, or monitoring disabled.
    None,
    /// First crossing; the caller should notify moderators.
    Triggered {
        /// Joins inside the window at the moment of crossing.
        count: u32,
    },
    /// Threshold crossed while an alert is already open.
    AlreadyTriggered,
}

impl RaidDecision {
    /// Whether the caller should send a notification.
    pub fn should_notify(&self) -> bool {
        matches!(self, Self::Triggered { .. })
    }
}

/// Alert state for a guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RaidAlertState {
    /// Whether anti-raid monitoring is active.
    pub enabled: bool,
    /// Whether an alert is currently open.
    pub triggered: bool,
    /// When the last alert was raised (epoch ms).
    pub triggered_at: Option<u64>,
    /// Window count that raised the last alert.
    pub join_count_at_trigger: u32,
    /// Last mutation (epoch ms).
    pub updated_at: u64,
}

impl RaidAlertState {
    fn idle(enabled: bool, now: u64) -> Self {
        Self {
            enabled,
            triggered: false,
            triggered_at: None,
            join_count_at_trigger: 0,
            updated_at: now,
        }
    }
}

/// Per-guild detection thresholds, adjustable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuildRaidSettings {
    /// Joins inside the window that raise an alert. Zero always triggers.
    pub join_threshold: u32,
    /// Width of the sliding window. Zero keeps nothing.
    pub join_window: Duration,
}

/// Raid detector configuration.
#[derive(Debug, Clone)]
pub struct RaidConfig {
    /// Time window for join tracking (default: 30 seconds).
    pub join_window: Duration,
    /// Number of joins to raise an alert (default: 10).
    pub join_threshold: u32,
    /// How long an alert suppresses further notifications (default: 5 minutes).
    pub alert_cooldown: Duration,
    /// Monitoring state for newly seen guilds (default: enabled).
    pub enabled_by_default: bool,
}

impl Default for RaidConfig {
    fn default() -> Self {
        Self {
            join_window: Duration::from_secs(30),
            join_threshold: 10,
            alert_cooldown: Duration::from_secs(300),
            enabled_by_default: true,
        }
    }
}

impl RaidConfig {
    fn guild_defaults(&self) -> GuildRaidSettings {
        GuildRaidSettings {
            join_threshold: self.join_threshold,
            join_window: self.join_window,
        }
    }
}

/// Summary for operational visibility.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RaidStats {
    /// Guilds with any tracked state.
    pub tracked_guilds: usize,
    /// Guilds with an open alert.
    pub active_alerts: usize,
    /// Cooldown resets waiting to fire. Closed or cleared alerts hold none.
    pub pending_resets: usize,
}

struct GuildRaidState {
    joins: VecDeque<u64>,
    alert: RaidAlertState,
    settings: GuildRaidSettings,
}

/// Everything behind the detector lock.
#[derive(Default)]
struct RaidState {
    guilds: HashMap<String, GuildRaidState>,
    /// Pending cooldown resets keyed by (guild, triggered_at).
    resets: TimerQueue<(String, u64)>,
}

/// Get-or-create for per-guild state.
fn guild_entry<'a>(
    guilds: &'a mut HashMap<String, GuildRaidState>,
    guild_id: &str,
    config: &RaidConfig,
    now: u64,
) -> &'a mut GuildRaidState {
    guilds
        .entry(guild_id.to_string())
        .or_insert_with(|| GuildRaidState {
            joins: VecDeque::new(),
            alert: RaidAlertState::idle(config.enabled_by_default, now),
            settings: config.guild_defaults(),
        })
}

impl RaidState {
    /// Close every alert whose cooldown has elapsed by `now`.
    fn fire_due_resets(&mut self, now: u64, cooldown_ms: u64) -> Vec<String> {
        let mut reset = Vec::new();
        for (guild_id, triggered_at) in self.resets.drain_due(now) {
            let Some(state) = self.guilds.get_mut(&guild_id) else {
                continue;
            };
            // A reset left over from a cleared or re-raised alert does nothing.
            if !state.alert.triggered || state.alert.triggered_at != Some(triggered_at) {
                continue;
            }
            state.alert.triggered = false;
            state.alert.updated_at = triggered_at.saturating_add(cooldown_ms);
            tracing::info!(guild_id = %guild_id, "Raid alert cooldown elapsed");
            reset.push(guild_id);
        }
        reset
    }

    fn record(&mut self, guild_id: &str, at: u64, config: &RaidConfig, now: u64) -> u32 {
        let state = guild_entry(&mut self.guilds, guild_id, config, now);
        let window_ms = duration_ms(state.settings.join_window);

        let pos = state.joins.partition_point(|&ts| ts <= at);
        state.joins.insert(pos, at);
        let newest = state.joins.back().copied().unwrap_or(at);

        // Entries are chronological, so stale ones form a prefix
        while state
            .joins
            .front()
            .is_some_and(|&ts| newest.saturating_sub(ts) >= window_ms)
        {
            state.joins.pop_front();
        }

        u32::try_from(state.joins.len()).unwrap_or(u32::MAX)
    }

    fn evaluate(
        &mut self,
        guild_id: &str,
        count: u32,
        config: &RaidConfig,
        now: u64,
    ) -> RaidDecision {
        let state = guild_entry(&mut self.guilds, guild_id, config, now);

        if !state.alert.enabled || count < state.settings.join_threshold {
            return RaidDecision::None;
        }
        if state.alert.triggered {
            return RaidDecision::AlreadyTriggered;
        }

        state.alert.triggered = true;
        state.alert.triggered_at = Some(now);
        state.alert.join_count_at_trigger = count;
        state.alert.updated_at = now;

        let due = now.saturating_add(duration_ms(config.alert_cooldown));
        self.resets.schedule(due, (guild_id.to_string(), now));

        RaidDecision::Triggered { count }
    }
}

/// Join-rate raid detector.
pub struct RaidDetector {
    config: RaidConfig,
    clock: Arc<dyn Clock>,
    state: RwLock<RaidState>,
}

impl RaidDetector {
    /// Create a detector with default config.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(RaidConfig::default(), clock)
    }

    pub fn with_config(config: RaidConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: RwLock::new(RaidState::default()),
        }
    }

    pub fn config(&self) -> &RaidConfig {
        &self.config
    }

    fn cooldown_ms(&self) -> u64 {
        duration_ms(self.config.alert_cooldown)
    }

    /// Record a join at the current time.
    ///
    /// Returns the number of joins inside the guild's trailing window.
    pub async fn record_join(&self, guild_id: &str) -> u32 {
        let mut state = self.state.write().await;
        let now = self.clock.now_ms();
        state.fire_due_resets(now, self.cooldown_ms());
        state.record(guild_id, now, &self.config, now)
    }

    /// Record a join at an explicit time (epoch ms).
    ///
    /// A timestamp older than the newest recorded join is inserted in order.
    pub async fn record_join_at(&self, guild_id: &str, at: u64) -> u32 {
        let mut state = self.state.write().await;
        let now = self.clock.now_ms();
        state.fire_due_resets(now, self.cooldown_ms());
        state.record(guild_id, at, &self.config, now)
    }

    /// Decide whether `current_window_count` opens a raid alert.
    ///
    /// Opening an alert schedules its reset one cooldown later.
    pub async fn evaluate_raid(&self, guild_id: &str, current_window_count: u32) -> RaidDecision {
        let mut state = self.state.write().await;
        let now = self.clock.now_ms();
        state.fire_due_resets(now, self.cooldown_ms());
        state.evaluate(guild_id, current_window_count, &self.config, now)
    }

    /// Record a join and evaluate it under one lock.
    ///
    /// Concurrent joins for the same guild see strictly increasing counts, so
    /// exactly one of them can observe [`RaidDecision::Triggered`].
    pub async fn observe_join(&self, guild_id: &str) -> RaidDecision {
        let mut state = self.state.write().await;
        let now = self.clock.now_ms();
        state.fire_due_resets(now, self.cooldown_ms());
        let count = state.record(guild_id, now, &self.config, now);
        let decision = state.evaluate(guild_id, count, &self.config, now);

        if let RaidDecision::Triggered { count } = decision {
            tracing::warn!(guild_id = %guild_id, count = count, "Raid alert triggered");
        }

        decision
    }

    /// Fire every cooldown reset that is due.
    ///
    /// Returns the guilds whose alert closed. Other operations fire due resets
    /// on their own; this exists for a periodic driver.
    pub async fn fire_due_resets(&self) -> Vec<String> {
        let mut state = self.state.write().await;
        let now = self.clock.now_ms();
        state.fire_due_resets(now, self.cooldown_ms())
    }

    /// Alert state for a guild. Unknown guilds report the idle default.
    pub async fn status(&self, guild_id: &str) -> RaidAlertState {
        let mut state = self.state.write().await;
        let now = self.clock.now_ms();
        state.fire_due_resets(now, self.cooldown_ms());
        state
            .guilds
            .get(guild_id)
            .map(|g| g.alert.clone())
            .unwrap_or_else(|| RaidAlertState::idle(self.config.enabled_by_default, now))
    }

    /// Effective thresholds for a guild.
    pub async fn settings(&self, guild_id: &str) -> GuildRaidSettings {
        let state = self.state.read().await;
        state
            .guilds
            .get(guild_id)
            .map(|g| g.settings)
            .unwrap_or_else(|| self.config.guild_defaults())
    }

    /// Turn monitoring on or off for a guild.
    pub async fn set_enabled(&self, guild_id: &str, enabled: bool) {
        let mut state = self.state.write().await;
        let now = self.clock.now_ms();
        state.fire_due_resets(now, self.cooldown_ms());
        let guild = guild_entry(&mut state.guilds, guild_id, &self.config, now);
        guild.alert.enabled = enabled;
        guild.alert.updated_at = now;
        tracing::info!(guild_id = %guild_id, enabled = enabled, "Raid monitoring toggled");
    }

    /// Change a guild's threshold and/or window.
    ///
    /// Accumulated join timestamps are kept; a narrower window takes effect on
    /// the next recorded join.
    pub async fn update_settings(
        &self,
        guild_id: &str,
        join_threshold: Option<u32>,
        join_window: Option<Duration>,
    ) -> GuildRaidSettings {
        let mut state = self.state.write().await;
        let now = self.clock.now_ms();
        state.fire_due_resets(now, self.cooldown_ms());
        let guild = guild_entry(&mut state.guilds, guild_id, &self.config, now);

        if let Some(threshold) = join_threshold {
            guild.settings.join_threshold = threshold;
        }
        if let Some(window) = join_window {
            guild.settings.join_window = window;
        }
        guild.alert.updated_at = now;

        tracing::info!(
            guild_id = %guild_id,
            threshold = guild.settings.join_threshold,
            window_ms = duration_ms(guild.settings.join_window),
            "Raid settings updated"
        );

        guild.settings
    }

    /// Manually close an open alert.
    ///
    /// Returns whether an alert was open.
    pub async fn reset_alert(&self, guild_id: &str) -> bool {
        let mut state = self.state.write().await;
        let now = self.clock.now_ms();
        state.fire_due_resets(now, self.cooldown_ms());
        let Some(guild) = state.guilds.get_mut(guild_id) else {
            return false;
        };
        if !guild.alert.triggered {
            return false;
        }
        guild.alert.triggered = false;
        guild.alert.updated_at = now;
        let triggered_at = guild.alert.triggered_at;

        state
            .resets
            .cancel(|(id, at)| id == guild_id && Some(*at) == triggered_at);
        tracing::info!(guild_id = %guild_id, "Raid alert closed manually");
        true
    }

    /// Forget all tracking data for a guild.
    pub async fn clear_guild(&self, guild_id: &str) {
        let mut state = self.state.write().await;
        state.guilds.remove(guild_id);
        state.resets.cancel(|(id, _)| id == guild_id);
    }

    pub async fn stats(&self) -> RaidStats {
        let mut state = self.state.write().await;
        let now = self.clock.now_ms();
        state.fire_due_resets(now, self.cooldown_ms());
        RaidStats {
            tracked_guilds: state.guilds.len(),
            active_alerts: state.guilds.values().filter(|g| g.alert.triggered).count(),
            pending_resets: state.resets.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::clock::{Clock, ManualClock};
    use crate::raid::{RaidConfig, RaidDecision, RaidDetector};

    fn detector_with(config: RaidConfig) -> (Arc<ManualClock>, RaidDetector) {
        let clock = Arc::new(ManualClock::new(0));
        let detector = RaidDetector::with_config(config, clock.clone() as Arc<dyn Clock>);
        (clock, detector)
    }

    fn default_detector() -> (Arc<ManualClock>, RaidDetector) {
        detector_with(RaidConfig::default())
    }

    async fn burst(detector: &RaidDetector, guild: &str, joins: u32) -> Vec<RaidDecision> {
        let mut decisions = Vec::new();
        for _ in 0..joins {
            decisions.push(detector.observe_join(guild).await);
        }
        decisions
    }

    #[tokio::test]
    async fn no_raid_below_threshold() {
        let (_clock, detector) = default_detector();

        let decisions = burst(&detector, "G1", 9).await;

        assert!(decisions.iter().all(|d| *d == RaidDecision::None));
        assert!(!detector.status("G1").await.triggered);
    }

    #[tokio::test]
    async fn twelve_join_burst_triggers_once() {
        let (clock, detector) = default_detector();
        let mut decisions = Vec::new();

        for i in 0..12u64 {
            clock.set(i * 180); // spread across 0..2000ms
            let count = detector.record_join("G1").await;
            assert_eq!(count, i as u32 + 1);
            decisions.push(detector.evaluate_raid("G1", count).await);
        }

        for decision in &decisions[..9] {
            assert_eq!(*decision, RaidDecision::None);
        }
        assert_eq!(decisions[9], RaidDecision::Triggered { count: 10 });
        assert_eq!(decisions[10], RaidDecision::AlreadyTriggered);
        assert_eq!(decisions[11], RaidDecision::AlreadyTriggered);

        let status = detector.status("G1").await;
        assert!(status.triggered);
        assert_eq!(status.triggered_at, Some(9 * 180));
        assert_eq!(status.join_count_at_trigger, 10);
    }

    #[tokio::test]
    async fn suppression_lasts_full_cooldown_even_when_joins_stop() {
        let (clock, detector) = default_detector();
        burst(&detector, "G1", 10).await;

        clock.advance(Duration::from_millis(300_000 - 1));
        assert!(detector.status("G1").await.triggered);
        assert_eq!(
            detector.evaluate_raid("G1", 50).await,
            RaidDecision::AlreadyTriggered
        );

        clock.advance(Duration::from_millis(1));
        assert!(!detector.status("G1").await.triggered);
    }

    #[tokio::test]
    async fn fresh_burst_after_cooldown_triggers_again() {
        let (clock, detector) = default_detector();
        let first = burst(&detector, "G1", 10).await;
        assert_eq!(first[9], RaidDecision::Triggered { count: 10 });

        clock.advance(Duration::from_secs(300));

        let second = burst(&detector, "G1", 10).await;
        assert_eq!(second[9], RaidDecision::Triggered { count: 10 });
        assert_eq!(detector.status("G1").await.triggered_at, Some(300_000));
    }

    #[tokio::test]
    async fn window_prunes_expired_prefix() {
        let (_clock, detector) = default_detector();

        assert_eq!(detector.record_join_at("G1", 0).await, 1);
        assert_eq!(detector.record_join_at("G1", 10_000).await, 2);
        assert_eq!(detector.record_join_at("G1", 29_999).await, 3);
        // 30_000 - 0 is a full window, so the first join falls out
        assert_eq!(detector.record_join_at("G1", 30_000).await, 3);
        assert_eq!(detector.record_join_at("G1", 70_000).await, 1);
    }

    #[tokio::test]
    async fn update_settings_keeps_accumulated_joins() {
        let (clock, detector) = default_detector();
        for i in 0..5 {
            clock.set(i * 1_000);
            detector.record_join("G1").await;
        }

        let settings = detector
            .update_settings("G1", Some(6), Some(Duration::from_secs(60)))
            .await;
        assert_eq!(settings.join_threshold, 6);
        assert_eq!(settings.join_window, Duration::from_secs(60));

        // 45s after the first join: outside the old 30s window, inside the new one
        clock.set(45_000);
        assert_eq!(
            detector.observe_join("G1").await,
            RaidDecision::Triggered { count: 6 }
        );
    }

    #[tokio::test]
    async fn settings_default_for_unknown_guild() {
        let (_clock, detector) = default_detector();
        let settings = detector.settings("nowhere").await;

        assert_eq!(settings.join_threshold, 10);
        assert_eq!(settings.join_window, Duration::from_secs(30));
        assert_eq!(detector.stats().await.tracked_guilds, 0);
    }

    #[tokio::test]
    async fn disabled_guild_records_but_never_triggers() {
        let (_clock, detector) = default_detector();
        detector.set_enabled("G1", false).await;

        let decisions = burst(&detector, "G1", 15).await;
        assert!(decisions.iter().all(|d| *d == RaidDecision::None));

        detector.set_enabled("G1", true).await;
        assert_eq!(
            detector.observe_join("G1").await,
            RaidDecision::Triggered { count: 16 }
        );
    }

    #[tokio::test]
    async fn zero_threshold_always_triggers() {
        let (_clock, detector) = detector_with(RaidConfig {
            join_threshold: 0,
            ..Default::default()
        });

        assert_eq!(
            detector.evaluate_raid("G1", 0).await,
            RaidDecision::Triggered { count: 0 }
        );
    }

    #[tokio::test]
    async fn zero_window_keeps_nothing() {
        let (_clock, detector) = detector_with(RaidConfig {
            join_window: Duration::ZERO,
            ..Default::default()
        });

        for _ in 0..20 {
            assert_eq!(detector.record_join("G1").await, 0);
        }
        assert!(!detector.status("G1").await.triggered);
    }

    #[tokio::test]
    async fn stale_reset_does_not_close_newer_alert() {
        let (clock, detector) = default_detector();
        burst(&detector, "G1", 10).await;

        assert!(detector.reset_alert("G1").await);

        clock.set(60_000);
        let decisions = burst(&detector, "G1", 10).await;
        assert_eq!(decisions[9], RaidDecision::Triggered { count: 10 });

        // First alert's timer comes due; it belongs to a closed alert
        clock.set(300_000);
        assert!(detector.fire_due_resets().await.is_empty());
        assert!(detector.status("G1").await.triggered);

        clock.set(360_000);
        assert_eq!(detector.fire_due_resets().await, vec!["G1".to_string()]);
        assert!(!detector.status("G1").await.triggered);
    }

    #[tokio::test]
    async fn reset_alert_on_idle_guild_is_noop() {
        let (_clock, detector) = default_detector();
        assert!(!detector.reset_alert("G1").await);
        burst(&detector, "G1", 3).await;
        assert!(!detector.reset_alert("G1").await);
    }

    #[tokio::test]
    async fn concurrent_joins_trigger_exactly_once() {
        let (_clock, detector) = default_detector();
        let detector = Arc::new(detector);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let detector = detector.clone();
                tokio::spawn(async move { detector.observe_join("G1").await })
            })
            .collect();

        let decisions: Vec<RaidDecision> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.expect("task should not panic"))
            .collect();

        let triggered = decisions.iter().filter(|d| d.should_notify()).count();
        let already = decisions
            .iter()
            .filter(|d| **d == RaidDecision::AlreadyTriggered)
            .count();
        assert_eq!(triggered, 1);
        assert_eq!(already, 10);
    }

    #[tokio::test]
    async fn guilds_are_isolated() {
        let (_clock, detector) = default_detector();
        burst(&detector, "G1", 10).await;

        assert!(detector.status("G1").await.triggered);
        assert!(!detector.status("G2").await.triggered);
        assert_eq!(detector.record_join("G2").await, 1);
    }

    #[tokio::test]
    async fn clear_guild_forgets_state() {
        let (_clock, detector) = default_detector();
        burst(&detector, "G1", 10).await;

        detector.clear_guild("G1").await;

        assert!(!detector.status("G1").await.triggered);
        assert_eq!(detector.record_join("G1").await, 1);
    }

    #[tokio::test]
    async fn join_waiting_on_lock_is_stamped_when_recorded() {
        let (clock, detector) = default_detector();
        let detector = Arc::new(detector);

        let guard = detector.state.write().await;
        let pending = {
            let detector = detector.clone();
            tokio::spawn(async move { detector.record_join("G1").await })
        };
        tokio::task::yield_now().await;

        clock.set(10_000);
        drop(guard);
        pending.await.expect("task should not panic");

        let state = detector.state.read().await;
        let joins: Vec<u64> = state.guilds["G1"].joins.iter().copied().collect();
        assert_eq!(joins, vec![10_000]);
    }

    #[tokio::test]
    async fn late_timestamp_keeps_window_ordered() {
        let (_clock, detector) = default_detector();

        detector.record_join_at("G1", 40_000).await;
        assert_eq!(detector.record_join_at("G1", 20_000).await, 2);
        assert_eq!(detector.record_join_at("G1", 45_000).await, 3);

        // Joins a full window behind the newest one fall out
        assert_eq!(detector.record_join_at("G1", 60_000).await, 3);
        assert_eq!(detector.record_join_at("G1", 5_000).await, 3);

        let state = detector.state.read().await;
        let joins: Vec<u64> = state.guilds["G1"].joins.iter().copied().collect();
        assert_eq!(joins, vec![40_000, 45_000, 60_000]);
    }

    #[tokio::test]
    async fn closed_alerts_hold_no_pending_reset() {
        let (_clock, detector) = default_detector();
        burst(&detector, "G1", 10).await;
        burst(&detector, "G2", 10).await;
        assert_eq!(detector.stats().await.pending_resets, 2);

        assert!(detector.reset_alert("G1").await);
        assert_eq!(detector.stats().await.pending_resets, 1);

        detector.clear_guild("G2").await;
        let stats = detector.stats().await;
        assert_eq!(stats.pending_resets, 0);
        assert_eq!(stats.active_alerts, 0);
    }

    #[tokio::test]
    async fn stats_reports_alerts_and_timers() {
        let (clock, detector) = default_detector();
        burst(&detector, "G1", 10).await;
        burst(&detector, "G2", 2).await;

        let stats = detector.stats().await;
        assert_eq!(stats.tracked_guilds, 2);
        assert_eq!(stats.active_alerts, 1);
        assert_eq!(stats.pending_resets, 1);

        clock.advance(Duration::from_secs(300));
        let stats = detector.stats().await;
        assert_eq!(stats.active_alerts, 0);
        assert_eq!(stats.pending_resets, 0);
    }

    #[tokio::test]
    async fn timer_reset_stamps_updated_at_with_due_time() {
        let (clock, detector) = default_detector();
        clock.set(1_000);
        burst(&detector, "G1", 10).await;

        clock.set(900_000);
        let status = detector.status("G1").await;
        assert!(!status.triggered);
        assert_eq!(status.updated_at, 301_000);
        assert_eq!(status.triggered_at, Some(1_000));
    }
}
