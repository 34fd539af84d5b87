//! Injectable time source and a small timer queue.
//!
//! All timestamps in the crate are milliseconds since the Unix epoch. Tests
//! drive time with [`ManualClock`] instead of sleeping on real timers.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        // Pre-epoch system time is treated as the epoch.
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Virtual time that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_ms(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Convert a duration to whole milliseconds, saturating at `u64::MAX`.
pub fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// One-shot tasks ordered by due time.
///
/// The owner decides when to poll; [`TimerQueue::drain_due`] hands back every
/// task whose due time is at or before `now`, earliest first.
#[derive(Debug)]
pub struct TimerQueue<T: Ord> {
    pending: BinaryHeap<Reverse<(u64, T)>>,
}

impl<T: Ord> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: BinaryHeap::new(),
        }
    }

    /// Schedule `task` to fire at `due_ms`.
    pub fn schedule(&mut self, due_ms: u64, task: T) {
        self.pending.push(Reverse((due_ms, task)));
    }

    /// Remove and return all tasks due at or before `now_ms`.
    pub fn drain_due(&mut self, now_ms: u64) -> Vec<T> {
        let mut due = Vec::new();
        while self
            .pending
            .peek()
            .is_some_and(|Reverse((at, _))| *at <= now_ms)
        {
            if let Some(Reverse((_, task))) = self.pending.pop() {
                due.push(task);
            }
        }
        due
    }

    /// Drop every pending task matching `pred`.
    pub fn cancel(&mut self, mut pred: impl FnMut(&T) -> bool) {
        self.pending.retain(|Reverse((_, task))| !pred(task));
    }

    /// Due time of the earliest pending task.
    pub fn next_due(&self) -> Option<u64> {
        self.pending.peek().map(|Reverse((at, _))| *at)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T: Ord> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
