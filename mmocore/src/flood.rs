//! Per-key sliding-window flood protection
//!
//! The read loop consults [`FloodManager::check`] with the sender's flood
//! key before admitting any decoded frame. Time is quantized into fixed
//! ticks; each tracked key owns a circular array of per-tick event
//! counters covering the widest configured filter window. Every
//! registered filter is evaluated independently and the most severe
//! verdict wins.
//!
//! Ticks come from a monotonic clock anchored at manager construction, so
//! the wall-clock skew the window would otherwise have to tolerate cannot
//! occur. The resynchronization path for a backward-moving tick is kept
//! regardless and logs a warning if it is ever taken.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use ahash::AHashMap;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};

/// One rate filter: thresholds applied over a window of `window` ticks.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FloodFilter {
    /// Event count above which a key is warned.
    pub warn_limit: u32,
    /// Event count above which a key is rejected.
    pub reject_limit: u32,
    /// Window width in ticks.
    pub window: usize,
}

/// Verdict of a flood check, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FloodResult {
    Accepted,
    Warned,
    Rejected,
}

struct LogEntry {
    /// Circular per-tick event counters; always a contiguous window of the
    /// most recent ticks ending at `last_tick`.
    ticks: Vec<u16>,
    last_tick: u64,
}

impl LogEntry {
    fn new(len: usize, current_tick: u64) -> Self {
        LogEntry {
            ticks: vec![0; len],
            last_tick: current_tick,
        }
    }

    fn slot(&self, tick: i64) -> u16 {
        let len = self.ticks.len() as i64;
        self.ticks[tick.rem_euclid(len) as usize]
    }

    fn is_flooding(&mut self, current_tick: u64, increment: bool, filters: &[FloodFilter]) -> FloodResult {
        let len = self.ticks.len() as u64;

        if current_tick >= self.last_tick + len {
            // The whole window is stale.
            self.ticks.fill(0);
            self.last_tick = current_tick;
        } else if self.last_tick > current_tick {
            // Unreachable with the monotonic tick source; resynchronize
            // without crediting lost ticks if a custom source misbehaves.
            warn!(
                last_tick = self.last_tick,
                current_tick, "flood window tick moved backwards, resynchronizing"
            );
            self.last_tick = current_tick;
        } else {
            while self.last_tick != current_tick {
                self.last_tick += 1;
                let idx = (self.last_tick % len) as usize;
                self.ticks[idx] = 0;
            }
        }

        if increment {
            let idx = (self.last_tick % len) as usize;
            self.ticks[idx] = self.ticks[idx].saturating_add(1);
        }

        let mut verdict = FloodResult::Accepted;
        for filter in filters {
            // Two overlapping sums: the window ending at the current tick
            // and the window ending at the previous tick.
            let mut current_sum = 0u32;
            let mut previous_sum = 0u32;
            for i in 0..=filter.window {
                let value = self.slot(self.last_tick as i64 - i as i64) as u32;
                if i != 0 {
                    previous_sum += value;
                }
                if i != filter.window {
                    current_sum += value;
                }
            }

            let result = if previous_sum > filter.reject_limit || current_sum > filter.reject_limit
            {
                FloodResult::Rejected
            } else if previous_sum > filter.warn_limit || current_sum > filter.warn_limit {
                FloodResult::Warned
            } else {
                FloodResult::Accepted
            };
            verdict = verdict.max(result);
        }

        verdict
    }
}

enum TickSource {
    Monotonic(Instant),
    Manual(Arc<AtomicU64>),
}

/// Sliding-window rate limiter keyed by an application-supplied identity
/// (account name, source address, ...).
///
/// All entry creation, lookup and mutation is serialized by one coarse
/// lock; each check is O(filters x window width).
pub struct FloodManager {
    entries: Mutex<AHashMap<String, LogEntry>>,
    tick_length_ms: u64,
    tick_amount: usize,
    filters: Vec<FloodFilter>,
    source: TickSource,
}

impl FloodManager {
    /// Creates a manager with the given tick width and filter set.
    ///
    /// The counter window is sized to the widest filter plus one tick.
    pub fn new(tick_length_ms: u64, filters: Vec<FloodFilter>) -> Self {
        Self::with_source(
            tick_length_ms,
            filters,
            TickSource::Monotonic(Instant::now()),
        )
    }

    /// Creates a manager whose clock is the given millisecond counter.
    /// Used by tests for deterministic tick control.
    pub fn with_manual_clock(
        tick_length_ms: u64,
        filters: Vec<FloodFilter>,
        clock_ms: Arc<AtomicU64>,
    ) -> Self {
        Self::with_source(tick_length_ms, filters, TickSource::Manual(clock_ms))
    }

    fn with_source(tick_length_ms: u64, filters: Vec<FloodFilter>, source: TickSource) -> Self {
        let tick_length_ms = tick_length_ms.max(1);
        let mut max = 1;
        for filter in &filters {
            max = max.max(filter.window + 1);
        }

        FloodManager {
            entries: Mutex::new(AHashMap::new()),
            tick_length_ms,
            tick_amount: max,
            filters,
            source,
        }
    }

    fn now_ms(&self) -> u64 {
        match &self.source {
            TickSource::Monotonic(epoch) => epoch.elapsed().as_millis() as u64,
            TickSource::Manual(ms) => ms.load(Ordering::Acquire),
        }
    }

    fn current_tick(&self) -> u64 {
        self.now_ms() / self.tick_length_ms
    }

    /// Checks (and optionally records) one event for `key`.
    ///
    /// A blank key always yields [`FloodResult::Rejected`] without creating
    /// a tracked entry: no identity, no trust.
    pub fn check(&self, key: &str, increment: bool) -> FloodResult {
        if key.is_empty() {
            return FloodResult::Rejected;
        }

        let current_tick = self.current_tick();
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| LogEntry::new(self.tick_amount, current_tick));
        entry.is_flooding(current_tick, increment, &self.filters)
    }

    /// Removes entries that have seen no tick advance for at least ten
    /// window lengths. Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let current_tick = self.current_tick();
        let horizon = (self.tick_amount as u64) * 10;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| current_tick.saturating_sub(entry.last_tick) < horizon);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "flood sweep");
        }
        removed
    }

    /// Number of currently tracked keys.
    pub fn tracked_keys(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK_MS: u64 = 100;

    fn manager() -> (FloodManager, Arc<AtomicU64>) {
        let clock = Arc::new(AtomicU64::new(0));
        let filters = vec![FloodFilter {
            warn_limit: 5,
            reject_limit: 10,
            window: 3,
        }];
        let fm = FloodManager::with_manual_clock(TICK_MS, filters, clock.clone());
        (fm, clock)
    }

    #[test]
    fn test_sliding_window_rejects_then_recovers() {
        let (fm, clock) = manager();

        for i in 0..10 {
            let r = fm.check("peer", true);
            assert_ne!(r, FloodResult::Rejected, "check {} rejected early", i + 1);
        }
        assert_eq!(fm.check("peer", true), FloodResult::Rejected);

        // After the window fully elapses with no further increments the
        // key is accepted again.
        clock.fetch_add(TICK_MS * 4, Ordering::Release);
        assert_eq!(fm.check("peer", false), FloodResult::Accepted);
    }

    #[test]
    fn test_warn_before_reject() {
        let (fm, _clock) = manager();

        for _ in 0..5 {
            assert_eq!(fm.check("peer", true), FloodResult::Accepted);
        }
        assert_eq!(fm.check("peer", true), FloodResult::Warned);
    }

    #[test]
    fn test_counts_linger_in_the_previous_window_sum() {
        let (fm, clock) = manager();

        for _ in 0..11 {
            fm.check("peer", true);
        }
        // Three ticks later the burst is no longer in the current-window
        // sum, but the previous-window sum still sees it.
        clock.fetch_add(TICK_MS * 3, Ordering::Release);
        assert_eq!(fm.check("peer", false), FloodResult::Rejected);
    }

    #[test]
    fn test_blank_key_rejected_without_entry() {
        let (fm, _clock) = manager();
        assert_eq!(fm.check("", true), FloodResult::Rejected);
        assert_eq!(fm.tracked_keys(), 0);
    }

    #[test]
    fn test_backward_clock_resynchronizes() {
        let (fm, clock) = manager();

        clock.store(TICK_MS * 50, Ordering::Release);
        assert_eq!(fm.check("peer", true), FloodResult::Accepted);

        // Clock jumps backwards: the check must not panic and the window
        // resynchronizes to the new reference tick.
        clock.store(TICK_MS * 10, Ordering::Release);
        assert_eq!(fm.check("peer", true), FloodResult::Accepted);
        assert_eq!(fm.check("peer", false), FloodResult::Accepted);
    }

    #[test]
    fn test_idle_sweep_removes_stale_entries() {
        let (fm, clock) = manager();

        fm.check("idle", true);
        fm.check("busy", true);
        assert_eq!(fm.tracked_keys(), 2);

        // window length is 4 ticks; idle horizon is 40 ticks
        clock.fetch_add(TICK_MS * 39, Ordering::Release);
        fm.check("busy", true);
        clock.fetch_add(TICK_MS, Ordering::Release);

        assert_eq!(fm.sweep(), 1);
        assert_eq!(fm.tracked_keys(), 1);

        // a swept key starts a fresh window
        assert_eq!(fm.check("idle", true), FloodResult::Accepted);
    }

    #[test]
    fn test_most_severe_filter_wins() {
        let clock = Arc::new(AtomicU64::new(0));
        let filters = vec![
            // wide and lenient first, tight second: evaluation order must
            // not mask the tighter filter's rejection
            FloodFilter {
                warn_limit: 100,
                reject_limit: 200,
                window: 5,
            },
            FloodFilter {
                warn_limit: 1,
                reject_limit: 2,
                window: 1,
            },
        ];
        let fm = FloodManager::with_manual_clock(TICK_MS, filters, clock);

        fm.check("peer", true);
        fm.check("peer", true);
        assert_eq!(fm.check("peer", true), FloodResult::Rejected);
    }
}
