//! Selector-thread skeleton shared by the accept, read and write loops
//!
//! Each loop thread runs the same iteration shape: adopt newly handed-off
//! connections and drop dead ones, check for shutdown, poll for readiness,
//! handle what is ready, then sleep the configured interval. The concrete
//! loops implement [`LoopBody`]; [`run_loop`] owns the lifecycle and the
//! error containment so that one bad iteration never kills the thread.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use tracing::{error, info, trace, warn};

/// Lifecycle of a selector loop, stored as a `u8` for cross-thread reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Running = 0,
    Draining = 1,
    Stopped = 2,
}

impl LoopState {
    pub fn from_u8(v: u8) -> LoopState {
        match v {
            0 => LoopState::Running,
            1 => LoopState::Draining,
            _ => LoopState::Stopped,
        }
    }
}

/// One selector loop's per-iteration work.
pub(crate) trait LoopBody {
    /// Thread-name suffix used in log lines.
    const NAME: &'static str;

    /// Adopts pending handoffs and releases closed connections. Runs at
    /// the start of every iteration and once more after draining.
    fn cleanup(&mut self);

    /// Polls for readiness and handles whatever is ready. Errors are
    /// contained by the caller; the loop continues on the next iteration.
    fn poll_once(&mut self) -> io::Result<()>;

    /// Force-closes every connection still owned by this loop. Called
    /// once, after the final drain.
    fn close_all(&mut self);
}

const STATS_EVERY: u64 = 1024;

struct LoopStats {
    iterations: u64,
    failed: u64,
    max_iteration: Duration,
}

impl LoopStats {
    fn new() -> Self {
        LoopStats {
            iterations: 0,
            failed: 0,
            max_iteration: Duration::ZERO,
        }
    }

    fn record(&mut self, name: &str, took: Duration) {
        self.iterations += 1;
        self.max_iteration = self.max_iteration.max(took);
        if self.iterations % STATS_EVERY == 0 {
            trace!(
                loop_name = name,
                iterations = self.iterations,
                failed = self.failed,
                max_iteration_us = self.max_iteration.as_micros() as u64,
                "selector stats"
            );
        }
    }
}

/// Drives `body` until `shutdown` is raised, then drains and stops.
///
/// `state` is published for observers; iteration failures (both `Err`
/// returns and panics inside `poll_once`) are logged and contained.
pub(crate) fn run_loop<B: LoopBody>(
    mut body: B,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
) {
    state.store(LoopState::Running as u8, Ordering::Release);
    let mut stats = LoopStats::new();

    loop {
        let started = Instant::now();
        body.cleanup();

        if shutdown.load(Ordering::Acquire) {
            break;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| body.poll_once())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                stats.failed += 1;
                warn!(loop_name = B::NAME, error = %e, "selector iteration failed");
            }
            Err(_) => {
                stats.failed += 1;
                error!(loop_name = B::NAME, "selector iteration panicked");
            }
        }

        stats.record(B::NAME, started.elapsed());
        std::thread::sleep(interval);
    }

    state.store(LoopState::Draining as u8, Ordering::Release);
    body.cleanup();
    body.close_all();
    body.cleanup();
    state.store(LoopState::Stopped as u8, Ordering::Release);

    info!(
        loop_name = B::NAME,
        iterations = stats.iterations,
        failed = stats.failed,
        "selector loop stopped"
    );
}
