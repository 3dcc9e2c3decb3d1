//! Bounded worker pool for packet execution
//!
//! Decoded packets run off the I/O path on a fixed pool of worker
//! threads. Jobs are keyed by connection: each connection's jobs execute
//! in submission order even when the pool is larger than one, because a
//! key is held by at most one worker at a time. Different connections'
//! jobs interleave freely.
//!
//! The queue is bounded; when it is full new submissions are dropped with
//! a warning rather than blocking the read loops.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;

use ahash::{AHashMap, AHashSet};
use parking_lot::{Condvar, Mutex};
use tracing::{error, warn};

use crate::connection::ConnId;

type Job = Box<dyn FnOnce() + Send>;

struct DispatchState {
    /// Keys with queued jobs and no worker currently holding them.
    ready: VecDeque<ConnId>,
    /// Per-key job queues, FIFO within a key.
    queues: AHashMap<ConnId, VecDeque<Job>>,
    /// Keys currently held by a worker.
    active: AHashSet<ConnId>,
    /// Total queued jobs across all keys.
    queued: usize,
    shutdown: bool,
}

/// Fixed-size worker pool preserving per-connection execution order.
pub struct Dispatcher {
    state: Mutex<DispatchState>,
    available: Condvar,
    workers: Mutex<Vec<JoinHandle<()>>>,
    capacity: usize,
}

impl Dispatcher {
    pub fn new(workers: usize, capacity: usize) -> std::io::Result<std::sync::Arc<Self>> {
        let dispatcher = std::sync::Arc::new(Dispatcher {
            state: Mutex::new(DispatchState {
                ready: VecDeque::new(),
                queues: AHashMap::new(),
                active: AHashSet::new(),
                queued: 0,
                shutdown: false,
            }),
            available: Condvar::new(),
            workers: Mutex::new(Vec::with_capacity(workers)),
            capacity,
        });

        let mut handles = dispatcher.workers.lock();
        for i in 0..workers {
            let d = dispatcher.clone();
            let handle = std::thread::Builder::new()
                .name(format!("mmocore-worker-{i}"))
                .spawn(move || d.worker_main())?;
            handles.push(handle);
        }
        drop(handles);

        Ok(dispatcher)
    }

    /// Queues `job` behind any earlier jobs of the same key. Returns
    /// false when the pool is saturated or shutting down and the job was
    /// dropped.
    pub fn submit(&self, key: ConnId, job: Job) -> bool {
        let mut state = self.state.lock();
        if state.shutdown {
            return false;
        }
        if state.queued >= self.capacity {
            warn!(conn = key, queued = state.queued, "dispatch queue full, dropping job");
            return false;
        }

        state.queued += 1;
        state.queues.entry(key).or_default().push_back(job);
        if !state.active.contains(&key) && !state.ready.contains(&key) {
            state.ready.push_back(key);
            self.available.notify_one();
        }
        true
    }

    /// Total jobs currently queued (not yet picked up by a worker).
    pub fn queued_jobs(&self) -> usize {
        self.state.lock().queued
    }

    fn worker_main(&self) {
        loop {
            let (key, job) = {
                let mut state = self.state.lock();
                loop {
                    if let Some(key) = state.ready.pop_front() {
                        let job = state
                            .queues
                            .get_mut(&key)
                            .and_then(|q| q.pop_front());
                        match job {
                            Some(job) => {
                                state.queued -= 1;
                                state.active.insert(key);
                                break (key, job);
                            }
                            None => {
                                state.queues.remove(&key);
                                continue;
                            }
                        }
                    }
                    if state.shutdown {
                        return;
                    }
                    self.available.wait(&mut state);
                }
            };

            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                error!(conn = key, "packet execution panicked");
            }

            let mut state = self.state.lock();
            state.active.remove(&key);
            match state.queues.get(&key) {
                Some(q) if !q.is_empty() => {
                    state.ready.push_back(key);
                    self.available.notify_one();
                }
                _ => {
                    state.queues.remove(&key);
                }
            }
        }
    }

    /// Stops accepting jobs, lets queued work finish and joins the pool.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            state.shutdown = true;
        }
        self.available.notify_all();

        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if handle.join().is_err() {
                error!("worker thread panicked outside job isolation");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for workers");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_per_key_jobs_run_in_submission_order() {
        let dispatcher = Dispatcher::new(4, 1000).unwrap();
        let seen: Arc<Mutex<Vec<(ConnId, u32)>>> = Arc::new(Mutex::new(Vec::new()));

        for seq in 0..100u32 {
            for key in [1usize, 2, 3] {
                let seen = seen.clone();
                assert!(dispatcher.submit(
                    key,
                    Box::new(move || {
                        seen.lock().push((key, seq));
                    })
                ));
            }
        }

        wait_until(5000, || seen.lock().len() == 300);
        dispatcher.shutdown();

        let seen = seen.lock();
        for key in [1usize, 2, 3] {
            let seqs: Vec<u32> = seen.iter().filter(|(k, _)| *k == key).map(|(_, s)| *s).collect();
            let mut sorted = seqs.clone();
            sorted.sort_unstable();
            assert_eq!(seqs, sorted, "key {key} jobs ran out of order");
        }
    }

    #[test]
    fn test_panicking_job_does_not_poison_the_key() {
        let dispatcher = Dispatcher::new(2, 100).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        dispatcher.submit(7, Box::new(|| panic!("bad packet")));
        let s = seen.clone();
        dispatcher.submit(7, Box::new(move || s.lock().push("after")));

        wait_until(5000, || !seen.lock().is_empty());
        dispatcher.shutdown();
        assert_eq!(*seen.lock(), vec!["after"]);
    }

    #[test]
    fn test_full_queue_drops_submissions() {
        let dispatcher = Dispatcher::new(1, 2).unwrap();
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock();

        // the first job blocks the only worker; two more fill the queue
        let g = gate.clone();
        dispatcher.submit(1, Box::new(move || drop(g.lock())));
        std::thread::sleep(Duration::from_millis(20));
        assert!(dispatcher.submit(1, Box::new(|| {})));
        assert!(dispatcher.submit(1, Box::new(|| {})));
        assert!(!dispatcher.submit(1, Box::new(|| {})));

        drop(held);
        dispatcher.shutdown();
    }
}
