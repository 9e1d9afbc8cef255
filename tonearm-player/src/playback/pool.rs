//! Playback Pool
//!
//! Growable thread pool running track decode calls.
//!
//! Each playing track occupies one worker for its whole decode call, so the
//! pool grows a thread whenever no idle worker can take a new job. Idle
//! workers exit after the keep-alive expires.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    jobs: VecDeque<Job>,
    /// Workers waiting for a job
    idle: usize,
    /// Live worker threads
    threads: usize,
    next_id: usize,
    stopping: bool,
}

/// Shared state for the playback pool
struct SharedPoolState {
    state: Mutex<PoolState>,

    /// Workers wait here for jobs
    work: Condvar,

    /// Signalled when a worker exits
    exited: Condvar,
}

pub struct PlaybackPool {
    shared: Arc<SharedPoolState>,
    keep_alive: Duration,
    shutdown_timeout: Duration,
}

impl PlaybackPool {
    pub fn new(keep_alive: Duration, shutdown_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(SharedPoolState {
                state: Mutex::new(PoolState {
                    jobs: VecDeque::new(),
                    idle: 0,
                    threads: 0,
                    next_id: 0,
                    stopping: false,
                }),
                work: Condvar::new(),
                exited: Condvar::new(),
            }),
            keep_alive,
            shutdown_timeout,
        }
    }

    /// Queue a job, growing the pool if no idle worker can take it
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.stopping {
            return Err(Error::InvalidState("Playback pool is shutting down".to_string()));
        }

        state.jobs.push_back(Box::new(job));

        if state.jobs.len() <= state.idle {
            self.shared.work.notify_one();
            return Ok(());
        }

        let worker_id = state.next_id;
        let shared = Arc::clone(&self.shared);
        let keep_alive = self.keep_alive;

        thread::Builder::new()
            .name(format!("playback-{}", worker_id))
            .spawn(move || Self::worker_loop(worker_id, shared, keep_alive))
            .map_err(|e| {
                state.jobs.pop_back();
                Error::Io(e)
            })?;

        state.next_id += 1;
        state.threads += 1;
        debug!("Playback pool grew to {} threads", state.threads);
        Ok(())
    }

    /// Worker thread main loop
    fn worker_loop(worker_id: usize, shared: Arc<SharedPoolState>, keep_alive: Duration) {
        debug!("Playback worker {} started", worker_id);

        loop {
            let job = {
                let mut state = shared.state.lock();
                let deadline = Instant::now() + keep_alive;

                loop {
                    if let Some(job) = state.jobs.pop_front() {
                        break Some(job);
                    }

                    if state.stopping {
                        break None;
                    }

                    state.idle += 1;
                    let timed_out = shared.work.wait_until(&mut state, deadline).timed_out();
                    state.idle -= 1;

                    if timed_out && state.jobs.is_empty() {
                        break None;
                    }
                }
            };

            let Some(job) = job else {
                break;
            };

            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                error!("Playback worker {} caught a panic from a decode job", worker_id);
            }
        }

        let mut state = shared.state.lock();
        state.threads -= 1;
        shared.exited.notify_all();
        debug!("Playback worker {} exiting", worker_id);
    }

    /// Live worker threads
    pub fn thread_count(&self) -> usize {
        self.shared.state.lock().threads
    }

    /// Jobs waiting for a worker (for diagnostics)
    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().jobs.len()
    }

    /// Reject new jobs and wait for running ones to return
    ///
    /// Callers stop every track first so decode calls return promptly. Gives up
    /// after the shutdown timeout; stragglers finish detached.
    pub fn shutdown(&self) {
        info!("Shutting down playback pool");

        let deadline = Instant::now() + self.shutdown_timeout;
        let mut state = self.shared.state.lock();
        state.stopping = true;
        self.shared.work.notify_all();

        while state.threads > 0 {
            if self.shared.exited.wait_until(&mut state, deadline).timed_out() {
                warn!("Playback pool shut down with {} threads still running", state.threads);
                return;
            }
        }

        info!("Playback pool shut down");
    }
}
