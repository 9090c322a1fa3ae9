//! # Connection Reaper
//!
//! Owns every live [`ConnectionWorker`] and retires dead ones in two phases
//! per cycle:
//!
//! 1. **scan**: workers whose socket is no longer connected are stopped
//!    (signal only) and moved from the live list to the destruct queue
//! 2. **drain**: workers at the head of the destruct queue that have reached
//!    `Exited` are joined and dropped; the first one still running stays
//!    queued for the next cycle
//!
//! A scan never joins, so one slow worker cannot hold up detection of the
//! others.

use crate::connection::ConnectionWorker;
use crate::error::{NetworkError, Result};
use crate::lifecycle::{KillGate, Lifecycle, LifecycleStep, Signal};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// Whole milliseconds, saturating at `u64::MAX`
fn millis(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)
}

struct ReaperShared {
    live: Mutex<Vec<Arc<ConnectionWorker>>>,
    destruct: Mutex<VecDeque<Arc<ConnectionWorker>>>,
    interval_ms: AtomicU64,
    cleanup_enabled: AtomicBool,
    lifecycle: Lifecycle,
    stop: Signal,
    reaped: AtomicU64,
}

pub struct ConnectionReaper {
    shared: Arc<ReaperShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
    kill: KillGate,
}

impl ConnectionReaper {
    /// Start the reaper thread, scanning every `interval`
    pub fn create(interval: Duration) -> Result<Arc<Self>> {
        let shared = Arc::new(ReaperShared {
            live: Mutex::new(Vec::new()),
            destruct: Mutex::new(VecDeque::new()),
            interval_ms: AtomicU64::new(millis(interval)),
            cleanup_enabled: AtomicBool::new(true),
            lifecycle: Lifecycle::new(),
            stop: Signal::new(),
            reaped: AtomicU64::new(0),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("servo-reaper".to_string())
            .spawn(move || thread_shared.run())
            .map_err(|e| NetworkError::thread_spawn("servo-reaper", e))?;

        Ok(Arc::new(Self {
            shared,
            handle: Mutex::new(Some(handle)),
            kill: KillGate::new(),
        }))
    }

    /// Take ownership of a running worker.
    ///
    /// Fails with [`NetworkError::ReaperNotRunning`] once the reaper is
    /// shutting down; the caller is then responsible for killing the worker.
    pub fn safe_hold_thread(&self, worker: Arc<ConnectionWorker>) -> Result<()> {
        let mut live = self.shared.live.lock();
        // checked under the lock so the final drain cannot miss this worker
        if self.shared.stop.is_raised() {
            return Err(NetworkError::ReaperNotRunning);
        }
        debug!(rank = worker.rank_id(), live = live.len() + 1, "Holding connection");
        live.push(worker);
        Ok(())
    }

    pub fn set_reap_interval(&self, interval: Duration) {
        self.shared
            .interval_ms
            .store(millis(interval), Ordering::Release);
        self.shared.stop.notify();
    }

    pub fn reap_interval(&self) -> Duration {
        self.shared.interval()
    }

    /// Pause or resume the scan and drain phases
    pub fn set_cleanup_enabled(&self, enabled: bool) {
        self.shared.cleanup_enabled.store(enabled, Ordering::Release);
        self.shared.stop.notify();
    }

    pub fn is_cleanup_enabled(&self) -> bool {
        self.shared.cleanup_enabled.load(Ordering::Acquire)
    }

    /// Workers in the live list
    pub fn live_count(&self) -> usize {
        self.shared.live.lock().len()
    }

    /// Workers stopped but not yet joined
    pub fn pending_destruct(&self) -> usize {
        self.shared.destruct.lock().len()
    }

    /// Workers joined and dropped so far
    pub fn reaped_count(&self) -> u64 {
        self.shared.reaped.load(Ordering::Relaxed)
    }

    pub fn lifecycle_step(&self) -> LifecycleStep {
        self.shared.lifecycle.get()
    }

    pub fn is_kill_done(&self) -> bool {
        self.kill.is_done()
    }

    /// Stop the reaper loop without waiting
    pub fn stop(&self) {
        if self.shared.stop.raise() {
            debug!("Stopping connection reaper");
        }
    }

    /// Stop and join the reaper, then kill every worker it still owns.
    ///
    /// Blocks until all worker threads have been joined.
    pub fn kill_thread(&self) -> bool {
        self.kill.kill(|| {
            self.stop();
            let handle = self.handle.lock().take();
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    error!("Connection reaper thread panicked");
                    self.shared.lifecycle.set(LifecycleStep::Exited);
                }
            }

            let live = std::mem::take(&mut *self.shared.live.lock());
            let destruct = std::mem::take(&mut *self.shared.destruct.lock());
            let count = live.len() + destruct.len();
            for worker in live.into_iter().chain(destruct) {
                worker.kill_thread();
                self.shared.reaped.fetch_add(1, Ordering::Relaxed);
            }
            info!(killed = count, "Connection reaper shut down");
        })
    }
}

impl Drop for ConnectionReaper {
    fn drop(&mut self) {
        self.kill_thread();
    }
}

impl std::fmt::Debug for ConnectionReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionReaper")
            .field("step", &self.lifecycle_step())
            .field("live", &self.live_count())
            .field("pending_destruct", &self.pending_destruct())
            .finish()
    }
}

impl ReaperShared {
    fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Acquire))
    }

    fn run(&self) {
        self.lifecycle.set(LifecycleStep::Init);
        self.lifecycle.set(LifecycleStep::Running);
        debug!(interval_ms = self.interval_ms.load(Ordering::Relaxed), "Connection reaper running");

        while !self.stop.is_raised() {
            if self.cleanup_enabled.load(Ordering::Acquire) {
                self.scan();
                self.drain();
            }
            self.stop.wait(self.interval());
        }

        self.lifecycle.set(LifecycleStep::Exiting);
        self.lifecycle.set(LifecycleStep::Exited);
    }

    fn scan(&self) {
        let mut live = self.live.lock();
        let mut index = 0;
        while index < live.len() {
            if live[index].is_socket_connection() {
                index += 1;
                continue;
            }
            let worker = live.swap_remove(index);
            worker.stop();
            debug!(rank = worker.rank_id(), "Connection lost, queued for destruction");
            self.destruct.lock().push_back(worker);
        }
    }

    fn drain(&self) {
        loop {
            let worker = {
                let mut destruct = self.destruct.lock();
                match destruct.front() {
                    Some(front) if front.is_exited() => destruct.pop_front(),
                    _ => None,
                }
            };
            let Some(worker) = worker else {
                break;
            };
            worker.kill_thread();
            self.reaped.fetch_add(1, Ordering::Relaxed);
            info!(
                rank = worker.rank_id(),
                peer = %worker.peer_addr(),
                bytes = worker.bytes_received(),
                "Connection reaped"
            );
        }
    }
}
