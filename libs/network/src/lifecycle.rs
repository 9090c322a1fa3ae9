//! Thread lifecycle primitives shared by the listener, reaper and connection
//! workers.
//!
//! - [`Lifecycle`]: the step counter a worker thread advances as it runs
//! - [`KillGate`]: makes `kill_thread` idempotent across concurrent callers
//! - [`Signal`]: stop flag plus a condvar so sleeping loops wake on stop

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

/// Steps a worker thread moves through, in order
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleStep {
    Constructed = 0,
    Init = 1,
    Running = 2,
    Exiting = 3,
    Exited = 4,
}

impl LifecycleStep {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Constructed,
            1 => Self::Init,
            2 => Self::Running,
            3 => Self::Exiting,
            _ => Self::Exited,
        }
    }
}

impl fmt::Display for LifecycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Constructed => "constructed",
            Self::Init => "init",
            Self::Running => "running",
            Self::Exiting => "exiting",
            Self::Exited => "exited",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct Lifecycle(AtomicU8);

impl Lifecycle {
    pub fn new() -> Self {
        Self(AtomicU8::new(LifecycleStep::Constructed as u8))
    }

    #[inline]
    pub fn get(&self) -> LifecycleStep {
        LifecycleStep::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, step: LifecycleStep) {
        self.0.store(step as u8, Ordering::Release);
    }

    #[inline]
    pub fn is_exited(&self) -> bool {
        self.get() == LifecycleStep::Exited
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

const ALIVE: u8 = 0;
const KILLING: u8 = 1;
const KILLED: u8 = 2;

/// Alive → Killing → Killed, entered once.
///
/// The caller that wins the compare-and-swap runs the teardown; every other
/// caller blocks until it has finished.
#[derive(Debug)]
pub struct KillGate {
    state: AtomicU8,
    lock: Mutex<()>,
    done: Condvar,
}

impl KillGate {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ALIVE),
            lock: Mutex::new(()),
            done: Condvar::new(),
        }
    }

    /// Run `teardown` exactly once across all callers.
    ///
    /// Returns true to every caller once teardown has completed.
    pub fn kill(&self, teardown: impl FnOnce()) -> bool {
        if self
            .state
            .compare_exchange(ALIVE, KILLING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            teardown();
            {
                let _guard = self.lock.lock();
                self.state.store(KILLED, Ordering::Release);
            }
            self.done.notify_all();
        } else {
            let mut guard = self.lock.lock();
            while !self.is_done() {
                self.done.wait(&mut guard);
            }
        }
        true
    }

    /// Some caller has entered `kill`
    pub fn is_called(&self) -> bool {
        self.state.load(Ordering::Acquire) != ALIVE
    }

    /// Teardown has completed
    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) == KILLED
    }
}

impl Default for KillGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative stop flag with an interruptible sleep
#[derive(Debug, Default)]
pub struct Signal {
    raised: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Set the flag and wake any sleeper. Returns false if it was already set.
    pub fn raise(&self) -> bool {
        let first = {
            let _guard = self.lock.lock();
            !self.raised.swap(true, Ordering::AcqRel)
        };
        self.wake.notify_all();
        first
    }

    /// Wake sleepers without raising the flag
    pub fn notify(&self) {
        let _guard = self.lock.lock();
        self.wake.notify_all();
    }

    /// Sleep up to `timeout`, returning early on `raise` or `notify`.
    ///
    /// Returns whether the flag is raised on wake-up.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut guard = self.lock.lock();
        if !self.is_raised() {
            self.wake.wait_for(&mut guard, timeout);
        }
        self.is_raised()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_lifecycle_steps_are_ordered() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.get(), LifecycleStep::Constructed);
        for step in [
            LifecycleStep::Init,
            LifecycleStep::Running,
            LifecycleStep::Exiting,
            LifecycleStep::Exited,
        ] {
            assert!(lifecycle.get() < step);
            lifecycle.set(step);
            assert_eq!(lifecycle.get(), step);
        }
        assert!(lifecycle.is_exited());
        assert_eq!(LifecycleStep::Running as u8, 2);
    }

    #[test]
    fn test_kill_gate_runs_teardown_once() {
        let gate = Arc::new(KillGate::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let runs = Arc::clone(&runs);
                thread::spawn(move || {
                    gate.kill(|| {
                        thread::sleep(Duration::from_millis(20));
                        runs.fetch_add(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();

        let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().all(|r| *r));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(gate.is_called());
        assert!(gate.is_done());
    }

    #[test]
    fn test_losers_wait_for_teardown() {
        let gate = Arc::new(KillGate::new());
        let finished = Arc::new(AtomicBool::new(false));

        let winner = {
            let gate = Arc::clone(&gate);
            let finished = Arc::clone(&finished);
            thread::spawn(move || {
                gate.kill(|| {
                    thread::sleep(Duration::from_millis(50));
                    finished.store(true, Ordering::SeqCst);
                })
            })
        };
        while !gate.is_called() {
            thread::yield_now();
        }
        assert!(gate.kill(|| panic!("second teardown")));
        assert!(finished.load(Ordering::SeqCst));
        winner.join().unwrap();
    }

    #[test]
    fn test_signal_wait_wakes_on_raise() {
        let signal = Arc::new(Signal::new());
        let sleeper = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                let start = Instant::now();
                let raised = signal.wait(Duration::from_secs(10));
                (raised, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert!(signal.raise());
        assert!(!signal.raise());

        let (raised, elapsed) = sleeper.join().unwrap();
        assert!(raised);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_signal_wait_times_out() {
        let signal = Signal::new();
        assert!(!signal.wait(Duration::from_millis(5)));
    }
}
