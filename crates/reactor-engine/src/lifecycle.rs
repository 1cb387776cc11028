//! The process-wide lifecycle state machine and shutdown barrier
//! (spec.md §3 "Lifecycle State", §4.1).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::ReactorError;

/// The reactor's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    /// No reactor loop is running; `submit` is rejected.
    Stopped = 0,
    /// Normal operation; submissions accepted up to capacity.
    Running = 1,
    /// Submissions rejected; in-flight units continue to completion.
    Draining = 2,
    /// Shutdown in progress; the barrier has fired.
    Stopping = 3,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => State::Stopped,
            1 => State::Running,
            2 => State::Draining,
            3 => State::Stopping,
            _ => unreachable!("invalid lifecycle state byte"),
        }
    }
}

/// A one-shot shutdown edge, reset atomically on every fresh
/// `stopped -> running` transition.
///
/// Built on [`Semaphore::close`] exactly as the teacher's `NotifyOnce` does:
/// closing the semaphore wakes every waiter permanently, and a waiter that
/// arrives after the close still observes it immediately.
struct ShutdownBarrier {
    sem: Semaphore,
}

impl ShutdownBarrier {
    fn new() -> Self {
        Self { sem: Semaphore::new(0) }
    }

    fn signal(&self) {
        self.sem.close();
    }

    async fn wait(&self) {
        // `acquire` on a closed semaphore returns `Err` immediately; either
        // outcome means the barrier has fired.
        let _ = self.sem.acquire().await;
    }

    fn is_signaled(&self) -> bool {
        self.sem.is_closed()
    }
}

/// Owns the lifecycle state enum and the shutdown barrier.
///
/// Reads are lock-free (`state()` and the predicate queries); writes go
/// through a short-lived lock so transition legality can be checked and
/// applied atomically.
pub struct LifecycleManager {
    state: AtomicU8,
    barrier: std::sync::Mutex<Arc<ShutdownBarrier>>,
}

impl LifecycleManager {
    /// A fresh manager in the `stopped` state.
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(State::Stopped as u8),
            barrier: std::sync::Mutex::new(Arc::new(ShutdownBarrier::new())),
        }
    }

    /// The current state.
    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True if `state() == Running`.
    pub fn is_running(&self) -> bool {
        self.state() == State::Running
    }

    /// True if `state() == Draining`.
    pub fn is_draining(&self) -> bool {
        self.state() == State::Draining
    }

    /// True if `state() == Stopping`.
    pub fn is_stopping(&self) -> bool {
        self.state() == State::Stopping
    }

    /// True if `state() == Stopped`.
    pub fn is_stopped(&self) -> bool {
        self.state() == State::Stopped
    }

    /// Attempt a transition, rejecting any pair outside the legal set of
    /// spec.md §3.
    pub fn transition(&self, to: State) -> Result<(), ReactorError> {
        let from = self.state();
        let legal = matches!(
            (from, to),
            (State::Stopped, State::Running)
                | (State::Running, State::Draining)
                | (State::Running, State::Stopping)
                | (State::Draining, State::Stopping)
                | (State::Stopping, State::Stopped)
        );
        if !legal {
            return Err(ReactorError::IllegalTransition { from, to });
        }
        if from == State::Stopped && to == State::Running {
            // Fresh barrier on every restart, per spec.md §4.1.
            let mut guard = self.barrier.lock().unwrap();
            *guard = Arc::new(ShutdownBarrier::new());
        }
        self.state.store(to as u8, Ordering::Release);
        Ok(())
    }

    /// Fire the shutdown barrier without otherwise changing state.
    pub fn signal_shutdown(&self) {
        self.barrier.lock().unwrap().signal();
    }

    /// True if the current barrier has fired.
    pub fn shutdown_signaled(&self) -> bool {
        self.barrier.lock().unwrap().is_signaled()
    }

    /// Resolve once the shutdown barrier fires.
    pub async fn wait_for_shutdown(&self) {
        let barrier = self.barrier.lock().unwrap().clone();
        barrier.wait().await;
    }

    /// Wait for `state() == Running`, or time out.
    pub async fn wait_for_running(&self, timeout: std::time::Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_running() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}
