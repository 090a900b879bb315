use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct SignalState {
    pending: usize,
    running: bool,
}

/// Condition-variable gate with a pending-work counter and a stop flag.
///
/// A consumer calls [`stall`](Self::stall) to announce it needs work and
/// then [`wait`](Self::wait); a producer releases it with
/// [`proceed`](Self::proceed). Calling `stall` again right after waking means
/// a `proceed` that lands mid-processing is not lost: the next `wait`
/// returns immediately.
#[derive(Debug)]
pub struct WaitSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl Default for WaitSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitSignal {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SignalState {
                pending: 0,
                running: true,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn stall(&self) {
        self.state.lock().pending += 1;
    }

    /// Blocks until nothing is pending or the signal was exited.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        while state.pending > 0 && state.running {
            self.cond.wait(&mut state);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    /// Returns `false` if the timeout elapsed with work still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.pending > 0 && state.running {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return state.pending == 0 || !state.running;
            }
        }
        true
    }

    pub fn proceed(&self, force: bool) {
        let mut state = self.state.lock();
        if force {
            state.pending = 0;
        } else {
            state.pending = state.pending.saturating_sub(1);
        }
        drop(state);
        self.cond.notify_one();
    }

    pub fn exit(&self) {
        let mut state = self.state.lock();
        state.running = false;
        state.pending = 0;
        drop(state);
        self.cond.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending
    }
}
