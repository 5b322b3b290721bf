//! Single-slot hand-off gates.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// A single-slot synchronization gate.
///
/// `wait` blocks until the gate is signaled and consumes the signal;
/// `set` signals it. Signals do not accumulate: setting an already
/// signaled gate leaves it signaled. This is the auto-reset primitive
/// enforcing strict one-stage-at-a-time sequencing between pipeline
/// phases and exactly one block of metadata prefetch.
#[derive(Debug)]
pub struct Gate {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl Gate {
    /// Creates a gate, initially signaled or not.
    pub fn new(signaled: bool) -> Self {
        Self {
            signaled: Mutex::new(signaled),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until the gate is signaled, then consumes the signal.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.condvar.wait(&mut signaled);
        }
        *signaled = false;
    }

    /// Like `wait`, but gives up after `timeout`. Returns true if the
    /// signal was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock();
        if !*signaled {
            self.condvar.wait_for(&mut signaled, timeout);
        }
        if *signaled {
            *signaled = false;
            true
        } else {
            false
        }
    }

    /// Signals the gate, waking one waiter.
    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.condvar.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn initially_signaled_gate_passes_once() {
        let gate = Gate::new(true);
        gate.wait();
        // Signal was consumed.
        assert!(!gate.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn set_wakes_waiter() {
        let gate = Arc::new(Gate::new(false));
        let waiter = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || gate.wait())
        };
        gate.set();
        waiter.join().unwrap();
    }

    #[test]
    fn signals_do_not_accumulate() {
        let gate = Gate::new(false);
        gate.set();
        gate.set();
        gate.wait();
        assert!(!gate.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn hand_off_chain() {
        // Two threads alternate through a pair of gates.
        let ping = Arc::new(Gate::new(true));
        let pong = Arc::new(Gate::new(false));
        let mut order = Vec::new();

        let worker = {
            let ping = Arc::clone(&ping);
            let pong = Arc::clone(&pong);
            std::thread::spawn(move || {
                for _ in 0..3 {
                    ping.wait();
                    pong.set();
                }
            })
        };
        for i in 0..3 {
            pong.wait();
            order.push(i);
            ping.set();
        }
        worker.join().unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }
}
