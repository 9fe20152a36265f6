//! Latches that let a caller block until a correlated reply arrives.
//!
//! Caller protocol: [`clear`](SyncGate::clear), then send the request,
//! then [`wait`](SyncGate::wait). A `set` that lands between the clear and
//! the wait is kept, so the wakeup is never lost. Each clear starts a new
//! generation and a waiter only ever reports the generation it started in.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The reply arrived.
    Set,
    TimedOut,
    /// The link went down.
    Aborted,
    /// Another caller cleared the gate while this one waited.
    Superseded,
}

impl WaitOutcome {
    pub fn is_set(&self) -> bool {
        matches!(self, WaitOutcome::Set)
    }
}

#[derive(Debug, Default)]
struct Latch {
    generation: u64,
    set: bool,
    aborted: bool,
}

#[derive(Debug, Default)]
pub struct SyncGate {
    latch: Mutex<Latch>,
    changed: Condvar,
}

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the latch and start a new generation.
    pub fn clear(&self) -> u64 {
        let mut latch = self.latch.lock();
        latch.generation = latch.generation.wrapping_add(1);
        latch.set = false;
        latch.aborted = false;
        let generation = latch.generation;
        drop(latch);
        // Waiters from the previous generation learn they were superseded.
        self.changed.notify_all();
        generation
    }

    pub fn set(&self) {
        let mut latch = self.latch.lock();
        latch.set = true;
        drop(latch);
        self.changed.notify_all();
    }

    /// Wake every waiter with a failure. Waits keep failing until the
    /// next [`clear`](Self::clear).
    pub fn abort(&self) {
        let mut latch = self.latch.lock();
        latch.aborted = true;
        drop(latch);
        self.changed.notify_all();
    }

    pub fn is_set(&self) -> bool {
        self.latch.lock().set
    }

    pub fn generation(&self) -> u64 {
        self.latch.lock().generation
    }

    /// Block until set, aborted or `timeout` passes. `None` waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.wait_outcome(timeout).is_set()
    }

    pub fn wait_outcome(&self, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut latch = self.latch.lock();
        let generation = latch.generation;
        loop {
            if latch.generation != generation {
                return WaitOutcome::Superseded;
            }
            if latch.set {
                return WaitOutcome::Set;
            }
            if latch.aborted {
                return WaitOutcome::Aborted;
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut latch, deadline).timed_out() {
                        if latch.generation == generation && latch.set {
                            return WaitOutcome::Set;
                        }
                        if latch.generation == generation && latch.aborted {
                            return WaitOutcome::Aborted;
                        }
                        if latch.generation != generation {
                            return WaitOutcome::Superseded;
                        }
                        return WaitOutcome::TimedOut;
                    }
                }
                None => self.changed.wait(&mut latch),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn no_spurious_wake() {
        let gate = SyncGate::new();
        gate.clear();
        let started = Instant::now();
        assert!(!gate.wait(Some(Duration::from_millis(30))));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn set_before_wait_is_not_lost() {
        let gate = SyncGate::new();
        gate.clear();
        gate.set();
        assert!(gate.wait(Some(Duration::from_millis(10))));
    }

    #[test]
    fn set_from_other_thread_wakes_waiter() {
        let gate = Arc::new(SyncGate::new());
        gate.clear();
        let setter = gate.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set();
        });
        assert!(gate.wait(None));
        handle.join().unwrap();
    }

    #[test]
    fn clear_discards_stale_set() {
        let gate = SyncGate::new();
        gate.set();
        gate.clear();
        assert!(!gate.is_set());
        assert!(!gate.wait(Some(Duration::from_millis(5))));
    }

    #[test]
    fn abort_wakes_indefinite_waiter() {
        let gate = Arc::new(SyncGate::new());
        gate.clear();
        let waiter = gate.clone();
        let handle = thread::spawn(move || waiter.wait_outcome(None));
        thread::sleep(Duration::from_millis(20));
        gate.abort();
        assert_eq!(handle.join().unwrap(), WaitOutcome::Aborted);
        // Stays aborted until cleared.
        assert_eq!(gate.wait_outcome(None), WaitOutcome::Aborted);
        gate.clear();
        assert_eq!(
            gate.wait_outcome(Some(Duration::from_millis(5))),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn new_clear_supersedes_old_waiter() {
        let gate = Arc::new(SyncGate::new());
        gate.clear();
        let waiter = gate.clone();
        let handle = thread::spawn(move || waiter.wait_outcome(Some(Duration::from_secs(5))));
        thread::sleep(Duration::from_millis(20));
        let before = gate.generation();
        assert_eq!(gate.clear(), before + 1);
        assert_eq!(handle.join().unwrap(), WaitOutcome::Superseded);
    }
}
