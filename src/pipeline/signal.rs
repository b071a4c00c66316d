//! Wake signals and cooperative cancellation
//!
//! Each worker sleeps on its own [`WakeSignal`]. A notify that arrives while
//! the worker is busy is latched, so the next wait returns immediately and no
//! wakeup is lost.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Latched single-waiter wakeup
#[derive(Debug, Default)]
pub struct WakeSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl WakeSignal {
    /// Create an unsignalled wake signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the waiter, or latch the wakeup if nobody is waiting
    pub fn notify(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.cond.notify_one();
    }

    /// Wait for a wakeup or `timeout`, consuming the latch
    ///
    /// Returns `true` if woken, `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while !*pending {
            if self.cond.wait_until(&mut pending, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *pending, false)
    }
}

/// Cooperative stop flag shared by a session and its workers
#[derive(Debug, Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl CancellationToken {
    /// Create a live token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every sleeper
    pub fn cancel(&self) {
        let _guard = self.lock.lock();
        self.cancelled.store(true, Ordering::Release);
        self.cond.notify_all();
    }

    /// Whether cancellation has been requested
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Sleep for `duration` unless cancelled first
    ///
    /// Returns `true` if the full duration elapsed, `false` if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.lock.lock();
        while !self.is_cancelled() {
            if self.cond.wait_until(&mut guard, deadline).timed_out() {
                return !self.is_cancelled();
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_notify_before_wait_is_latched() {
        let signal = WakeSignal::new();
        signal.notify();
        assert!(signal.wait_timeout(Duration::from_secs(5)));
        // Latch consumed
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_notify_wakes_waiter() {
        let signal = Arc::new(WakeSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait_timeout(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        signal.notify();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_sleep_runs_full_duration() {
        let token = CancellationToken::new();
        let start = Instant::now();
        assert!(token.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_cancel_interrupts_sleep() {
        let token = Arc::new(CancellationToken::new());
        let sleeper = {
            let token = Arc::clone(&token);
            thread::spawn(move || {
                let start = Instant::now();
                let completed = token.sleep(Duration::from_secs(10));
                (completed, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        token.cancel();

        let (completed, elapsed) = sleeper.join().unwrap();
        assert!(!completed);
        assert!(elapsed < Duration::from_secs(5));
        assert!(token.is_cancelled());
        assert!(!token.sleep(Duration::from_secs(10)));
    }
}
