//! One-bit synchronization with a timed wait.
//!
//! The waits poll on a 100 ms sleep. That is acceptable because the latch
//! is only used for login and instrument-download rendezvous — never on a
//! data path — and a poll loop cannot leak a blocked thread the way a
//! one-shot channel can when the reader times out before the sender fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A boolean flag with timed waits for either state.
#[derive(Debug, Default)]
pub struct StatusLatch {
    flag: AtomicBool,
}

impl StatusLatch {
    /// Create a latch in the `false` state.
    pub const fn new() -> StatusLatch {
        StatusLatch {
            flag: AtomicBool::new(false),
        }
    }

    /// Set the flag to `true`.
    pub fn set_true(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Set the flag to `false`.
    pub fn set_false(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Current state without waiting.
    pub fn is_true(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Wait until the flag is `true`. Returns `false` on timeout.
    pub fn wait_for_true(&self, timeout_ms: u64) -> bool {
        self.wait(true, timeout_ms)
    }

    /// Wait until the flag is `false`. Returns `false` on timeout.
    pub fn wait_for_false(&self, timeout_ms: u64) -> bool {
        self.wait(false, timeout_ms)
    }

    fn wait(&self, target: bool, timeout_ms: u64) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        while self.flag.load(Ordering::SeqCst) != target {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
        }
        true
    }
}
