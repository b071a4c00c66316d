//! Rate-limited congestion reporting
//!
//! A slow consumer makes `submit()` drop frames in bursts. One warning per
//! interval is logged; the drops in between are counted and reported with
//! the next warning.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

#[derive(Debug, Default)]
struct MonitorState {
    last_warning: Option<Instant>,
    last_depth: usize,
    suppressed: u64,
}

/// Congestion warning limiter
#[derive(Debug)]
pub struct CongestionMonitor {
    interval: Duration,
    state: Mutex<MonitorState>,
}

impl CongestionMonitor {
    /// Allow at most one warning per `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(MonitorState::default()),
        }
    }

    /// Report a dropped frame
    ///
    /// Returns `true` if a warning was logged, `false` if it was suppressed.
    pub fn on_drop(&self, presentation_index: u64, queue_depth: usize, capacity: usize) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();

        let due = match state.last_warning {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        };
        if !due {
            state.suppressed += 1;
            return false;
        }

        let delta = queue_depth as i64 - state.last_depth as i64;
        warn!(
            "Encoder congested: dropped frame {}, frame queue {}/{} ({:+} since last warning), \
             {} drops suppressed",
            presentation_index, queue_depth, capacity, delta, state.suppressed
        );

        state.last_warning = Some(now);
        state.last_depth = queue_depth;
        state.suppressed = 0;
        true
    }

    /// Forget previous warnings (session restart or reconfigure)
    pub fn reset(&self) {
        *self.state.lock() = MonitorState::default();
    }
}
