//! Encode session statistics
//!
//! Counters for both workers and the host-facing calls, updated under the
//! session's stats lock and copied out by `EncodeSession::stats()`.

use serde::Serialize;
use std::time::{Duration, Instant};

/// Statistics for one encode session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    /// Backend identifier ("synthetic", ...)
    pub backend: &'static str,

    /// Frames the host handed to `submit()` and that entered FrameQueue
    pub frames_submitted: u64,

    /// Frames the device accepted
    pub frames_accepted: u64,

    /// Frames dropped because FrameQueue stayed full
    pub frames_dropped_congestion: u64,

    /// Frames dropped because conversion failed
    pub frames_dropped_conversion: u64,

    /// Times the device reported a full input queue
    pub submit_retries: u64,

    /// Packets handed to the host
    pub packets_retrieved: u64,

    /// IDR packets handed to the host
    pub keyframes: u64,

    /// Payload bytes handed to the host
    pub bytes_retrieved: u64,

    /// Congestion warnings logged
    pub congestion_warnings: u64,

    /// Drops that fell inside a warning interval and were not logged
    pub congestion_suppressed: u64,

    /// Average device submit call time in milliseconds
    pub avg_submit_time_ms: f32,

    /// Maximum device submit call time observed (ms)
    pub max_submit_time_ms: f32,

    /// Highest FrameQueue depth observed
    pub peak_frame_queue_depth: usize,

    /// Time since the session was created
    pub uptime: Duration,

    /// Timestamp when the session was created
    #[serde(skip)]
    pub created_at: Instant,
}

impl SessionStats {
    /// Create new stats for a backend
    pub fn new(backend: &'static str) -> Self {
        Self {
            backend,
            frames_submitted: 0,
            frames_accepted: 0,
            frames_dropped_congestion: 0,
            frames_dropped_conversion: 0,
            submit_retries: 0,
            packets_retrieved: 0,
            keyframes: 0,
            bytes_retrieved: 0,
            congestion_warnings: 0,
            congestion_suppressed: 0,
            avg_submit_time_ms: 0.0,
            max_submit_time_ms: 0.0,
            peak_frame_queue_depth: 0,
            uptime: Duration::ZERO,
            created_at: Instant::now(),
        }
    }

    /// Record a frame entering FrameQueue
    pub fn record_submitted(&mut self, queue_depth: usize) {
        self.frames_submitted += 1;
        self.peak_frame_queue_depth = self.peak_frame_queue_depth.max(queue_depth);
        self.uptime = self.created_at.elapsed();
    }

    /// Record a device accept and the time the submit call took
    pub fn record_accepted(&mut self, submit_time_ms: f32) {
        self.frames_accepted += 1;

        if self.frames_accepted == 1 {
            self.avg_submit_time_ms = submit_time_ms;
        } else {
            // Exponential moving average (α = 0.1)
            self.avg_submit_time_ms = self.avg_submit_time_ms * 0.9 + submit_time_ms * 0.1;
        }
        self.max_submit_time_ms = self.max_submit_time_ms.max(submit_time_ms);
        self.uptime = self.created_at.elapsed();
    }

    /// Record a "device full" answer
    pub fn record_retry(&mut self) {
        self.submit_retries += 1;
    }

    /// Record a frame dropped at the FrameQueue
    pub fn record_congestion_drop(&mut self) {
        self.frames_dropped_congestion += 1;
        self.uptime = self.created_at.elapsed();
    }

    /// Record a frame dropped by the conversion stage
    pub fn record_conversion_drop(&mut self) {
        self.frames_dropped_conversion += 1;
        self.uptime = self.created_at.elapsed();
    }

    /// Record a packet handed to the host
    pub fn record_packet(&mut self, bytes: usize, is_keyframe: bool) {
        self.packets_retrieved += 1;
        self.bytes_retrieved += bytes as u64;
        if is_keyframe {
            self.keyframes += 1;
        }
        self.uptime = self.created_at.elapsed();
    }

    /// Record the outcome of a congestion event
    pub fn record_congestion_warning(&mut self, logged: bool) {
        if logged {
            self.congestion_warnings += 1;
        } else {
            self.congestion_suppressed += 1;
        }
    }

    /// Total dropped frames
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped_congestion + self.frames_dropped_conversion
    }

    /// Dropped frames as a percentage of frames offered
    pub fn drop_rate(&self) -> f32 {
        let offered = self.frames_submitted + self.frames_dropped_congestion;
        if offered > 0 {
            (self.frames_dropped() as f32 / offered as f32) * 100.0
        } else {
            0.0
        }
    }

    /// Average output bitrate over the session (kbps)
    pub fn bitrate_kbps(&self) -> u32 {
        let elapsed_secs = self.uptime.as_secs_f32();
        if elapsed_secs > 0.5 {
            ((self.bytes_retrieved * 8) as f32 / elapsed_secs / 1000.0) as u32
        } else {
            0
        }
    }

    /// Format stats for logging
    pub fn summary(&self) -> String {
        format!(
            "{}: {} submitted, {} accepted, {} packets ({} keyframes, {} bytes), \
             {} dropped ({:.1}%), {} retries, avg submit {:.2}ms",
            self.backend,
            self.frames_submitted,
            self.frames_accepted,
            self.packets_retrieved,
            self.keyframes,
            self.bytes_retrieved,
            self.frames_dropped(),
            self.drop_rate(),
            self.submit_retries,
            self.avg_submit_time_ms
        )
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new("unknown")
    }
}

/// Timing helper for measuring device calls
pub struct EncodeTimer {
    start: Instant,
}

impl EncodeTimer {
    /// Start timing a device call
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> f32 {
        self.start.elapsed().as_secs_f32() * 1000.0
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
