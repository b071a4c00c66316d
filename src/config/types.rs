//! Configuration type definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::encoder::FrameRate;

/// Encode session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Frame width in pixels (even)
    pub width: u32,

    /// Frame height in pixels (even)
    pub height: u32,

    /// Nominal frame rate
    #[serde(default)]
    pub frame_rate: FrameRate,

    /// Consecutive B-frames: "none", "one", "two", "three"
    #[serde(default = "default_b_frame_pattern")]
    pub b_frame_pattern: String,

    /// Decode delay in frames; overrides the B-frame pattern's look-ahead
    #[serde(default)]
    pub decode_delay_frames: Option<u32>,

    /// Encoder quality preset: "speed", "balanced", "quality"
    #[serde(default = "default_quality_preset")]
    pub quality_preset: String,

    /// Color matrix: "auto", "bt601", "bt709"
    #[serde(default = "default_color_matrix")]
    pub color_matrix: String,

    /// Color range: "limited", "full"
    #[serde(default = "default_color_range")]
    pub color_range: String,

    /// Device surface format: "nv12", "i420"
    #[serde(default = "default_surface_format")]
    pub surface_format: String,

    /// FrameQueue capacity (None = one second of frames)
    #[serde(default)]
    pub frame_queue_capacity: Option<usize>,

    /// PacketQueue capacity (None = four seconds of frames)
    #[serde(default)]
    pub packet_queue_capacity: Option<usize>,

    /// "Device full" answers before the submit worker backs off
    #[serde(default = "default_max_submit_retries")]
    pub max_submit_retries: u32,

    /// Workers sleep frame_interval / pacing_divisor between device calls
    #[serde(default = "default_pacing_divisor")]
    pub pacing_divisor: u32,

    /// How long stop() waits for each worker
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,

    /// Time allowed for the device to accept the first frame
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Minimum time between congestion warnings
    #[serde(default = "default_congestion_warning_interval_ms")]
    pub congestion_warning_interval_ms: u64,
}

fn default_b_frame_pattern() -> String {
    "none".to_string()
}

fn default_quality_preset() -> String {
    "balanced".to_string()
}

fn default_color_matrix() -> String {
    "auto".to_string()
}

fn default_color_range() -> String {
    "limited".to_string()
}

fn default_surface_format() -> String {
    "nv12".to_string()
}

fn default_max_submit_retries() -> u32 {
    5
}

fn default_pacing_divisor() -> u32 {
    4
}

fn default_join_timeout_ms() -> u64 {
    1000
}

fn default_startup_timeout_ms() -> u64 {
    5000
}

fn default_congestion_warning_interval_ms() -> u64 {
    1000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: FrameRate::default(),
            b_frame_pattern: default_b_frame_pattern(),
            decode_delay_frames: None,
            quality_preset: default_quality_preset(),
            color_matrix: default_color_matrix(),
            color_range: default_color_range(),
            surface_format: default_surface_format(),
            frame_queue_capacity: None,
            packet_queue_capacity: None,
            max_submit_retries: default_max_submit_retries(),
            pacing_divisor: default_pacing_divisor(),
            join_timeout_ms: default_join_timeout_ms(),
            startup_timeout_ms: default_startup_timeout_ms(),
            congestion_warning_interval_ms: default_congestion_warning_interval_ms(),
        }
    }
}

impl SessionConfig {
    /// Validate ranges and enumerated strings
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.width == 0 || self.height == 0 {
            anyhow::bail!("Invalid resolution {}x{}", self.width, self.height);
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            anyhow::bail!(
                "Resolution {}x{} must have even width and height",
                self.width,
                self.height
            );
        }
        if !self.frame_rate.is_valid() {
            anyhow::bail!("Invalid frame rate: {}", self.frame_rate);
        }

        match self.b_frame_pattern.to_lowercase().as_str() {
            "none" | "one" | "two" | "three" | "0" | "1" | "2" | "3" => {}
            _ => anyhow::bail!("Invalid B-frame pattern: {}", self.b_frame_pattern),
        }

        match self.quality_preset.to_lowercase().as_str() {
            "speed" | "fast" | "balanced" | "default" | "medium" | "quality" | "slow"
            | "high" => {}
            _ => anyhow::bail!("Invalid quality preset: {}", self.quality_preset),
        }

        match self.color_matrix.to_lowercase().as_str() {
            "auto" | "bt601" | "601" | "bt709" | "709" => {}
            _ => anyhow::bail!("Invalid color matrix: {}", self.color_matrix),
        }

        match self.color_range.to_lowercase().as_str() {
            "limited" | "tv" | "partial" | "full" | "pc" | "jpeg" => {}
            _ => anyhow::bail!("Invalid color range: {}", self.color_range),
        }

        match self.surface_format.to_lowercase().as_str() {
            "nv12" | "i420" | "yuv420p" => {}
            _ => anyhow::bail!("Invalid surface format: {}", self.surface_format),
        }

        if self.frame_queue_capacity == Some(0) {
            anyhow::bail!("frame_queue_capacity must be at least 1");
        }
        if self.packet_queue_capacity == Some(0) {
            anyhow::bail!("packet_queue_capacity must be at least 1");
        }
        if self.pacing_divisor == 0 {
            anyhow::bail!("pacing_divisor must be at least 1");
        }
        if self.max_submit_retries == 0 {
            anyhow::bail!("max_submit_retries must be at least 1");
        }

        Ok(())
    }

    /// FrameQueue capacity for a frame rate
    pub fn frame_queue_capacity_for(&self, rate: FrameRate) -> usize {
        self.frame_queue_capacity
            .unwrap_or_else(|| seconds_of_frames(rate, 1))
    }

    /// PacketQueue capacity for a frame rate
    pub fn packet_queue_capacity_for(&self, rate: FrameRate) -> usize {
        self.packet_queue_capacity
            .unwrap_or_else(|| seconds_of_frames(rate, 4))
    }

    /// Worker join timeout
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// First-frame acceptance timeout
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Minimum time between congestion warnings
    pub fn congestion_warning_interval(&self) -> Duration {
        Duration::from_millis(self.congestion_warning_interval_ms)
    }
}

fn seconds_of_frames(rate: FrameRate, seconds: u32) -> usize {
    (rate.as_f64() * f64::from(seconds)).ceil().max(1.0) as usize
}

/// Encoder device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Backend: "auto", "synthetic"
    pub backend: String,

    /// Surfaces the synthetic device holds in flight
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// GOP length override (None = quality preset's GOP)
    #[serde(default)]
    pub gop_length: Option<u32>,

    /// Every n-th GOP starts with an IDR frame
    #[serde(default = "default_idr_interval_gops")]
    pub idr_interval_gops: u32,
}

fn default_queue_depth() -> usize {
    8
}

fn default_idr_interval_gops() -> u32 {
    1
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: "synthetic".to_string(),
            queue_depth: default_queue_depth(),
            gop_length: None,
            idr_interval_gops: default_idr_interval_gops(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level ("trace", "debug", "info", "warn", "error")
    pub level: String,

    /// Directory for log files (None = console only)
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
        }
    }
}
