//! Hardware encoder device abstraction
//!
//! The encode session talks to hardware through the [`EncoderDevice`] trait.
//! A device accepts converted [`Surface`]s and yields compressed output
//! asynchronously: submission may be refused while the device is internally
//! full, and output may need several polls before it is ready.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                EncoderDevice Trait                  │
//! │  init | reinit | submit | query_output | drain      │
//! └─────────────────────────────────────────────────────┘
//!                          │
//!          ┌───────────────┼───────────────┐
//!          ▼               ▼               ▼
//!    ┌───────────┐   ┌──────────┐   ┌──────────────┐
//!    │ Synthetic │   │  Vendor  │   │ Test doubles │
//!    │  Encoder  │   │ backends │   │              │
//!    └───────────┘   └──────────┘   └──────────────┘
//! ```
//!
//! # Threading
//!
//! Devices are shared between the two session workers, so the trait takes
//! `&self` and requires `Send + Sync`. The session guarantees that
//! `submit()` is only called from the submit worker and `query_output()`
//! only from the retrieve worker; `init()`, `reinit()` and the shutdown
//! drain run while both workers are quiesced.
//!
//! # Expected vs. fatal conditions
//!
//! "Full" and "needs more input" are ordinary return values
//! ([`Submission::Full`], [`OutputPoll::NeedsMoreInput`]). Only
//! [`DeviceError`] ends a session.

mod error;
mod factory;
pub mod properties;
mod stats;
pub mod synthetic;

// Re-exports
pub use error::{DeviceError, DeviceResult, PropertyError};
pub use factory::{available_backends, create_device_context};
pub use properties::{
    BFramePattern, PropertyTable, QualityPreset, RateControlProfile, ResolvedProperties,
};
pub use stats::{EncodeTimer, SessionStats};

use bytes::Bytes;
use std::sync::Arc;

use crate::video::converter::{ColorConverter, ColorMatrix, ColorRange};
use crate::video::frame::Plane;

/// Device-native surface layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceFormat {
    /// Y plane + interleaved UV plane
    Nv12,
    /// Y, U and V planes
    I420,
}

impl SurfaceFormat {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "nv12" => Some(Self::Nv12),
            "i420" | "yuv420p" => Some(Self::I420),
            _ => None,
        }
    }
}

/// A frame after conversion, ready for the device
///
/// `presentation_index` is the property the device must carry through to
/// its output so packets can be matched back to frames.
#[derive(Debug, Clone)]
pub struct Surface {
    /// Presentation index of the originating frame
    pub presentation_index: u64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Plane layout
    pub format: SurfaceFormat,
    /// Matrix used to produce the YUV data
    pub matrix: ColorMatrix,
    /// Quantization range of the YUV data
    pub range: ColorRange,
    /// Plane data in layout order
    pub planes: Vec<Plane>,
}

/// Compressed frame classes, in decode-dependency order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameClass {
    /// Bidirectional: needs past and future references
    B,
    /// Predicted: needs a past reference
    P,
    /// Intra, not an instantaneous decoder refresh
    I,
    /// Instantaneous decoder refresh
    Idr,
}

impl FrameClass {
    /// Drop priority: IDR=3, I=2, P=1, B=0
    #[inline]
    pub const fn priority(&self) -> u8 {
        match self {
            Self::Idr => 3,
            Self::I => 2,
            Self::P => 1,
            Self::B => 0,
        }
    }

    /// Only IDR frames are random access points
    #[inline]
    pub const fn is_keyframe(&self) -> bool {
        matches!(self, Self::Idr)
    }
}

impl std::fmt::Display for FrameClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idr => write!(f, "IDR"),
            Self::I => write!(f, "I"),
            Self::P => write!(f, "P"),
            Self::B => write!(f, "B"),
        }
    }
}

/// One unit of compressed output read back from the device
#[derive(Debug, Clone)]
pub struct DeviceOutput {
    /// Compressed payload
    pub data: Bytes,
    /// Presentation index read back from the surface property
    pub presentation_index: u64,
    /// Frame class reported by the device
    pub class: FrameClass,
}

/// Outcome of a submission that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The device took the surface
    Accepted,
    /// The device input queue is full; retry after draining output
    Full,
}

/// Outcome of an output query that did not fail
#[derive(Debug, Clone)]
pub enum OutputPoll {
    /// A packet is ready
    Ready(DeviceOutput),
    /// Nothing yet; the device wants more input first
    NeedsMoreInput,
    /// The device has been drained and will produce nothing more
    EndOfStream,
}

/// Frame rate as a rational number
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrameRate {
    /// Frames
    pub numerator: u32,
    /// Per this many seconds
    pub denominator: u32,
}

impl FrameRate {
    /// Integer frame rate
    pub const fn fps(fps: u32) -> Self {
        Self {
            numerator: fps,
            denominator: 1,
        }
    }

    /// Frames per second as a float
    pub fn as_f64(&self) -> f64 {
        if self.denominator == 0 {
            0.0
        } else {
            self.numerator as f64 / self.denominator as f64
        }
    }

    /// Duration of one frame
    pub fn frame_interval(&self) -> std::time::Duration {
        if self.numerator == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_nanos(
            1_000_000_000u64 * self.denominator as u64 / self.numerator as u64,
        )
    }

    /// Convert a frame count to microseconds
    pub fn frames_to_us(&self, frames: i64) -> i64 {
        if self.numerator == 0 {
            return 0;
        }
        frames * 1_000_000 * self.denominator as i64 / self.numerator as i64
    }

    /// Whether both terms are non-zero
    pub fn is_valid(&self) -> bool {
        self.numerator > 0 && self.denominator > 0
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::fps(30)
    }
}

impl std::fmt::Display for FrameRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Parameters passed to [`EncoderDevice::init`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceParams {
    /// Surface layout the device will receive
    pub format: SurfaceFormat,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Nominal frame rate
    pub frame_rate: FrameRate,
    /// Consecutive B-frames between anchors
    pub b_frames: u32,
    /// Rate control settings resolved from the quality preset
    pub rate_control: RateControlProfile,
}

/// Unified encoder device interface
#[cfg_attr(test, mockall::automock)]
pub trait EncoderDevice: Send + Sync {
    /// Initialize the device for a stream
    fn init(&self, params: &DeviceParams) -> DeviceResult<()>;

    /// Re-initialize for a new resolution, keeping other parameters
    fn reinit(&self, width: u32, height: u32) -> DeviceResult<()>;

    /// Hand a surface to the device
    ///
    /// `Ok(Submission::Full)` means the surface was not taken and the same
    /// frame should be offered again later.
    fn submit(&self, surface: Surface) -> DeviceResult<Submission>;

    /// Poll for completed output
    fn query_output(&self) -> DeviceResult<OutputPoll>;

    /// Signal end of input; pending frames are flushed to output and the
    /// device reports `EndOfStream` once they have been read
    fn drain_and_flush(&self) -> DeviceResult<()>;

    /// Codec header (parameter sets), available after `init()`
    fn extra_data(&self) -> Option<Bytes>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// The device and conversion stage a session runs on
///
/// Constructed explicitly and moved into the session; its lifetime is the
/// session's lifetime.
#[derive(Clone)]
pub struct DeviceContext {
    /// Encoder device
    pub device: Arc<dyn EncoderDevice>,
    /// Color conversion stage
    pub converter: Arc<dyn ColorConverter>,
}

impl DeviceContext {
    /// Bundle a device with a converter
    pub fn new(device: Arc<dyn EncoderDevice>, converter: Arc<dyn ColorConverter>) -> Self {
        Self { device, converter }
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("device", &self.device.backend_name())
            .field("converter", &self.converter.name())
            .finish()
    }
}
