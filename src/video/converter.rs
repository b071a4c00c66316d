//! Color conversion stage
//!
//! Converts host frames into the device-native surface layout (NV12 or I420)
//! before submission. The [`ColorConverter`] trait is the opaque conversion
//! capability; [`SoftwareConverter`] is the scalar CPU implementation and
//! [`ConversionAdapter`] is what the submit worker calls.
//!
//! # Color Space Standards
//!
//! - **BT.709**: ITU-R Rec. 709 for HD content (1280x720 and above)
//! - **BT.601**: ITU-R Rec. 601 for SD content
//!
//! Coefficients are 16.16 fixed point. Limited range output is scaled to
//! Y: 16-235, UV: 16-240 after the full-range transform.

use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

use crate::encoder::{Surface, SurfaceFormat};
use crate::video::frame::{Frame, PixelFormat, Plane};

/// Color matrix standard for RGB to YUV conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMatrix {
    /// ITU-R BT.601
    /// Y =  0.299  R + 0.587  G + 0.114  B
    BT601,
    /// ITU-R BT.709
    /// Y =  0.2126 R + 0.7152 G + 0.0722 B
    #[default]
    BT709,
}

impl ColorMatrix {
    /// Auto-select color matrix based on resolution
    ///
    /// BT.709 when width >= 1280 AND height >= 720, BT.601 otherwise.
    #[inline]
    pub fn auto_select(width: u32, height: u32) -> Self {
        if width >= 1280 && height >= 720 {
            Self::BT709
        } else {
            Self::BT601
        }
    }

    /// Parse a configuration value; "auto" resolves against the resolution
    pub fn from_setting(setting: &str, width: u32, height: u32) -> Option<Self> {
        match setting.to_lowercase().as_str() {
            "auto" => Some(Self::auto_select(width, height)),
            "bt601" | "601" => Some(Self::BT601),
            "bt709" | "709" => Some(Self::BT709),
            _ => None,
        }
    }

    /// (Kr, Kg, Kb) scaled by 65536
    #[inline]
    const fn y_coefficients_fixed(&self) -> (i32, i32, i32) {
        match self {
            Self::BT601 => (19595, 38470, 7471),
            Self::BT709 => (13933, 46871, 4732),
        }
    }

    /// U = -0.5*Kr/(1-Kb)*R - 0.5*Kg/(1-Kb)*G + 0.5*B + 128
    #[inline]
    const fn u_coefficients_fixed(&self) -> (i32, i32, i32) {
        match self {
            Self::BT601 => (-11056, -21712, 32768),
            Self::BT709 => (-7508, -25260, 32768),
        }
    }

    /// V = 0.5*R - 0.5*Kg/(1-Kr)*G - 0.5*Kb/(1-Kr)*B + 128
    #[inline]
    const fn v_coefficients_fixed(&self) -> (i32, i32, i32) {
        match self {
            Self::BT601 => (32768, -27440, -5328),
            Self::BT709 => (32768, -29764, -3004),
        }
    }
}

/// Quantization range of the YUV output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorRange {
    /// Y: 16-235, UV: 16-240
    #[default]
    Limited,
    /// Y, UV: 0-255
    Full,
}

impl ColorRange {
    /// Parse a configuration value
    pub fn from_setting(setting: &str) -> Option<Self> {
        match setting.to_lowercase().as_str() {
            "limited" | "tv" | "partial" => Some(Self::Limited),
            "full" | "pc" | "jpeg" => Some(Self::Full),
            _ => None,
        }
    }
}

/// What the device expects surfaces to look like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionTarget {
    /// Device-native surface layout
    pub format: SurfaceFormat,
    /// Surface width in pixels
    pub width: u32,
    /// Surface height in pixels
    pub height: u32,
    /// RGB to YUV matrix
    pub matrix: ColorMatrix,
    /// Output quantization range
    pub range: ColorRange,
}

impl ConversionTarget {
    /// Check the target is representable as a 4:2:0 surface
    pub fn validate(&self) -> Result<(), ConversionError> {
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ConversionError::InvalidTarget {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

/// Per-frame conversion failures (never fatal to the session)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Unsupported conversion: {from} -> {to:?}")]
    UnsupportedFormat { from: PixelFormat, to: SurfaceFormat },

    #[error("Frame is {frame_width}x{frame_height}, surface is {target_width}x{target_height}")]
    DimensionMismatch {
        frame_width: u32,
        frame_height: u32,
        target_width: u32,
        target_height: u32,
    },

    #[error("Invalid surface target {width}x{height} (must be non-zero and even)")]
    InvalidTarget { width: u32, height: u32 },

    #[error("Invalid plane layout: {0}")]
    PlaneLayout(String),

    #[error("Conversion backend failed: {0}")]
    Backend(String),
}

/// Opaque color conversion capability
///
/// Implementations allocate a new surface per call and keep no reference to
/// the frame. The presentation index on the returned surface is overwritten
/// by [`ConversionAdapter`].
#[cfg_attr(test, mockall::automock)]
pub trait ColorConverter: Send + Sync {
    /// Convert one frame into the target layout
    fn convert(&self, frame: &Frame, target: &ConversionTarget) -> Result<Surface, ConversionError>;

    /// Backend name for logging
    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Scalar CPU converter
///
/// Supports BGRA/RGBA (color transform + 2x2 chroma averaging) and NV12/I420
/// (plane repacking; input is assumed to already use the target matrix and
/// range).
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareConverter;

impl SoftwareConverter {
    /// Create a converter
    pub fn new() -> Self {
        Self
    }

    fn rgb_to_planes(frame: &Frame, target: &ConversionTarget) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let w = target.width as usize;
        let h = target.height as usize;
        let (cw, ch) = (w / 2, h / 2);
        let src = &frame.planes[0];

        let (yr, yg, yb) = target.matrix.y_coefficients_fixed();
        let (ur, ug, ub) = target.matrix.u_coefficients_fixed();
        let (vr, vg, vb) = target.matrix.v_coefficients_fixed();
        let limited = target.range == ColorRange::Limited;

        let rgb = |px: &[u8]| -> (i32, i32, i32) {
            match frame.format {
                PixelFormat::Rgba => (px[0] as i32, px[1] as i32, px[2] as i32),
                _ => (px[2] as i32, px[1] as i32, px[0] as i32),
            }
        };

        let mut y_plane = vec![0u8; w * h];
        let mut u_plane = vec![128u8; cw * ch];
        let mut v_plane = vec![128u8; cw * ch];

        for cy in 0..ch {
            let rows = [src.row(cy * 2, w * 4), src.row(cy * 2 + 1, w * 4)];
            for cx in 0..cw {
                let mut sum = (0i32, 0i32, 0i32);
                for (dy, row) in rows.iter().enumerate() {
                    for dx in 0..2 {
                        let x = cx * 2 + dx;
                        let (r, g, b) = rgb(&row[x * 4..x * 4 + 4]);
                        let luma = (yr * r + yg * g + yb * b + 32768) >> 16;
                        y_plane[(cy * 2 + dy) * w + x] = quantize_luma(luma, limited);
                        sum.0 += r;
                        sum.1 += g;
                        sum.2 += b;
                    }
                }
                let (r, g, b) = ((sum.0 + 2) / 4, (sum.1 + 2) / 4, (sum.2 + 2) / 4);
                let u = ((ur * r + ug * g + ub * b + 32768) >> 16) + 128;
                let v = ((vr * r + vg * g + vb * b + 32768) >> 16) + 128;
                u_plane[cy * cw + cx] = quantize_chroma(u, limited);
                v_plane[cy * cw + cx] = quantize_chroma(v, limited);
            }
        }

        (y_plane, u_plane, v_plane)
    }

    fn yuv_to_planes(frame: &Frame, target: &ConversionTarget) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let w = target.width as usize;
        let h = target.height as usize;
        let (cw, ch) = (w / 2, h / 2);

        let mut y_plane = Vec::with_capacity(w * h);
        for y in 0..h {
            y_plane.extend_from_slice(frame.planes[0].row(y, w));
        }

        let mut u_plane = Vec::with_capacity(cw * ch);
        let mut v_plane = Vec::with_capacity(cw * ch);
        match frame.format {
            PixelFormat::Nv12 => {
                for y in 0..ch {
                    let row = frame.planes[1].row(y, cw * 2);
                    for pair in row.chunks_exact(2) {
                        u_plane.push(pair[0]);
                        v_plane.push(pair[1]);
                    }
                }
            }
            _ => {
                for y in 0..ch {
                    u_plane.extend_from_slice(frame.planes[1].row(y, cw));
                    v_plane.extend_from_slice(frame.planes[2].row(y, cw));
                }
            }
        }

        (y_plane, u_plane, v_plane)
    }
}

#[inline]
fn quantize_luma(full: i32, limited: bool) -> u8 {
    let full = full.clamp(0, 255);
    if limited {
        (16 + (full * 219 + 127) / 255) as u8
    } else {
        full as u8
    }
}

#[inline]
fn quantize_chroma(full: i32, limited: bool) -> u8 {
    let full = full.clamp(0, 255);
    if limited {
        (128 + ((full - 128) * 224) / 255) as u8
    } else {
        full as u8
    }
}

impl ColorConverter for SoftwareConverter {
    fn convert(&self, frame: &Frame, target: &ConversionTarget) -> Result<Surface, ConversionError> {
        target.validate()?;
        frame
            .validate_layout()
            .map_err(ConversionError::PlaneLayout)?;

        let (y, u, v) = if frame.format.is_rgb() {
            Self::rgb_to_planes(frame, target)
        } else {
            Self::yuv_to_planes(frame, target)
        };

        let w = target.width as usize;
        let planes = match target.format {
            SurfaceFormat::Nv12 => {
                let mut uv = Vec::with_capacity(u.len() * 2);
                for (cb, cr) in u.iter().zip(v.iter()) {
                    uv.push(*cb);
                    uv.push(*cr);
                }
                vec![Plane::new(y, w), Plane::new(uv, w)]
            }
            SurfaceFormat::I420 => vec![
                Plane::new(y, w),
                Plane::new(u, w / 2),
                Plane::new(v, w / 2),
            ],
        };

        Ok(Surface {
            presentation_index: frame.presentation_index,
            width: target.width,
            height: target.height,
            format: target.format,
            matrix: target.matrix,
            range: target.range,
            planes,
        })
    }

    fn name(&self) -> &'static str {
        "software"
    }
}

/// Wraps the conversion stage for the submit worker
///
/// Holds the only mutable state of the stage: the target, which changes only
/// during session reconfiguration.
pub struct ConversionAdapter {
    converter: Arc<dyn ColorConverter>,
    target: RwLock<ConversionTarget>,
}

impl ConversionAdapter {
    /// Create an adapter for a validated target
    pub fn new(
        converter: Arc<dyn ColorConverter>,
        target: ConversionTarget,
    ) -> Result<Self, ConversionError> {
        target.validate()?;
        Ok(Self {
            converter,
            target: RwLock::new(target),
        })
    }

    /// Convert a frame, attaching its presentation index to the surface
    pub fn convert(&self, frame: &Frame) -> Result<Surface, ConversionError> {
        let target = *self.target.read();

        if frame.width != target.width || frame.height != target.height {
            return Err(ConversionError::DimensionMismatch {
                frame_width: frame.width,
                frame_height: frame.height,
                target_width: target.width,
                target_height: target.height,
            });
        }

        let mut surface = self.converter.convert(frame, &target)?;
        surface.presentation_index = frame.presentation_index;

        trace!(
            "Converted frame {} {} -> {:?} via {}",
            frame.presentation_index,
            frame.format,
            target.format,
            self.converter.name()
        );

        Ok(surface)
    }

    /// Replace the target (reconfiguration only)
    pub fn set_target(&self, target: ConversionTarget) -> Result<(), ConversionError> {
        target.validate()?;
        *self.target.write() = target;
        Ok(())
    }

    /// Current target
    pub fn target(&self) -> ConversionTarget {
        *self.target.read()
    }
}
