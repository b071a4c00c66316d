//! Raw host frames
//!
//! A [`Frame`] is one presentation-ordered image supplied by the host
//! application. Plane buffers are [`Bytes`], so queueing and peeking a frame
//! clones reference counts rather than pixel data.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Host pixel formats accepted by the conversion stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 32-bit packed B, G, R, A
    Bgra,
    /// 32-bit packed R, G, B, A
    Rgba,
    /// Planar Y + interleaved UV (4:2:0)
    Nv12,
    /// Planar Y + U + V (4:2:0)
    I420,
}

impl PixelFormat {
    /// Number of planes a frame of this format carries
    pub fn plane_count(&self) -> usize {
        match self {
            Self::Bgra | Self::Rgba => 1,
            Self::Nv12 => 2,
            Self::I420 => 3,
        }
    }

    /// Minimum row length in bytes and row count for a plane
    ///
    /// Returns `None` if `plane` is out of range for the format.
    pub fn plane_extent(&self, plane: usize, width: u32, height: u32) -> Option<(usize, usize)> {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        match (self, plane) {
            (Self::Bgra | Self::Rgba, 0) => Some((w * 4, h)),
            (Self::Nv12 | Self::I420, 0) => Some((w, h)),
            (Self::Nv12, 1) => Some((cw * 2, ch)),
            (Self::I420, 1 | 2) => Some((cw, ch)),
            _ => None,
        }
    }

    /// Whether the format is a packed RGB variant
    pub fn is_rgb(&self) -> bool {
        matches!(self, Self::Bgra | Self::Rgba)
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bgra => write!(f, "BGRA"),
            Self::Rgba => write!(f, "RGBA"),
            Self::Nv12 => write!(f, "NV12"),
            Self::I420 => write!(f, "I420"),
        }
    }
}

/// One image plane
#[derive(Debug, Clone)]
pub struct Plane {
    /// Plane bytes, `stride * rows` or longer
    pub data: Bytes,

    /// Bytes per row, including padding
    pub stride: usize,
}

impl Plane {
    /// Create a plane from owned bytes
    pub fn new(data: impl Into<Bytes>, stride: usize) -> Self {
        Self {
            data: data.into(),
            stride,
        }
    }

    /// Row `y` of the plane, `len` bytes wide
    #[inline]
    pub(crate) fn row(&self, y: usize, len: usize) -> &[u8] {
        let start = y * self.stride;
        &self.data[start..start + len]
    }
}

/// Raw frame supplied by the host
#[derive(Debug, Clone)]
pub struct Frame {
    /// Presentation index (frame number), strictly increasing by one
    pub presentation_index: u64,

    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Pixel format of `planes`
    pub format: PixelFormat,

    /// Plane buffers in format order
    pub planes: Vec<Plane>,
}

impl Frame {
    /// Create a frame from explicit planes
    pub fn new(
        presentation_index: u64,
        width: u32,
        height: u32,
        format: PixelFormat,
        planes: Vec<Plane>,
    ) -> Self {
        Self {
            presentation_index,
            width,
            height,
            format,
            planes,
        }
    }

    /// Create a packed BGRA frame with a tight stride
    pub fn bgra(presentation_index: u64, width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        let stride = width as usize * 4;
        Self::new(
            presentation_index,
            width,
            height,
            PixelFormat::Bgra,
            vec![Plane::new(data, stride)],
        )
    }

    /// Total bytes referenced by all planes
    pub fn byte_len(&self) -> usize {
        self.planes.iter().map(|p| p.data.len()).sum()
    }

    /// Check that plane count, strides and buffer lengths cover the image
    pub fn validate_layout(&self) -> Result<(), String> {
        if self.planes.len() != self.format.plane_count() {
            return Err(format!(
                "{} expects {} planes, got {}",
                self.format,
                self.format.plane_count(),
                self.planes.len()
            ));
        }

        for (i, plane) in self.planes.iter().enumerate() {
            let (row_len, rows) = self
                .format
                .plane_extent(i, self.width, self.height)
                .ok_or_else(|| format!("plane {} out of range", i))?;
            if plane.stride < row_len {
                return Err(format!(
                    "plane {} stride {} shorter than row ({} bytes)",
                    i, plane.stride, row_len
                ));
            }
            let needed = plane.stride * rows.saturating_sub(1) + row_len;
            if plane.data.len() < needed {
                return Err(format!(
                    "plane {} holds {} bytes, need {}",
                    i,
                    plane.data.len(),
                    needed
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_extent_nv12_odd_size() {
        assert_eq!(PixelFormat::Nv12.plane_extent(0, 5, 3), Some((5, 3)));
        assert_eq!(PixelFormat::Nv12.plane_extent(1, 5, 3), Some((6, 2)));
        assert_eq!(PixelFormat::Nv12.plane_extent(2, 5, 3), None);
    }

    #[test]
    fn test_bgra_frame_layout() {
        let frame = Frame::bgra(7, 4, 2, vec![0u8; 32]);
        assert_eq!(frame.presentation_index, 7);
        assert_eq!(frame.planes[0].stride, 16);
        assert!(frame.validate_layout().is_ok());
    }

    #[test]
    fn test_layout_rejects_short_buffer() {
        let frame = Frame::bgra(0, 4, 2, vec![0u8; 31]);
        let err = frame.validate_layout().unwrap_err();
        assert!(err.contains("need 32"));
    }

    #[test]
    fn test_layout_rejects_plane_count() {
        let frame = Frame::new(0, 4, 4, PixelFormat::I420, vec![Plane::new(vec![0u8; 16], 4)]);
        assert!(frame.validate_layout().is_err());
    }

    #[test]
    fn test_padded_stride_accepted() {
        // 4x2 BGRA with 32-byte rows: last row needs only 16 bytes
        let frame = Frame::new(
            0,
            4,
            2,
            PixelFormat::Bgra,
            vec![Plane::new(vec![0u8; 48], 32)],
        );
        assert!(frame.validate_layout().is_ok());
        assert_eq!(frame.byte_len(), 48);
    }
}
