//! Raw frames and color conversion
//!
//! Host frames arrive in packed RGB or planar YUV and are converted to the
//! device surface layout by the [`converter`] stage before submission.

pub mod converter;
pub mod frame;

pub use converter::{
    ColorConverter, ColorMatrix, ColorRange, ConversionAdapter, ConversionError,
    ConversionTarget, SoftwareConverter,
};
pub use frame::{Frame, PixelFormat, Plane};
