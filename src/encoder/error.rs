//! Error types for the encoder device boundary
//!
//! Expected device conditions ("full", "needs more input") are not errors;
//! they are variants of [`Submission`](super::Submission) and
//! [`OutputPoll`](super::OutputPoll). Everything in [`DeviceError`] ends the
//! session.

use thiserror::Error;

/// Fatal error reported by an encoder device
///
/// Cloneable so a recorded fault can be reported to the host on every
/// subsequent call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    // =========================================================================
    // Initialization Errors
    // =========================================================================
    /// No device backend matches the configuration
    #[error("No encoder backend available: {reason}")]
    NoBackendAvailable { reason: String },

    /// Failed to initialize the encoder context
    #[error("Encoder initialization failed: {0}")]
    InitFailed(String),

    /// The requested configuration is not supported by the device
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfig(String),

    /// Invalid frame dimensions for init/reinit
    #[error("Invalid dimensions: {width}x{height} - {reason}")]
    InvalidDimensions {
        width: u32,
        height: u32,
        reason: String,
    },

    /// An operation was issued before `init()`
    #[error("Device not initialized")]
    NotInitialized,

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    /// Submission failed for a reason other than a full input queue
    #[error("Submit failed: {0}")]
    SubmitFailed(String),

    /// Output query failed
    #[error("Output query failed: {0}")]
    QueryFailed(String),

    /// Drain/flush failed
    #[error("Drain failed: {0}")]
    DrainFailed(String),

    /// The device went away (reset, driver crash, hot unplug)
    #[error("Device lost: {0}")]
    DeviceLost(String),
}

impl DeviceError {
    /// Check if this error happened while bringing the device up
    pub fn is_init_error(&self) -> bool {
        matches!(
            self,
            DeviceError::NoBackendAvailable { .. }
                | DeviceError::InitFailed(_)
                | DeviceError::UnsupportedConfig(_)
                | DeviceError::InvalidDimensions { .. }
        )
    }
}

/// Result type for encoder device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors from the typed property tables
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PropertyError {
    /// The value is not a known name for this property
    #[error("Unknown {property} value: {value} (valid: {valid})")]
    UnknownValue {
        property: &'static str,
        value: String,
        valid: String,
    },

    /// The value parsed, but the table has no entry for it
    #[error("Unsupported {property} value: {value}")]
    Unsupported {
        property: &'static str,
        value: String,
    },
}
