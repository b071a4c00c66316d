//! Error types for the encode session

use thiserror::Error;

use super::session::SessionState;
use crate::encoder::{DeviceError, PropertyError};
use crate::video::converter::ConversionError;

/// Condition that ends a running session
///
/// Recorded once by whichever worker hits it and returned by every later
/// `submit()`/`retrieve()` until the host calls `stop()`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionFault {
    /// The device reported a fatal error
    #[error("Encoder device failed: {0}")]
    Device(#[from] DeviceError),

    /// The device ended the stream without a drain request
    #[error("Encoder device reported end of stream unexpectedly")]
    UnexpectedEndOfStream,

    /// No frame was accepted within the startup window
    #[error("No frame accepted within {timeout_ms}ms of the first submission")]
    StartupTimeout { timeout_ms: u64 },

    /// A worker thread panicked
    #[error("Worker '{worker}' panicked")]
    WorkerPanicked { worker: &'static str },
}

/// Errors returned by [`EncodeSession`](super::EncodeSession) operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// The operation is not valid in the current state
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// A session property could not be resolved
    #[error("Invalid session property: {0}")]
    Property(#[from] PropertyError),

    /// The conversion target was rejected
    #[error("Invalid conversion target: {0}")]
    Conversion(#[from] ConversionError),

    /// `device.init()` or `device.reinit()` failed
    #[error("Device initialization failed: {0}")]
    DeviceInit(#[source] DeviceError),

    /// The session has a recorded fault
    #[error("Session fault: {0}")]
    Fatal(#[from] SessionFault),

    /// A worker did not exit within the join timeout
    #[error("Worker '{worker}' did not stop within {timeout_ms}ms")]
    WorkerJoinTimeout {
        worker: &'static str,
        timeout_ms: u64,
    },

    /// Extra data was requested before the device was initialized
    #[error("Codec extra data not available before the device is initialized")]
    ExtraDataNotReady,

    /// A worker thread could not be spawned
    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    /// Invalid session configuration
    #[error("Invalid session configuration: {0}")]
    Config(String),
}

impl SessionError {
    /// Whether the session can no longer encode and must be stopped
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Fatal(_)
                | SessionError::WorkerJoinTimeout { .. }
                | SessionError::ThreadSpawn(_)
        )
    }

    /// The recorded fault, if this error carries one
    pub fn fault(&self) -> Option<&SessionFault> {
        match self {
            SessionError::Fatal(fault) => Some(fault),
            _ => None,
        }
    }
}

/// Why a frame was not queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// FrameQueue stayed full for the whole backoff window
    QueueFull,
    /// The session is reconfiguring
    Reconfiguring,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QueueFull => write!(f, "frame queue full"),
            Self::Reconfiguring => write!(f, "session reconfiguring"),
        }
    }
}

/// Errors returned by [`EncodeSession::submit`](super::EncodeSession::submit)
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The frame was dropped; the session keeps running
    #[error("Frame {presentation_index} dropped ({reason}, queue depth {queue_depth})")]
    Dropped {
        presentation_index: u64,
        queue_depth: usize,
        reason: DropReason,
    },

    /// The frame's presentation index does not follow the previous one
    #[error("Non-sequential presentation index: expected {expected}, got {got}")]
    NonSequential { expected: u64, got: u64 },

    /// The session cannot take frames
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl SubmitError {
    /// Check if the host can keep submitting after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SubmitError::Dropped { .. } | SubmitError::NonSequential { .. }
        )
    }
}

impl From<SessionFault> for SubmitError {
    fn from(fault: SessionFault) -> Self {
        SubmitError::Session(SessionError::Fatal(fault))
    }
}
