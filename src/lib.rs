//! # lamco-encode-session
//!
//! Asynchronous encode session pipeline for hardware video encoders.
//!
//! A host submits raw frames and retrieves encoded packets without ever
//! blocking on the device. Two worker threads sit between the host and an
//! [`encoder::EncoderDevice`]:
//!
//! ```text
//! host ──submit──> FrameQueue ──> encode-submit ──> device
//!                                                     │
//! host <─retrieve── PacketQueue <── encode-retrieve <─┘
//! ```
//!
//! - [`pipeline`] - session lifecycle, workers, queues, fault propagation
//! - [`encoder`] - device abstraction, backend factory, property tables
//! - [`video`] - frame types and color conversion
//! - [`config`] - TOML configuration
//!
//! # Example
//!
//! ```no_run
//! use lamco_encode_session::config::Config;
//! use lamco_encode_session::encoder::create_device_context;
//! use lamco_encode_session::pipeline::EncodeSession;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::default_config()?;
//! let ctx = create_device_context(&config.device)?;
//! let session = EncodeSession::new(config.session.clone(), ctx)?;
//! session.start()?;
//! // session.submit(frame)?; session.retrieve()?; ...
//! session.stop()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Session configuration
pub mod config;

/// Encoder device abstraction and backends
pub mod encoder;

/// Encode session pipeline
pub mod pipeline;

/// Utility functions
pub mod utils;

/// Raw frames and color conversion
pub mod video;

pub use pipeline::{EncodeSession, EncodedPacket, SessionError, SessionState, SubmitError};
