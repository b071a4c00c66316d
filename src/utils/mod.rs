//! Utility Functions
//!
//! User-friendly error formatting for the command-line front end.
//!
//! ```rust,ignore
//! use lamco_encode_session::utils::format_user_error;
//!
//! if let Err(e) = run() {
//!     eprintln!("{}", format_user_error(&e));
//! }
//! ```
//!
//! Error categories with context-aware help:
//! - Device errors → backend names, stream parameter limits
//! - Startup and shutdown timeouts → the timeouts to raise
//! - Congestion → consumer pacing, queue capacity
//! - Config errors → syntax validation, valid values

pub mod errors;

pub use errors::format_user_error;
