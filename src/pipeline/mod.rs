//! Encode session pipeline
//!
//! Two worker threads sit between the host and the encoder device:
//!
//! ```text
//!  host submit() ──> FrameQueue ──> [encode-submit] ──convert──> device.submit()
//!                                        ▲    │ wake
//!                                   wake │    ▼
//!  host retrieve() <── PacketQueue <── [encode-retrieve] <── device.query_output()
//! ```
//!
//! A "device full" answer wakes the retrieve worker, and "needs more input"
//! wakes the submit worker, so each side unblocks the other. FrameQueue
//! preserves submission order; PacketQueue preserves decode order.

mod congestion;
mod error;
pub mod packet;
pub mod queue;
mod retrieve;
mod session;
pub mod signal;
mod submit;
mod worker;

pub use congestion::CongestionMonitor;
pub use error::{DropReason, SessionError, SessionFault, SubmitError};
pub use packet::{DecodeClock, EncodedPacket};
pub use queue::{BoundedQueue, FrameQueue, PacketQueue};
pub use retrieve::RETRIEVE_WORKER;
pub use session::{EncodeSession, SessionState};
pub use signal::{CancellationToken, WakeSignal};
pub use submit::SUBMIT_WORKER;
