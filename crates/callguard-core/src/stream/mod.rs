//! Stream sessions and the duplex send/receive coordinator.
//!
//! Once a transport stream is open, the coordinator owns it:
//! ```text
//! outbound ─▶ [send task] ─▶ StreamSender
//! StreamReceiver ─▶ [receive task] ─▶ DuplexCall::next
//!                   both ─▶ DuplexCall::join
//! ```

pub mod duplex;
pub mod session;

pub use duplex::{DuplexCall, DuplexCoordinator};
pub use session::{FinishHook, StreamSession, StreamSummary};
