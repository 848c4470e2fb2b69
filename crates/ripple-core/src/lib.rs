//! ripple-core: Message model and stream reassembly
//!
//! This crate holds everything about a chat session that does not touch the
//! network: the message timeline, the JSON wire protocol, and the reassembler
//! that folds streamed bot replies into timeline entries.

pub mod error;
pub mod protocol;
pub mod stream;
pub mod timeline;
pub mod types;

pub use error::{Error, Result};
pub use protocol::{InboundFrame, OutboundFrame};
pub use stream::{Applied, ReassemblyStats, StreamReassembler};
pub use timeline::Timeline;
pub use types::*;
