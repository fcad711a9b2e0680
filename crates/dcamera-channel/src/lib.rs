//! Session channel for the distributed camera data path
//!
//! This crate provides:
//! - The 21-byte fragmentation header and send-side fragmentation
//! - Receive-side reassembly
//! - Transport abstractions (AsyncReader/AsyncWriter traits)
//! - TCP, Unix socket and in-memory transports
//! - Sessions with a background receive task per connection
//! - The JSON control command envelope

pub mod frame;
pub mod memory;
pub mod protocol;
pub mod reassembly;
pub mod session;
pub mod tcp;
pub mod transport;
#[cfg(unix)]
pub mod unix;

pub use frame::{FragFlag, FrameHeader, HEADER_LEN, MAX_PACKET_LEN, MAX_TOTAL_LEN, fragment};
pub use memory::memory_pair;
pub use protocol::{
    ChannelDetail, ChannelNegotiation, CommandKind, CommandName, DCameraCommand, StateEvent,
    deserialize, serialize,
};
pub use reassembly::Reassembler;
pub use session::{
    ChannelEvent, SessionConfig, SessionFlag, SessionMode, SoftbusSession, session_name,
};
pub use transport::{AsyncReader, AsyncWriter};
