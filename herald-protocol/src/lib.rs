//! herald-protocol: wire definitions shared by the herald server and clients
//!
//! Every event travels as one length-prefixed JSON frame holding a
//! [`Message`]. Inbound frames are surfaced as [`RawFrame`]s so that the
//! receiving dispatcher decides what to do with malformed input.

pub mod codec;
pub mod messages;

pub use codec::{CodecError, MessageCodec, MAX_FRAME_SIZE};
pub use messages::{actions, Message, RawFrame};
