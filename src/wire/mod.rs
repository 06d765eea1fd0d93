//! Binary encoding of the channel protocol messages.
//!
//! Every message is a 2-byte big-endian type tag, its fixed fields in order,
//! and an optional trailing stream of extension records.

pub mod codec;
pub mod messages;
pub mod tlv;

pub use codec::{Reader, Writer};
pub use messages::*;
pub use tlv::{TlvRecord, TlvStream};
