//! Protocol module containing the control-channel message types and codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_inbound, encode_outbound, ProtocolError};
pub use messages::*;
