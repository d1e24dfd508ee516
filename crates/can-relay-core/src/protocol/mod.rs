//! Protocol module containing the wire records, the JSON codec and the
//! newline framer.

pub mod codec;
pub mod framing;
pub mod messages;

pub use codec::{decode_record, encode_command, encode_event, ProtocolError};
pub use framing::{LineFramer, MAX_RECORD_LEN};
pub use messages::*;
