//! # can-relay-core
//!
//! Shared library for the CAN relay containing the frame model, value
//! parsing helpers, and the wire codec spoken between the relay server and
//! its remote clients.
//!
//! This crate is used by both the server and client applications.
//! It has zero dependencies on sockets, async runtimes, or CAN drivers.
//!
//! # Architecture overview
//!
//! The relay makes a local CAN bus observable and drivable from another
//! machine.  A server process owns the bus, fans every received frame out to
//! all connected TCP clients, and injects "send frame" commands from any
//! client onto the bus.
//!
//! - **`domain`** – The [`Frame`] type with its id/length limits, plus the
//!   hex/binary/decimal value parsing used by commands and CLI arguments.
//!
//! - **`protocol`** – The newline-delimited JSON records on the wire: typed
//!   [`Command`]s (client → server) and [`Event`]s (server → client), the
//!   codec that maps them to bytes, and a [`LineFramer`] that splits a byte
//!   stream into records.

pub mod domain;
pub mod protocol;

pub use domain::frame::{
    Direction, Frame, FrameError, EXTENDED_ID_MAX, MAX_DATA_LEN, STANDARD_ID_MAX,
};
pub use domain::value::{parse_byte_list, parse_details, parse_value, ValueError};
pub use protocol::codec::{decode_record, encode_command, encode_event, ProtocolError};
pub use protocol::framing::{LineFramer, MAX_RECORD_LEN};
pub use protocol::messages::{Command, Event, WireMessage};
