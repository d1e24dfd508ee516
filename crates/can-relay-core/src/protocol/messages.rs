//! Typed records exchanged between relay server and relay clients.
//!
//! The wire carries loosely-typed JSON objects; this module is the closed set
//! of variants they are decoded into.  Adding a new command means adding a
//! variant here and a `cmd` tag in [`crate::protocol::codec`].

use crate::domain::frame::Frame;

/// `cmd` tag of a send-frame command.
pub const CMD_SEND_MESSAGE: &str = "send_message";

/// `cmd` tag of a bus-reconfiguration command.
pub const CMD_CHANGE_CAN: &str = "change_can";

/// A client → server request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Inject one frame onto the bus.
    ///
    /// `id` and `data` are not range-checked here; the server validates them
    /// against its adapter before transmitting.
    SendFrame { id: u32, data: Vec<u8> },

    /// Reconnect the bus on a different channel and/or bitrate.
    ChangeBus { channel: String, bitrate: u32 },
}

impl Command {
    /// The wire `cmd` tag for this command.
    pub fn tag(&self) -> &'static str {
        match self {
            Command::SendFrame { .. } => CMD_SEND_MESSAGE,
            Command::ChangeBus { .. } => CMD_CHANGE_CAN,
        }
    }
}

/// A server → client notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A frame seen on the bus, received (`rx`) or transmitted (`tx`).
    Frame(Frame),
}

/// Any record that can appear on the wire, in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Command(Command),
    Event(Event),
}

impl From<Command> for WireMessage {
    fn from(cmd: Command) -> Self {
        WireMessage::Command(cmd)
    }
}

impl From<Event> for WireMessage {
    fn from(event: Event) -> Self {
        WireMessage::Event(event)
    }
}
