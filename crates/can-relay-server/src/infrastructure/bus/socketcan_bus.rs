//! Linux SocketCAN adapter.
//!
//! The socket is opened non-blocking so `poll` can return immediately.
//! SocketCAN has no per-socket bitrate: the link rate is set with
//! `ip link set <iface> type can bitrate N`, so the value passed to
//! `connect` is only recorded for logging.

use std::io;

use can_relay_core::{Direction, Frame, EXTENDED_ID_MAX};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Id, Socket, StandardId};
use tracing::{debug, info};

use super::{BusAdapter, BusError};

/// A CAN interface backed by a raw `PF_CAN` socket.
#[derive(Debug, Default)]
pub struct SocketCanBus {
    socket: Option<CanSocket>,
    channel: String,
}

impl SocketCanBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BusAdapter for SocketCanBus {
    fn connect(&mut self, channel: &str, bitrate: u32) -> Result<(), BusError> {
        self.socket = None;
        let failed = |e: io::Error| BusError::ConnectFailed {
            channel: channel.to_string(),
            bitrate,
            reason: e.to_string(),
        };
        let socket = CanSocket::open(channel).map_err(failed)?;
        socket.set_nonblocking(true).map_err(failed)?;
        info!(channel, bitrate, "SocketCAN interface opened");
        self.socket = Some(socket);
        self.channel = channel.to_string();
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), BusError> {
        if self.socket.take().is_some() {
            debug!(channel = %self.channel, "SocketCAN interface closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn max_id(&self) -> u32 {
        EXTENDED_ID_MAX
    }

    fn send(&mut self, id: u32, data: &[u8]) -> Result<(), BusError> {
        let socket = self.socket.as_ref().ok_or(BusError::NotConnected)?;
        let frame = CanFrame::new(to_socketcan_id(id)?, data)
            .ok_or_else(|| BusError::Driver(format!("cannot build frame 0x{id:X}")))?;
        socket.write_frame(&frame).map_err(io_to_bus)
    }

    fn poll(&mut self) -> Result<Option<Frame>, BusError> {
        let socket = self.socket.as_ref().ok_or(BusError::NotConnected)?;
        let frame = match socket.read_frame() {
            Ok(frame) => frame,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(io_to_bus(e)),
        };
        if let CanFrame::Error(err) = frame {
            return Err(BusError::Driver(format!("error frame: {}", err.into_error())));
        }
        let id = match frame.id() {
            Id::Standard(id) => u32::from(id.as_raw()),
            Id::Extended(id) => id.as_raw(),
        };
        Frame::new(id, frame.data().to_vec(), Direction::Rx)
            .map(Some)
            .map_err(|e| BusError::Driver(e.to_string()))
    }
}

fn to_socketcan_id(id: u32) -> Result<Id, BusError> {
    let out_of_range = || BusError::Driver(format!("id 0x{id:X} out of range"));
    if id <= u32::from(StandardId::MAX.as_raw()) {
        let raw = u16::try_from(id).map_err(|_| out_of_range())?;
        StandardId::new(raw).map(Id::Standard).ok_or_else(out_of_range)
    } else {
        ExtendedId::new(id).map(Id::Extended).ok_or_else(out_of_range)
    }
}

fn io_to_bus(e: io::Error) -> BusError {
    if is_interface_gone(&e) {
        BusError::Disconnected(e.to_string())
    } else {
        BusError::Driver(e.to_string())
    }
}

/// The interface was removed or taken down.
fn is_interface_gone(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::ENODEV) | Some(libc::ENETDOWN))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
