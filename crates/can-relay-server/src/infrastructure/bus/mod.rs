//! Bus adapters: the relay's view of a CAN interface.
//!
//! The relay never talks to a CAN driver directly.  It depends on the
//! [`BusAdapter`] trait, which has two implementations:
//!
//! - [`VirtualBus`] – an in-memory bus for tests, demos and machines without
//!   CAN hardware.  Its handle is cloneable so a test can inject received
//!   frames and inspect transmitted ones while the relay owns the adapter.
//! - `SocketCanBus` – Linux SocketCAN, behind the `socketcan` cargo feature
//!   (enabled by default).  It is the default adapter wherever it is built;
//!   the virtual bus must otherwise be asked for explicitly.
//!
//! # Thread safety
//!
//! Adapters are not required to be `Sync`.  The server wraps the single
//! adapter in a [`SharedBus`] (`Arc<Mutex<Box<dyn BusAdapter>>>`) and every
//! `poll` and `send` goes through that one mutex.  No call on the trait may
//! block for long: `poll` returns `Ok(None)` immediately when nothing is
//! pending.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use can_relay_core::Frame;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod virtual_bus;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan_bus;

pub use virtual_bus::VirtualBus;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub use socketcan_bus::SocketCanBus;

/// Errors reported by a bus adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    /// An operation was attempted before `connect` succeeded.
    #[error("bus is not connected")]
    NotConnected,

    /// The interface went away and will not come back without a reconnect.
    #[error("bus disconnected: {0}")]
    Disconnected(String),

    /// The interface could not be opened.
    #[error("failed to open {channel} at {bitrate} bit/s: {reason}")]
    ConnectFailed {
        channel: String,
        bitrate: u32,
        reason: String,
    },

    /// A transient driver failure (bus-off, TX buffer full, error frame).
    #[error("driver error: {0}")]
    Driver(String),

    /// The adapter kind is not available in this build.
    #[error("adapter '{0}' is not available in this build")]
    Unsupported(String),
}

/// A CAN interface the relay can poll and transmit on.
#[cfg_attr(test, mockall::automock)]
pub trait BusAdapter: Send {
    /// Opens `channel` at `bitrate` bit/s.  Reconnecting an open adapter
    /// closes the previous interface first.
    fn connect(&mut self, channel: &str, bitrate: u32) -> Result<(), BusError>;

    /// Closes the interface.  Closing a closed adapter is not an error.
    fn disconnect(&mut self) -> Result<(), BusError>;

    fn is_connected(&self) -> bool;

    /// Largest arbitration id this adapter can transmit.
    fn max_id(&self) -> u32;

    /// Transmits one frame.
    fn send(&mut self, id: u32, data: &[u8]) -> Result<(), BusError>;

    /// Returns the next received frame, or `Ok(None)` when nothing is pending.
    /// Never blocks.
    fn poll(&mut self) -> Result<Option<Frame>, BusError>;
}

/// The single serialization point for all access to the bus.
pub type SharedBus = Arc<Mutex<Box<dyn BusAdapter>>>;

/// Wraps an adapter for sharing between the forwarding loop and sessions.
pub fn shared(adapter: Box<dyn BusAdapter>) -> SharedBus {
    Arc::new(Mutex::new(adapter))
}

/// Locks the bus.  A panic while holding the lock does not leave the
/// adapter in a state we cannot keep using, so poisoning is ignored.
pub fn lock_bus(bus: &SharedBus) -> MutexGuard<'_, Box<dyn BusAdapter>> {
    bus.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Which adapter implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Virtual,
    Socketcan,
}

impl Default for AdapterKind {
    /// SocketCAN when this build has it, the virtual bus otherwise.
    fn default() -> Self {
        if cfg!(all(target_os = "linux", feature = "socketcan")) {
            AdapterKind::Socketcan
        } else {
            AdapterKind::Virtual
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterKind::Virtual => f.write_str("virtual"),
            AdapterKind::Socketcan => f.write_str("socketcan"),
        }
    }
}

/// Builds an unconnected adapter of the requested kind.
///
/// # Errors
///
/// Returns [`BusError::Unsupported`] for `socketcan` when the crate was built
/// without the `socketcan` feature or on a non-Linux target.
pub fn create_adapter(kind: AdapterKind) -> Result<Box<dyn BusAdapter>, BusError> {
    match kind {
        AdapterKind::Virtual => Ok(Box::new(VirtualBus::new())),
        #[cfg(all(target_os = "linux", feature = "socketcan"))]
        AdapterKind::Socketcan => Ok(Box::new(SocketCanBus::new())),
        #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
        AdapterKind::Socketcan => Err(BusError::Unsupported(kind.to_string())),
    }
}
