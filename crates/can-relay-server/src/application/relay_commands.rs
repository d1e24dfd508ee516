//! Applies client commands to the shared bus.
//!
//! Every session hands its decoded [`Command`]s to one [`CommandProcessor`].
//! A `SendFrame` is checked against the adapter's id width and the classic
//! CAN payload limit before the adapter is touched; a rejected command is
//! reported to the caller and counted, and the session carries on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use can_relay_core::domain::frame::{check_id, check_len};
use can_relay_core::{Command, Direction, Frame, FrameError};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::application::stats::RelayStats;
use crate::infrastructure::bus::{lock_bus, BusError, SharedBus};

/// Why a command was not applied.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// The frame would violate the adapter's id width or the payload limit.
    #[error("invalid frame: {0}")]
    Invalid(#[from] FrameError),

    /// The adapter refused the operation.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
}

/// What an applied command did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// A frame went out on the bus.  The frame is stamped with the transmit
    /// time and tagged [`Direction::Tx`].
    Transmitted(Frame),
    /// The bus was reopened with new parameters.
    BusChanged { channel: String, bitrate: u32 },
}

/// Validates commands and applies them through the shared bus lock.
pub struct CommandProcessor {
    bus: SharedBus,
    stats: Arc<RelayStats>,
    bus_connected: Arc<AtomicBool>,
}

impl CommandProcessor {
    pub fn new(bus: SharedBus, stats: Arc<RelayStats>, bus_connected: Arc<AtomicBool>) -> Self {
        Self {
            bus,
            stats,
            bus_connected,
        }
    }

    /// Applies one command.  Success and failure are both counted in
    /// [`RelayStats`].
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Invalid`] without calling the adapter when
    /// the id or payload is out of range, and [`CommandError::Bus`] when the
    /// adapter fails.
    pub fn apply(&self, cmd: Command) -> Result<CommandOutcome, CommandError> {
        let result = match cmd {
            Command::SendFrame { id, data } => self.send_frame(id, data),
            Command::ChangeBus { channel, bitrate } => self.change_bus(channel, bitrate),
        };
        match &result {
            Ok(_) => self.stats.record_applied(),
            Err(_) => self.stats.record_rejected(),
        }
        result
    }

    fn send_frame(&self, id: u32, data: Vec<u8>) -> Result<CommandOutcome, CommandError> {
        let mut bus = lock_bus(&self.bus);
        check_id(id, bus.max_id())?;
        check_len(data.len())?;

        if let Err(e) = bus.send(id, &data) {
            if matches!(e, BusError::Disconnected(_)) {
                self.mark_bus_lost(&e);
            }
            return Err(e.into());
        }
        drop(bus);

        Ok(CommandOutcome::Transmitted(Frame::new(id, data, Direction::Tx)?))
    }

    fn change_bus(&self, channel: String, bitrate: u32) -> Result<CommandOutcome, CommandError> {
        let mut bus = lock_bus(&self.bus);
        if let Err(e) = bus.disconnect() {
            warn!("closing bus before reconnect failed: {e}");
        }
        match bus.connect(&channel, bitrate) {
            Ok(()) => {
                self.bus_connected.store(true, Ordering::SeqCst);
                info!(%channel, bitrate, "bus reconnected");
                Ok(CommandOutcome::BusChanged { channel, bitrate })
            }
            Err(e) => {
                self.bus_connected.store(false, Ordering::SeqCst);
                error!(%channel, bitrate, "bus reconnect failed: {e}");
                Err(e.into())
            }
        }
    }

    fn mark_bus_lost(&self, e: &BusError) {
        if self.bus_connected.swap(false, Ordering::SeqCst) {
            error!("bus lost while sending: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bus::{shared, MockBusAdapter, VirtualBus};
    use can_relay_core::{EXTENDED_ID_MAX, STANDARD_ID_MAX};

    fn processor_with(bus: SharedBus) -> (CommandProcessor, Arc<RelayStats>, Arc<AtomicBool>) {
        let stats = Arc::new(RelayStats::new());
        let connected = Arc::new(AtomicBool::new(true));
        let processor = CommandProcessor::new(bus, Arc::clone(&stats), Arc::clone(&connected));
        (processor, stats, connected)
    }

    #[test]
    fn test_send_frame_calls_adapter_exactly_once() {
        // Arrange
        let mut mock = MockBusAdapter::new();
        mock.expect_max_id().return_const(EXTENDED_ID_MAX);
        mock.expect_send()
            .withf(|id, data| *id == 0x7FF && data.is_empty())
            .times(1)
            .returning(|_, _| Ok(()));
        let (processor, stats, _) = processor_with(shared(Box::new(mock)));

        // Act
        let outcome = processor
            .apply(Command::SendFrame {
                id: 0x7FF,
                data: vec![],
            })
            .unwrap();

        // Assert
        let CommandOutcome::Transmitted(frame) = outcome else {
            panic!("expected transmitted frame");
        };
        assert_eq!(frame.id(), 0x7FF);
        assert_eq!(frame.direction(), Direction::Tx);
        assert_eq!(stats.snapshot().commands_applied, 1);
    }

    #[test]
    fn test_send_frame_id_above_29_bits_never_reaches_adapter() {
        // Arrange
        let mut mock = MockBusAdapter::new();
        mock.expect_max_id().return_const(EXTENDED_ID_MAX);
        mock.expect_send().never();
        let (processor, stats, _) = processor_with(shared(Box::new(mock)));

        // Act
        let result = processor.apply(Command::SendFrame {
            id: 0x2000_0000,
            data: vec![1, 2],
        });

        // Assert
        assert_eq!(
            result,
            Err(CommandError::Invalid(FrameError::IdOutOfRange {
                id: 0x2000_0000,
                max: EXTENDED_ID_MAX
            }))
        );
        assert_eq!(stats.snapshot().commands_rejected, 1);
    }

    #[test]
    fn test_send_frame_respects_standard_only_adapter() {
        let mut mock = MockBusAdapter::new();
        mock.expect_max_id().return_const(STANDARD_ID_MAX);
        mock.expect_send().never();
        let (processor, _, _) = processor_with(shared(Box::new(mock)));

        let result = processor.apply(Command::SendFrame {
            id: 0x800,
            data: vec![],
        });

        assert!(matches!(result, Err(CommandError::Invalid(_))));
    }

    #[test]
    fn test_send_frame_nine_bytes_never_reaches_adapter() {
        let mut mock = MockBusAdapter::new();
        mock.expect_max_id().return_const(EXTENDED_ID_MAX);
        mock.expect_send().never();
        let (processor, _, _) = processor_with(shared(Box::new(mock)));

        let result = processor.apply(Command::SendFrame {
            id: 0x100,
            data: vec![0; 9],
        });

        assert_eq!(
            result,
            Err(CommandError::Invalid(FrameError::DataTooLong { len: 9, max: 8 }))
        );
    }

    #[test]
    fn test_send_frame_disconnected_clears_flag() {
        // Arrange
        let mut mock = MockBusAdapter::new();
        mock.expect_max_id().return_const(EXTENDED_ID_MAX);
        mock.expect_send()
            .returning(|_, _| Err(BusError::Disconnected("gone".to_string())));
        let (processor, stats, connected) = processor_with(shared(Box::new(mock)));

        // Act
        let result = processor.apply(Command::SendFrame {
            id: 1,
            data: vec![],
        });

        // Assert
        assert!(matches!(result, Err(CommandError::Bus(BusError::Disconnected(_)))));
        assert!(!connected.load(Ordering::SeqCst));
        assert_eq!(stats.snapshot().commands_rejected, 1);
    }

    #[test]
    fn test_change_bus_reconnects_with_new_parameters() {
        // Arrange
        let mut mock = MockBusAdapter::new();
        mock.expect_disconnect().times(1).returning(|| Ok(()));
        mock.expect_connect()
            .withf(|channel, bitrate| channel.to_string() == "can1" && *bitrate == 250_000)
            .times(1)
            .returning(|_, _| Ok(()));
        let (processor, _, connected) = processor_with(shared(Box::new(mock)));
        connected.store(false, Ordering::SeqCst);

        // Act
        let outcome = processor
            .apply(Command::ChangeBus {
                channel: "can1".to_string(),
                bitrate: 250_000,
            })
            .unwrap();

        // Assert
        assert_eq!(
            outcome,
            CommandOutcome::BusChanged {
                channel: "can1".to_string(),
                bitrate: 250_000
            }
        );
        assert!(connected.load(Ordering::SeqCst));
    }

    #[test]
    fn test_change_bus_failure_clears_flag() {
        let handle = VirtualBus::new();
        handle.set_fail_connect(true);
        let (processor, stats, connected) = processor_with(shared(Box::new(handle.clone())));

        let result = processor.apply(Command::ChangeBus {
            channel: "can7".to_string(),
            bitrate: 1_000_000,
        });

        assert!(matches!(
            result,
            Err(CommandError::Bus(BusError::ConnectFailed { .. }))
        ));
        assert!(!connected.load(Ordering::SeqCst));
        assert_eq!(stats.snapshot().commands_rejected, 1);
    }
}
