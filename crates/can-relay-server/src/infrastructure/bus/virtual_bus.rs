//! In-memory bus adapter.
//!
//! `VirtualBus` behaves like a CAN interface with nothing else attached:
//! frames sent on it are recorded, and frames "received" are whatever the
//! owner injects.  Clones share the same state, so one handle can be boxed
//! into the relay while another stays with the test.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use can_relay_core::{Direction, Frame, FrameError, EXTENDED_ID_MAX};

use super::{BusAdapter, BusError};

#[derive(Debug)]
struct VirtualState {
    connected: bool,
    channel: Option<String>,
    bitrate: u32,
    max_id: u32,
    rx: VecDeque<Frame>,
    sent: Vec<Frame>,
    connects: Vec<(String, u32)>,
    lost: Option<String>,
    fail_connect: bool,
}

/// Cloneable handle to an in-memory CAN bus.
#[derive(Debug, Clone)]
pub struct VirtualBus {
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualBus {
    /// Creates a disconnected bus that accepts extended ids.
    pub fn new() -> Self {
        Self::with_max_id(EXTENDED_ID_MAX)
    }

    /// Creates a disconnected bus that only accepts ids up to `max_id`.
    pub fn with_max_id(max_id: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(VirtualState {
                connected: false,
                channel: None,
                bitrate: 0,
                max_id,
                rx: VecDeque::new(),
                sent: Vec::new(),
                connects: Vec::new(),
                lost: None,
                fail_connect: false,
            })),
        }
    }

    /// Queues a frame to be returned by a later `poll`.
    pub fn inject(&self, frame: Frame) {
        self.lock().rx.push_back(frame);
    }

    /// Queues a received frame built from `id` and `data`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the frame would violate CAN limits.
    pub fn inject_rx(&self, id: u32, data: &[u8]) -> Result<(), FrameError> {
        let frame = Frame::new(id, data.to_vec(), Direction::Rx)?;
        self.inject(frame);
        Ok(())
    }

    /// Every frame transmitted so far, oldest first.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.lock().sent.clone()
    }

    /// Number of frames still waiting to be polled.
    pub fn pending_rx(&self) -> usize {
        self.lock().rx.len()
    }

    /// Every `(channel, bitrate)` passed to a successful `connect`.
    pub fn connect_history(&self) -> Vec<(String, u32)> {
        self.lock().connects.clone()
    }

    /// The channel currently open, if any.
    pub fn channel(&self) -> Option<String> {
        self.lock().channel.clone()
    }

    pub fn bitrate(&self) -> u32 {
        self.lock().bitrate
    }

    /// Simulates the interface disappearing.  `poll` and `send` report
    /// [`BusError::Disconnected`] until the next successful `connect`.
    pub fn set_disconnected(&self, reason: &str) {
        let mut state = self.lock();
        state.connected = false;
        state.lost = Some(reason.to_string());
    }

    /// Makes subsequent `connect` calls fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    fn lock(&self) -> MutexGuard<'_, VirtualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for VirtualBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BusAdapter for VirtualBus {
    fn connect(&mut self, channel: &str, bitrate: u32) -> Result<(), BusError> {
        let mut state = self.lock();
        if state.fail_connect {
            state.connected = false;
            state.channel = None;
            return Err(BusError::ConnectFailed {
                channel: channel.to_string(),
                bitrate,
                reason: "virtual bus configured to fail".to_string(),
            });
        }
        state.connected = true;
        state.lost = None;
        state.channel = Some(channel.to_string());
        state.bitrate = bitrate;
        state.connects.push((channel.to_string(), bitrate));
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), BusError> {
        let mut state = self.lock();
        state.connected = false;
        state.channel = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn max_id(&self) -> u32 {
        self.lock().max_id
    }

    fn send(&mut self, id: u32, data: &[u8]) -> Result<(), BusError> {
        let mut state = self.lock();
        if let Some(reason) = &state.lost {
            return Err(BusError::Disconnected(reason.clone()));
        }
        if !state.connected {
            return Err(BusError::NotConnected);
        }
        if id > state.max_id {
            return Err(BusError::Driver(format!(
                "id 0x{id:X} exceeds adapter maximum 0x{:X}",
                state.max_id
            )));
        }
        let frame = Frame::new(id, data.to_vec(), Direction::Tx)
            .map_err(|e| BusError::Driver(e.to_string()))?;
        state.sent.push(frame);
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<Frame>, BusError> {
        let mut state = self.lock();
        if let Some(reason) = &state.lost {
            return Err(BusError::Disconnected(reason.clone()));
        }
        if !state.connected {
            return Err(BusError::NotConnected);
        }
        Ok(state.rx.pop_front())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
