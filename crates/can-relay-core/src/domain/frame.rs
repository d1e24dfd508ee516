//! The CAN frame as it travels through the relay.
//!
//! A [`Frame`] is created once, either by a bus adapter when something is
//! received or by the server after it has injected a frame, and is never
//! mutated afterwards.  Constructors enforce the two CAN limits the relay
//! cares about:
//!
//! - the arbitration id fits in 29 bits (extended ids up to `0x1FFF_FFFF`);
//! - the payload is at most 8 bytes (classic CAN).

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Largest 11-bit (standard) arbitration id.
pub const STANDARD_ID_MAX: u32 = 0x7FF;

/// Largest 29-bit (extended) arbitration id.
pub const EXTENDED_ID_MAX: u32 = 0x1FFF_FFFF;

/// Maximum payload length of a classic CAN frame.
pub const MAX_DATA_LEN: usize = 8;

/// Errors raised when a frame would violate the CAN limits.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The id needs more than the permitted number of bits.
    #[error("CAN id 0x{id:X} exceeds maximum 0x{max:X}")]
    IdOutOfRange { id: u32, max: u32 },

    /// The payload is longer than a classic CAN frame allows.
    #[error("CAN payload of {len} bytes exceeds maximum of {max}")]
    DataTooLong { len: usize, max: usize },
}

/// Whether a frame was received from the bus or transmitted onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Rx,
    Tx,
}

impl Direction {
    /// The wire tag for this direction (`"rx"` / `"tx"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Rx => "rx",
            Direction::Tx => "tx",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single CAN frame with its capture time.
///
/// # Examples
///
/// ```rust
/// use can_relay_core::{Direction, Frame};
///
/// let frame = Frame::new(0x123, vec![1, 2, 3], Direction::Rx).unwrap();
/// assert_eq!(frame.id(), 0x123);
/// assert_eq!(frame.data(), &[1, 2, 3]);
/// assert!(!frame.is_extended());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    id: u32,
    data: Vec<u8>,
    direction: Direction,
    timestamp_us: u64,
}

impl Frame {
    /// Creates a frame stamped with the current wall-clock time.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the id exceeds [`EXTENDED_ID_MAX`] or the
    /// payload exceeds [`MAX_DATA_LEN`].
    pub fn new(id: u32, data: Vec<u8>, direction: Direction) -> Result<Self, FrameError> {
        Self::with_timestamp(id, data, direction, now_us())
    }

    /// Creates a frame with an explicit capture time (µs since the Unix epoch).
    ///
    /// # Errors
    ///
    /// Same as [`Frame::new`].
    pub fn with_timestamp(
        id: u32,
        data: Vec<u8>,
        direction: Direction,
        timestamp_us: u64,
    ) -> Result<Self, FrameError> {
        check_id(id, EXTENDED_ID_MAX)?;
        check_len(data.len())?;
        Ok(Self {
            id,
            data,
            direction,
            timestamp_us,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Capture time in microseconds since the Unix epoch.
    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    /// `true` when the id does not fit in 11 bits.
    pub fn is_extended(&self) -> bool {
        self.id > STANDARD_ID_MAX
    }
}

/// Checks `id` against an adapter-specific upper bound.
///
/// # Errors
///
/// Returns [`FrameError::IdOutOfRange`] when `id > max`.
pub fn check_id(id: u32, max: u32) -> Result<(), FrameError> {
    if id > max {
        return Err(FrameError::IdOutOfRange { id, max });
    }
    Ok(())
}

/// Checks a payload length against [`MAX_DATA_LEN`].
///
/// # Errors
///
/// Returns [`FrameError::DataTooLong`] when `len > MAX_DATA_LEN`.
pub fn check_len(len: usize) -> Result<(), FrameError> {
    if len > MAX_DATA_LEN {
        return Err(FrameError::DataTooLong {
            len,
            max: MAX_DATA_LEN,
        });
    }
    Ok(())
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
