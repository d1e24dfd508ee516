//! Human-readable rendering of received events.
//!
//! ```text
//! rx 0x123 [01 02 03]
//! tx 0x18DAF110 [02 10 03]
//! ```
//!
//! Standard ids are padded to three hex digits, extended ids to eight.

use can_relay_core::{Event, Frame};

/// Renders one event as a single line without a trailing newline.
pub fn format_event(event: &Event) -> String {
    match event {
        Event::Frame(frame) => format_frame(frame),
    }
}

/// Renders a frame as `<dir> 0x<id> [<bytes>]`.
pub fn format_frame(frame: &Frame) -> String {
    let bytes = frame
        .data()
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ");
    if frame.is_extended() {
        format!("{} 0x{:08X} [{}]", frame.direction(), frame.id(), bytes)
    } else {
        format!("{} 0x{:03X} [{}]", frame.direction(), frame.id(), bytes)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use can_relay_core::Direction;

    #[test]
    fn test_format_event_standard_rx() {
        // Arrange
        let frame = Frame::with_timestamp(0x123, vec![1, 2, 3], Direction::Rx, 0).unwrap();

        // Act
        let line = format_event(&Event::Frame(frame));

        // Assert
        assert_eq!(line, "rx 0x123 [01 02 03]");
    }

    #[test]
    fn test_format_frame_pads_short_standard_id() {
        let frame = Frame::with_timestamp(0x7, vec![0xAB], Direction::Tx, 0).unwrap();
        assert_eq!(format_frame(&frame), "tx 0x007 [AB]");
    }

    #[test]
    fn test_format_frame_extended_id() {
        let frame = Frame::with_timestamp(0x18DA_F110, vec![2, 0x10, 3], Direction::Tx, 0).unwrap();
        assert_eq!(format_frame(&frame), "tx 0x18DAF110 [02 10 03]");
    }

    #[test]
    fn test_format_frame_empty_payload() {
        let frame = Frame::with_timestamp(0x7FF, vec![], Direction::Rx, 0).unwrap();
        assert_eq!(format_frame(&frame), "rx 0x7FF []");
    }
}
