//! JSON codec for relay records.
//!
//! Wire format: one JSON object per line.
//! ```text
//! server -> client  {"type":"rx","id":291,"data":[1,2,3],"timestamp":1700000000000000}
//! client -> server  {"cmd":"send_message","data":{"id":"0x123","data":"0x01 0x02 0x03"}}
//! client -> server  {"cmd":"change_can","data":{"channel":"can1","bitrate":250000}}
//! ```
//! Event ids and bytes are plain integers.  Command ids and bytes are text
//! tokens (`0x` hex, `0b` binary or decimal); integers are accepted as well.
//!
//! Decoding never panics: every malformed record comes back as a
//! [`ProtocolError`] so the caller can log it and carry on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::frame::{Direction, Frame, FrameError};
use crate::domain::value::{parse_byte_list, parse_value, ValueError};
use crate::protocol::messages::{Command, Event, WireMessage, CMD_CHANGE_CAN, CMD_SEND_MESSAGE};

/// Errors that can occur while encoding, framing or decoding records.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The record is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// The record is JSON but not an object.
    #[error("record is not a JSON object")]
    NotAnObject,

    /// The object has neither a `cmd` nor a `type` key.
    #[error("record has neither 'cmd' nor 'type'")]
    UnrecognizedRecord,

    /// The `cmd` tag names a command this codec does not know.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// The `type` tag is not `rx` or `tx`.
    #[error("unknown event type '{0}'")]
    UnknownEventType(String),

    /// A field is missing or has the wrong JSON shape.
    #[error("malformed field '{field}': {reason}")]
    MalformedField { field: &'static str, reason: String },

    /// A numeric text token could not be parsed.
    #[error("invalid value: {0}")]
    InvalidValue(#[from] ValueError),

    /// The decoded event would not be a valid CAN frame.
    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] FrameError),

    /// A record grew past the framing limit without a terminating newline.
    #[error("record of {len} bytes exceeds maximum of {max} without a newline")]
    RecordTooLong { len: usize, max: usize },

    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// `true` when the byte stream can no longer be split into records and the
    /// connection has to be dropped.  Every other error affects one record only.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::RecordTooLong { .. })
    }
}

// ── Wire records ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct EventOut<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    id: u32,
    data: &'a [u8],
    timestamp: u64,
}

#[derive(Deserialize)]
struct EventIn {
    id: u32,
    data: Vec<u8>,
    #[serde(default)]
    timestamp: u64,
}

#[derive(Serialize)]
struct CommandOut<T: Serialize> {
    cmd: &'static str,
    data: T,
}

#[derive(Serialize)]
struct SendMessageOut {
    id: String,
    data: String,
}

#[derive(Serialize)]
struct ChangeCanOut<'a> {
    channel: &'a str,
    bitrate: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberField {
    Int(u64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BytesField {
    List(Vec<u8>),
    Text(String),
}

#[derive(Deserialize)]
struct SendMessageIn {
    id: NumberField,
    #[serde(default)]
    data: Option<BytesField>,
}

#[derive(Deserialize)]
struct ChangeCanIn {
    channel: String,
    bitrate: NumberField,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes an [`Event`] as one newline-terminated record.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
///
/// # Examples
///
/// ```rust
/// use can_relay_core::{decode_record, encode_event, Direction, Event, Frame, WireMessage};
///
/// let frame = Frame::with_timestamp(0x123, vec![1, 2, 3], Direction::Rx, 7).unwrap();
/// let bytes = encode_event(&Event::Frame(frame.clone())).unwrap();
/// assert_eq!(bytes.last(), Some(&b'\n'));
/// assert_eq!(decode_record(&bytes).unwrap(), WireMessage::Event(Event::Frame(frame)));
/// ```
pub fn encode_event(event: &Event) -> Result<Vec<u8>, ProtocolError> {
    match event {
        Event::Frame(frame) => to_record(&EventOut {
            kind: frame.direction().as_str(),
            id: frame.id(),
            data: frame.data(),
            timestamp: frame.timestamp_us(),
        }),
    }
}

/// Encodes a [`Command`] as one newline-terminated record.
///
/// Ids and bytes are written as `0x` hex tokens, the form a human would type.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn encode_command(cmd: &Command) -> Result<Vec<u8>, ProtocolError> {
    match cmd {
        Command::SendFrame { id, data } => to_record(&CommandOut {
            cmd: CMD_SEND_MESSAGE,
            data: SendMessageOut {
                id: format!("0x{id:X}"),
                data: data
                    .iter()
                    .map(|b| format!("0x{b:02X}"))
                    .collect::<Vec<_>>()
                    .join(" "),
            },
        }),
        Command::ChangeBus { channel, bitrate } => to_record(&CommandOut {
            cmd: CMD_CHANGE_CAN,
            data: ChangeCanOut {
                channel,
                bitrate: *bitrate,
            },
        }),
    }
}

/// Decodes a single record (with or without its trailing newline).
///
/// A `cmd` key makes the record a [`Command`]; a `type` key makes it an
/// [`Event`].
///
/// # Errors
///
/// Returns [`ProtocolError`] describing why the record was rejected.  None of
/// these errors is fatal to the connection.
pub fn decode_record(bytes: &[u8]) -> Result<WireMessage, ProtocolError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    let mut object = match value {
        Value::Object(map) => map,
        _ => return Err(ProtocolError::NotAnObject),
    };

    if let Some(tag) = object.remove("cmd") {
        let tag = tag_str(tag, "cmd")?;
        let data = object.remove("data").unwrap_or(Value::Null);
        return decode_command(&tag, data).map(WireMessage::Command);
    }

    if let Some(tag) = object.remove("type") {
        let tag = tag_str(tag, "type")?;
        let direction = match tag.as_str() {
            "rx" => Direction::Rx,
            "tx" => Direction::Tx,
            _ => return Err(ProtocolError::UnknownEventType(tag)),
        };
        let record: EventIn = from_value(Value::Object(object), "event")?;
        let frame = Frame::with_timestamp(record.id, record.data, direction, record.timestamp)?;
        return Ok(WireMessage::Event(Event::Frame(frame)));
    }

    Err(ProtocolError::UnrecognizedRecord)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn decode_command(tag: &str, data: Value) -> Result<Command, ProtocolError> {
    match tag {
        CMD_SEND_MESSAGE => {
            let record: SendMessageIn = from_value(data, "data")?;
            let id = number_field(record.id, "id")?;
            let data = match record.data {
                None => Vec::new(),
                Some(BytesField::List(bytes)) => bytes,
                Some(BytesField::Text(text)) => parse_byte_list(&text)?,
            };
            Ok(Command::SendFrame { id, data })
        }
        CMD_CHANGE_CAN => {
            let record: ChangeCanIn = from_value(data, "data")?;
            if record.channel.trim().is_empty() {
                return Err(ProtocolError::MalformedField {
                    field: "channel",
                    reason: "empty channel name".to_string(),
                });
            }
            let bitrate = number_field(record.bitrate, "bitrate")?;
            Ok(Command::ChangeBus {
                channel: record.channel,
                bitrate,
            })
        }
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

fn number_field(field: NumberField, name: &'static str) -> Result<u32, ProtocolError> {
    let raw = match field {
        NumberField::Int(n) => n,
        NumberField::Text(text) => parse_value(&text)?,
    };
    u32::try_from(raw).map_err(|_| ProtocolError::MalformedField {
        field: name,
        reason: format!("{raw} does not fit in 32 bits"),
    })
}

fn tag_str(tag: Value, field: &'static str) -> Result<String, ProtocolError> {
    match tag {
        Value::String(s) => Ok(s),
        other => Err(ProtocolError::MalformedField {
            field,
            reason: format!("expected string, got {other}"),
        }),
    }
}

fn from_value<T: for<'de> Deserialize<'de>>(
    value: Value,
    field: &'static str,
) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|e| ProtocolError::MalformedField {
        field,
        reason: e.to_string(),
    })
}

fn to_record<T: Serialize>(record: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = serde_json::to_vec(record).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    buf.push(b'\n');
    Ok(buf)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::frame::EXTENDED_ID_MAX;

    fn decode_str(s: &str) -> Result<WireMessage, ProtocolError> {
        decode_record(s.as_bytes())
    }

    #[test]
    fn test_encode_event_uses_integer_fields() {
        // Arrange
        let frame = Frame::with_timestamp(0x123, vec![1, 2, 3], Direction::Rx, 99).unwrap();

        // Act
        let bytes = encode_event(&Event::Frame(frame)).unwrap();

        // Assert
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "{\"type\":\"rx\",\"id\":291,\"data\":[1,2,3],\"timestamp\":99}\n"
        );
    }

    #[test]
    fn test_encode_command_uses_hex_tokens() {
        let cmd = Command::SendFrame {
            id: 0x7FF,
            data: vec![0x01, 0xAB],
        };

        let text = String::from_utf8(encode_command(&cmd).unwrap()).unwrap();

        assert_eq!(
            text,
            "{\"cmd\":\"send_message\",\"data\":{\"id\":\"0x7FF\",\"data\":\"0x01 0xAB\"}}\n"
        );
    }

    #[test]
    fn test_decode_send_message_with_mixed_tokens() {
        let msg = decode_str(r#"{"cmd":"send_message","data":{"id":"291","data":"0x01 2 0b11"}}"#)
            .unwrap();

        assert_eq!(
            msg,
            WireMessage::Command(Command::SendFrame {
                id: 0x123,
                data: vec![1, 2, 3]
            })
        );
    }

    #[test]
    fn test_decode_send_message_accepts_integer_fields() {
        let msg = decode_str(r#"{"cmd":"send_message","data":{"id":2047,"data":[0,255]}}"#).unwrap();

        assert_eq!(
            msg,
            WireMessage::Command(Command::SendFrame {
                id: 0x7FF,
                data: vec![0, 255]
            })
        );
    }

    #[test]
    fn test_decode_send_message_empty_data_string() {
        let msg = decode_str(r#"{"cmd":"send_message","data":{"id":"0x7FF","data":""}}"#).unwrap();

        assert_eq!(
            msg,
            WireMessage::Command(Command::SendFrame {
                id: 0x7FF,
                data: vec![]
            })
        );
    }

    #[test]
    fn test_decode_send_message_keeps_out_of_range_id_for_validation() {
        // Range checks against the adapter happen on the server, not here.
        let msg = decode_str(r#"{"cmd":"send_message","data":{"id":"0x20000000","data":"1"}}"#)
            .unwrap();

        assert_eq!(
            msg,
            WireMessage::Command(Command::SendFrame {
                id: 0x2000_0000,
                data: vec![1]
            })
        );
    }

    #[test]
    fn test_decode_send_message_rejects_id_wider_than_32_bits() {
        let result = decode_str(r#"{"cmd":"send_message","data":{"id":"0x100000000"}}"#);

        assert!(matches!(
            result,
            Err(ProtocolError::MalformedField { field: "id", .. })
        ));
    }

    #[test]
    fn test_decode_send_message_rejects_bad_byte_token() {
        let result = decode_str(r#"{"cmd":"send_message","data":{"id":"1","data":"0x01 zz"}}"#);

        assert!(matches!(result, Err(ProtocolError::InvalidValue(_))));
    }

    #[test]
    fn test_decode_change_can() {
        let msg = decode_str(r#"{"cmd":"change_can","data":{"channel":"can1","bitrate":"250000"}}"#)
            .unwrap();

        assert_eq!(
            msg,
            WireMessage::Command(Command::ChangeBus {
                channel: "can1".to_string(),
                bitrate: 250_000
            })
        );
    }

    #[test]
    fn test_decode_change_can_rejects_empty_channel() {
        let result = decode_str(r#"{"cmd":"change_can","data":{"channel":" ","bitrate":500000}}"#);

        assert!(matches!(
            result,
            Err(ProtocolError::MalformedField {
                field: "channel",
                ..
            })
        ));
    }

    #[test]
    fn test_decode_unknown_command() {
        let result = decode_str(r#"{"cmd":"reboot","data":{}}"#);

        assert_eq!(result, Err(ProtocolError::UnknownCommand("reboot".to_string())));
    }

    #[test]
    fn test_decode_truncated_json() {
        let result = decode_str(r#"{"cmd":"send_message","data":{"id":"0x1""#);

        assert!(matches!(result, Err(ProtocolError::InvalidJson(_))));
    }

    #[test]
    fn test_decode_non_object() {
        assert_eq!(decode_str("[1,2,3]"), Err(ProtocolError::NotAnObject));
    }

    #[test]
    fn test_decode_object_without_tag() {
        assert_eq!(decode_str(r#"{"id":1}"#), Err(ProtocolError::UnrecognizedRecord));
    }

    #[test]
    fn test_decode_event_without_timestamp_defaults_to_zero() {
        let msg = decode_str(r#"{"type":"tx","id":5,"data":[]}"#).unwrap();

        let WireMessage::Event(Event::Frame(frame)) = msg else {
            panic!("expected event");
        };
        assert_eq!(frame.direction(), Direction::Tx);
        assert_eq!(frame.timestamp_us(), 0);
    }

    #[test]
    fn test_decode_event_unknown_type() {
        let result = decode_str(r#"{"type":"err","id":5,"data":[]}"#);

        assert_eq!(result, Err(ProtocolError::UnknownEventType("err".to_string())));
    }

    #[test]
    fn test_decode_event_rejects_nine_bytes() {
        let result = decode_str(r#"{"type":"rx","id":5,"data":[1,2,3,4,5,6,7,8,9]}"#);

        assert!(matches!(result, Err(ProtocolError::InvalidFrame(_))));
    }

    #[test]
    fn test_decode_event_rejects_byte_above_255() {
        let result = decode_str(r#"{"type":"rx","id":5,"data":[256]}"#);

        assert!(matches!(
            result,
            Err(ProtocolError::MalformedField { field: "event", .. })
        ));
    }

    #[test]
    fn test_event_round_trip_extended_id() {
        let frame =
            Frame::with_timestamp(EXTENDED_ID_MAX, vec![0xDE, 0xAD], Direction::Rx, 1).unwrap();
        let event = Event::Frame(frame);

        let decoded = decode_record(&encode_event(&event).unwrap()).unwrap();

        assert_eq!(decoded, WireMessage::Event(event));
    }

    #[test]
    fn test_only_record_too_long_is_fatal() {
        assert!(ProtocolError::RecordTooLong { len: 1, max: 0 }.is_fatal());
        assert!(!ProtocolError::NotAnObject.is_fatal());
        assert!(!ProtocolError::InvalidJson(String::new()).is_fatal());
    }
}
