//! Builds a [`Command`] from a `key=value;key=value` string typed on the
//! command line.
//!
//! - `id=0x123;data=0x01 0x02` → `SendFrame`
//! - `channel=can1;bitrate=250000` → `ChangeBus`

use can_relay_core::{parse_byte_list, parse_details, parse_value, Command, ValueError};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandSpecError {
    #[error(transparent)]
    Value(#[from] ValueError),

    #[error("missing '{0}'")]
    MissingKey(&'static str),

    #[error("unknown key '{0}'")]
    UnknownKey(String),

    /// Frame keys and bus keys were combined in one spec.
    #[error("'id'/'data' cannot be combined with 'channel'/'bitrate'")]
    Mixed,
}

/// Parses one command spec.
///
/// # Errors
///
/// Returns [`CommandSpecError`] for unknown keys, missing keys, a mix of
/// frame and bus keys, or a value that does not parse.
pub fn parse_command_spec(text: &str) -> Result<Command, CommandSpecError> {
    let details = parse_details(text)?;

    if let Some(key) = details
        .keys()
        .find(|k| !matches!(k.as_str(), "id" | "data" | "channel" | "bitrate"))
    {
        return Err(CommandSpecError::UnknownKey(key.clone()));
    }

    let is_frame = details.contains_key("id") || details.contains_key("data");
    let is_bus = details.contains_key("channel") || details.contains_key("bitrate");

    match (is_frame, is_bus) {
        (true, true) => Err(CommandSpecError::Mixed),
        (false, true) => {
            let channel = details
                .get("channel")
                .ok_or(CommandSpecError::MissingKey("channel"))?
                .clone();
            let bitrate = narrow(details.get("bitrate").ok_or(CommandSpecError::MissingKey("bitrate"))?)?;
            Ok(Command::ChangeBus { channel, bitrate })
        }
        _ => {
            let id = narrow(details.get("id").ok_or(CommandSpecError::MissingKey("id"))?)?;
            let data = match details.get("data") {
                Some(text) => parse_byte_list(text)?,
                None => Vec::new(),
            };
            Ok(Command::SendFrame { id, data })
        }
    }
}

fn narrow(token: &str) -> Result<u32, ValueError> {
    let value = parse_value(token)?;
    u32::try_from(value).map_err(|_| ValueError::OutOfRange {
        token: token.to_string(),
        max: u64::from(u32::MAX),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_spec_send_frame() {
        // Act
        let cmd = parse_command_spec("id=0x123;data=0x01 2 0b11").unwrap();

        // Assert
        assert_eq!(
            cmd,
            Command::SendFrame {
                id: 0x123,
                data: vec![1, 2, 3]
            }
        );
    }

    #[test]
    fn test_parse_command_spec_without_data_is_empty_frame() {
        let cmd = parse_command_spec("id=0x7FF").unwrap();
        assert_eq!(
            cmd,
            Command::SendFrame {
                id: 0x7FF,
                data: vec![]
            }
        );
    }

    #[test]
    fn test_parse_command_spec_change_bus() {
        let cmd = parse_command_spec("channel = can1 ; bitrate = 250000").unwrap();
        assert_eq!(
            cmd,
            Command::ChangeBus {
                channel: "can1".to_string(),
                bitrate: 250_000
            }
        );
    }

    #[test]
    fn test_parse_command_spec_missing_id() {
        assert_eq!(
            parse_command_spec("data=1 2"),
            Err(CommandSpecError::MissingKey("id"))
        );
    }

    #[test]
    fn test_parse_command_spec_missing_bitrate() {
        assert_eq!(
            parse_command_spec("channel=can1"),
            Err(CommandSpecError::MissingKey("bitrate"))
        );
    }

    #[test]
    fn test_parse_command_spec_rejects_mixed_keys() {
        assert_eq!(
            parse_command_spec("id=1;channel=can1"),
            Err(CommandSpecError::Mixed)
        );
    }

    #[test]
    fn test_parse_command_spec_rejects_unknown_key() {
        assert_eq!(
            parse_command_spec("id=1;dlc=2"),
            Err(CommandSpecError::UnknownKey("dlc".to_string()))
        );
    }

    #[test]
    fn test_parse_command_spec_rejects_byte_over_ff() {
        assert!(matches!(
            parse_command_spec("id=1;data=256"),
            Err(CommandSpecError::Value(ValueError::OutOfRange { .. }))
        ));
    }

    #[test]
    fn test_parse_command_spec_rejects_id_over_u32() {
        assert!(matches!(
            parse_command_spec("id=0x100000000"),
            Err(CommandSpecError::Value(ValueError::OutOfRange { .. }))
        ));
    }

    #[test]
    fn test_parse_command_spec_empty_is_missing_id() {
        assert_eq!(parse_command_spec(""), Err(CommandSpecError::MissingKey("id")));
    }
}
