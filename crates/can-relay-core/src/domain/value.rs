//! Parsing of human-entered numeric tokens.
//!
//! Ids and payload bytes reach the relay as text: in `send_message` command
//! records and on the command line.  A token may be written as `0x`-prefixed
//! hex, `0b`-prefixed binary, or plain decimal:
//!
//! ```text
//! "0x7FF"  -> 2047
//! "0b101"  -> 5
//! "42"     -> 42
//! ```

use std::collections::BTreeMap;

use thiserror::Error;

/// Errors produced while parsing numeric tokens or `key=value` details.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueError {
    /// The token is empty after trimming.
    #[error("empty value")]
    Empty,

    /// The token is not a valid number in its radix.
    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    /// The number parsed but is larger than the target type allows.
    #[error("value '{token}' exceeds maximum {max}")]
    OutOfRange { token: String, max: u64 },

    /// A details segment had no `=` separator.
    #[error("malformed detail '{0}': expected key=value")]
    MalformedDetail(String),
}

/// Parses a hex (`0x`), binary (`0b`) or decimal token.
///
/// # Errors
///
/// Returns [`ValueError::Empty`] for blank input and
/// [`ValueError::InvalidNumber`] when the digits do not match the radix.
pub fn parse_value(token: &str) -> Result<u64, ValueError> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return Err(ValueError::Empty);
    }

    let (digits, radix) = if let Some(hex) = strip_prefix_ci(trimmed, "0x") {
        (hex, 16)
    } else if let Some(bin) = strip_prefix_ci(trimmed, "0b") {
        (bin, 2)
    } else {
        (trimmed, 10)
    };

    // from_str_radix tolerates a leading '+', which no radix prefix should allow.
    if digits.is_empty() || digits.starts_with('+') {
        return Err(ValueError::InvalidNumber(trimmed.to_string()));
    }

    u64::from_str_radix(digits, radix).map_err(|_| ValueError::InvalidNumber(trimmed.to_string()))
}

/// Parses a whitespace-separated list of byte tokens.
///
/// An empty or all-whitespace string yields an empty list.
///
/// # Errors
///
/// Returns the first token's [`ValueError`], or [`ValueError::OutOfRange`]
/// when a token is larger than `0xFF`.
pub fn parse_byte_list(text: &str) -> Result<Vec<u8>, ValueError> {
    text.split_whitespace()
        .map(|token| {
            let value = parse_value(token)?;
            u8::try_from(value).map_err(|_| ValueError::OutOfRange {
                token: token.to_string(),
                max: u64::from(u8::MAX),
            })
        })
        .collect()
}

/// Parses `key=value;key=value` detail strings used by the CLIs.
///
/// Keys and values are trimmed; empty segments (e.g. a trailing `;`) are
/// ignored.  A repeated key keeps its last value.
///
/// # Errors
///
/// Returns [`ValueError::MalformedDetail`] for a segment without `=`.
pub fn parse_details(text: &str) -> Result<BTreeMap<String, String>, ValueError> {
    let mut out = BTreeMap::new();
    for part in text.split(';') {
        if part.trim().is_empty() {
            continue;
        }
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| ValueError::MalformedDetail(part.trim().to_string()))?;
        out.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(out)
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
