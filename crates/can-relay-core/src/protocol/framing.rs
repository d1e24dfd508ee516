//! Splits a TCP byte stream into newline-terminated records.
//!
//! Bytes are pushed in whatever chunks the socket delivers and complete
//! records are pulled out one at a time.  Blank lines are skipped and a
//! trailing `\r` is removed, so `\r\n`-terminated input works too.

use tracing::debug;

use crate::protocol::codec::ProtocolError;

/// Upper bound on a single record, newline excluded.
pub const MAX_RECORD_LEN: usize = 64 * 1024;

/// Incremental newline framer.
///
/// # Examples
///
/// ```rust
/// use can_relay_core::LineFramer;
///
/// let mut framer = LineFramer::new();
/// framer.push(b"{\"a\":1}\n{\"b\"");
/// assert_eq!(framer.next_record().unwrap(), Some(b"{\"a\":1}".to_vec()));
/// assert_eq!(framer.next_record().unwrap(), None);
/// framer.push(b":2}\n");
/// assert_eq!(framer.next_record().unwrap(), Some(b"{\"b\":2}".to_vec()));
/// ```
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    /// Bytes at the front of `buf` already known to contain no newline.
    scanned: usize,
    max_len: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_max_len(MAX_RECORD_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(1024),
            scanned: 0,
            max_len,
        }
    }

    /// Appends bytes read from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet returned as a record.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next complete record, or `Ok(None)` if more bytes are
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::RecordTooLong`] once a record exceeds the
    /// length limit.  The stream cannot be resynchronised after that.
    pub fn next_record(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        loop {
            let Some(offset) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') else {
                self.scanned = self.buf.len();
                if self.buf.len() > self.max_len {
                    debug!(buffered = self.buf.len(), "no record terminator within limit");
                    return Err(ProtocolError::RecordTooLong {
                        len: self.buf.len(),
                        max: self.max_len,
                    });
                }
                return Ok(None);
            };

            let end = self.scanned + offset;
            let mut line: Vec<u8> = self.buf.drain(..=end).collect();
            self.scanned = 0;
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if line.len() > self.max_len {
                return Err(ProtocolError::RecordTooLong {
                    len: line.len(),
                    max: self.max_len,
                });
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(line));
        }
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framer_returns_none_without_newline() {
        let mut framer = LineFramer::new();
        framer.push(b"{\"partial\"");

        assert_eq!(framer.next_record().unwrap(), None);
        assert_eq!(framer.buffered(), 10);
    }

    #[test]
    fn test_framer_splits_multiple_records_in_one_chunk() {
        let mut framer = LineFramer::new();
        framer.push(b"one\ntwo\nthree");

        assert_eq!(framer.next_record().unwrap(), Some(b"one".to_vec()));
        assert_eq!(framer.next_record().unwrap(), Some(b"two".to_vec()));
        assert_eq!(framer.next_record().unwrap(), None);
        assert_eq!(framer.buffered(), 5);
    }

    #[test]
    fn test_framer_reassembles_byte_by_byte() {
        let mut framer = LineFramer::new();
        let mut out = Vec::new();

        for b in b"ab\ncd\n" {
            framer.push(&[*b]);
            while let Some(rec) = framer.next_record().unwrap() {
                out.push(rec);
            }
        }

        assert_eq!(out, vec![b"ab".to_vec(), b"cd".to_vec()]);
    }

    #[test]
    fn test_framer_skips_blank_lines_and_strips_cr() {
        let mut framer = LineFramer::new();
        framer.push(b"\n  \r\nx\r\n");

        assert_eq!(framer.next_record().unwrap(), Some(b"x".to_vec()));
        assert_eq!(framer.next_record().unwrap(), None);
    }

    #[test]
    fn test_framer_rejects_overlong_unterminated_record() {
        let mut framer = LineFramer::with_max_len(4);
        framer.push(b"12345");

        let result = framer.next_record();

        assert_eq!(result, Err(ProtocolError::RecordTooLong { len: 5, max: 4 }));
    }

    #[test]
    fn test_framer_rejects_overlong_terminated_record() {
        let mut framer = LineFramer::with_max_len(4);
        framer.push(b"12345\n");

        assert!(framer.next_record().is_err());
    }

    #[test]
    fn test_framer_accepts_record_at_limit() {
        let mut framer = LineFramer::with_max_len(4);
        framer.push(b"1234\n");

        assert_eq!(framer.next_record().unwrap(), Some(b"1234".to_vec()));
    }
}
