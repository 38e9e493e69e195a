//! Response line encoding.

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::{Charset, Config, LineTerminator};

/// Encodes response lines into wire bytes.
///
/// Every line, including the last one, is followed by the terminator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseEncoder {
    terminator: LineTerminator,
    charset: Charset,
}

impl ResponseEncoder {
    /// Creates an encoder.
    #[must_use]
    pub const fn new(terminator: LineTerminator, charset: Charset) -> Self {
        Self {
            terminator,
            charset,
        }
    }

    /// Creates an encoder from the engine configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self::new(config.line_terminator, config.charset)
    }

    /// Encodes `lines` into a single buffer.
    #[must_use]
    pub fn encode<S: AsRef<str>>(&self, lines: &[S]) -> Bytes {
        let terminator = self.terminator.as_bytes();
        let capacity = lines
            .iter()
            .map(|line| line.as_ref().len() + terminator.len())
            .sum();
        let mut buf = BytesMut::with_capacity(capacity);

        for line in lines {
            self.put_line(&mut buf, line.as_ref());
            buf.put_slice(terminator);
        }

        buf.freeze()
    }

    fn put_line(&self, buf: &mut BytesMut, line: &str) {
        match self.charset {
            Charset::Utf8 => buf.put_slice(line.as_bytes()),
            Charset::Ascii if line.is_ascii() => buf.put_slice(line.as_bytes()),
            Charset::Ascii => {
                for ch in line.chars() {
                    // is_ascii guarantees the cast is lossless
                    #[allow(clippy::cast_possible_truncation)]
                    let byte = if ch.is_ascii() { ch as u8 } else { b'?' };
                    buf.put_u8(byte);
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_every_line_terminated() {
        let encoder = ResponseEncoder::default();
        let bytes = encoder.encode(&["250-first", "250 last"]);
        assert_eq!(&bytes[..], b"250-first\r\n250 last\r\n");
    }

    #[test]
    fn test_empty_response_encodes_nothing() {
        let encoder = ResponseEncoder::default();
        let lines: [&str; 0] = [];
        assert!(encoder.encode(&lines).is_empty());
    }

    #[test]
    fn test_ascii_replaces_unmappable() {
        let encoder = ResponseEncoder::new(LineTerminator::CrLf, Charset::Ascii);
        let bytes = encoder.encode(&["250 Grüße"]);
        assert_eq!(&bytes[..], b"250 Gr??e\r\n");
    }

    #[test]
    fn test_utf8_passthrough_with_lf() {
        let encoder = ResponseEncoder::new(LineTerminator::Lf, Charset::Utf8);
        let bytes = encoder.encode(&["* OK Grüße"]);
        assert_eq!(&bytes[..], "* OK Grüße\n".as_bytes());
    }
}
