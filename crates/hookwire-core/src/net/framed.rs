//! Inbound line framing.
//!
//! Lines end with LF, optionally preceded by CR; the terminator is stripped.
//! A line longer than the configured maximum is dropped up to its
//! terminator and reported once as [`Frame::Oversized`], so a client cannot
//! make the server buffer unbounded input.

use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

const INITIAL_CAPACITY: usize = 4096;

/// One unit of inbound input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line without its terminator.
    Line(Bytes),
    /// A line exceeded the limit; this many bytes were discarded.
    Oversized(usize),
}

/// Accumulates bytes read from a connection and splits them into frames.
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
    max_line_length: usize,
    discarded: Option<usize>,
}

impl LineBuffer {
    /// Creates a buffer accepting lines up to `max_line_length` bytes.
    #[must_use]
    pub fn new(max_line_length: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(
                INITIAL_CAPACITY.min(max_line_length.saturating_add(2)),
            ),
            max_line_length,
            discarded: None,
        }
    }

    /// Reads more bytes from `reader`. Returns `0` at end of stream.
    ///
    /// Cancel safe: if the future is dropped before completing, no data
    /// has been consumed.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from the reader.
    pub async fn read_from<R>(&mut self, reader: &mut R) -> io::Result<usize>
    where
        R: AsyncRead + Unpin,
    {
        reader.read_buf(&mut self.buf).await
    }

    /// Appends raw bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Frame> {
        if let Some(discarded) = self.discarded {
            return match find_lf(&self.buf) {
                Some(pos) => {
                    let _ = self.buf.split_to(pos + 1);
                    self.discarded = None;
                    Some(Frame::Oversized(discarded + pos + 1))
                }
                None => {
                    self.discarded = Some(discarded + self.buf.len());
                    self.buf.clear();
                    None
                }
            };
        }

        match find_lf(&self.buf) {
            Some(pos) => {
                let mut line = self.buf.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(pos - 1);
                }
                if line.len() > self.max_line_length {
                    Some(Frame::Oversized(pos + 1))
                } else {
                    Some(Frame::Line(line.freeze()))
                }
            }
            None if self.buf.len() > self.max_line_length.saturating_add(1) => {
                self.discarded = Some(self.buf.len());
                self.buf.clear();
                None
            }
            None => None,
        }
    }

    /// Drops everything buffered.
    ///
    /// Used when the connection is upgraded: plaintext sent ahead of the
    /// handshake must not be interpreted as secure input.
    pub fn clear(&mut self) -> usize {
        let dropped = self.buf.len();
        self.buf.clear();
        self.discarded = None;
        dropped
    }

    /// Returns the number of buffered bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

fn find_lf(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
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

    fn line(s: &str) -> Frame {
        Frame::Line(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn test_splits_crlf_and_lf() {
        let mut buf = LineBuffer::new(100);
        buf.extend(b"EHLO a\r\nNOOP\nQU");

        assert_eq!(buf.next_frame(), Some(line("EHLO a")));
        assert_eq!(buf.next_frame(), Some(line("NOOP")));
        assert_eq!(buf.next_frame(), None);

        buf.extend(b"IT\r\n");
        assert_eq!(buf.next_frame(), Some(line("QUIT")));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_line() {
        let mut buf = LineBuffer::new(100);
        buf.extend(b"\r\n");
        assert_eq!(buf.next_frame(), Some(line("")));
    }

    #[test]
    fn test_line_at_limit_accepted() {
        let mut buf = LineBuffer::new(4);
        buf.extend(b"NOOP\r\n");
        assert_eq!(buf.next_frame(), Some(line("NOOP")));
    }

    #[test]
    fn test_complete_oversized_line() {
        let mut buf = LineBuffer::new(4);
        buf.extend(b"TOOLONG\r\nNOOP\r\n");

        assert_eq!(buf.next_frame(), Some(Frame::Oversized(9)));
        assert_eq!(buf.next_frame(), Some(line("NOOP")));
    }

    #[test]
    fn test_oversized_line_across_reads() {
        let mut buf = LineBuffer::new(4);
        buf.extend(b"ABCDEFGH");
        assert_eq!(buf.next_frame(), None);
        assert!(buf.is_empty());

        buf.extend(b"IJKL");
        assert_eq!(buf.next_frame(), None);

        buf.extend(b"M\r\nNOOP\r\n");
        assert_eq!(buf.next_frame(), Some(Frame::Oversized(15)));
        assert_eq!(buf.next_frame(), Some(line("NOOP")));
    }

    #[test]
    fn test_unbounded_limit() {
        let mut buf = LineBuffer::new(usize::MAX);
        buf.extend(b"DATA\r\npartial");
        assert_eq!(buf.next_frame(), Some(line("DATA")));
        assert_eq!(buf.next_frame(), None);
        assert_eq!(buf.len(), 7);
    }

    #[test]
    fn test_clear_drops_pipelined_input() {
        let mut buf = LineBuffer::new(100);
        buf.extend(b"MAIL FROM:<a@b>\r\n");
        assert_eq!(buf.clear(), 17);
        assert_eq!(buf.next_frame(), None);
    }

    #[tokio::test]
    async fn test_read_from_mock() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"HELO cli")
            .read(b"ent\r\nQUIT\r\n")
            .build();
        let mut buf = LineBuffer::new(100);
        let mut frames = Vec::new();

        loop {
            while let Some(frame) = buf.next_frame() {
                frames.push(frame);
            }
            if buf.read_from(&mut reader).await.unwrap() == 0 {
                break;
            }
        }

        assert_eq!(frames, [line("HELO client"), line("QUIT")]);
    }
}
