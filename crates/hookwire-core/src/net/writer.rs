//! Response writer backed by a channel to the connection task.
//!
//! The transport may drain on any thread (deferred completions run on the
//! executor), so it never touches the socket. It hands whole units to the
//! connection task, which performs the I/O in order.

use std::io;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::transport::{ResponseWriter, Upgrade};

/// A unit of outbound work for the connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Bytes to write.
    Bytes(Bytes),
    /// Perform the TLS handshake before anything that follows.
    StartTls,
    /// Flush and close.
    Close,
}

/// [`ResponseWriter`] sending [`Outbound`] messages over a channel.
#[derive(Debug, Clone)]
pub struct ChannelWriter {
    tx: mpsc::UnboundedSender<Outbound>,
    start_tls: bool,
}

impl ChannelWriter {
    /// Creates a writer and the receiver the connection task reads.
    #[must_use]
    pub fn channel(start_tls: bool) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, start_tls }, rx)
    }

    fn send(&self, message: Outbound) -> io::Result<()> {
        self.tx
            .send(message)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "connection task has exited"))
    }
}

impl ResponseWriter for ChannelWriter {
    fn write_bytes(&mut self, bytes: Bytes) -> io::Result<()> {
        self.send(Outbound::Bytes(bytes))
    }

    fn supports_start_tls(&self) -> bool {
        self.start_tls
    }

    /// Queues the handshake. The connection task performs it and reports
    /// the outcome, so the upgrade is always [`Upgrade::Pending`] here.
    fn start_tls(&mut self) -> io::Result<Upgrade> {
        if !self.start_tls {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "no TLS acceptor configured",
            ));
        }
        self.send(Outbound::StartTls)?;
        Ok(Upgrade::Pending)
    }

    fn close(&mut self) {
        let _ = self.send(Outbound::Close);
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
    fn test_messages_in_order() {
        let (mut writer, mut rx) = ChannelWriter::channel(true);
        writer.write_bytes(Bytes::from_static(b"220 go\r\n")).unwrap();
        assert_eq!(writer.start_tls().unwrap(), Upgrade::Pending);
        writer.close();

        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Bytes(Bytes::from_static(b"220 go\r\n"))
        );
        assert_eq!(rx.try_recv().unwrap(), Outbound::StartTls);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    }

    #[test]
    fn test_start_tls_without_acceptor_fails() {
        let (mut writer, _rx) = ChannelWriter::channel(false);
        assert!(!writer.supports_start_tls());
        assert_eq!(
            writer.start_tls().unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );
    }

    #[test]
    fn test_write_after_task_exit_fails() {
        let (mut writer, rx) = ChannelWriter::channel(false);
        drop(rx);
        let err = writer.write_bytes(Bytes::from_static(b"x")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
