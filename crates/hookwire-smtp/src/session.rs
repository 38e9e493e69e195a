//! Per-connection SMTP state kept in session attributes.
//!
//! Everything here is stored through [`Session::set`], so a successful
//! STARTTLS discards it along with the rest of the session state.

use std::sync::{Mutex, PoisonError};

use bytes::BytesMut;
use hookwire_core::Session;

use crate::types::MailAddress;

pub(crate) const HELO: &str = "smtp.helo";
pub(crate) const USER: &str = "smtp.user";
pub(crate) const TRANSACTION: &str = "smtp.transaction";
pub(crate) const DATA: &str = "smtp.data";
pub(crate) const AUTH_PENDING: &str = "smtp.auth.pending";

/// An open mail transaction: the sender and recipients accepted so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    sender: Option<MailAddress>,
    recipients: Vec<MailAddress>,
    declared_size: Option<usize>,
}

impl Transaction {
    pub(crate) const fn new(sender: Option<MailAddress>, declared_size: Option<usize>) -> Self {
        Self {
            sender,
            recipients: Vec::new(),
            declared_size,
        }
    }

    /// Returns the reverse-path, `None` for the null sender.
    #[must_use]
    pub const fn sender(&self) -> Option<&MailAddress> {
        self.sender.as_ref()
    }

    /// Returns accepted recipients in declaration order.
    #[must_use]
    pub fn recipients(&self) -> &[MailAddress] {
        &self.recipients
    }

    /// Returns the `SIZE=` value given with MAIL FROM.
    #[must_use]
    pub const fn declared_size(&self) -> Option<usize> {
        self.declared_size
    }

    pub(crate) fn add_recipient(&mut self, recipient: MailAddress) {
        self.recipients.push(recipient);
    }

    pub(crate) fn into_parts(self) -> (Option<MailAddress>, Vec<MailAddress>) {
        (self.sender, self.recipients)
    }
}

/// Message content collected during DATA.
#[derive(Debug, Default)]
pub(crate) struct DataBuffer {
    content: BytesMut,
    overflowed: bool,
}

impl DataBuffer {
    /// Appends one unstuffed line. Past `limit` bytes (0 = none) the
    /// content is dropped and only the overflow is remembered.
    pub(crate) fn push(&mut self, line: &[u8], limit: usize) {
        if self.overflowed {
            return;
        }
        if limit > 0 && self.content.len() + line.len() + 2 > limit {
            self.overflowed = true;
            self.content = BytesMut::new();
            return;
        }
        self.content.extend_from_slice(line);
        self.content.extend_from_slice(b"\r\n");
    }

    pub(crate) fn mark_overflowed(&mut self) {
        self.overflowed = true;
        self.content = BytesMut::new();
    }

    pub(crate) fn take(&mut self) -> (BytesMut, bool) {
        (std::mem::take(&mut self.content), self.overflowed)
    }
}

pub(crate) fn with_data<R>(session: &Session, f: impl FnOnce(&mut DataBuffer) -> R) -> Option<R> {
    let buffer = session.get::<Mutex<DataBuffer>>(DATA)?;
    let mut guard = buffer.lock().unwrap_or_else(PoisonError::into_inner);
    Some(f(&mut guard))
}

/// Read access to SMTP state from hooks.
pub trait SmtpSessionExt {
    /// Domain announced with HELO, EHLO or LHLO.
    fn helo_domain(&self) -> Option<String>;

    /// User authenticated through AUTH.
    fn authenticated_user(&self) -> Option<String>;

    /// The open mail transaction, if MAIL FROM was accepted.
    fn transaction(&self) -> Option<Transaction>;
}

impl SmtpSessionExt for Session {
    fn helo_domain(&self) -> Option<String> {
        self.get_cloned(HELO)
    }

    fn authenticated_user(&self) -> Option<String> {
        self.get_cloned(USER)
    }

    fn transaction(&self) -> Option<Transaction> {
        self.get_cloned(TRANSACTION)
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
    fn data_buffer_appends_crlf() {
        let mut buffer = DataBuffer::default();
        buffer.push(b"Subject: hi", 0);
        buffer.push(b"", 0);
        buffer.push(b"body", 0);
        let (content, overflowed) = buffer.take();
        assert!(!overflowed);
        assert_eq!(&content[..], b"Subject: hi\r\n\r\nbody\r\n");
    }

    #[test]
    fn data_buffer_overflow_sticks() {
        let mut buffer = DataBuffer::default();
        buffer.push(b"12345678", 12);
        buffer.push(b"12345678", 12);
        buffer.push(b"1", 12);
        let (content, overflowed) = buffer.take();
        assert!(overflowed);
        assert!(content.is_empty());
    }

    #[test]
    fn session_ext_reads_attributes() {
        let session = Session::new();
        assert!(session.helo_domain().is_none());

        session.set(HELO, "client.example".to_string());
        let mut transaction = Transaction::new(None, Some(10));
        transaction.add_recipient(MailAddress::new("a@example.com").unwrap());
        session.set(TRANSACTION, transaction);

        assert_eq!(session.helo_domain().as_deref(), Some("client.example"));
        let transaction = session.transaction().unwrap();
        assert!(transaction.sender().is_none());
        assert_eq!(transaction.recipients().len(), 1);
        assert_eq!(transaction.declared_size(), Some(10));
    }
}
