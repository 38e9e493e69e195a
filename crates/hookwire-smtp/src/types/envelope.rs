//! Mail envelope handed to message and delivery hooks.

use bytes::Bytes;

use super::MailAddress;

/// A received message with its SMTP envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailEnvelope {
    sender: Option<MailAddress>,
    recipients: Vec<MailAddress>,
    content: Bytes,
}

impl MailEnvelope {
    /// Creates an envelope. `sender` is `None` for the null reverse-path.
    #[must_use]
    pub const fn new(
        sender: Option<MailAddress>,
        recipients: Vec<MailAddress>,
        content: Bytes,
    ) -> Self {
        Self {
            sender,
            recipients,
            content,
        }
    }

    /// Returns the reverse-path, `None` for bounces.
    #[must_use]
    pub const fn sender(&self) -> Option<&MailAddress> {
        self.sender.as_ref()
    }

    /// Returns the accepted recipients in declaration order.
    #[must_use]
    pub fn recipients(&self) -> &[MailAddress] {
        &self.recipients
    }

    /// Returns the message content, dot-unstuffed, with CRLF line endings.
    #[must_use]
    pub const fn content(&self) -> &Bytes {
        &self.content
    }

    /// Returns the message size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.content.len()
    }
}
