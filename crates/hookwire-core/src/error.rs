//! Error types for the protocol engine.

use thiserror::Error;

use crate::chain::Capability;

/// Errors that can occur while wiring or serving a connection.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the underlying connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS configuration or handshake error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The handler chain is inconsistent.
    #[error("Wiring error: {0}")]
    Wiring(#[from] WiringError),

    /// The connection was closed; nothing more will be written.
    #[error("Connection closed")]
    Closed,

    /// A protocol upgrade (STARTTLS) was requested but did not happen.
    #[error("Protocol upgrade failed: {0}")]
    UpgradeFailed(String),

    /// The per-connection response queue reached its configured depth.
    #[error("Response queue full ({0} pending)")]
    QueueFull(usize),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An inbound line exceeded the configured maximum length.
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors detected while wiring a handler chain.
///
/// These are never recoverable at runtime and must surface before any
/// connection is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WiringError {
    /// A handler requires a capability that no other handler provides.
    #[error("handler `{handler}` requires capability `{capability}` but no other handler provides it")]
    MissingCapability {
        /// Name of the handler declaring the requirement.
        handler: String,
        /// The capability that could not be found.
        capability: Capability,
    },

    /// A second hook was registered at an extension point that accepts one.
    #[error("extension point `{point}` accepts a single hook, `{handler}` registered another")]
    DuplicateSingleton {
        /// Extension point name.
        point: &'static str,
        /// Handler that attempted the second registration.
        handler: String,
    },

    /// Two extension points share a name but expect different hook types.
    #[error("extension point `{point}` is registered with conflicting hook types")]
    HookTypeMismatch {
        /// Extension point name.
        point: &'static str,
    },
}

/// Classification of a command decoding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// The command line could not be understood at all.
    Syntax,
    /// The command was recognized but its arguments are invalid.
    Arguments,
    /// The line exceeded the maximum length and was discarded.
    LineTooLong,
    /// The line was not valid in the protocol's character set.
    Encoding,
}

/// A command could not be decoded.
///
/// Reported to the client as a protocol-level negative response. The
/// connection stays open unless the error is marked fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DecodeError {
    kind: DecodeErrorKind,
    message: String,
    fatal: bool,
}

impl DecodeError {
    /// Creates a non-fatal decoding error.
    #[must_use]
    pub fn new(kind: DecodeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            fatal: false,
        }
    }

    /// Shorthand for a [`DecodeErrorKind::Syntax`] error.
    #[must_use]
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::Syntax, message)
    }

    /// Shorthand for a [`DecodeErrorKind::Arguments`] error.
    #[must_use]
    pub fn arguments(message: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::Arguments, message)
    }

    /// Marks the error as fatal: the connection closes after the reply.
    #[must_use]
    pub const fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    /// Returns the error classification.
    #[must_use]
    pub const fn kind(&self) -> DecodeErrorKind {
        self.kind
    }

    /// Returns the human-readable description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` if the connection must close after reporting.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.fatal
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
    fn test_wiring_error_names_capability() {
        let err = WiringError::MissingCapability {
            handler: "relay-guard".to_string(),
            capability: Capability::new("AUTH"),
        };
        let text = err.to_string();
        assert!(text.contains("relay-guard"));
        assert!(text.contains("AUTH"));
    }

    #[test]
    fn test_decode_error_fatal_flag() {
        let err = DecodeError::syntax("bad line");
        assert!(!err.is_fatal());
        assert_eq!(err.kind(), DecodeErrorKind::Syntax);

        let err = err.fatal();
        assert!(err.is_fatal());
        assert_eq!(err.message(), "bad line");
    }

    #[test]
    fn test_wiring_converts_into_error() {
        let err: Error = WiringError::HookTypeMismatch { point: "rcpt" }.into();
        assert!(matches!(err, Error::Wiring(_)));
    }
}
