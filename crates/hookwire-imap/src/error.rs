//! Error types for the IMAP protocol layer.

use thiserror::Error;

/// Errors raised while reading IMAP commands.
#[derive(Debug, Error)]
pub enum Error {
    /// Error from the protocol engine.
    #[error(transparent)]
    Core(#[from] hookwire_core::Error),

    /// Command syntax error.
    #[error("Protocol error at position {position}: {message}")]
    Parse {
        /// Byte position where the error occurred.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
