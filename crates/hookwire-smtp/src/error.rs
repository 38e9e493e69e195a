//! Error types for the SMTP protocol layer.

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error from the protocol engine.
    #[error(transparent)]
    Core(#[from] hookwire_core::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<hookwire_core::WiringError> for Error {
    fn from(err: hookwire_core::WiringError) -> Self {
        Self::Core(err.into())
    }
}
