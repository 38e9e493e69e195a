//! Engine configuration types.

use std::time::Duration;

/// Default maximum inbound line length.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Line terminator written after every response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineTerminator {
    /// `\r\n`, used by SMTP, LMTP and IMAP.
    #[default]
    CrLf,
    /// Bare `\n`.
    Lf,
}

impl LineTerminator {
    /// Returns the terminator bytes.
    #[must_use]
    pub const fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::CrLf => b"\r\n",
            Self::Lf => b"\n",
        }
    }
}

/// Character set used to encode response lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    /// US-ASCII. Characters outside the range are written as `?`.
    #[default]
    Ascii,
    /// UTF-8, written as is.
    Utf8,
}

/// Protocol engine configuration.
///
/// Shared immutably by every connection served with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of responses queued per connection, `None` for unbounded.
    pub max_response_queue_depth: Option<usize>,
    /// Terminator appended to each response line.
    pub line_terminator: LineTerminator,
    /// Encoding of response lines.
    pub charset: Charset,
    /// Maximum accepted inbound line length in bytes.
    pub max_line_length: usize,
    /// Close connections that stay silent for this long.
    pub idle_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_response_queue_depth: None,
            line_terminator: LineTerminator::CrLf,
            charset: Charset::Ascii,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            idle_timeout: None,
        }
    }
}

impl Config {
    /// Creates a configuration with protocol defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Limits the per-connection response queue.
    #[must_use]
    pub const fn max_response_queue_depth(mut self, depth: usize) -> Self {
        self.config.max_response_queue_depth = Some(depth);
        self
    }

    /// Sets the response line terminator.
    #[must_use]
    pub const fn line_terminator(mut self, terminator: LineTerminator) -> Self {
        self.config.line_terminator = terminator;
        self
    }

    /// Sets the response charset.
    #[must_use]
    pub const fn charset(mut self, charset: Charset) -> Self {
        self.config.charset = charset;
        self
    }

    /// Sets the maximum inbound line length.
    #[must_use]
    pub const fn max_line_length(mut self, length: usize) -> Self {
        self.config.max_line_length = length;
        self
    }

    /// Sets the idle timeout.
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = Some(timeout);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> Config {
        self.config
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
    fn test_config_defaults() {
        let config = Config::new();
        assert_eq!(config.max_response_queue_depth, None);
        assert_eq!(config.line_terminator, LineTerminator::CrLf);
        assert_eq!(config.charset, Charset::Ascii);
        assert_eq!(config.max_line_length, DEFAULT_MAX_LINE_LENGTH);
        assert!(config.idle_timeout.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder()
            .max_response_queue_depth(32)
            .line_terminator(LineTerminator::Lf)
            .charset(Charset::Utf8)
            .max_line_length(1000)
            .idle_timeout(Duration::from_secs(300))
            .build();

        assert_eq!(config.max_response_queue_depth, Some(32));
        assert_eq!(config.line_terminator.as_bytes(), b"\n");
        assert_eq!(config.charset, Charset::Utf8);
        assert_eq!(config.max_line_length, 1000);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(300)));
    }
}
