//! SMTP server settings.

/// Settings for an SMTP or LMTP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    /// Name announced in the greeting and the HELO reply.
    pub hello_name: String,
    /// Software name announced in the greeting.
    pub software_name: String,
    /// Maximum message size in bytes; 0 means unlimited.
    pub max_message_size: usize,
    /// Require `<...>` around MAIL FROM and RCPT TO paths.
    pub enforce_brackets: bool,
    /// Require HELO/EHLO before MAIL.
    pub enforce_helo: bool,
    /// Require AUTH before MAIL.
    pub auth_required: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            hello_name: "localhost".to_string(),
            software_name: "hookwire SMTP server".to_string(),
            max_message_size: 0,
            enforce_brackets: true,
            enforce_helo: true,
            auth_required: false,
        }
    }
}

impl SmtpConfig {
    /// Creates a builder with SMTP defaults.
    #[must_use]
    pub fn builder() -> SmtpConfigBuilder {
        SmtpConfigBuilder::default()
    }

    /// Creates a builder with LMTP defaults: bare paths accepted and no
    /// HELO required, since LHLO replaces it.
    #[must_use]
    pub fn lmtp() -> SmtpConfigBuilder {
        SmtpConfigBuilder {
            config: Self {
                software_name: "hookwire LMTP server".to_string(),
                enforce_brackets: false,
                enforce_helo: false,
                ..Self::default()
            },
        }
    }
}

/// Builder for [`SmtpConfig`].
#[derive(Debug, Clone, Default)]
pub struct SmtpConfigBuilder {
    config: SmtpConfig,
}

impl SmtpConfigBuilder {
    /// Sets the name announced to clients.
    #[must_use]
    pub fn hello_name(mut self, name: impl Into<String>) -> Self {
        self.config.hello_name = name.into();
        self
    }

    /// Sets the software name in the greeting.
    #[must_use]
    pub fn software_name(mut self, name: impl Into<String>) -> Self {
        self.config.software_name = name.into();
        self
    }

    /// Sets the maximum message size (0 for unlimited).
    #[must_use]
    pub const fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Requires angle brackets around paths.
    #[must_use]
    pub const fn enforce_brackets(mut self, enforce: bool) -> Self {
        self.config.enforce_brackets = enforce;
        self
    }

    /// Requires HELO/EHLO before MAIL.
    #[must_use]
    pub const fn enforce_helo(mut self, enforce: bool) -> Self {
        self.config.enforce_helo = enforce;
        self
    }

    /// Requires authentication before MAIL.
    #[must_use]
    pub const fn auth_required(mut self, required: bool) -> Self {
        self.config.auth_required = required;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> SmtpConfig {
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
    fn test_defaults() {
        let config = SmtpConfig::default();
        assert_eq!(config.hello_name, "localhost");
        assert_eq!(config.max_message_size, 0);
        assert!(config.enforce_brackets);
        assert!(config.enforce_helo);
        assert!(!config.auth_required);
    }

    #[test]
    fn test_lmtp_defaults() {
        let config = SmtpConfig::lmtp().hello_name("lmtp.example").build();
        assert_eq!(config.hello_name, "lmtp.example");
        assert!(!config.enforce_brackets);
        assert!(!config.enforce_helo);
    }

    #[test]
    fn test_builder() {
        let config = SmtpConfig::builder()
            .max_message_size(1024)
            .auth_required(true)
            .build();
        assert_eq!(config.max_message_size, 1024);
        assert!(config.auth_required);
        assert!(config.enforce_brackets);
    }
}
