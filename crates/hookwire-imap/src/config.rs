//! IMAP server settings.

/// Settings for the IMAP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapConfig {
    /// Name in the greeting and BYE responses.
    pub server_name: String,
    /// Refuse LOGIN until the connection is secure, and advertise
    /// `LOGINDISABLED` meanwhile.
    pub plain_auth_disallowed: bool,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            server_name: "hookwire IMAP server".to_string(),
            plain_auth_disallowed: false,
        }
    }
}

impl ImapConfig {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn builder() -> ImapConfigBuilder {
        ImapConfigBuilder::default()
    }
}

/// Builder for [`ImapConfig`].
#[derive(Debug, Clone, Default)]
pub struct ImapConfigBuilder {
    config: ImapConfig,
}

impl ImapConfigBuilder {
    /// Sets the server name.
    #[must_use]
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Disallows LOGIN on connections without TLS.
    #[must_use]
    pub const fn plain_auth_disallowed(mut self, disallowed: bool) -> Self {
        self.config.plain_auth_disallowed = disallowed;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ImapConfig {
        self.config
    }
}
