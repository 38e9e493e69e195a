//! Server settings file.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use hookwire_core::Config;
use hookwire_imap::ImapConfig;
use hookwire_smtp::SmtpConfig;
use serde::Deserialize;

/// Settings read from the optional JSON file.
///
/// Every field may be omitted; command-line flags take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Host name used in greetings.
    pub hello_name: Option<String>,
    /// Largest accepted message in bytes, 0 for no limit.
    pub max_message_size: usize,
    /// Longest accepted command line in bytes.
    pub max_line_length: Option<usize>,
    /// Idle connections are closed after this many seconds.
    pub idle_timeout_secs: Option<u64>,
    /// Bound on queued responses per connection.
    pub max_response_queue_depth: Option<usize>,
    /// SMTP: require AUTH before MAIL.
    pub auth_required: bool,
    /// IMAP: refuse LOGIN without TLS.
    pub plain_auth_disallowed: bool,
    /// Domains accepted in RCPT TO. Empty accepts all.
    pub local_domains: Vec<String>,
    /// User name to password table for AUTH and LOGIN.
    pub users: BTreeMap<String, String>,
}

impl Settings {
    /// Reads settings from `path`.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    fn parse(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str(contents)
    }

    /// Engine settings shared by every protocol.
    pub fn engine(&self) -> Config {
        let mut builder = Config::builder();
        if let Some(depth) = self.max_response_queue_depth {
            builder = builder.max_response_queue_depth(depth);
        }
        if let Some(length) = self.max_line_length {
            builder = builder.max_line_length(length);
        }
        if let Some(secs) = self.idle_timeout_secs {
            builder = builder.idle_timeout(Duration::from_secs(secs));
        }
        builder.build()
    }

    /// SMTP or LMTP settings.
    pub fn smtp(&self, lmtp: bool) -> SmtpConfig {
        let mut builder = if lmtp {
            SmtpConfig::lmtp()
        } else {
            SmtpConfig::builder()
        };
        if let Some(name) = &self.hello_name {
            builder = builder.hello_name(name.clone());
        }
        builder
            .max_message_size(self.max_message_size)
            .auth_required(self.auth_required)
            .build()
    }

    pub fn imap(&self) -> ImapConfig {
        let mut builder = ImapConfig::builder();
        if let Some(name) = &self.hello_name {
            builder = builder.server_name(name.clone());
        }
        builder
            .plain_auth_disallowed(self.plain_auth_disallowed)
            .build()
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
    fn empty_file_uses_defaults() {
        let settings = Settings::parse("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.engine(), Config::default());
        assert_eq!(settings.smtp(false), SmtpConfig::default());
    }

    #[test]
    fn parses_every_field() {
        let settings = Settings::parse(
            r#"{
                "hello_name": "mx.example.org",
                "max_message_size": 1048576,
                "max_line_length": 2048,
                "idle_timeout_secs": 300,
                "max_response_queue_depth": 64,
                "auth_required": true,
                "plain_auth_disallowed": true,
                "local_domains": ["example.org"],
                "users": {"alice": "secret"}
            }"#,
        )
        .unwrap();

        let engine = settings.engine();
        assert_eq!(engine.max_line_length, 2048);
        assert_eq!(engine.idle_timeout, Some(Duration::from_secs(300)));
        assert_eq!(engine.max_response_queue_depth, Some(64));

        let smtp = settings.smtp(false);
        assert_eq!(smtp.hello_name, "mx.example.org");
        assert_eq!(smtp.max_message_size, 1_048_576);
        assert!(smtp.auth_required);

        let imap = settings.imap();
        assert_eq!(imap.server_name, "mx.example.org");
        assert!(imap.plain_auth_disallowed);

        assert_eq!(settings.users.get("alice").map(String::as_str), Some("secret"));
    }

    #[test]
    fn lmtp_relaxes_address_rules() {
        let smtp = Settings::default().smtp(true);
        assert!(!smtp.enforce_brackets);
        assert!(!smtp.enforce_helo);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(Settings::parse(r#"{"helo": "x"}"#).is_err());
    }
}
