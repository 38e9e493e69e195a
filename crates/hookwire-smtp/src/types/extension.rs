//! SMTP service extensions advertised in the EHLO/LHLO reply.

use std::fmt;

use hookwire_core::Capability;

/// PIPELINING (RFC 2920).
pub const PIPELINING: Capability = Capability::new("PIPELINING");
/// 8BITMIME (RFC 6152).
pub const EIGHT_BIT_MIME: Capability = Capability::new("8BITMIME");
/// ENHANCEDSTATUSCODES (RFC 2034).
pub const ENHANCED_STATUS_CODES: Capability = Capability::new("ENHANCEDSTATUSCODES");
/// SMTPUTF8 (RFC 6531).
pub const SMTPUTF8: Capability = Capability::new("SMTPUTF8");
/// Offered by handlers that verify AUTH credentials. Advertised as
/// `AUTH PLAIN` by the protocol, not under this name.
pub const AUTH: Capability = Capability::internal("AUTH");

/// A line of the EHLO/LHLO reply after the greeting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// STARTTLS - TLS upgrade
    StartTls,
    /// AUTH - Authentication
    Auth(Vec<AuthMechanism>),
    /// SIZE - Maximum message size
    Size(Option<usize>),
    /// Keyword contributed by a handler capability
    Keyword(&'static str),
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartTls => f.write_str("STARTTLS"),
            Self::Auth(mechanisms) => {
                f.write_str("AUTH")?;
                for mechanism in mechanisms {
                    write!(f, " {}", mechanism.as_str())?;
                }
                Ok(())
            }
            Self::Size(Some(size)) => write!(f, "SIZE {size}"),
            Self::Size(None) => f.write_str("SIZE"),
            Self::Keyword(keyword) => f.write_str(keyword),
        }
    }
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN - plaintext authentication
    Plain,
    /// LOGIN - legacy plaintext
    Login,
}

impl AuthMechanism {
    /// Parses an authentication mechanism name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            _ => None,
        }
    }

    /// Returns the mechanism name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
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
    fn display_extensions() {
        assert_eq!(Extension::StartTls.to_string(), "STARTTLS");
        assert_eq!(Extension::Size(Some(10_485_760)).to_string(), "SIZE 10485760");
        assert_eq!(Extension::Size(None).to_string(), "SIZE");
        assert_eq!(
            Extension::Auth(vec![AuthMechanism::Plain, AuthMechanism::Login]).to_string(),
            "AUTH PLAIN LOGIN"
        );
        assert_eq!(Extension::Keyword(PIPELINING.name()).to_string(), "PIPELINING");
    }

    #[test]
    fn parse_mechanisms() {
        assert_eq!(AuthMechanism::parse("plain"), Some(AuthMechanism::Plain));
        assert_eq!(AuthMechanism::parse("LOGIN"), Some(AuthMechanism::Login));
        assert_eq!(AuthMechanism::parse("CRAM-MD5"), None);
    }

    #[test]
    fn auth_capability_is_internal() {
        assert!(!AUTH.is_advertised());
        assert!(PIPELINING.is_advertised());
    }
}
