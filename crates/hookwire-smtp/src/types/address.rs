//! Mail address types.

use crate::error::{Error, Result};

/// Address from a reverse-path or forward-path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MailAddress(String);

impl MailAddress {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        Self::validate(&addr)?;
        Ok(Self(addr))
    }

    /// Parses the path argument of MAIL FROM or RCPT TO.
    ///
    /// Accepts `<local@domain>`, strips a source route (`<@a,@b:x@y>`) and
    /// returns `None` for the null path `<>`. Without `enforce_brackets`, a
    /// bare `local@domain` is accepted too.
    ///
    /// # Errors
    ///
    /// Returns an error if brackets are required but missing, or if the
    /// address is invalid.
    pub fn parse_path(path: &str, enforce_brackets: bool) -> Result<Option<Self>> {
        let path = path.trim();
        let inner = match path.strip_prefix('<').and_then(|p| p.strip_suffix('>')) {
            Some(inner) => inner,
            None if enforce_brackets => {
                return Err(Error::InvalidAddress(format!(
                    "Address must be enclosed in brackets: {path}"
                )));
            }
            None => path,
        };

        let inner = match inner.split_once(':') {
            Some((route, mailbox)) if route.starts_with('@') => mailbox,
            _ => inner,
        };

        if inner.is_empty() {
            return Ok(None);
        }
        Self::new(inner).map(Some)
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the part before the `@`.
    #[must_use]
    pub fn local_part(&self) -> &str {
        self.0.rsplit_once('@').map_or("", |(local, _)| local)
    }

    /// Returns the part after the `@`.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map_or("", |(_, domain)| domain)
    }

    /// Validates an email address (basic validation).
    fn validate(addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(Error::InvalidAddress("Address cannot be empty".into()));
        }

        if addr.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::InvalidAddress(
                "Address cannot contain whitespace".into(),
            ));
        }

        let Some((local, domain)) = addr.rsplit_once('@') else {
            return Err(Error::InvalidAddress("Address must contain @".into()));
        };

        if local.is_empty() || domain.is_empty() {
            return Err(Error::InvalidAddress(
                "Local and domain parts cannot be empty".into(),
            ));
        }

        if domain.contains('@') || domain.starts_with('.') || domain.ends_with('.') {
            return Err(Error::InvalidAddress(format!("Invalid domain: {domain}")));
        }

        Ok(())
    }
}

impl std::fmt::Display for MailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
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
    fn test_valid_address() {
        let addr = MailAddress::new("user@example.com").unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
        assert_eq!(addr.local_part(), "user");
        assert_eq!(addr.domain(), "example.com");
    }

    #[test]
    fn test_quoted_local_part_with_at() {
        let addr = MailAddress::new("\"a@b\"@example.com").unwrap();
        assert_eq!(addr.domain(), "example.com");
    }

    #[test]
    fn test_invalid_addresses() {
        assert!(MailAddress::new("").is_err());
        assert!(MailAddress::new("userexample.com").is_err());
        assert!(MailAddress::new("@example.com").is_err());
        assert!(MailAddress::new("user@").is_err());
        assert!(MailAddress::new("us er@example.com").is_err());
        assert!(MailAddress::new("user@example.com.").is_err());
    }

    #[test]
    fn test_parse_bracketed_path() {
        let addr = MailAddress::parse_path("<user@example.com>", true).unwrap();
        assert_eq!(addr.unwrap().as_str(), "user@example.com");
    }

    #[test]
    fn test_parse_null_path() {
        assert!(MailAddress::parse_path("<>", true).unwrap().is_none());
    }

    #[test]
    fn test_parse_source_route() {
        let addr = MailAddress::parse_path("<@relay.example,@hop.example:user@example.com>", true)
            .unwrap()
            .unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
    }

    #[test]
    fn test_brackets_enforcement() {
        assert!(MailAddress::parse_path("user@example.com", true).is_err());

        let addr = MailAddress::parse_path("user@example.com", false).unwrap();
        assert_eq!(addr.unwrap().as_str(), "user@example.com");
    }
}
