//! Response status, response codes and capabilities.

use std::fmt;

/// Status of a server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command completed successfully.
    Ok,
    /// Command failed (operational error).
    No,
    /// Command failed (protocol/syntax error).
    Bad,
    /// Server is closing the connection.
    Bye,
}

impl Status {
    /// Returns the wire keyword.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::No => "NO",
            Self::Bad => "BAD",
            Self::Bye => "BYE",
        }
    }
}

/// Response code carried in brackets before the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// ALERT: Human-readable message that MUST be shown to user.
    Alert,
    /// CAPABILITY: the server's current capabilities.
    Capability(Vec<Capability>),
    /// AUTHENTICATIONFAILED (RFC 5530)
    AuthenticationFailed,
    /// PRIVACYREQUIRED (RFC 5530): needs TLS first.
    PrivacyRequired,
    /// UNAVAILABLE (RFC 5530): temporary failure.
    Unavailable,
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alert => f.write_str("ALERT"),
            Self::Capability(capabilities) => {
                f.write_str("CAPABILITY")?;
                for capability in capabilities {
                    write!(f, " {capability}")?;
                }
                Ok(())
            }
            Self::AuthenticationFailed => f.write_str("AUTHENTICATIONFAILED"),
            Self::PrivacyRequired => f.write_str("PRIVACYREQUIRED"),
            Self::Unavailable => f.write_str("UNAVAILABLE"),
        }
    }
}

/// Server capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `IMAP4rev1` (RFC 3501)
    Imap4Rev1,
    /// STARTTLS support
    StartTls,
    /// LOGIN disabled
    LoginDisabled,
    /// Contributed by a handler in the chain
    Keyword(&'static str),
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Imap4Rev1 => f.write_str("IMAP4rev1"),
            Self::StartTls => f.write_str("STARTTLS"),
            Self::LoginDisabled => f.write_str("LOGINDISABLED"),
            Self::Keyword(keyword) => f.write_str(keyword),
        }
    }
}

/// Formats a status response line.
///
/// `tag` is `None` for untagged (`*`) responses.
#[must_use]
pub fn status_line(
    tag: Option<&str>,
    status: Status,
    code: Option<&ResponseCode>,
    text: &str,
) -> String {
    let tag = tag.unwrap_or("*");
    match code {
        Some(code) => format!("{tag} {} [{code}] {text}", status.as_str()),
        None => format!("{tag} {} {text}", status.as_str()),
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
    fn capability_code() {
        let code = ResponseCode::Capability(vec![
            Capability::Imap4Rev1,
            Capability::StartTls,
            Capability::Keyword("ID"),
        ]);
        assert_eq!(code.to_string(), "CAPABILITY IMAP4rev1 STARTTLS ID");
    }

    #[test]
    fn tagged_and_untagged_lines() {
        assert_eq!(
            status_line(Some("a1"), Status::No, Some(&ResponseCode::AuthenticationFailed), "nope"),
            "a1 NO [AUTHENTICATIONFAILED] nope"
        );
        assert_eq!(status_line(None, Status::Bye, None, "bye"), "* BYE bye");
    }
}
