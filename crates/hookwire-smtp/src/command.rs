//! SMTP and LMTP command parsing.

use hookwire_core::DecodeError;

/// A parsed client command.
///
/// Paths are kept raw; whether angle brackets are required is a server
/// setting applied when the command is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Basic greeting
    Helo {
        /// Client domain
        domain: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client domain
        domain: String,
    },
    /// LHLO - LMTP greeting
    Lhlo {
        /// Client domain
        domain: String,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// AUTH - Authenticate
    Auth {
        /// SASL mechanism name
        mechanism: String,
        /// Initial response (base64), if sent with the command
        initial_response: Option<String>,
    },
    /// MAIL FROM - Start mail transaction
    Mail {
        /// Raw reverse-path
        path: String,
        /// ESMTP parameters (e.g., `SIZE=1000`)
        params: Vec<Parameter>,
    },
    /// RCPT TO - Specify recipient
    Rcpt {
        /// Raw forward-path
        path: String,
        /// ESMTP parameters
        params: Vec<Parameter>,
    },
    /// DATA - Start message data
    Data,
    /// RSET - Reset transaction
    Rset,
    /// VRFY - Verify address
    Vrfy {
        /// Address or user name to verify
        target: String,
    },
    /// NOOP - No operation
    Noop,
    /// QUIT - Close connection
    Quit,
    /// Any other verb, offered to unknown-command hooks.
    Unknown {
        /// Upper-cased verb
        verb: String,
        /// Remainder of the line
        args: String,
    },
}

/// ESMTP parameter: `KEYWORD` or `KEYWORD=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    /// Upper-cased keyword
    pub keyword: String,
    /// Value, if present
    pub value: Option<String>,
}

impl Command {
    /// Parses a command line (terminator already stripped).
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] for an empty line or malformed
    /// MAIL/RCPT/AUTH arguments.
    pub fn parse(line: &str) -> Result<Self, DecodeError> {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return Err(DecodeError::syntax("Empty command"));
        }

        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let verb = verb.to_ascii_uppercase();
        let rest = rest.trim();

        let command = match verb.as_str() {
            "HELO" => Self::Helo {
                domain: rest.to_string(),
            },
            "EHLO" => Self::Ehlo {
                domain: rest.to_string(),
            },
            "LHLO" => Self::Lhlo {
                domain: rest.to_string(),
            },
            "STARTTLS" => Self::StartTls,
            "AUTH" => {
                let mut parts = rest.split_whitespace();
                let mechanism = parts
                    .next()
                    .ok_or_else(|| DecodeError::arguments("Missing authentication mechanism"))?
                    .to_ascii_uppercase();
                Self::Auth {
                    mechanism,
                    initial_response: parts.next().map(str::to_string),
                }
            }
            "MAIL" => {
                let (path, params) = parse_path_argument(rest, "FROM:")
                    .ok_or_else(|| DecodeError::arguments("Usage: MAIL FROM:<sender>"))?;
                Self::Mail { path, params }
            }
            "RCPT" => {
                let (path, params) = parse_path_argument(rest, "TO:")
                    .ok_or_else(|| DecodeError::arguments("Usage: RCPT TO:<recipient>"))?;
                Self::Rcpt { path, params }
            }
            "DATA" => Self::Data,
            "RSET" => Self::Rset,
            "VRFY" => Self::Vrfy {
                target: rest.to_string(),
            },
            "NOOP" => Self::Noop,
            "QUIT" => Self::Quit,
            _ => Self::Unknown {
                verb,
                args: rest.to_string(),
            },
        };
        Ok(command)
    }

    /// Returns the command verb.
    #[must_use]
    pub fn verb(&self) -> &str {
        match self {
            Self::Helo { .. } => "HELO",
            Self::Ehlo { .. } => "EHLO",
            Self::Lhlo { .. } => "LHLO",
            Self::StartTls => "STARTTLS",
            Self::Auth { .. } => "AUTH",
            Self::Mail { .. } => "MAIL",
            Self::Rcpt { .. } => "RCPT",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Vrfy { .. } => "VRFY",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
            Self::Unknown { verb, .. } => verb,
        }
    }
}

/// Splits `FROM:<path> PARAM=value ...` into the path and its parameters.
fn parse_path_argument(rest: &str, prefix: &str) -> Option<(String, Vec<Parameter>)> {
    let head = rest.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = rest[prefix.len()..].trim_start();
    if rest.is_empty() {
        return None;
    }

    // A bracketed path may contain spaces in a quoted local part.
    let split_at = if rest.starts_with('<') {
        rest.find('>').map_or(rest.len(), |end| end + 1)
    } else {
        rest.find(' ').unwrap_or(rest.len())
    };
    let (path, params) = rest.split_at(split_at);

    let params = params
        .split_whitespace()
        .map(|param| match param.split_once('=') {
            Some((keyword, value)) => Parameter {
                keyword: keyword.to_ascii_uppercase(),
                value: Some(value.to_string()),
            },
            None => Parameter {
                keyword: param.to_ascii_uppercase(),
                value: None,
            },
        })
        .collect();

    Some((path.to_string(), params))
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
    use hookwire_core::DecodeErrorKind;

    #[test]
    fn test_parse_greetings() {
        assert_eq!(
            Command::parse("EHLO client.example.com").unwrap(),
            Command::Ehlo {
                domain: "client.example.com".to_string()
            }
        );
        assert_eq!(
            Command::parse("helo x").unwrap(),
            Command::Helo {
                domain: "x".to_string()
            }
        );
        assert_eq!(
            Command::parse("LHLO").unwrap(),
            Command::Lhlo {
                domain: String::new()
            }
        );
    }

    #[test]
    fn test_parse_mail_with_params() {
        let cmd = Command::parse("MAIL FROM:<a@example.com> SIZE=1000 BODY=8BITMIME").unwrap();
        let Command::Mail { path, params } = cmd else {
            panic!("expected MAIL");
        };
        assert_eq!(path, "<a@example.com>");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].keyword, "SIZE");
        assert_eq!(params[0].value.as_deref(), Some("1000"));
    }

    #[test]
    fn test_parse_mail_lenient_spacing() {
        let cmd = Command::parse("mail from: <a@example.com>").unwrap();
        assert_eq!(
            cmd,
            Command::Mail {
                path: "<a@example.com>".to_string(),
                params: vec![]
            }
        );
    }

    #[test]
    fn test_parse_unbracketed_rcpt() {
        let cmd = Command::parse("RCPT TO:b@example.com").unwrap();
        assert_eq!(
            cmd,
            Command::Rcpt {
                path: "b@example.com".to_string(),
                params: vec![]
            }
        );
    }

    #[test]
    fn test_parse_null_sender() {
        let cmd = Command::parse("MAIL FROM:<>").unwrap();
        assert!(matches!(cmd, Command::Mail { path, .. } if path == "<>"));
    }

    #[test]
    fn test_malformed_mail() {
        let err = Command::parse("MAIL TO:<a@b.c>").unwrap_err();
        assert_eq!(err.kind(), DecodeErrorKind::Arguments);
        assert!(Command::parse("MAIL FROM:").is_err());
        assert!(Command::parse("RCPT").is_err());
    }

    #[test]
    fn test_parse_auth() {
        assert_eq!(
            Command::parse("AUTH plain AGFsaWNlAHNlY3JldA==").unwrap(),
            Command::Auth {
                mechanism: "PLAIN".to_string(),
                initial_response: Some("AGFsaWNlAHNlY3JldA==".to_string())
            }
        );
        assert!(Command::parse("AUTH").is_err());
    }

    #[test]
    fn test_parse_unknown_and_empty() {
        let cmd = Command::parse("xclient name=foo").unwrap();
        assert_eq!(cmd.verb(), "XCLIENT");
        assert!(matches!(cmd, Command::Unknown { args, .. } if args == "name=foo"));

        let err = Command::parse("   ").unwrap_err();
        assert_eq!(err.kind(), DecodeErrorKind::Syntax);
    }
}
