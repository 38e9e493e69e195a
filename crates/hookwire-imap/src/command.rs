//! Tagged IMAP commands.

use crate::error::{Error, Result};
use crate::lexer::Lexer;

/// A command with its tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedCommand {
    /// Client-chosen tag echoed in the completion response.
    pub tag: String,
    /// The command.
    pub command: Command,
}

/// Commands understood in the not-authenticated and authenticated states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// CAPABILITY
    Capability,
    /// NOOP
    Noop,
    /// LOGOUT
    Logout,
    /// STARTTLS
    StartTls,
    /// LOGIN
    Login {
        /// User name
        username: String,
        /// Password
        password: String,
    },
    /// Any other command, offered to command hooks.
    Other {
        /// Upper-cased command name
        name: String,
        /// Unparsed arguments
        args: String,
    },
}

impl Command {
    /// Returns the command name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Capability => "CAPABILITY",
            Self::Noop => "NOOP",
            Self::Logout => "LOGOUT",
            Self::StartTls => "STARTTLS",
            Self::Login { .. } => "LOGIN",
            Self::Other { name, .. } => name,
        }
    }
}

/// Outcome of parsing one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    /// A well-formed command.
    Command(TaggedCommand),
    /// The tag was read but the rest is malformed; answered with a tagged BAD.
    Invalid {
        /// The command's tag
        tag: String,
        /// What was wrong
        message: String,
    },
}

/// Parses a command line.
///
/// # Errors
///
/// Returns an error only when no tag can be read; later problems are
/// reported as [`Parsed::Invalid`] so the reply can carry the tag.
pub fn parse(line: &[u8]) -> Result<Parsed> {
    let mut lexer = Lexer::new(line);
    let tag = lexer.read_tag()?.to_string();

    match parse_command(&mut lexer) {
        Ok(command) => Ok(Parsed::Command(TaggedCommand { tag, command })),
        Err(Error::Parse { message, .. }) => Ok(Parsed::Invalid { tag, message }),
        Err(err) => Err(err),
    }
}

fn parse_command(lexer: &mut Lexer<'_>) -> Result<Command> {
    lexer.expect_space()?;
    let name = lexer.read_atom()?.to_ascii_uppercase();

    let command = match name.as_str() {
        "CAPABILITY" => Command::Capability,
        "NOOP" => Command::Noop,
        "LOGOUT" => Command::Logout,
        "STARTTLS" => Command::StartTls,
        "LOGIN" => {
            lexer.expect_space()?;
            let username = lexer.read_astring()?;
            lexer.expect_space()?;
            let password = lexer.read_astring()?;
            Command::Login { username, password }
        }
        _ => {
            let args = if lexer.is_eof() {
                String::new()
            } else {
                lexer.expect_space()?;
                lexer.rest().to_string()
            };
            return Ok(Command::Other { name, args });
        }
    };
    lexer.expect_end()?;
    Ok(command)
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

    fn command(line: &str) -> TaggedCommand {
        match parse(line.as_bytes()).unwrap() {
            Parsed::Command(command) => command,
            Parsed::Invalid { message, .. } => panic!("invalid: {message}"),
        }
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(command("a1 capability").command, Command::Capability);
        assert_eq!(command("a2 NOOP").command, Command::Noop);
        assert_eq!(command("a3 LOGOUT").command, Command::Logout);
        assert_eq!(command("a4 StartTLS").command, Command::StartTls);
        assert_eq!(command("a4 StartTLS").tag, "a4");
    }

    #[test]
    fn test_login_atoms_and_quoted() {
        assert_eq!(
            command(r#"a1 LOGIN alice "sec ret""#).command,
            Command::Login {
                username: "alice".to_string(),
                password: "sec ret".to_string()
            }
        );
    }

    #[test]
    fn test_other_command_keeps_args() {
        assert_eq!(
            command("t ID (\"name\" \"mutt\")").command,
            Command::Other {
                name: "ID".to_string(),
                args: "(\"name\" \"mutt\")".to_string()
            }
        );
        assert_eq!(
            command("t select").command,
            Command::Other {
                name: "SELECT".to_string(),
                args: String::new()
            }
        );
    }

    #[test]
    fn test_invalid_after_tag() {
        let parsed = parse(b"a1 LOGIN alice").unwrap();
        assert!(matches!(parsed, Parsed::Invalid { tag, .. } if tag == "a1"));

        let parsed = parse(b"a2 NOOP extra").unwrap();
        assert!(matches!(parsed, Parsed::Invalid { .. }));

        let parsed = parse(b"a3").unwrap();
        assert!(matches!(parsed, Parsed::Invalid { .. }));
    }

    #[test]
    fn test_missing_tag() {
        assert!(parse(b" NOOP").is_err());
        assert!(parse(b"").is_err());
    }
}
