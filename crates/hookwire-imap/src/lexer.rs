//! Tokenizer for IMAP command lines.
//!
//! Reads tags, atoms and strings from one line. Literals (`{n}`) span
//! lines and are rejected.

use crate::error::{Error, Result};

/// Cursor over a command line.
#[derive(Debug)]
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a lexer over `input` (no line terminator).
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Returns the current position.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Returns `true` once all input is consumed.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    /// Reads a command tag: astring characters except `+`.
    ///
    /// # Errors
    ///
    /// Returns an error if no tag character is present.
    pub fn read_tag(&mut self) -> Result<&'a str> {
        let tag = self.take_while(|b| is_astring_char(b) && b != b'+')?;
        if tag.is_empty() {
            return Err(self.error("Missing command tag"));
        }
        Ok(tag)
    }

    /// Reads an atom.
    ///
    /// # Errors
    ///
    /// Returns an error if no atom character is present.
    pub fn read_atom(&mut self) -> Result<&'a str> {
        let atom = self.take_while(is_atom_char)?;
        if atom.is_empty() {
            return Err(self.error("Expected atom"));
        }
        Ok(atom)
    }

    /// Reads an astring (atom or quoted string).
    ///
    /// # Errors
    ///
    /// Returns an error for a literal, an unterminated string or an empty
    /// atom.
    pub fn read_astring(&mut self) -> Result<String> {
        match self.peek() {
            Some(b'"') => self.read_quoted_string(),
            Some(b'{') => Err(self.error("Literals are not supported")),
            _ => {
                let atom = self.take_while(is_astring_char)?;
                if atom.is_empty() {
                    return Err(self.error("Expected astring"));
                }
                Ok(atom.to_string())
            }
        }
    }

    /// Reads a quoted string.
    fn read_quoted_string(&mut self) -> Result<String> {
        self.advance(); // opening quote

        let mut result = Vec::new();
        loop {
            match self.advance() {
                Some(b'"') => break,
                Some(b'\\') => match self.advance() {
                    Some(c @ (b'"' | b'\\')) => result.push(c),
                    Some(c) => return Err(self.error(&format!("Invalid escape: \\{}", c as char))),
                    None => return Err(self.error("Unexpected end of line in quoted string")),
                },
                Some(c) => result.push(c),
                None => return Err(self.error("Unexpected end of line in quoted string")),
            }
        }

        String::from_utf8(result).map_err(|_| self.error("Invalid UTF-8 in quoted string"))
    }

    /// Consumes exactly one space.
    ///
    /// # Errors
    ///
    /// Returns an error if the next byte is not a space.
    pub fn expect_space(&mut self) -> Result<()> {
        match self.advance() {
            Some(b' ') => Ok(()),
            _ => Err(self.error("Expected space")),
        }
    }

    /// Returns the unread remainder of the line.
    #[must_use]
    pub fn rest(&mut self) -> &'a str {
        let rest = std::str::from_utf8(&self.input[self.pos..]).unwrap_or("");
        self.pos = self.input.len();
        rest
    }

    /// Fails unless the line is fully consumed.
    ///
    /// # Errors
    ///
    /// Returns an error naming the unexpected trailing input.
    pub fn expect_end(&self) -> Result<()> {
        if self.is_eof() {
            Ok(())
        } else {
            Err(self.error("Unexpected extra arguments"))
        }
    }

    fn take_while(&mut self, accept: impl Fn(u8) -> bool) -> Result<&'a str> {
        let start = self.pos;
        while self.peek().is_some_and(&accept) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.input[start..self.pos]).map_err(|_| self.error("Invalid UTF-8"))
    }

    fn error(&self, message: &str) -> Error {
        Error::Parse {
            position: self.pos,
            message: message.to_string(),
        }
    }
}

/// Returns true if the byte is a valid atom character.
#[must_use]
pub const fn is_atom_char(b: u8) -> bool {
    // atom-specials = "(" / ")" / "{" / SP / CTL / "%" / "*" / DQUOTE / "\" / "]"
    b > 0x20 && b < 0x7F && !is_atom_special(b)
}

/// Returns true if the byte is an atom special character.
#[must_use]
pub const fn is_atom_special(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'{' | b' ' | b'%' | b'*' | b'"' | b'\\' | b']'
    ) || b < 0x20
        || b == 0x7F
}

/// ASTRING-CHAR: an atom character or `]`.
const fn is_astring_char(b: u8) -> bool {
    is_atom_char(b) || b == b']'
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
    fn test_tag_and_atom() {
        let mut lexer = Lexer::new(b"a001 LOGIN");
        assert_eq!(lexer.read_tag().unwrap(), "a001");
        lexer.expect_space().unwrap();
        assert_eq!(lexer.read_atom().unwrap(), "LOGIN");
        assert!(lexer.is_eof());
    }

    #[test]
    fn test_tag_rejects_plus_and_star() {
        assert!(Lexer::new(b"+ x").read_tag().is_err());
        assert!(Lexer::new(b"* x").read_tag().is_err());
    }

    #[test]
    fn test_quoted_string_escaped() {
        let mut lexer = Lexer::new(br#""pa\"ss\\word""#);
        assert_eq!(lexer.read_astring().unwrap(), r#"pa"ss\word"#);
    }

    #[test]
    fn test_unterminated_quoted_string() {
        let err = Lexer::new(b"\"open").read_astring().unwrap_err();
        assert!(matches!(err, Error::Parse { position: 5, .. }));
    }

    #[test]
    fn test_literal_rejected() {
        assert!(Lexer::new(b"{5}").read_astring().is_err());
    }

    #[test]
    fn test_rest() {
        let mut lexer = Lexer::new(b"X ID (\"name\" \"x\")");
        lexer.read_atom().unwrap();
        lexer.expect_space().unwrap();
        assert_eq!(lexer.rest(), "ID (\"name\" \"x\")");
        lexer.expect_end().unwrap();
    }
}
