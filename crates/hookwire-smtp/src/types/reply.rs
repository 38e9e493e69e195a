//! SMTP reply types.

use hookwire_core::Response;

/// SMTP reply sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code (e.g., 250).
    pub code: ReplyCode,
    /// Reply text, one entry per line.
    pub message: Vec<String>,
}

impl Reply {
    /// Creates a reply from its lines of text.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec is not const-compatible
    pub fn new(code: ReplyCode, message: Vec<String>) -> Self {
        Self { code, message }
    }

    /// Creates a single-line reply.
    #[must_use]
    pub fn line(code: ReplyCode, text: impl Into<String>) -> Self {
        Self::new(code, vec![text.into()])
    }

    /// Replaces the code and/or text, as requested by a hook.
    ///
    /// Text is split into lines on `\n`.
    #[must_use]
    pub fn overridden(mut self, code: Option<u16>, text: Option<&str>) -> Self {
        if let Some(code) = code {
            self.code = ReplyCode::new(code);
        }
        if let Some(text) = text {
            self.message = text.lines().map(str::to_string).collect();
        }
        self
    }

    /// Returns true if this is a success reply (2xx).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient_error(&self) -> bool {
        self.code.is_transient()
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code.is_permanent()
    }

    /// Formats the reply as wire lines: `250-first`, ..., `250 last`.
    #[must_use]
    pub fn to_lines(&self) -> Vec<String> {
        if self.message.is_empty() {
            return vec![format!("{}", self.code)];
        }
        let last = self.message.len() - 1;
        self.message
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let sep = if i == last { ' ' } else { '-' };
                format!("{}{sep}{text}", self.code)
            })
            .collect()
    }
}

impl From<Reply> for Response {
    fn from(reply: Reply) -> Self {
        Self::new(reply.to_lines())
    }
}

/// SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// Creates a new reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns true if this is a success code (2xx).
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.0 >= 400 && self.0 < 500
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self.0 >= 500 && self.0 < 600
    }

    /// Returns true if this is an intermediate reply (3xx).
    #[must_use]
    pub const fn is_intermediate(self) -> bool {
        self.0 >= 300 && self.0 < 400
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Common reply codes
impl ReplyCode {
    /// 220 Service ready
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Service closing transmission channel
    pub const CLOSING: Self = Self(221);
    /// 235 Authentication succeeded
    pub const AUTH_OK: Self = Self(235);
    /// 250 Requested mail action okay, completed
    pub const OK: Self = Self(250);
    /// 252 Cannot verify user, will attempt delivery
    pub const CANNOT_VERIFY: Self = Self(252);
    /// 334 Continue with authentication
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354 Start mail input
    pub const START_DATA: Self = Self(354);
    /// 421 Service not available, closing transmission channel
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// 450 Mailbox unavailable (busy)
    pub const MAILBOX_BUSY: Self = Self(450);
    /// 451 Local error in processing
    pub const LOCAL_ERROR: Self = Self(451);
    /// 454 Temporary failure (TLS or authentication)
    pub const TEMPORARY_FAILURE: Self = Self(454);
    /// 500 Syntax error, command unrecognized
    pub const SYNTAX_ERROR: Self = Self(500);
    /// 501 Syntax error in parameters or arguments
    pub const PARAMETER_ERROR: Self = Self(501);
    /// 502 Command not implemented
    pub const NOT_IMPLEMENTED: Self = Self(502);
    /// 503 Bad sequence of commands
    pub const BAD_SEQUENCE: Self = Self(503);
    /// 504 Command parameter not implemented
    pub const PARAMETER_NOT_IMPLEMENTED: Self = Self(504);
    /// 530 Authentication required
    pub const AUTH_REQUIRED: Self = Self(530);
    /// 535 Authentication credentials invalid
    pub const AUTH_FAILED: Self = Self(535);
    /// 550 Mailbox unavailable (not found, access denied)
    pub const MAILBOX_UNAVAILABLE: Self = Self(550);
    /// 552 Exceeded storage allocation
    pub const EXCEEDED_STORAGE: Self = Self(552);
    /// 554 Transaction failed
    pub const TRANSACTION_FAILED: Self = Self(554);
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

    mod reply_code_tests {
        use super::*;

        #[test]
        fn classes() {
            assert!(ReplyCode::OK.is_success());
            assert!(ReplyCode::START_DATA.is_intermediate());
            assert!(ReplyCode::LOCAL_ERROR.is_transient());
            assert!(ReplyCode::AUTH_FAILED.is_permanent());
            assert!(!ReplyCode::OK.is_permanent());
        }

        #[test]
        fn display() {
            assert_eq!(format!("{}", ReplyCode::OK), "250");
            assert_eq!(format!("{}", ReplyCode::SYNTAX_ERROR), "500");
        }
    }

    mod reply_tests {
        use super::*;

        #[test]
        fn single_line() {
            let reply = Reply::line(ReplyCode::OK, "2.0.0 OK");
            assert_eq!(reply.to_lines(), ["250 2.0.0 OK"]);
        }

        #[test]
        fn multi_line_continuation_markers() {
            let reply = Reply::new(
                ReplyCode::OK,
                vec![
                    "mx.example.com Hello".to_string(),
                    "PIPELINING".to_string(),
                    "SIZE 1000".to_string(),
                ],
            );
            assert_eq!(
                reply.to_lines(),
                ["250-mx.example.com Hello", "250-PIPELINING", "250 SIZE 1000"]
            );
        }

        #[test]
        fn empty_text() {
            let reply = Reply::new(ReplyCode::AUTH_CONTINUE, vec![]);
            assert_eq!(reply.to_lines(), ["334"]);
        }

        #[test]
        fn hook_override() {
            let reply = Reply::line(ReplyCode::MAILBOX_UNAVAILABLE, "5.7.1 Rejected")
                .overridden(Some(554), Some("5.7.1 Go away\nReally"));
            assert!(reply.is_permanent_error());
            assert_eq!(reply.to_lines(), ["554-5.7.1 Go away", "554 Really"]);

            let reply = Reply::line(ReplyCode::OK, "2.1.0 OK").overridden(None, None);
            assert_eq!(reply.to_lines(), ["250 2.1.0 OK"]);
        }

        #[test]
        fn into_response() {
            let response: Response = Reply::line(ReplyCode::CLOSING, "bye").into();
            assert_eq!(response.lines(), ["221 bye"]);
            assert!(!response.is_end_session());
        }
    }
}
