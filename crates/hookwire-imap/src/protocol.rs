//! The IMAP command loop for the not-authenticated and authenticated
//! states.

use hookwire_core::{
    DecodeError, DecodeErrorKind, Error, HookList, HookResult, HookReturnCode, Protocol, Response,
    Session, WiredChain,
};

use crate::command::{self, Command, Parsed, TaggedCommand};
use crate::config::ImapConfig;
use crate::hooks::{COMMAND_HOOKS, CommandHook, LOGIN_HOOKS, LoginHook};
use crate::types::{Capability, ResponseCode, Status, status_line};

const USER: &str = "imap.user";

/// Read access to IMAP state from hooks.
pub trait ImapSessionExt {
    /// User authenticated through LOGIN.
    fn authenticated_user(&self) -> Option<String>;
}

impl ImapSessionExt for Session {
    fn authenticated_user(&self) -> Option<String> {
        self.get_cloned(USER)
    }
}

/// IMAP served through a wired handler chain.
pub struct ImapProtocol {
    config: ImapConfig,
    login: HookList<dyn LoginHook>,
    commands: HookList<dyn CommandHook>,
    keywords: Vec<&'static str>,
}

impl ImapProtocol {
    /// Creates the protocol over `chain`. Capabilities advertised by the
    /// chain's handlers are listed after `IMAP4rev1`.
    #[must_use]
    pub fn new(chain: &WiredChain, config: ImapConfig) -> Self {
        Self {
            config,
            login: chain.hooks(&LOGIN_HOOKS),
            commands: chain.hooks(&COMMAND_HOOKS),
            keywords: chain.advertised().map(|capability| capability.name()).collect(),
        }
    }

    /// Returns the server settings.
    #[must_use]
    pub const fn config(&self) -> &ImapConfig {
        &self.config
    }

    /// Capabilities in the session's current state.
    #[must_use]
    pub fn capabilities(&self, session: &Session) -> Vec<Capability> {
        let mut capabilities = vec![Capability::Imap4Rev1];
        capabilities.extend(self.keywords.iter().copied().map(Capability::Keyword));
        if session.start_tls_available() && !session.is_secure() {
            capabilities.push(Capability::StartTls);
        }
        if self.login_disabled(session) {
            capabilities.push(Capability::LoginDisabled);
        }
        capabilities
    }

    fn login_disabled(&self, session: &Session) -> bool {
        self.config.plain_auth_disallowed && !session.is_secure()
    }

    fn dispatch(&self, tagged: TaggedCommand, session: &Session) -> Response {
        let TaggedCommand { tag, command } = tagged;
        let tag = tag.as_str();
        match command {
            Command::Capability => {
                let capabilities = ResponseCode::Capability(self.capabilities(session));
                Response::new([
                    format!("* {capabilities}"),
                    status_line(Some(tag), Status::Ok, None, "CAPABILITY completed"),
                ])
            }
            Command::Noop => {
                Response::line(status_line(Some(tag), Status::Ok, None, "NOOP completed"))
            }
            Command::Logout => Response::new([
                status_line(
                    None,
                    Status::Bye,
                    None,
                    &format!("{} logging out", self.config.server_name),
                ),
                status_line(Some(tag), Status::Ok, None, "LOGOUT completed"),
            ])
            .end_session(),
            Command::StartTls => Self::start_tls(tag, session),
            Command::Login { username, password } => {
                self.login(tag, session, &username, &password)
            }
            Command::Other { name, args } => self.other(tag, session, &name, &args),
        }
    }

    fn start_tls(tag: &str, session: &Session) -> Response {
        if session.is_secure() {
            return Response::line(status_line(
                Some(tag),
                Status::Bad,
                None,
                "TLS already active",
            ));
        }
        if !session.start_tls_available() {
            return Response::line(status_line(
                Some(tag),
                Status::Bad,
                None,
                "STARTTLS not supported",
            ));
        }
        Response::start_tls([status_line(
            Some(tag),
            Status::Ok,
            None,
            "Begin TLS negotiation now",
        )])
    }

    fn login(&self, tag: &str, session: &Session, username: &str, password: &str) -> Response {
        if session.authenticated_user().is_some() {
            return Response::line(status_line(
                Some(tag),
                Status::Bad,
                None,
                "Already authenticated",
            ));
        }
        if self.login_disabled(session) {
            return Response::line(status_line(
                Some(tag),
                Status::No,
                Some(&ResponseCode::PrivacyRequired),
                "LOGIN disabled until TLS is active",
            ));
        }

        let result = self
            .login
            .run(|hook| hook.do_login(session, username, password));
        let code = result.as_ref().map_or(HookReturnCode::Deny, HookResult::code);
        let text = result.as_ref().and_then(HookResult::message);

        let line = match code {
            HookReturnCode::Ok | HookReturnCode::Declined => {
                session.set(USER, username.to_string());
                tracing::info!(session = %session.id(), user = %username, "logged in");
                let capabilities = ResponseCode::Capability(self.capabilities(session));
                status_line(
                    Some(tag),
                    Status::Ok,
                    Some(&capabilities),
                    text.unwrap_or("LOGIN completed"),
                )
            }
            HookReturnCode::Deny => {
                tracing::info!(session = %session.id(), user = %username, "login refused");
                status_line(
                    Some(tag),
                    Status::No,
                    Some(&ResponseCode::AuthenticationFailed),
                    text.unwrap_or("Authentication failed"),
                )
            }
            HookReturnCode::DenySoft => status_line(
                Some(tag),
                Status::No,
                Some(&ResponseCode::Unavailable),
                text.unwrap_or("Authentication temporarily unavailable"),
            ),
        };
        Response::line(line)
    }

    fn other(&self, tag: &str, session: &Session, name: &str, args: &str) -> Response {
        let result = self
            .commands
            .run(|hook| hook.do_command(session, name, args));
        let Some(result) = result else {
            return Response::line(status_line(
                Some(tag),
                Status::Bad,
                None,
                &format!("Command not recognized: {name}"),
            ));
        };

        let (status, default) = match result.code() {
            HookReturnCode::Ok | HookReturnCode::Declined => (Status::Ok, "completed"),
            HookReturnCode::Deny => (Status::No, "failed"),
            HookReturnCode::DenySoft => (Status::No, "temporarily unavailable"),
        };
        let text = result
            .message()
            .map_or_else(|| format!("{name} {default}"), str::to_string);
        Response::line(status_line(Some(tag), status, None, &text))
    }
}

impl Protocol for ImapProtocol {
    type Command = Parsed;

    fn name(&self) -> &'static str {
        "imap"
    }

    fn on_connect(&self, session: &Session) -> Vec<Response> {
        let capabilities = ResponseCode::Capability(self.capabilities(session));
        vec![Response::line(status_line(
            None,
            Status::Ok,
            Some(&capabilities),
            &format!("{} ready", self.config.server_name),
        ))]
    }

    fn decode(&self, line: &[u8], _session: &Session) -> Result<Option<Parsed>, DecodeError> {
        command::parse(line)
            .map(Some)
            .map_err(|err| DecodeError::syntax(err.to_string()))
    }

    fn handle(&self, parsed: Parsed, session: &Session) -> Vec<Response> {
        let response = match parsed {
            Parsed::Command(tagged) => {
                tracing::trace!(
                    session = %session.id(),
                    tag = %tagged.tag,
                    command = tagged.command.name(),
                    "command"
                );
                self.dispatch(tagged, session)
            }
            Parsed::Invalid { tag, message } => {
                Response::line(status_line(Some(&tag), Status::Bad, None, &message))
            }
        };
        vec![response]
    }

    fn decode_failed(&self, error: &DecodeError, _session: &Session) -> Response {
        let text = match error.kind() {
            DecodeErrorKind::LineTooLong => "Line too long",
            DecodeErrorKind::Syntax | DecodeErrorKind::Arguments | DecodeErrorKind::Encoding => {
                "Missing or invalid command tag"
            }
        };
        Response::line(status_line(None, Status::Bad, None, text))
    }

    fn upgrade_failed(&self, _error: &Error, _session: &Session) -> Option<Response> {
        // The client already saw the tagged OK and expects a handshake.
        Some(
            Response::line(status_line(
                None,
                Status::Bye,
                Some(&ResponseCode::Unavailable),
                "TLS negotiation failed",
            ))
            .end_session(),
        )
    }

    fn timed_out(&self, _session: &Session) -> Option<Response> {
        Some(Response::line(status_line(
            None,
            Status::Bye,
            None,
            "Autologout; idle for too long",
        )))
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
    use hookwire_core::HandlerChain;

    #[test]
    fn capabilities_follow_session_security() {
        let chain = HandlerChain::new().wire().unwrap();
        let config = ImapConfig::builder().plain_auth_disallowed(true).build();
        let protocol = ImapProtocol::new(&chain, config);

        let plain = Session::builder().start_tls_available(true).build();
        assert_eq!(
            protocol.capabilities(&plain),
            [
                Capability::Imap4Rev1,
                Capability::StartTls,
                Capability::LoginDisabled
            ]
        );

        let secure = Session::builder().secure(true).build();
        assert_eq!(protocol.capabilities(&secure), [Capability::Imap4Rev1]);
    }
}
