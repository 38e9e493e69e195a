//! The SMTP/LMTP state machine.

use std::sync::{Arc, Mutex};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use hookwire_core::{
    DecodeError, DecodeErrorKind, Error, Executor, HookList, HookResult, HookReturnCode, Protocol,
    Response, Session, TokioExecutor, WiredChain,
};

use crate::command::{Command, Parameter};
use crate::config::SmtpConfig;
use crate::hooks::{
    AUTH_HOOKS, AuthHook, CONNECT_HOOKS, ConnectHook, DELIVER_HOOKS, DeliverToRecipientHook,
    HELO_HOOKS, HeloHook, MAIL_HOOKS, MESSAGE_HOOKS, MailHook, MessageHook, QUIT_HOOKS, QuitHook,
    RCPT_HOOKS, RcptHook, UNKNOWN_HOOKS, UnknownHook,
};
use crate::session::{self as state, DataBuffer, SmtpSessionExt, Transaction};
use crate::types::{AuthMechanism, Extension, MailAddress, MailEnvelope, Reply, ReplyCode};

/// Which dialect the server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// RFC 5321 SMTP: HELO/EHLO, one reply after DATA.
    Smtp,
    /// RFC 2033 LMTP: LHLO, one reply per recipient after DATA.
    Lmtp,
}

/// Input produced by [`SmtpProtocol`]'s decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// A command line.
    Command(Command),
    /// A line of message content, still dot-stuffed.
    DataLine(Bytes),
    /// A client response to a `334` AUTH challenge.
    AuthResponse(String),
}

pub(crate) struct Hooks {
    pub(crate) connect: HookList<dyn ConnectHook>,
    pub(crate) helo: HookList<dyn HeloHook>,
    pub(crate) mail: HookList<dyn MailHook>,
    pub(crate) rcpt: HookList<dyn RcptHook>,
    pub(crate) message: HookList<dyn MessageHook>,
    pub(crate) deliver: HookList<dyn DeliverToRecipientHook>,
    pub(crate) auth: HookList<dyn AuthHook>,
    pub(crate) quit: HookList<dyn QuitHook>,
    pub(crate) unknown: HookList<dyn UnknownHook>,
}

impl Hooks {
    fn from_chain(chain: &WiredChain) -> Self {
        Self {
            connect: chain.hooks(&CONNECT_HOOKS),
            helo: chain.hooks(&HELO_HOOKS),
            mail: chain.hooks(&MAIL_HOOKS),
            rcpt: chain.hooks(&RCPT_HOOKS),
            message: chain.hooks(&MESSAGE_HOOKS),
            deliver: chain.hooks(&DELIVER_HOOKS),
            auth: chain.hooks(&AUTH_HOOKS),
            quit: chain.hooks(&QUIT_HOOKS),
            unknown: chain.hooks(&UNKNOWN_HOOKS),
        }
    }
}

/// Replies for each verdict a command's hooks can reach.
pub(crate) struct Replies {
    pub(crate) ok: Reply,
    pub(crate) deny: Reply,
    pub(crate) deny_soft: Reply,
}

impl Replies {
    /// Picks the reply for `result`. `None` (every hook declined) resolves
    /// as `default`. A hook's reply code and message replace the defaults.
    pub(crate) fn pick(
        self,
        result: Option<&HookResult>,
        default: HookReturnCode,
    ) -> (HookReturnCode, Reply) {
        let code = result.map_or(default, HookResult::code);
        let reply = match code {
            HookReturnCode::Ok | HookReturnCode::Declined => self.ok,
            HookReturnCode::Deny => self.deny,
            HookReturnCode::DenySoft => self.deny_soft,
        };
        let reply = match result {
            Some(result) => reply.overridden(result.reply_code(), result.message()),
            None => reply,
        };
        (code, reply)
    }
}

/// SMTP or LMTP served through a wired handler chain.
pub struct SmtpProtocol {
    config: SmtpConfig,
    mode: Mode,
    pub(crate) hooks: Hooks,
    keywords: Vec<&'static str>,
    pub(crate) executor: Arc<dyn Executor>,
}

impl SmtpProtocol {
    /// Creates an SMTP server over `chain`.
    #[must_use]
    pub fn smtp(chain: &WiredChain, config: SmtpConfig) -> Self {
        Self::with_mode(chain, config, Mode::Smtp)
    }

    /// Creates an LMTP server over `chain`.
    ///
    /// Per-recipient delivery hooks run on a [`TokioExecutor`] unless
    /// [`with_executor`](Self::with_executor) says otherwise.
    #[must_use]
    pub fn lmtp(chain: &WiredChain, config: SmtpConfig) -> Self {
        Self::with_mode(chain, config, Mode::Lmtp)
    }

    fn with_mode(chain: &WiredChain, config: SmtpConfig, mode: Mode) -> Self {
        Self {
            config,
            mode,
            hooks: Hooks::from_chain(chain),
            keywords: chain.advertised().map(|capability| capability.name()).collect(),
            executor: Arc::new(TokioExecutor::new()),
        }
    }

    /// Sets the executor for LMTP delivery hooks.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Returns the server settings.
    #[must_use]
    pub const fn config(&self) -> &SmtpConfig {
        &self.config
    }

    /// Returns the dialect.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    fn dispatch(&self, command: Command, session: &Session) -> Response {
        match command {
            Command::Helo { domain } => self.helo(session, &domain, Greeting::Helo),
            Command::Ehlo { domain } => self.helo(session, &domain, Greeting::Ehlo),
            Command::Lhlo { domain } => self.helo(session, &domain, Greeting::Lhlo),
            Command::StartTls => Self::start_tls(session),
            Command::Auth {
                mechanism,
                initial_response,
            } => self.auth(session, &mechanism, initial_response.as_deref()),
            Command::Mail { path, params } => self.mail(session, &path, &params),
            Command::Rcpt { path, .. } => self.rcpt(session, &path),
            Command::Data => Self::data(session),
            Command::Rset => {
                reset_transaction(session);
                Reply::line(ReplyCode::OK, "2.0.0 OK").into()
            }
            Command::Vrfy { .. } => Reply::line(
                ReplyCode::CANNOT_VERIFY,
                "2.5.2 Cannot VRFY user, but will accept message and attempt delivery",
            )
            .into(),
            Command::Noop => Reply::line(ReplyCode::OK, "2.0.0 OK").into(),
            Command::Quit => self.quit(session),
            Command::Unknown { verb, args } => self.unknown(session, &verb, &args),
        }
    }

    fn helo(&self, session: &Session, domain: &str, greeting: Greeting) -> Response {
        let verb = greeting.verb();
        let wrong_dialect = match self.mode {
            Mode::Smtp => greeting == Greeting::Lhlo,
            Mode::Lmtp => greeting != Greeting::Lhlo,
        };
        if wrong_dialect {
            return Reply::line(
                ReplyCode::SYNTAX_ERROR,
                format!("5.5.1 Command {verb} unrecognized"),
            )
            .into();
        }
        if domain.is_empty() {
            return Reply::line(
                ReplyCode::PARAMETER_ERROR,
                format!("5.5.4 Domain address required: {verb}"),
            )
            .into();
        }

        let result = self.hooks.helo.run(|hook| hook.do_helo(session, domain));
        let ok = match greeting {
            Greeting::Helo => Reply::line(ReplyCode::OK, self.hello_line(session, domain)),
            Greeting::Ehlo | Greeting::Lhlo => {
                let mut lines = vec![self.hello_line(session, domain)];
                lines.extend(self.extensions(session).iter().map(ToString::to_string));
                Reply::new(ReplyCode::OK, lines)
            }
        };
        let (code, reply) = Replies {
            ok,
            deny: Reply::line(
                ReplyCode::MAILBOX_UNAVAILABLE,
                format!("5.7.1 {domain} rejected"),
            ),
            deny_soft: Reply::line(
                ReplyCode::MAILBOX_BUSY,
                format!("4.7.1 {domain} temporarily rejected"),
            ),
        }
        .pick(result.as_ref(), HookReturnCode::Ok);

        if accepted(code) {
            reset_transaction(session);
            session.set(state::HELO, domain.to_string());
            tracing::debug!(session = %session.id(), %domain, verb, "greeted");
        }
        reply.into()
    }

    fn hello_line(&self, session: &Session, domain: &str) -> String {
        match session.peer_addr() {
            Some(peer) => format!("{} Hello {domain} [{}]", self.config.hello_name, peer.ip()),
            None => format!("{} Hello {domain}", self.config.hello_name),
        }
    }

    /// Extensions offered to this session.
    fn extensions(&self, session: &Session) -> Vec<Extension> {
        let mut extensions: Vec<Extension> = self
            .keywords
            .iter()
            .copied()
            .map(Extension::Keyword)
            .collect();
        if self.config.max_message_size > 0 {
            extensions.push(Extension::Size(Some(self.config.max_message_size)));
        }
        if session.start_tls_available() && !session.is_secure() {
            extensions.push(Extension::StartTls);
        }
        if !self.hooks.auth.is_empty() && session.authenticated_user().is_none() {
            extensions.push(Extension::Auth(vec![AuthMechanism::Plain]));
        }
        extensions
    }

    fn start_tls(session: &Session) -> Response {
        if session.is_secure() {
            return Reply::line(ReplyCode::BAD_SEQUENCE, "5.5.1 TLS already active").into();
        }
        if !session.start_tls_available() {
            return Reply::line(ReplyCode::TEMPORARY_FAILURE, "4.7.0 TLS not available").into();
        }
        Response::start_tls(
            Reply::line(ReplyCode::SERVICE_READY, "2.0.0 Ready to start TLS").to_lines(),
        )
    }

    fn auth(&self, session: &Session, mechanism: &str, initial: Option<&str>) -> Response {
        if self.hooks.auth.is_empty() {
            return Reply::line(ReplyCode::NOT_IMPLEMENTED, "5.5.1 AUTH not supported").into();
        }
        if session.authenticated_user().is_some() {
            return Reply::line(ReplyCode::BAD_SEQUENCE, "5.5.1 Already authenticated").into();
        }
        if session.transaction().is_some() {
            return Reply::line(
                ReplyCode::BAD_SEQUENCE,
                "5.5.1 AUTH not permitted during a mail transaction",
            )
            .into();
        }
        if AuthMechanism::parse(mechanism) != Some(AuthMechanism::Plain) {
            return Reply::line(
                ReplyCode::PARAMETER_NOT_IMPLEMENTED,
                "5.5.4 Unrecognized authentication type",
            )
            .into();
        }

        match initial {
            // "=" is an empty initial response
            Some("=") => self.verify_plain(session, ""),
            Some(initial) => self.verify_plain(session, initial),
            None => {
                session.set(state::AUTH_PENDING, ());
                Reply::new(ReplyCode::AUTH_CONTINUE, vec![String::new()]).into()
            }
        }
    }

    fn auth_response(&self, session: &Session, line: &str) -> Response {
        session.remove(state::AUTH_PENDING);
        if line == "*" {
            return Reply::line(ReplyCode::PARAMETER_ERROR, "5.0.0 Authentication aborted").into();
        }
        self.verify_plain(session, line)
    }

    fn verify_plain(&self, session: &Session, encoded: &str) -> Response {
        let Some((username, password)) = decode_plain(encoded) else {
            return Reply::line(
                ReplyCode::PARAMETER_ERROR,
                "5.5.2 Cannot decode AUTH PLAIN response",
            )
            .into();
        };

        let result = self
            .hooks
            .auth
            .run(|hook| hook.do_auth(session, &username, &password));
        let (code, reply) = Replies {
            ok: Reply::line(ReplyCode::AUTH_OK, "2.7.0 Authentication successful"),
            deny: Reply::line(
                ReplyCode::AUTH_FAILED,
                "5.7.8 Authentication credentials invalid",
            ),
            deny_soft: Reply::line(
                ReplyCode::TEMPORARY_FAILURE,
                "4.7.0 Temporary authentication failure",
            ),
        }
        .pick(result.as_ref(), HookReturnCode::Deny);

        if code == HookReturnCode::Ok {
            tracing::info!(session = %session.id(), user = %username, "authenticated");
            session.set(state::USER, username);
        } else {
            tracing::info!(
                session = %session.id(),
                user = %username,
                %code,
                "authentication refused"
            );
        }
        reply.into()
    }

    fn mail(&self, session: &Session, path: &str, params: &[Parameter]) -> Response {
        if self.config.enforce_helo && session.helo_domain().is_none() {
            return Reply::line(
                ReplyCode::BAD_SEQUENCE,
                "5.5.1 Need HELO or EHLO before MAIL",
            )
            .into();
        }
        if session.transaction().is_some() {
            return Reply::line(ReplyCode::BAD_SEQUENCE, "5.5.1 Sender already specified").into();
        }
        if self.config.auth_required && session.authenticated_user().is_none() {
            return Reply::line(ReplyCode::AUTH_REQUIRED, "5.7.0 Authentication required").into();
        }

        let Ok(sender) = MailAddress::parse_path(path, self.config.enforce_brackets) else {
            return Reply::line(
                ReplyCode::PARAMETER_ERROR,
                format!("5.1.7 Invalid sender address {path}"),
            )
            .into();
        };

        let declared_size = match declared_size(params) {
            Ok(size) => size,
            Err(()) => {
                return Reply::line(ReplyCode::PARAMETER_ERROR, "5.5.4 Invalid SIZE parameter")
                    .into();
            }
        };
        let max = self.config.max_message_size;
        if max > 0 && declared_size.is_some_and(|size| size > max) {
            return Reply::line(
                ReplyCode::EXCEEDED_STORAGE,
                "5.3.4 Message size exceeds fixed maximum message size",
            )
            .into();
        }

        let shown = display_path(sender.as_ref());
        let result = self
            .hooks
            .mail
            .run(|hook| hook.do_mail(session, sender.as_ref()));
        let (code, reply) = Replies {
            ok: Reply::line(ReplyCode::OK, format!("2.1.0 Sender {shown} OK")),
            deny: Reply::line(
                ReplyCode::MAILBOX_UNAVAILABLE,
                format!("5.7.1 Sender {shown} rejected"),
            ),
            deny_soft: Reply::line(
                ReplyCode::LOCAL_ERROR,
                format!("4.7.1 Sender {shown} temporarily rejected"),
            ),
        }
        .pick(result.as_ref(), HookReturnCode::Ok);

        if accepted(code) {
            session.set(state::TRANSACTION, Transaction::new(sender, declared_size));
        }
        reply.into()
    }

    fn rcpt(&self, session: &Session, path: &str) -> Response {
        let Some(mut transaction) = session.transaction() else {
            return Reply::line(ReplyCode::BAD_SEQUENCE, "5.5.1 Need MAIL before RCPT").into();
        };
        let Ok(Some(recipient)) = MailAddress::parse_path(path, self.config.enforce_brackets)
        else {
            return Reply::line(
                ReplyCode::PARAMETER_ERROR,
                format!("5.1.3 Invalid recipient address {path}"),
            )
            .into();
        };

        let result = self
            .hooks
            .rcpt
            .run(|hook| hook.do_rcpt(session, transaction.sender(), &recipient));
        let (code, reply) = Replies {
            ok: Reply::line(ReplyCode::OK, format!("2.1.5 Recipient <{recipient}> OK")),
            deny: Reply::line(
                ReplyCode::MAILBOX_UNAVAILABLE,
                format!("5.7.1 Requested action not taken: recipient <{recipient}> rejected"),
            ),
            deny_soft: Reply::line(
                ReplyCode::MAILBOX_BUSY,
                format!("4.7.1 Recipient <{recipient}> temporarily rejected"),
            ),
        }
        .pick(result.as_ref(), HookReturnCode::Ok);

        if accepted(code) {
            transaction.add_recipient(recipient);
            session.set(state::TRANSACTION, transaction);
        }
        reply.into()
    }

    fn data(session: &Session) -> Response {
        let Some(transaction) = session.transaction() else {
            return Reply::line(ReplyCode::BAD_SEQUENCE, "5.5.1 No mail transaction in progress")
                .into();
        };
        if transaction.recipients().is_empty() {
            return Reply::line(ReplyCode::BAD_SEQUENCE, "5.5.1 No valid recipients").into();
        }
        session.set(state::DATA, Mutex::new(DataBuffer::default()));
        Reply::line(
            ReplyCode::START_DATA,
            "Start mail input; end with <CRLF>.<CRLF>",
        )
        .into()
    }

    fn data_line(&self, session: &Session, line: &[u8]) -> Vec<Response> {
        if line == b"." {
            return self.finish_data(session);
        }
        let line = line.strip_prefix(b".").unwrap_or(line);
        let limit = self.config.max_message_size;
        state::with_data(session, |buffer| buffer.push(line, limit));
        Vec::new()
    }

    fn finish_data(&self, session: &Session) -> Vec<Response> {
        let taken = state::with_data(session, DataBuffer::take);
        let transaction = session.transaction();
        session.remove(state::DATA);
        session.remove(state::TRANSACTION);

        let (Some((content, overflowed)), Some(transaction)) = (taken, transaction) else {
            return vec![
                Reply::line(ReplyCode::BAD_SEQUENCE, "5.5.1 No mail transaction in progress")
                    .into(),
            ];
        };
        let (sender, recipients) = transaction.into_parts();

        if overflowed {
            tracing::info!(session = %session.id(), "message exceeds size limit");
            let reply = Reply::line(
                ReplyCode::EXCEEDED_STORAGE,
                "5.3.4 Message size exceeds fixed maximum message size",
            );
            let count = match self.mode {
                Mode::Smtp => 1,
                Mode::Lmtp => recipients.len(),
            };
            return (0..count).map(|_| reply.clone().into()).collect();
        }

        let envelope = MailEnvelope::new(sender, recipients, content.freeze());
        tracing::info!(
            session = %session.id(),
            sender = %display_path(envelope.sender()),
            recipients = envelope.recipients().len(),
            size = envelope.size(),
            "message received"
        );
        match self.mode {
            Mode::Smtp => vec![self.accept_message(session, &envelope).into()],
            Mode::Lmtp => self.deliver_to_recipients(session, envelope),
        }
    }

    /// Runs the message hooks once.
    pub(crate) fn accept_message(&self, session: &Session, envelope: &MailEnvelope) -> Reply {
        let result = self
            .hooks
            .message
            .run(|hook| hook.on_message(session, envelope));
        Replies {
            ok: Reply::line(ReplyCode::OK, "2.6.0 Message accepted for delivery"),
            deny: Reply::line(ReplyCode::TRANSACTION_FAILED, "5.6.0 Message rejected"),
            deny_soft: Reply::line(
                ReplyCode::LOCAL_ERROR,
                "4.3.0 Temporary failure, try again later",
            ),
        }
        .pick(result.as_ref(), HookReturnCode::Ok)
        .1
    }

    fn quit(&self, session: &Session) -> Response {
        let result = self.hooks.quit.run(|hook| hook.do_quit(session));
        let reply = Reply::line(
            ReplyCode::CLOSING,
            format!(
                "2.0.0 {} Service closing transmission channel",
                self.config.hello_name
            ),
        )
        .overridden(None, result.as_ref().and_then(HookResult::message));
        Response::from(reply).end_session()
    }

    fn unknown(&self, session: &Session, verb: &str, args: &str) -> Response {
        let result = self
            .hooks
            .unknown
            .run(|hook| hook.do_unknown(session, verb, args));
        Replies {
            ok: Reply::line(ReplyCode::OK, "2.0.0 OK"),
            deny: Reply::line(
                ReplyCode::SYNTAX_ERROR,
                format!("5.5.1 Command {verb} unrecognized"),
            ),
            deny_soft: Reply::line(
                ReplyCode::LOCAL_ERROR,
                format!("4.5.1 Command {verb} temporarily unavailable"),
            ),
        }
        .pick(result.as_ref(), HookReturnCode::Deny)
        .1
        .into()
    }
}

impl Protocol for SmtpProtocol {
    type Command = Input;

    fn name(&self) -> &'static str {
        match self.mode {
            Mode::Smtp => "smtp",
            Mode::Lmtp => "lmtp",
        }
    }

    fn on_connect(&self, session: &Session) -> Vec<Response> {
        let result = self.hooks.connect.run(|hook| hook.on_connect(session));
        let (code, reply) = Replies {
            ok: Reply::line(
                ReplyCode::SERVICE_READY,
                format!(
                    "{} {} ready",
                    self.config.hello_name, self.config.software_name
                ),
            ),
            deny: Reply::line(ReplyCode::TRANSACTION_FAILED, "5.7.1 Connection refused"),
            deny_soft: Reply::line(
                ReplyCode::SERVICE_UNAVAILABLE,
                "4.7.0 Service not available, try again later",
            ),
        }
        .pick(result.as_ref(), HookReturnCode::Ok);

        let response = Response::from(reply);
        if accepted(code) {
            vec![response]
        } else {
            tracing::info!(session = %session.id(), %code, "connection refused by hook");
            vec![response.end_session()]
        }
    }

    fn decode(&self, line: &[u8], session: &Session) -> Result<Option<Input>, DecodeError> {
        if session.contains(state::DATA) {
            return Ok(Some(Input::DataLine(Bytes::copy_from_slice(line))));
        }
        let text = std::str::from_utf8(line).map_err(|_| {
            DecodeError::new(DecodeErrorKind::Encoding, "Command is not valid UTF-8")
        })?;
        if session.contains(state::AUTH_PENDING) {
            return Ok(Some(Input::AuthResponse(text.trim().to_string())));
        }
        Command::parse(text).map(|command| Some(Input::Command(command)))
    }

    fn handle(&self, input: Input, session: &Session) -> Vec<Response> {
        match input {
            Input::Command(command) => {
                tracing::trace!(session = %session.id(), verb = command.verb(), "command");
                vec![self.dispatch(command, session)]
            }
            Input::DataLine(line) => self.data_line(session, &line),
            Input::AuthResponse(line) => vec![self.auth_response(session, &line)],
        }
    }

    fn decode_failed(&self, error: &DecodeError, session: &Session) -> Response {
        match error.kind() {
            // Content can no longer be trusted once a line was cut.
            DecodeErrorKind::LineTooLong if session.contains(state::DATA) => {
                state::with_data(session, DataBuffer::mark_overflowed);
                Response::from(Reply::line(
                    ReplyCode::EXCEEDED_STORAGE,
                    "5.3.4 Line too long in message content",
                ))
                .end_session()
            }
            DecodeErrorKind::LineTooLong => {
                Reply::line(ReplyCode::SYNTAX_ERROR, "5.5.6 Line too long").into()
            }
            DecodeErrorKind::Arguments => Reply::line(
                ReplyCode::PARAMETER_ERROR,
                format!("5.5.4 {}", error.message()),
            )
            .into(),
            DecodeErrorKind::Syntax | DecodeErrorKind::Encoding => Reply::line(
                ReplyCode::SYNTAX_ERROR,
                "5.5.2 Syntax error, command unrecognized",
            )
            .into(),
        }
    }

    fn upgrade_failed(&self, _error: &Error, _session: &Session) -> Option<Response> {
        Some(
            Reply::line(
                ReplyCode::TEMPORARY_FAILURE,
                "4.7.0 TLS not available due to temporary reason",
            )
            .into(),
        )
    }

    fn timed_out(&self, _session: &Session) -> Option<Response> {
        Some(
            Reply::line(
                ReplyCode::SERVICE_UNAVAILABLE,
                format!("4.4.2 {} Error: timeout exceeded", self.config.hello_name),
            )
            .into(),
        )
    }

    fn on_disconnect(&self, session: &Session) {
        if session.transaction().is_some() {
            tracing::debug!(session = %session.id(), "disconnected with an open transaction");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Greeting {
    Helo,
    Ehlo,
    Lhlo,
}

impl Greeting {
    const fn verb(self) -> &'static str {
        match self {
            Self::Helo => "HELO",
            Self::Ehlo => "EHLO",
            Self::Lhlo => "LHLO",
        }
    }
}

const fn accepted(code: HookReturnCode) -> bool {
    matches!(code, HookReturnCode::Ok | HookReturnCode::Declined)
}

fn reset_transaction(session: &Session) {
    session.remove(state::TRANSACTION);
    session.remove(state::DATA);
}

fn display_path(address: Option<&MailAddress>) -> String {
    address.map_or_else(|| "<>".to_string(), |address| format!("<{address}>"))
}

/// Reads the `SIZE=` parameter of MAIL FROM.
fn declared_size(params: &[Parameter]) -> Result<Option<usize>, ()> {
    params
        .iter()
        .find(|param| param.keyword == "SIZE")
        .map(|param| param.value.as_deref().and_then(|v| v.parse().ok()).ok_or(()))
        .transpose()
}

/// Decodes an AUTH PLAIN response: `authzid NUL authcid NUL password`.
fn decode_plain(encoded: &str) -> Option<(String, String)> {
    let decoded = BASE64.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let mut parts = decoded.split('\0');
    let _authzid = parts.next()?;
    let username = parts.next()?;
    let password = parts.next()?;
    if parts.next().is_some() || username.is_empty() {
        return None;
    }
    Some((username.to_string(), password.to_string()))
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
    fn test_decode_plain() {
        let encoded = BASE64.encode("\0alice\0secret");
        assert_eq!(
            decode_plain(&encoded),
            Some(("alice".to_string(), "secret".to_string()))
        );

        let encoded = BASE64.encode("admin\0alice\0secret");
        assert_eq!(decode_plain(&encoded).unwrap().0, "alice");

        assert!(decode_plain("not base64!").is_none());
        assert!(decode_plain(&BASE64.encode("alice:secret")).is_none());
        assert!(decode_plain(&BASE64.encode("\0\0secret")).is_none());
    }

    #[test]
    fn test_declared_size() {
        let size = |value: Option<&str>| Parameter {
            keyword: "SIZE".to_string(),
            value: value.map(str::to_string),
        };
        assert_eq!(declared_size(&[]), Ok(None));
        assert_eq!(declared_size(&[size(Some("42"))]), Ok(Some(42)));
        assert_eq!(declared_size(&[size(Some("x"))]), Err(()));
        assert_eq!(declared_size(&[size(None)]), Err(()));
    }

    #[test]
    fn test_replies_pick() {
        let replies = || Replies {
            ok: Reply::line(ReplyCode::OK, "ok"),
            deny: Reply::line(ReplyCode::MAILBOX_UNAVAILABLE, "no"),
            deny_soft: Reply::line(ReplyCode::LOCAL_ERROR, "later"),
        };

        let (code, reply) = replies().pick(None, HookReturnCode::Ok);
        assert_eq!(code, HookReturnCode::Ok);
        assert_eq!(reply.to_lines(), ["250 ok"]);

        let (code, reply) = replies().pick(None, HookReturnCode::Deny);
        assert_eq!(code, HookReturnCode::Deny);
        assert_eq!(reply.to_lines(), ["550 no"]);

        let result = HookResult::deny_soft().with_message("4.2.2 Mailbox full");
        let (_, reply) = replies().pick(Some(&result), HookReturnCode::Ok);
        assert_eq!(reply.to_lines(), ["451 4.2.2 Mailbox full"]);

        let result = HookResult::deny().with_reply_code(554);
        let (_, reply) = replies().pick(Some(&result), HookReturnCode::Ok);
        assert_eq!(reply.to_lines(), ["554 no"]);
    }

    #[test]
    fn test_display_path() {
        assert_eq!(display_path(None), "<>");
        let address = MailAddress::new("a@example.com").unwrap();
        assert_eq!(display_path(Some(&address)), "<a@example.com>");
    }
}
