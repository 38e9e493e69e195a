//! Protocol engine: the per-connection command loop.

use std::sync::Arc;

use crate::config::Config;
use crate::error::{DecodeError, Error, Result};
use crate::response::Response;
use crate::session::Session;
use crate::transport::{ResponseTransport, ResponseWriter};

/// A line protocol served by a [`Connection`].
///
/// Implementations hold the wired hook lists they need and map hook
/// results to responses. They are shared by every connection.
pub trait Protocol: Send + Sync + 'static {
    /// Parsed client command.
    type Command: Send;

    /// Protocol name for logs.
    fn name(&self) -> &'static str;

    /// Responses sent when the connection opens, usually the greeting.
    fn on_connect(&self, session: &Session) -> Vec<Response>;

    /// Parses one line, without its terminator.
    ///
    /// `Ok(None)` means the line was consumed without producing a command.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the line is not a valid command.
    fn decode(
        &self,
        line: &[u8],
        session: &Session,
    ) -> std::result::Result<Option<Self::Command>, DecodeError>;

    /// Runs a command through the hooks and returns its responses in order.
    fn handle(&self, command: Self::Command, session: &Session) -> Vec<Response>;

    /// Response for a line that could not be decoded.
    fn decode_failed(&self, error: &DecodeError, session: &Session) -> Response;

    /// Response after a STARTTLS response could not upgrade the connection.
    ///
    /// `None` writes nothing further.
    fn upgrade_failed(&self, _error: &Error, _session: &Session) -> Option<Response> {
        None
    }

    /// Farewell written before an idle connection is closed.
    fn timed_out(&self, _session: &Session) -> Option<Response> {
        None
    }

    /// Called once after the connection is closed.
    fn on_disconnect(&self, _session: &Session) {}
}

/// One client connection: a session, a transport and the protocol.
pub struct Connection<P: Protocol, W: ResponseWriter> {
    protocol: Arc<P>,
    session: Session,
    transport: ResponseTransport<W>,
}

impl<P: Protocol, W: ResponseWriter> Connection<P, W> {
    /// Opens a connection and submits the protocol's greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the greeting cannot be written.
    pub fn open(protocol: Arc<P>, session: Session, writer: W, config: &Config) -> Result<Self> {
        let transport = ResponseTransport::new(writer, session.clone(), config);
        tracing::info!(
            session = %session.id(),
            peer = ?session.peer_addr(),
            protocol = protocol.name(),
            "connection opened"
        );

        let connection = Self {
            protocol,
            session,
            transport,
        };
        for response in connection.protocol.on_connect(&connection.session) {
            connection.submit(response)?;
        }
        Ok(connection)
    }

    /// Processes one inbound line.
    ///
    /// Lines received after the session closed are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection must be dropped: a write failed
    /// or the response queue is full.
    pub fn on_line(&self, line: &[u8]) -> Result<()> {
        if self.session.is_closed() {
            tracing::trace!(session = %self.session.id(), "line after close ignored");
            return Ok(());
        }
        self.check_deferred_errors()?;

        match self.protocol.decode(line, &self.session) {
            Ok(Some(command)) => {
                for response in self.protocol.handle(command, &self.session) {
                    self.submit(response)?;
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(error) => self.on_decode_error(&error),
        }
    }

    /// Reports a decoding failure detected outside [`Protocol::decode`],
    /// such as an oversized line.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply cannot be written.
    pub fn on_decode_error(&self, error: &DecodeError) -> Result<()> {
        if self.session.is_closed() {
            return Ok(());
        }
        tracing::debug!(
            session = %self.session.id(),
            kind = ?error.kind(),
            fatal = error.is_fatal(),
            %error,
            "command rejected"
        );
        let response = self.protocol.decode_failed(error, &self.session);
        let response = if error.is_fatal() {
            response.end_session()
        } else {
            response
        };
        self.submit(response)
    }

    /// Closes an idle connection, writing the protocol's farewell first.
    ///
    /// # Errors
    ///
    /// Returns an error if the farewell cannot be written.
    pub fn on_timeout(&self) -> Result<()> {
        tracing::info!(session = %self.session.id(), "idle timeout");
        match self.protocol.timed_out(&self.session) {
            Some(response) => self.submit(response.end_session()),
            None => {
                self.transport.close();
                Ok(())
            }
        }
    }

    /// Reports the outcome of a handshake the writer deferred with
    /// [`Upgrade::Pending`](crate::transport::Upgrade::Pending).
    ///
    /// On success the session is marked secure and its attributes are reset.
    /// On failure the session keeps its attributes and the protocol's
    /// [`Protocol::upgrade_failed`] response is submitted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UpgradeFailed`] if the handshake failed.
    pub fn on_upgrade(&self, outcome: std::io::Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => {
                self.session.finish_upgrade(true);
                tracing::debug!(
                    session = %self.session.id(),
                    "connection upgraded, session reset"
                );
                Ok(())
            }
            Err(e) => {
                self.session.finish_upgrade(false);
                let error = Error::UpgradeFailed(e.to_string());
                if let Err(report) = self.report_upgrade_failure(&error) {
                    tracing::debug!(
                        session = %self.session.id(),
                        error = %report,
                        "upgrade failure not reported"
                    );
                }
                Err(error)
            }
        }
    }

    /// Handles the client going away.
    pub fn on_disconnect(&self) {
        self.transport.close();
        self.protocol.on_disconnect(&self.session);
        tracing::info!(session = %self.session.id(), "connection closed");
    }

    /// Returns the session.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Returns the response transport.
    #[must_use]
    pub const fn transport(&self) -> &ResponseTransport<W> {
        &self.transport
    }

    /// Returns `true` once the connection is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    fn submit(&self, response: Response) -> Result<()> {
        match self.transport.submit(response) {
            Ok(()) | Err(Error::Closed) => Ok(()),
            Err(error @ Error::UpgradeFailed(_)) => self.report_upgrade_failure(&error),
            Err(error) => Err(error),
        }
    }

    fn check_deferred_errors(&self) -> Result<()> {
        match self.transport.take_error() {
            None => Ok(()),
            Some(error @ Error::UpgradeFailed(_)) => self.report_upgrade_failure(&error),
            Some(error) => Err(error),
        }
    }

    fn report_upgrade_failure(&self, error: &Error) -> Result<()> {
        tracing::warn!(session = %self.session.id(), %error, "upgrade not performed");
        match self.protocol.upgrade_failed(error, &self.session) {
            Some(response) => self.submit(response),
            None => Ok(()),
        }
    }
}

impl<P: Protocol, W: ResponseWriter> std::fmt::Debug for Connection<P, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("protocol", &self.protocol.name())
            .field("session", &self.session)
            .field("transport", &self.transport)
            .finish()
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
    use bytes::Bytes;
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct Wire {
        out: Arc<Mutex<Vec<u8>>>,
        closed: Arc<Mutex<bool>>,
    }

    impl Wire {
        fn text(&self) -> String {
            String::from_utf8(self.out.lock().unwrap().clone()).unwrap()
        }
    }

    impl ResponseWriter for Wire {
        fn write_bytes(&mut self, bytes: Bytes) -> io::Result<()> {
            self.out.lock().unwrap().extend_from_slice(&bytes);
            Ok(())
        }

        fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    enum Cmd {
        Echo(String),
        Upgrade,
        Quit,
    }

    #[derive(Default)]
    struct Toy {
        disconnects: AtomicUsize,
    }

    impl Protocol for Toy {
        type Command = Cmd;

        fn name(&self) -> &'static str {
            "toy"
        }

        fn on_connect(&self, _session: &Session) -> Vec<Response> {
            vec![Response::line("+ hello")]
        }

        fn decode(
            &self,
            line: &[u8],
            _session: &Session,
        ) -> std::result::Result<Option<Cmd>, DecodeError> {
            let line = std::str::from_utf8(line).map_err(|_| DecodeError::syntax("not UTF-8"))?;
            match line {
                "" => Ok(None),
                "QUIT" => Ok(Some(Cmd::Quit)),
                "TLS" => Ok(Some(Cmd::Upgrade)),
                "BOOM" => Err(DecodeError::syntax("boom").fatal()),
                _ => match line.strip_prefix("ECHO ") {
                    Some(arg) => Ok(Some(Cmd::Echo(arg.to_string()))),
                    None => Err(DecodeError::syntax("unknown command")),
                },
            }
        }

        fn handle(&self, command: Cmd, _session: &Session) -> Vec<Response> {
            match command {
                Cmd::Echo(arg) => vec![Response::line(format!("+ {arg}"))],
                Cmd::Upgrade => vec![Response::start_tls(["+ go"])],
                Cmd::Quit => vec![Response::line("+ bye").end_session()],
            }
        }

        fn decode_failed(&self, error: &DecodeError, _session: &Session) -> Response {
            Response::line(format!("- {error}"))
        }

        fn upgrade_failed(&self, _error: &Error, _session: &Session) -> Option<Response> {
            Some(Response::line("- no tls"))
        }

        fn timed_out(&self, _session: &Session) -> Option<Response> {
            Some(Response::line("- idle"))
        }

        fn on_disconnect(&self, _session: &Session) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn open(wire: &Wire) -> Connection<Toy, Wire> {
        Connection::open(
            Arc::new(Toy::default()),
            Session::new(),
            wire.clone(),
            &Config::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_greeting_and_commands() {
        let wire = Wire::default();
        let conn = open(&wire);

        conn.on_line(b"ECHO one").unwrap();
        conn.on_line(b"").unwrap();
        conn.on_line(b"ECHO two").unwrap();

        assert_eq!(wire.text(), "+ hello\r\n+ one\r\n+ two\r\n");
    }

    #[test]
    fn test_decode_error_keeps_connection() {
        let wire = Wire::default();
        let conn = open(&wire);

        conn.on_line(b"WHAT").unwrap();
        assert!(!conn.is_closed());
        assert!(wire.text().ends_with("- unknown command\r\n"));
    }

    #[test]
    fn test_fatal_decode_error_closes() {
        let wire = Wire::default();
        let conn = open(&wire);

        conn.on_line(b"BOOM").unwrap();
        assert!(conn.is_closed());
        assert!(*wire.closed.lock().unwrap());
    }

    #[test]
    fn test_lines_after_close_ignored() {
        let wire = Wire::default();
        let conn = open(&wire);

        conn.on_line(b"QUIT").unwrap();
        conn.on_line(b"ECHO ignored").unwrap();

        assert_eq!(wire.text(), "+ hello\r\n+ bye\r\n");
        assert!(conn.session().is_closed());
    }

    #[test]
    fn test_upgrade_failure_reported() {
        let wire = Wire::default();
        let conn = open(&wire);
        conn.session().set("user", "alice".to_string());

        conn.on_line(b"TLS").unwrap();

        assert_eq!(wire.text(), "+ hello\r\n+ go\r\n- no tls\r\n");
        assert!(conn.session().contains("user"));
        assert!(!conn.is_closed());
    }

    #[test]
    fn test_deferred_handshake_outcome() {
        let wire = Wire::default();
        let conn = open(&wire);
        let session = conn.session();
        session.set("user", "alice".to_string());

        assert!(session.begin_upgrade());
        let result = conn.on_upgrade(Err(io::Error::other("bad record")));
        assert!(matches!(result, Err(Error::UpgradeFailed(_))));
        assert!(session.contains("user"));
        assert!(!session.is_secure());
        assert!(wire.text().ends_with("- no tls\r\n"));

        assert!(session.begin_upgrade());
        conn.on_upgrade(Ok(())).unwrap();
        assert!(!session.contains("user"));
        assert!(session.is_secure());
    }

    #[test]
    fn test_timeout_sends_farewell() {
        let wire = Wire::default();
        let conn = open(&wire);

        conn.on_timeout().unwrap();
        assert!(wire.text().ends_with("- idle\r\n"));
        assert!(conn.is_closed());
    }

    #[test]
    fn test_disconnect_notifies_protocol_once() {
        let wire = Wire::default();
        let protocol = Arc::new(Toy::default());
        let conn = Connection::open(
            Arc::clone(&protocol),
            Session::new(),
            wire.clone(),
            &Config::default(),
        )
        .unwrap();

        conn.on_disconnect();
        assert_eq!(protocol.disconnects.load(Ordering::SeqCst), 1);
        assert!(conn.session().is_closed());
    }
}
