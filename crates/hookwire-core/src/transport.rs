//! Response ordering transport.
//!
//! Responses are written to the client in the order they were submitted,
//! whatever order their contents become available in. Each connection owns
//! one [`ResponseTransport`] holding a FIFO queue behind a single mutex:
//! queue mutation and draining happen under that lock, so a submission that
//! arrives while a deferred response is pending is only written once that
//! response has been written.
//!
//! When the head of the queue is a deferred response that is not ready, the
//! drain registers a one-shot listener on it and returns, releasing the
//! lock. The listener resumes the drain on whichever thread completes the
//! response.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;

use crate::codec::ResponseEncoder;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::response::{Readiness, Response, ResponseKind};
use crate::session::Session;

/// How a [`ResponseWriter`] took a TLS upgrade request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upgrade {
    /// The handshake finished before `start_tls` returned.
    Completed,
    /// The handshake runs later on the connection's own task, which reports
    /// the outcome through
    /// [`Connection::on_upgrade`](crate::engine::Connection::on_upgrade).
    /// The session stays [`Upgrading`](crate::session::SessionState::Upgrading)
    /// until then.
    Pending,
}

/// The byte-level side of a connection, as seen by the transport.
///
/// Every call writes a complete unit; the transport never hands over a
/// partial response.
pub trait ResponseWriter: Send + 'static {
    /// Writes encoded response lines.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is broken.
    fn write_bytes(&mut self, bytes: Bytes) -> io::Result<()>;

    /// Writes a raw payload following a response's lines.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is broken.
    fn write_stream(&mut self, payload: Bytes) -> io::Result<()> {
        self.write_bytes(payload)
    }

    /// Returns `true` if the connection can be upgraded to TLS.
    fn supports_start_tls(&self) -> bool {
        false
    }

    /// Upgrades the connection to TLS after everything written so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the upgrade cannot be started.
    fn start_tls(&mut self) -> io::Result<Upgrade> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "transport does not support TLS",
        ))
    }

    /// Closes the connection once everything written so far is flushed.
    fn close(&mut self);
}

/// Per-connection response queue.
pub struct ResponseTransport<W: ResponseWriter> {
    inner: Arc<Mutex<Inner<W>>>,
}

impl<W: ResponseWriter> Clone for ResponseTransport<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: ResponseWriter> ResponseTransport<W> {
    /// Creates a transport writing to `writer` for `session`.
    pub fn new(writer: W, session: Session, config: &Config) -> Self {
        let inner = Arc::new_cyclic(|this| {
            Mutex::new(Inner {
                this: this.clone(),
                queue: VecDeque::new(),
                writer,
                session,
                encoder: ResponseEncoder::from_config(config),
                max_depth: config.max_response_queue_depth,
                closed: false,
                waiting: false,
                error: None,
            })
        });
        Self { inner }
    }

    /// Enqueues `response` and writes everything that is ready.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] if the connection was closed before the call.
    /// - [`Error::QueueFull`] if the configured queue depth is reached.
    /// - [`Error::Io`] if a write failed; the connection is now closed.
    /// - [`Error::UpgradeFailed`] if a STARTTLS response written during
    ///   this call could not upgrade the connection.
    pub fn submit(&self, response: Response) -> Result<()> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(Error::Closed);
        }
        if let Some(max) = inner.max_depth
            && inner.queue.len() >= max
        {
            tracing::warn!(
                session = %inner.session.id(),
                pending = inner.queue.len(),
                "response queue full"
            );
            return Err(Error::QueueFull(inner.queue.len()));
        }

        inner.queue.push_back(response);
        if !inner.waiting {
            inner.drain();
        }
        inner.error.take().map_or(Ok(()), Err)
    }

    /// Returns and clears the error recorded by the last drain, if any.
    ///
    /// Drains resumed by a deferred completion have no caller to report to;
    /// their errors are kept here.
    #[must_use]
    pub fn take_error(&self) -> Option<Error> {
        self.lock().error.take()
    }

    /// Closes the connection and abandons queued responses.
    pub fn close(&self) {
        self.lock().shutdown();
    }

    /// Returns `true` once the connection is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Returns `true` while a deferred response blocks the queue.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.lock().waiting
    }

    /// Returns the number of responses not yet written.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Returns the session this transport writes for.
    #[must_use]
    pub fn session(&self) -> Session {
        self.lock().session.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<W>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: ResponseWriter> fmt::Debug for ResponseTransport<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("ResponseTransport")
            .field("session", &inner.session.id())
            .field("pending", &inner.queue.len())
            .field("waiting", &inner.waiting)
            .field("closed", &inner.closed)
            .finish()
    }
}

struct Inner<W> {
    this: Weak<Mutex<Inner<W>>>,
    queue: VecDeque<Response>,
    writer: W,
    session: Session,
    encoder: ResponseEncoder,
    max_depth: Option<usize>,
    closed: bool,
    waiting: bool,
    error: Option<Error>,
}

impl<W: ResponseWriter> Inner<W> {
    fn drain(&mut self) {
        while !self.closed {
            let readiness = match self.queue.front() {
                None => break,
                Some(head) => match head.kind() {
                    ResponseKind::Deferred(deferred) => Some((
                        head.is_end_session(),
                        deferred.take_or_listen(resume_listener(&self.this)),
                    )),
                    _ => None,
                },
            };

            match readiness {
                None => {
                    if let Some(response) = self.queue.pop_front() {
                        self.write(response);
                    }
                }
                Some((end_session, Readiness::Ready(resolved))) => {
                    self.queue.pop_front();
                    let resolved = if end_session {
                        resolved.end_session()
                    } else {
                        resolved
                    };
                    // May itself be deferred; the next iteration handles it.
                    self.queue.push_front(resolved);
                }
                Some((_, Readiness::Pending)) => {
                    tracing::trace!(
                        session = %self.session.id(),
                        pending = self.queue.len(),
                        "waiting on deferred response"
                    );
                    self.waiting = true;
                    break;
                }
                Some((_, Readiness::Abandoned)) => {
                    tracing::warn!(
                        session = %self.session.id(),
                        "deferred response abandoned, closing connection"
                    );
                    self.shutdown();
                }
            }
        }
    }

    fn write(&mut self, response: Response) {
        let (lines, end_session, kind) = response.into_parts();

        if !lines.is_empty() {
            let bytes = self.encoder.encode(&lines);
            if let Err(e) = self.writer.write_bytes(bytes) {
                self.fail(e);
                return;
            }
        }

        match kind {
            ResponseKind::Stream(payload) => {
                if let Err(e) = self.writer.write_stream(payload) {
                    self.fail(e);
                    return;
                }
            }
            ResponseKind::StartTls => self.upgrade(),
            ResponseKind::Plain | ResponseKind::Deferred(_) => {}
        }

        if end_session {
            tracing::debug!(session = %self.session.id(), "end of session requested");
            self.shutdown();
        }
    }

    fn upgrade(&mut self) {
        let id = self.session.id();
        if !self.writer.supports_start_tls() {
            tracing::warn!(session = %id, "upgrade requested but transport cannot upgrade");
            self.error = Some(Error::UpgradeFailed(
                "transport does not support TLS".to_string(),
            ));
            return;
        }
        if !self.session.begin_upgrade() {
            self.error = Some(Error::UpgradeFailed(format!(
                "session is {:?}",
                self.session.state()
            )));
            return;
        }

        match self.writer.start_tls() {
            Ok(Upgrade::Completed) => {
                self.session.finish_upgrade(true);
                tracing::debug!(session = %id, "connection upgraded, session reset");
            }
            Ok(Upgrade::Pending) => {
                tracing::debug!(session = %id, "handshake handed to the connection task");
            }
            Err(e) => {
                self.session.finish_upgrade(false);
                tracing::warn!(session = %id, error = %e, "upgrade failed");
                self.error = Some(Error::UpgradeFailed(e.to_string()));
            }
        }
    }

    fn fail(&mut self, error: io::Error) {
        tracing::error!(
            session = %self.session.id(),
            %error,
            "write failed, abandoning connection"
        );
        self.error = Some(Error::Io(error));
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.waiting = false;
        let abandoned = self.queue.len();
        // Dropping queued deferred responses discards their listeners.
        self.queue.clear();
        self.writer.close();
        self.session.close();
        tracing::debug!(session = %self.session.id(), abandoned, "transport closed");
    }
}

fn resume_listener<W: ResponseWriter>(this: &Weak<Mutex<Inner<W>>>) -> Box<dyn FnOnce() + Send> {
    let this = this.clone();
    Box::new(move || {
        if let Some(inner) = this.upgrade() {
            let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.waiting = false;
            inner.drain();
        }
    })
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
    use crate::session::SessionState;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Bytes(String),
        Stream(String),
        StartTls,
        Close,
    }

    #[derive(Clone, Default)]
    struct RecordingWriter {
        events: Arc<Mutex<Vec<Event>>>,
        tls: bool,
        fail_tls: bool,
        deferred_tls: bool,
        fail_writes: bool,
    }

    impl RecordingWriter {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn text(&self) -> String {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Bytes(s) | Event::Stream(s) => Some(s),
                    _ => None,
                })
                .collect()
        }
    }

    impl ResponseWriter for RecordingWriter {
        fn write_bytes(&mut self, bytes: Bytes) -> io::Result<()> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
            }
            let text = String::from_utf8(bytes.to_vec()).unwrap();
            self.events.lock().unwrap().push(Event::Bytes(text));
            Ok(())
        }

        fn write_stream(&mut self, payload: Bytes) -> io::Result<()> {
            let text = String::from_utf8(payload.to_vec()).unwrap();
            self.events.lock().unwrap().push(Event::Stream(text));
            Ok(())
        }

        fn supports_start_tls(&self) -> bool {
            self.tls
        }

        fn start_tls(&mut self) -> io::Result<Upgrade> {
            if self.fail_tls {
                return Err(io::Error::other("handshake refused"));
            }
            self.events.lock().unwrap().push(Event::StartTls);
            Ok(if self.deferred_tls {
                Upgrade::Pending
            } else {
                Upgrade::Completed
            })
        }

        fn close(&mut self) {
            self.events.lock().unwrap().push(Event::Close);
        }
    }

    fn transport(writer: &RecordingWriter) -> ResponseTransport<RecordingWriter> {
        ResponseTransport::new(writer.clone(), Session::new(), &Config::default())
    }

    #[test]
    fn test_immediate_responses_in_order() {
        let writer = RecordingWriter::default();
        let transport = transport(&writer);

        transport.submit(Response::line("250 one")).unwrap();
        transport.submit(Response::new(["250-two", "250 three"])).unwrap();

        assert_eq!(writer.text(), "250 one\r\n250-two\r\n250 three\r\n");
        assert_eq!(transport.pending(), 0);
    }

    #[test]
    fn test_deferred_holds_later_responses() {
        let writer = RecordingWriter::default();
        let transport = transport(&writer);

        transport.submit(Response::line("220 ready")).unwrap();
        let (deferred, completer) = Response::deferred();
        transport.submit(deferred).unwrap();
        transport.submit(Response::line("250 after")).unwrap();

        assert_eq!(writer.text(), "220 ready\r\n");
        assert!(transport.is_waiting());
        assert_eq!(transport.pending(), 2);

        completer.complete(Response::line("250 deferred"));

        assert_eq!(writer.text(), "220 ready\r\n250 deferred\r\n250 after\r\n");
        assert!(!transport.is_waiting());
    }

    #[test]
    fn test_completion_from_other_thread() {
        let writer = RecordingWriter::default();
        let transport = transport(&writer);

        let (first, first_done) = Response::deferred();
        let (second, second_done) = Response::deferred();
        transport.submit(first).unwrap();
        transport.submit(second).unwrap();

        std::thread::spawn(move || second_done.complete(Response::line("250 B")))
            .join()
            .unwrap();
        assert_eq!(writer.text(), "");

        std::thread::spawn(move || first_done.complete(Response::line("250 A")))
            .join()
            .unwrap();
        assert_eq!(writer.text(), "250 A\r\n250 B\r\n");
    }

    #[test]
    fn test_end_session_closes_after_stream() {
        let writer = RecordingWriter::default();
        let transport = transport(&writer);

        let response =
            Response::stream(["* 1 FETCH"], Bytes::from_static(b"payload")).end_session();
        transport.submit(response).unwrap();

        assert_eq!(
            writer.events(),
            [
                Event::Bytes("* 1 FETCH\r\n".to_string()),
                Event::Stream("payload".to_string()),
                Event::Close,
            ]
        );
        assert!(transport.is_closed());
        assert_eq!(transport.session().state(), SessionState::Closed);

        assert!(matches!(
            transport.submit(Response::line("250 late")),
            Err(Error::Closed)
        ));
        assert_eq!(writer.events().len(), 3);
    }

    #[test]
    fn test_end_session_abandons_queued_responses() {
        let writer = RecordingWriter::default();
        let transport = transport(&writer);

        let (deferred, completer) = Response::deferred();
        transport.submit(deferred.end_session()).unwrap();
        transport.submit(Response::line("250 never")).unwrap();

        completer.complete(Response::line("221 bye"));
        assert_eq!(
            writer.events(),
            [Event::Bytes("221 bye\r\n".to_string()), Event::Close]
        );
    }

    #[test]
    fn test_start_tls_resets_session() {
        let writer = RecordingWriter {
            tls: true,
            ..RecordingWriter::default()
        };
        let transport = transport(&writer);
        let session = transport.session();
        session.set("helo", "client".to_string());

        transport.submit(Response::start_tls(["220 Ready to start TLS"])).unwrap();

        assert_eq!(
            writer.events(),
            [
                Event::Bytes("220 Ready to start TLS\r\n".to_string()),
                Event::StartTls,
            ]
        );
        assert!(!session.contains("helo"));
        assert!(session.is_secure());
        assert_eq!(session.state(), SessionState::Open);
    }

    #[test]
    fn test_start_tls_unsupported_keeps_session() {
        let writer = RecordingWriter::default();
        let transport = transport(&writer);
        let session = transport.session();
        session.set("helo", "client".to_string());

        let result = transport.submit(Response::start_tls(["220 Ready to start TLS"]));

        assert!(matches!(result, Err(Error::UpgradeFailed(_))));
        assert!(session.contains("helo"));
        assert!(!session.is_secure());
        assert!(!transport.is_closed());
    }

    #[test]
    fn test_start_tls_failure_keeps_session() {
        let writer = RecordingWriter {
            tls: true,
            fail_tls: true,
            ..RecordingWriter::default()
        };
        let transport = transport(&writer);
        let session = transport.session();
        session.set("helo", "client".to_string());

        let result = transport.submit(Response::start_tls(["220 Ready to start TLS"]));

        assert!(matches!(result, Err(Error::UpgradeFailed(_))));
        assert!(session.contains("helo"));
        assert_eq!(session.state(), SessionState::Open);
    }

    #[test]
    fn test_pending_upgrade_leaves_session_upgrading() {
        let writer = RecordingWriter {
            tls: true,
            deferred_tls: true,
            ..RecordingWriter::default()
        };
        let transport = transport(&writer);
        let session = transport.session();
        session.set("helo", "client".to_string());

        transport.submit(Response::start_tls(["220 Ready to start TLS"])).unwrap();

        assert_eq!(session.state(), SessionState::Upgrading);
        assert!(session.contains("helo"));
        assert!(!session.is_secure());

        session.finish_upgrade(false);
        assert_eq!(session.state(), SessionState::Open);
        assert!(session.contains("helo"));
    }

    #[test]
    fn test_upgrade_failure_in_completion_is_kept() {
        let writer = RecordingWriter::default();
        let transport = transport(&writer);

        let (deferred, completer) = Response::deferred();
        transport.submit(deferred).unwrap();
        completer.complete(Response::start_tls(["220 go"]));

        assert!(matches!(transport.take_error(), Some(Error::UpgradeFailed(_))));
        assert!(transport.take_error().is_none());
    }

    #[test]
    fn test_write_failure_closes() {
        let writer = RecordingWriter {
            fail_writes: true,
            ..RecordingWriter::default()
        };
        let transport = transport(&writer);

        let result = transport.submit(Response::line("250 OK"));
        assert!(matches!(result, Err(Error::Io(_))));
        assert!(transport.is_closed());
        assert!(transport.session().is_closed());
        assert!(matches!(
            transport.submit(Response::line("250 OK")),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn test_queue_depth_limit() {
        let writer = RecordingWriter::default();
        let config = Config::builder().max_response_queue_depth(2).build();
        let transport = ResponseTransport::new(writer.clone(), Session::new(), &config);

        let (deferred, completer) = Response::deferred();
        transport.submit(deferred).unwrap();
        transport.submit(Response::line("250 one")).unwrap();
        assert!(matches!(
            transport.submit(Response::line("250 two")),
            Err(Error::QueueFull(2))
        ));

        completer.complete(Response::line("250 first"));
        transport.submit(Response::line("250 three")).unwrap();
        assert_eq!(writer.text(), "250 first\r\n250 one\r\n250 three\r\n");
    }

    #[test]
    fn test_abandoned_deferred_closes() {
        let writer = RecordingWriter::default();
        let transport = transport(&writer);

        let (deferred, completer) = Response::deferred();
        transport.submit(deferred).unwrap();
        transport.submit(Response::line("250 never")).unwrap();
        drop(completer);

        assert_eq!(writer.events(), [Event::Close]);
        assert!(transport.is_closed());
    }

    #[test]
    fn test_fallback_written_when_completer_dropped() {
        let writer = RecordingWriter::default();
        let transport = transport(&writer);

        let (deferred, completer) =
            Response::deferred_with_fallback(Response::line("451 Requested action aborted"));
        transport.submit(deferred).unwrap();
        drop(completer);
        transport.submit(Response::line("250 next")).unwrap();

        assert_eq!(
            writer.text(),
            "451 Requested action aborted\r\n250 next\r\n"
        );
    }

    #[test]
    fn test_close_discards_pending() {
        let writer = RecordingWriter::default();
        let transport = transport(&writer);

        let (deferred, completer) = Response::deferred();
        transport.submit(deferred).unwrap();
        transport.close();
        completer.complete(Response::line("250 too late"));

        assert_eq!(writer.events(), [Event::Close]);
    }
}
