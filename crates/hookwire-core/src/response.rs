//! Responses written back to the client.
//!
//! A [`Response`] is built once by a handler and consumed once by the
//! [`ResponseTransport`](crate::transport::ResponseTransport). Its kind
//! decides what happens around the encoded lines:
//!
//! - [`ResponseKind::Plain`]: lines only.
//! - [`ResponseKind::Stream`]: lines followed by a raw payload.
//! - [`ResponseKind::StartTls`]: lines, then the transport upgrades the
//!   connection and resets the session.
//! - [`ResponseKind::Deferred`]: the real response is produced later through
//!   the paired [`Completer`]; responses queued behind it wait.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

/// What to send back to the client for one command.
#[derive(Debug)]
pub struct Response {
    lines: Vec<String>,
    end_session: bool,
    kind: ResponseKind,
}

/// Behavior attached to a [`Response`].
#[derive(Debug)]
pub enum ResponseKind {
    /// Only the encoded lines are written.
    Plain,
    /// A raw payload is written immediately after the lines.
    Stream(Bytes),
    /// The connection is upgraded to TLS once the lines are flushed.
    StartTls,
    /// The response is not computed yet.
    Deferred(Deferred),
}

impl Response {
    /// Creates a plain response from its lines.
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            end_session: false,
            kind: ResponseKind::Plain,
        }
    }

    /// Creates a plain single-line response.
    pub fn line(line: impl Into<String>) -> Self {
        Self::new([line.into()])
    }

    /// Creates a response whose lines are followed by a raw payload.
    pub fn stream<I, S>(lines: I, payload: Bytes) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: ResponseKind::Stream(payload),
            ..Self::new(lines)
        }
    }

    /// Creates a response that triggers a TLS upgrade after it is flushed.
    pub fn start_tls<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: ResponseKind::StartTls,
            ..Self::new(lines)
        }
    }

    /// Creates a deferred response and the handle that completes it.
    ///
    /// If the [`Completer`] is dropped without completing, the connection is
    /// closed: nothing can be written in its place without breaking order.
    #[must_use]
    pub fn deferred() -> (Self, Completer) {
        Self::deferred_inner(None)
    }

    /// Like [`Response::deferred`], but `fallback` is written if the
    /// [`Completer`] is dropped without completing.
    #[must_use]
    pub fn deferred_with_fallback(fallback: Self) -> (Self, Completer) {
        Self::deferred_inner(Some(fallback))
    }

    fn deferred_inner(fallback: Option<Self>) -> (Self, Completer) {
        let slot = Arc::new(Slot {
            state: Mutex::new(SlotState::Pending {
                listener: None,
                fallback,
            }),
        });
        let response = Self {
            lines: Vec::new(),
            end_session: false,
            kind: ResponseKind::Deferred(Deferred {
                slot: Arc::clone(&slot),
            }),
        };
        (response, Completer { slot: Some(slot) })
    }

    /// Marks the response as the last one: the connection closes after it.
    #[must_use]
    pub const fn end_session(mut self) -> Self {
        self.end_session = true;
        self
    }

    /// Returns the response lines, without terminators.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Returns `true` if the connection closes after this response.
    #[must_use]
    pub const fn is_end_session(&self) -> bool {
        self.end_session
    }

    /// Returns the response kind.
    #[must_use]
    pub const fn kind(&self) -> &ResponseKind {
        &self.kind
    }

    /// Returns `true` for a deferred response.
    #[must_use]
    pub const fn is_deferred(&self) -> bool {
        matches!(self.kind, ResponseKind::Deferred(_))
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, bool, ResponseKind) {
        (self.lines, self.end_session, self.kind)
    }
}

type Listener = Box<dyn FnOnce() + Send>;

struct Slot {
    state: Mutex<SlotState>,
}

enum SlotState {
    Pending {
        listener: Option<Listener>,
        fallback: Option<Response>,
    },
    Ready(Response),
    Abandoned,
    Taken,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, response: Option<Response>) {
        let listener = {
            let mut state = self.lock();
            match &mut *state {
                SlotState::Pending { listener, fallback } => {
                    let listener = listener.take();
                    let resolved = response.or_else(|| fallback.take());
                    *state = resolved.map_or(SlotState::Abandoned, SlotState::Ready);
                    listener
                }
                _ => None,
            }
        };

        // Called outside the slot lock: the listener takes the transport lock.
        if let Some(listener) = listener {
            listener();
        }
    }
}

/// Outcome of asking a [`Deferred`] for its value.
pub(crate) enum Readiness {
    /// The value is available and has been taken.
    Ready(Response),
    /// The completer was dropped and there is no fallback.
    Abandoned,
    /// Not ready; the listener was registered.
    Pending,
}

/// The pending half of a deferred response.
///
/// Held by the transport queue. Dropping it discards any registered
/// listener, so abandoned entries never get called back.
pub struct Deferred {
    slot: Arc<Slot>,
}

impl Deferred {
    /// Returns `true` once the completer has resolved the response.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !matches!(*self.slot.lock(), SlotState::Pending { .. })
    }

    /// Takes the value if ready, otherwise registers `listener` to be called
    /// exactly once when it becomes ready.
    pub(crate) fn take_or_listen(&self, listener: Listener) -> Readiness {
        let mut state = self.slot.lock();
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Ready(response) => Readiness::Ready(response),
            SlotState::Pending { fallback, .. } => {
                *state = SlotState::Pending {
                    listener: Some(listener),
                    fallback,
                };
                Readiness::Pending
            }
            SlotState::Abandoned | SlotState::Taken => Readiness::Abandoned,
        }
    }
}

impl Drop for Deferred {
    fn drop(&mut self) {
        if let SlotState::Pending { listener, .. } = &mut *self.slot.lock() {
            *listener = None;
        }
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Completes a deferred response, possibly from another task or thread.
///
/// Consumed by [`Completer::complete`], so a response resolves at most once.
pub struct Completer {
    slot: Option<Arc<Slot>>,
}

impl Completer {
    /// Resolves the deferred response with `response`.
    ///
    /// If the transport is waiting on it, the transport resumes writing on
    /// the calling thread before this returns.
    pub fn complete(mut self, response: Response) {
        if let Some(slot) = self.slot.take() {
            slot.resolve(Some(response));
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.resolve(None);
        }
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer").finish_non_exhaustive()
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn deferred_of(response: &Response) -> &Deferred {
        match response.kind() {
            ResponseKind::Deferred(deferred) => deferred,
            other => panic!("expected deferred response, got {other:?}"),
        }
    }

    fn counting_listener(counter: &Arc<AtomicUsize>) -> Listener {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_builders() {
        let response = Response::new(["250-one", "250 two"]).end_session();
        assert_eq!(response.lines(), ["250-one", "250 two"]);
        assert!(response.is_end_session());
        assert!(matches!(response.kind(), ResponseKind::Plain));

        let response = Response::stream(["* 1 FETCH"], Bytes::from_static(b"body"));
        assert!(matches!(response.kind(), ResponseKind::Stream(p) if &p[..] == b"body"));

        let response = Response::start_tls(["220 go ahead"]);
        assert!(matches!(response.kind(), ResponseKind::StartTls));
        assert!(!response.is_end_session());
    }

    #[test]
    fn test_ready_before_listening() {
        let (response, completer) = Response::deferred();
        completer.complete(Response::line("250 OK"));

        let deferred = deferred_of(&response);
        assert!(deferred.is_ready());

        let counter = Arc::new(AtomicUsize::new(0));
        match deferred.take_or_listen(counting_listener(&counter)) {
            Readiness::Ready(resolved) => assert_eq!(resolved.lines(), ["250 OK"]),
            _ => panic!("expected ready"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_called_once_on_completion() {
        let (response, completer) = Response::deferred();
        let deferred = deferred_of(&response);
        assert!(!deferred.is_ready());

        let counter = Arc::new(AtomicUsize::new(0));
        assert!(matches!(
            deferred.take_or_listen(counting_listener(&counter)),
            Readiness::Pending
        ));

        completer.complete(Response::line("250 OK"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        match deferred.take_or_listen(counting_listener(&counter)) {
            Readiness::Ready(resolved) => assert_eq!(resolved.lines(), ["250 OK"]),
            _ => panic!("expected ready"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_completer_uses_fallback() {
        let (response, completer) =
            Response::deferred_with_fallback(Response::line("451 Local error"));
        drop(completer);

        let deferred = deferred_of(&response);
        let counter = Arc::new(AtomicUsize::new(0));
        match deferred.take_or_listen(counting_listener(&counter)) {
            Readiness::Ready(resolved) => assert_eq!(resolved.lines(), ["451 Local error"]),
            _ => panic!("expected fallback"),
        }
    }

    #[test]
    fn test_dropped_completer_without_fallback_abandons() {
        let (response, completer) = Response::deferred();
        let deferred = deferred_of(&response);
        let counter = Arc::new(AtomicUsize::new(0));
        assert!(matches!(
            deferred.take_or_listen(counting_listener(&counter)),
            Readiness::Pending
        ));

        drop(completer);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(matches!(
            deferred.take_or_listen(counting_listener(&counter)),
            Readiness::Abandoned
        ));
    }

    #[test]
    fn test_dropped_deferred_discards_listener() {
        let (response, completer) = Response::deferred();
        let counter = Arc::new(AtomicUsize::new(0));
        assert!(matches!(
            deferred_of(&response).take_or_listen(counting_listener(&counter)),
            Readiness::Pending
        ));

        drop(response);
        completer.complete(Response::line("250 OK"));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
