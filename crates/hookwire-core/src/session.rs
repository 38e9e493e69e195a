//! Per-connection session state.
//!
//! A [`Session`] is created when a connection is accepted and dropped when
//! it closes. It holds typed attributes that handlers use to carry state
//! between commands, plus the connection identity.
//!
//! ```text
//!            begin_upgrade()            finish_upgrade()
//!   Open ─────────────────→ Upgrading ─────────────────→ Open
//!    │                         │
//!    └──── close() ────────────┴───────────────────────→ Closed
//! ```
//!
//! Attributes are only cleared when an upgrade succeeds.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a session within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Established and processing commands.
    #[default]
    Open,
    /// A STARTTLS response is being flushed and the upgrade is in progress.
    Upgrading,
    /// Terminal. No transitions leave this state.
    Closed,
}

type Attribute = Arc<dyn Any + Send + Sync>;

struct Inner {
    id: SessionId,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    start_tls_available: bool,
    secure: AtomicBool,
    state: Mutex<SessionState>,
    attributes: Mutex<HashMap<String, Attribute>>,
}

/// Handle to the state of one connection.
///
/// Cloning is cheap; all clones refer to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Default for Session {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Session {
    /// Creates a session with no address information.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session builder.
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Returns the session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Returns the remote peer address, if known.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    /// Returns the local endpoint address, if known.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr
    }

    /// Returns `true` if the transport can upgrade this connection to TLS.
    #[must_use]
    pub fn start_tls_available(&self) -> bool {
        self.inner.start_tls_available
    }

    /// Returns `true` once the connection is encrypted.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.inner.secure.load(Ordering::Acquire)
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    /// Returns `true` once the session is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Stores an attribute, replacing any previous value under `key`.
    pub fn set<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.lock_attributes().insert(key.into(), Arc::new(value));
    }

    /// Returns the attribute under `key` if it exists and has type `T`.
    #[must_use]
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let value = self.lock_attributes().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    /// Returns a clone of the attribute under `key`.
    #[must_use]
    pub fn get_cloned<T>(&self, key: &str) -> Option<T>
    where
        T: Any + Send + Sync + Clone,
    {
        self.get::<T>(key).map(|value| T::clone(&value))
    }

    /// Returns `true` if an attribute exists under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.lock_attributes().contains_key(key)
    }

    /// Removes the attribute under `key`, returning whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.lock_attributes().remove(key).is_some()
    }

    /// Clears all attributes.
    ///
    /// Called after a successful protocol upgrade: the new security context
    /// invalidates everything negotiated before it.
    pub fn reset_state(&self) {
        self.lock_attributes().clear();
    }

    /// Enters [`SessionState::Upgrading`]. Returns `false` unless open.
    pub fn begin_upgrade(&self) -> bool {
        let mut state = self.lock_state();
        if *state == SessionState::Open {
            *state = SessionState::Upgrading;
            true
        } else {
            false
        }
    }

    /// Leaves [`SessionState::Upgrading`].
    ///
    /// On success the connection is marked secure and attributes are reset;
    /// on failure the attributes are kept.
    pub fn finish_upgrade(&self, succeeded: bool) {
        {
            let mut state = self.lock_state();
            if *state != SessionState::Upgrading {
                return;
            }
            *state = SessionState::Open;
        }
        if succeeded {
            self.inner.secure.store(true, Ordering::Release);
            self.reset_state();
        }
    }

    /// Marks an implicitly secured connection (TLS from the first byte).
    pub fn mark_secure(&self) {
        self.inner.secure.store(true, Ordering::Release);
    }

    /// Enters [`SessionState::Closed`]. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        let mut state = self.lock_state();
        if *state == SessionState::Closed {
            false
        } else {
            *state = SessionState::Closed;
            true
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_attributes(&self) -> MutexGuard<'_, HashMap<String, Attribute>> {
        self.inner
            .attributes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.lock_attributes().keys().cloned().collect();
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("state", &self.state())
            .field("secure", &self.is_secure())
            .field("attributes", &keys)
            .finish()
    }
}

/// Builder for [`Session`].
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    start_tls_available: bool,
    secure: bool,
}

impl SessionBuilder {
    /// Sets the remote peer address.
    #[must_use]
    pub const fn peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Sets the local endpoint address.
    #[must_use]
    pub const fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Records whether the transport offers a TLS upgrade.
    #[must_use]
    pub const fn start_tls_available(mut self, available: bool) -> Self {
        self.start_tls_available = available;
        self
    }

    /// Marks the connection as secure from the start.
    #[must_use]
    pub const fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Builds the session in the [`SessionState::Open`] state.
    #[must_use]
    pub fn build(self) -> Session {
        Session {
            inner: Arc::new(Inner {
                id: SessionId::next(),
                peer_addr: self.peer_addr,
                local_addr: self.local_addr,
                start_tls_available: self.start_tls_available,
                secure: AtomicBool::new(self.secure),
                state: Mutex::new(SessionState::Open),
                attributes: Mutex::new(HashMap::new()),
            }),
        }
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
    fn test_typed_attributes() {
        let session = Session::new();
        session.set("sender", "alice@example.com".to_string());
        session.set("count", 3_u32);

        assert_eq!(
            session.get_cloned::<String>("sender").as_deref(),
            Some("alice@example.com")
        );
        assert_eq!(session.get_cloned::<u32>("count"), Some(3));
        // Wrong type yields nothing
        assert!(session.get::<u64>("count").is_none());
        assert!(session.contains("sender"));

        assert!(session.remove("sender"));
        assert!(!session.remove("sender"));
        assert!(!session.contains("sender"));
    }

    #[test]
    fn test_clones_share_state() {
        let session = Session::new();
        let other = session.clone();
        other.set("user", "bob".to_string());
        assert!(session.contains("user"));
        assert_eq!(session.id(), other.id());
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(Session::new().id(), Session::new().id());
    }

    #[test]
    fn test_successful_upgrade_resets_attributes() {
        let session = Session::new();
        session.set("helo", "client.example.com".to_string());

        assert!(session.begin_upgrade());
        assert_eq!(session.state(), SessionState::Upgrading);
        session.finish_upgrade(true);

        assert_eq!(session.state(), SessionState::Open);
        assert!(session.is_secure());
        assert!(!session.contains("helo"));
    }

    #[test]
    fn test_failed_upgrade_keeps_attributes() {
        let session = Session::new();
        session.set("helo", "client.example.com".to_string());

        assert!(session.begin_upgrade());
        session.finish_upgrade(false);

        assert_eq!(session.state(), SessionState::Open);
        assert!(!session.is_secure());
        assert!(session.contains("helo"));
    }

    #[test]
    fn test_closed_is_terminal() {
        let session = Session::new();
        assert!(session.close());
        assert!(!session.close());
        assert!(!session.begin_upgrade());
        session.finish_upgrade(true);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_secure());
    }

    #[test]
    fn test_builder_identity() {
        let peer: SocketAddr = "192.0.2.10:40000".parse().unwrap();
        let session = Session::builder()
            .peer_addr(peer)
            .start_tls_available(true)
            .build();

        assert_eq!(session.peer_addr(), Some(peer));
        assert!(session.local_addr().is_none());
        assert!(session.start_tls_available());
        assert!(!session.is_secure());
    }
}
