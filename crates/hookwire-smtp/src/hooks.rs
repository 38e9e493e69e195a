//! SMTP/LMTP hook traits and their extension points.
//!
//! A handler implements one or more of these traits and registers itself at
//! the matching extension point from [`Handler::register`]:
//!
//! ```ignore
//! impl Handler for DomainPolicy {
//!     fn register(self: Arc<Self>, points: &mut ExtensionPoints) -> Result<(), WiringError> {
//!         points.add(&RCPT_HOOKS, self as Arc<dyn RcptHook>)
//!     }
//! }
//! ```
//!
//! Hooks run in registration order until one returns a result other than
//! [`HookResult::declined`](hookwire_core::HookResult::declined). Every
//! point here accepts any number of hooks; none is a singleton.
//!
//! [`Handler::register`]: hookwire_core::Handler::register

use hookwire_core::{ExtensionPoint, HookOutcome, Session};

use crate::types::{MailAddress, MailEnvelope};

/// Runs when a client connects, before the greeting.
pub trait ConnectHook: Send + Sync {
    /// Decides whether the client may proceed.
    fn on_connect(&self, session: &Session) -> HookOutcome;
}

/// Runs for HELO, EHLO and LHLO.
pub trait HeloHook: Send + Sync {
    /// Inspects the client's announced domain.
    fn do_helo(&self, session: &Session, domain: &str) -> HookOutcome;
}

/// Runs for MAIL FROM.
pub trait MailHook: Send + Sync {
    /// Inspects the reverse-path; `None` is the null sender.
    fn do_mail(&self, session: &Session, sender: Option<&MailAddress>) -> HookOutcome;
}

/// Runs for RCPT TO.
pub trait RcptHook: Send + Sync {
    /// Inspects one recipient of the current transaction.
    fn do_rcpt(
        &self,
        session: &Session,
        sender: Option<&MailAddress>,
        recipient: &MailAddress,
    ) -> HookOutcome;
}

/// Runs once per message after DATA.
///
/// Under LMTP, when no [`DeliverToRecipientHook`] is wired, the single
/// result is reported for every recipient.
pub trait MessageHook: Send + Sync {
    /// Inspects the complete message.
    fn on_message(&self, session: &Session, envelope: &MailEnvelope) -> HookOutcome;
}

/// Runs once per recipient after LMTP DATA, possibly off the connection's
/// task.
pub trait DeliverToRecipientHook: Send + Sync {
    /// Delivers the message to one recipient.
    fn deliver(
        &self,
        session: &Session,
        recipient: &MailAddress,
        envelope: &MailEnvelope,
    ) -> HookOutcome;
}

/// Verifies AUTH PLAIN credentials.
pub trait AuthHook: Send + Sync {
    /// `Ok` authenticates the session as `username`.
    fn do_auth(&self, session: &Session, username: &str, password: &str) -> HookOutcome;
}

/// Runs for QUIT. The connection closes whatever the result.
pub trait QuitHook: Send + Sync {
    /// Observes or customises the farewell.
    fn do_quit(&self, session: &Session) -> HookOutcome;
}

/// Offered commands the server does not implement.
pub trait UnknownHook: Send + Sync {
    /// `Ok` accepts the command; the default reply is 500.
    fn do_unknown(&self, session: &Session, verb: &str, args: &str) -> HookOutcome;
}

/// Extension point for [`ConnectHook`].
pub const CONNECT_HOOKS: ExtensionPoint<dyn ConnectHook> = ExtensionPoint::new("smtp.connect");
/// Extension point for [`HeloHook`].
pub const HELO_HOOKS: ExtensionPoint<dyn HeloHook> = ExtensionPoint::new("smtp.helo");
/// Extension point for [`MailHook`].
pub const MAIL_HOOKS: ExtensionPoint<dyn MailHook> = ExtensionPoint::new("smtp.mail");
/// Extension point for [`RcptHook`].
pub const RCPT_HOOKS: ExtensionPoint<dyn RcptHook> = ExtensionPoint::new("smtp.rcpt");
/// Extension point for [`MessageHook`].
pub const MESSAGE_HOOKS: ExtensionPoint<dyn MessageHook> = ExtensionPoint::new("smtp.message");
/// Extension point for [`DeliverToRecipientHook`].
pub const DELIVER_HOOKS: ExtensionPoint<dyn DeliverToRecipientHook> =
    ExtensionPoint::new("lmtp.deliver");
/// Extension point for [`AuthHook`].
pub const AUTH_HOOKS: ExtensionPoint<dyn AuthHook> = ExtensionPoint::new("smtp.auth");
/// Extension point for [`QuitHook`].
pub const QUIT_HOOKS: ExtensionPoint<dyn QuitHook> = ExtensionPoint::new("smtp.quit");
/// Extension point for [`UnknownHook`].
pub const UNKNOWN_HOOKS: ExtensionPoint<dyn UnknownHook> = ExtensionPoint::new("smtp.unknown");

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
    use std::sync::Arc;

    use hookwire_core::{ExtensionPoints, Handler, HandlerChain, HookResult, WiringError};

    use super::*;

    struct Accept(&'static str);

    impl RcptHook for Accept {
        fn do_rcpt(
            &self,
            _session: &Session,
            _sender: Option<&MailAddress>,
            _recipient: &MailAddress,
        ) -> HookOutcome {
            Ok(HookResult::ok())
        }
    }

    impl Handler for Accept {
        fn name(&self) -> &str {
            self.0
        }

        fn register(self: Arc<Self>, points: &mut ExtensionPoints) -> Result<(), WiringError> {
            points.add(&RCPT_HOOKS, self as Arc<dyn RcptHook>)
        }
    }

    #[test]
    fn test_no_point_is_singleton() {
        assert!(!CONNECT_HOOKS.is_singleton());
        assert!(!HELO_HOOKS.is_singleton());
        assert!(!MAIL_HOOKS.is_singleton());
        assert!(!RCPT_HOOKS.is_singleton());
        assert!(!MESSAGE_HOOKS.is_singleton());
        assert!(!DELIVER_HOOKS.is_singleton());
        assert!(!AUTH_HOOKS.is_singleton());
        assert!(!QUIT_HOOKS.is_singleton());
        assert!(!UNKNOWN_HOOKS.is_singleton());
    }

    #[test]
    fn test_point_takes_several_handlers() {
        let chain = HandlerChain::new()
            .with(Accept("first"))
            .with(Accept("second"))
            .wire()
            .unwrap();
        assert_eq!(chain.hooks(&RCPT_HOOKS).len(), 2);
    }
}
