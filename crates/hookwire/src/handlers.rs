//! Handlers wired by the command line server.

use std::collections::BTreeMap;
use std::sync::Arc;

use hookwire_core::{
    Capability, ExtensionPoints, Handler, HookOutcome, HookResult, Session, WiringError,
};
use hookwire_imap::LoginHook;
use hookwire_imap::hooks::LOGIN_HOOKS;
use hookwire_smtp::hooks::{AUTH_HOOKS, DELIVER_HOOKS, MESSAGE_HOOKS, RCPT_HOOKS};
use hookwire_smtp::types::extension::AUTH;
use hookwire_smtp::{
    AuthHook, DeliverToRecipientHook, MailAddress, MailEnvelope, MessageHook, RcptHook,
};

/// Accepts recipients only in the listed domains. With no domains listed
/// every recipient passes.
#[derive(Debug, Clone, Default)]
pub struct LocalDomains {
    domains: Vec<String>,
}

impl LocalDomains {
    pub fn new(domains: impl IntoIterator<Item = String>) -> Self {
        Self {
            domains: domains
                .into_iter()
                .map(|domain| domain.to_ascii_lowercase())
                .collect(),
        }
    }

    fn is_local(&self, address: &MailAddress) -> bool {
        let domain = address.domain().to_ascii_lowercase();
        self.domains.iter().any(|local| *local == domain)
    }
}

impl RcptHook for LocalDomains {
    fn do_rcpt(
        &self,
        session: &Session,
        _sender: Option<&MailAddress>,
        recipient: &MailAddress,
    ) -> HookOutcome {
        if self.domains.is_empty() {
            return Ok(HookResult::declined());
        }
        if self.is_local(recipient) {
            return Ok(HookResult::ok());
        }
        tracing::info!(session = %session.id(), %recipient, "relaying denied");
        Ok(HookResult::deny().with_message(format!("5.7.1 <{recipient}> Relaying denied")))
    }
}

impl Handler for LocalDomains {
    fn name(&self) -> &str {
        "local-domains"
    }

    fn register(self: Arc<Self>, points: &mut ExtensionPoints) -> Result<(), WiringError> {
        points.add(&RCPT_HOOKS, self as Arc<dyn RcptHook>)
    }
}

/// Logs accepted messages.
///
/// Stands in for a mail store: SMTP messages and LMTP deliveries are
/// logged and acknowledged.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeLogger;

impl MessageHook for EnvelopeLogger {
    fn on_message(&self, session: &Session, envelope: &MailEnvelope) -> HookOutcome {
        tracing::info!(
            session = %session.id(),
            sender = %display_sender(envelope),
            recipients = envelope.recipients().len(),
            size = envelope.size(),
            "message received"
        );
        Ok(HookResult::ok())
    }
}

impl DeliverToRecipientHook for EnvelopeLogger {
    fn deliver(
        &self,
        session: &Session,
        recipient: &MailAddress,
        envelope: &MailEnvelope,
    ) -> HookOutcome {
        tracing::info!(
            session = %session.id(),
            sender = %display_sender(envelope),
            %recipient,
            size = envelope.size(),
            "message delivered"
        );
        Ok(HookResult::ok())
    }
}

impl Handler for EnvelopeLogger {
    fn name(&self) -> &str {
        "envelope-logger"
    }

    fn register(self: Arc<Self>, points: &mut ExtensionPoints) -> Result<(), WiringError> {
        points.add(&MESSAGE_HOOKS, Arc::clone(&self) as Arc<dyn MessageHook>)?;
        points.add(&DELIVER_HOOKS, self as Arc<dyn DeliverToRecipientHook>)
    }
}

fn display_sender(envelope: &MailEnvelope) -> String {
    envelope
        .sender()
        .map_or_else(|| "<>".to_string(), ToString::to_string)
}

/// Fixed user name and password table for SMTP AUTH and IMAP LOGIN.
#[derive(Debug, Clone, Default)]
pub struct StaticUsers {
    users: BTreeMap<String, String>,
}

impl StaticUsers {
    pub const fn new(users: BTreeMap<String, String>) -> Self {
        Self { users }
    }

    fn verify(&self, session: &Session, username: &str, password: &str) -> HookOutcome {
        if self
            .users
            .get(username)
            .is_some_and(|expected| expected == password)
        {
            Ok(HookResult::ok())
        } else {
            tracing::debug!(session = %session.id(), user = %username, "unknown credentials");
            Ok(HookResult::declined())
        }
    }
}

impl AuthHook for StaticUsers {
    fn do_auth(&self, session: &Session, username: &str, password: &str) -> HookOutcome {
        self.verify(session, username, password)
    }
}

impl LoginHook for StaticUsers {
    fn do_login(&self, session: &Session, username: &str, password: &str) -> HookOutcome {
        self.verify(session, username, password)
    }
}

impl Handler for StaticUsers {
    fn name(&self) -> &str {
        "static-users"
    }

    fn provides(&self) -> &[Capability] {
        &[AUTH]
    }

    fn register(self: Arc<Self>, points: &mut ExtensionPoints) -> Result<(), WiringError> {
        points.add(&AUTH_HOOKS, Arc::clone(&self) as Arc<dyn AuthHook>)?;
        points.add(&LOGIN_HOOKS, self as Arc<dyn LoginHook>)
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
    use hookwire_core::{HandlerChain, HookReturnCode};

    fn address(addr: &str) -> MailAddress {
        MailAddress::new(addr).unwrap()
    }

    #[test]
    fn local_domains_ignore_case() {
        let policy = LocalDomains::new(["Example.org".to_string()]);
        let session = Session::new();

        let local = policy
            .do_rcpt(&session, None, &address("bob@EXAMPLE.ORG"))
            .unwrap();
        assert_eq!(local.code(), HookReturnCode::Ok);

        let remote = policy
            .do_rcpt(&session, None, &address("bob@elsewhere.net"))
            .unwrap();
        assert_eq!(remote.code(), HookReturnCode::Deny);
        assert_eq!(
            remote.message(),
            Some("5.7.1 <bob@elsewhere.net> Relaying denied")
        );
    }

    #[test]
    fn static_users_check_passwords() {
        let users = StaticUsers::new(BTreeMap::from([(
            "alice".to_string(),
            "secret".to_string(),
        )]));
        let session = Session::new();

        assert_eq!(
            users.do_auth(&session, "alice", "secret").unwrap().code(),
            HookReturnCode::Ok
        );
        assert!(users.do_login(&session, "alice", "wrong").unwrap().is_declined());
        assert!(users.do_auth(&session, "mallory", "secret").unwrap().is_declined());
    }

    #[test]
    fn handlers_wire_into_one_chain() {
        let chain = HandlerChain::new()
            .with(StaticUsers::default())
            .with(LocalDomains::default())
            .with(EnvelopeLogger)
            .wire()
            .unwrap();

        assert!(chain.has_capability(&AUTH));
        assert_eq!(chain.hooks(&AUTH_HOOKS).len(), 1);
        assert_eq!(chain.hooks(&LOGIN_HOOKS).len(), 1);
        assert_eq!(chain.hooks(&MESSAGE_HOOKS).len(), 1);
        assert_eq!(chain.hooks(&DELIVER_HOOKS).len(), 1);
        assert_eq!(chain.hooks(&RCPT_HOOKS).len(), 1);
    }
}
