//! SMTP sessions over an in-memory connection.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::{Arc, Mutex};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hookwire_core::{
    Capability, ExtensionPoints, Handler, HandlerChain, HookOutcome, HookResult, Session,
    WiredChain, WiringError,
};
use hookwire_smtp::hooks::{
    AUTH_HOOKS, CONNECT_HOOKS, MESSAGE_HOOKS, RCPT_HOOKS, UNKNOWN_HOOKS,
};
use hookwire_smtp::types::extension::AUTH;
use hookwire_smtp::{
    AuthHook, ConnectHook, Extensions, MailAddress, MailEnvelope, MessageHook, RcptHook,
    SmtpConfig, SmtpProtocol, SmtpSessionExt, UnknownHook,
};

use common::Client;

#[derive(Default)]
struct Inbox {
    messages: Mutex<Vec<MailEnvelope>>,
}

impl MessageHook for Inbox {
    fn on_message(&self, _session: &Session, envelope: &MailEnvelope) -> HookOutcome {
        self.messages.lock().unwrap().push(envelope.clone());
        Ok(HookResult::ok())
    }
}

impl Handler for Inbox {
    fn register(self: Arc<Self>, points: &mut ExtensionPoints) -> Result<(), WiringError> {
        points.add(&MESSAGE_HOOKS, self as Arc<dyn MessageHook>)
    }
}

/// Rejects recipients at one domain; errors for another.
struct DomainPolicy;

impl RcptHook for DomainPolicy {
    fn do_rcpt(
        &self,
        _session: &Session,
        _sender: Option<&MailAddress>,
        recipient: &MailAddress,
    ) -> HookOutcome {
        match recipient.domain() {
            "blocked.example" => Ok(HookResult::deny()),
            "broken.example" => Err("directory unavailable".into()),
            _ => Ok(HookResult::declined()),
        }
    }
}

impl Handler for DomainPolicy {
    fn register(self: Arc<Self>, points: &mut ExtensionPoints) -> Result<(), WiringError> {
        points.add(&RCPT_HOOKS, self as Arc<dyn RcptHook>)
    }
}

struct Users;

impl AuthHook for Users {
    fn do_auth(&self, _session: &Session, username: &str, password: &str) -> HookOutcome {
        if username == "alice" && password == "secret" {
            Ok(HookResult::ok())
        } else {
            Ok(HookResult::deny())
        }
    }
}

impl Handler for Users {
    fn provides(&self) -> &[Capability] {
        &[AUTH]
    }

    fn register(self: Arc<Self>, points: &mut ExtensionPoints) -> Result<(), WiringError> {
        points.add(&AUTH_HOOKS, self as Arc<dyn AuthHook>)
    }
}

struct Blocklist;

impl ConnectHook for Blocklist {
    fn on_connect(&self, _session: &Session) -> HookOutcome {
        Ok(HookResult::deny().with_message("5.7.1 Go away"))
    }
}

impl Handler for Blocklist {
    fn register(self: Arc<Self>, points: &mut ExtensionPoints) -> Result<(), WiringError> {
        points.add(&CONNECT_HOOKS, self as Arc<dyn ConnectHook>)
    }
}

struct Xclient;

impl UnknownHook for Xclient {
    fn do_unknown(&self, _session: &Session, verb: &str, _args: &str) -> HookOutcome {
        if verb == "XCLIENT" {
            Ok(HookResult::ok().with_message("2.0.0 XCLIENT accepted"))
        } else {
            Ok(HookResult::declined())
        }
    }
}

impl Handler for Xclient {
    fn register(self: Arc<Self>, points: &mut ExtensionPoints) -> Result<(), WiringError> {
        points.add(&UNKNOWN_HOOKS, self as Arc<dyn UnknownHook>)
    }
}

/// Relays only for authenticated users, so it needs an AUTH provider.
struct RelayGuard;

impl Handler for RelayGuard {
    fn requires(&self) -> &[Capability] {
        &[AUTH]
    }

    fn register(self: Arc<Self>, _points: &mut ExtensionPoints) -> Result<(), WiringError> {
        Ok(())
    }
}

fn smtp(chain: &WiredChain) -> SmtpProtocol {
    SmtpProtocol::smtp(chain, SmtpConfig::default())
}

fn plain(user: &str, password: &str) -> String {
    BASE64.encode(format!("\0{user}\0{password}"))
}

#[tokio::test]
async fn greeting_and_quit() {
    let chain = HandlerChain::new().wire().unwrap();
    let mut client = Client::start(smtp(&chain));

    assert_eq!(client.line().await, "220 localhost hookwire SMTP server ready");
    assert_eq!(
        client.command("QUIT").await,
        "221 2.0.0 localhost Service closing transmission channel"
    );
    assert!(client.at_eof().await);
    client.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn ehlo_lists_extensions() {
    let chain = HandlerChain::new()
        .with(Extensions::standard())
        .with(Users)
        .wire()
        .unwrap();
    let config = SmtpConfig::builder()
        .hello_name("mx.example")
        .max_message_size(1000)
        .build();
    let mut client = Client::start(SmtpProtocol::smtp(&chain, config));
    client.line().await;

    client.send("EHLO client.example\r\n").await;
    assert_eq!(
        client.reply().await,
        [
            "250-mx.example Hello client.example",
            "250-PIPELINING",
            "250-8BITMIME",
            "250-ENHANCEDSTATUSCODES",
            "250-SIZE 1000",
            "250 AUTH PLAIN",
        ]
    );
}

#[tokio::test]
async fn helo_requires_domain() {
    let chain = HandlerChain::new().wire().unwrap();
    let mut client = Client::start(smtp(&chain));
    client.line().await;

    assert!(client.command("HELO").await.starts_with("501 "));
    assert!(client.command("HELO client.example").await.starts_with("250 localhost Hello"));
}

#[tokio::test]
async fn mail_needs_helo_and_brackets() {
    let chain = HandlerChain::new().wire().unwrap();
    let mut client = Client::start(smtp(&chain));
    client.line().await;

    assert!(client.command("MAIL FROM:<a@example.com>").await.starts_with("503 "));
    client.command("EHLO client.example").await;
    assert!(client.command("MAIL FROM:a@example.com").await.starts_with("501 "));
    assert_eq!(
        client.command("MAIL FROM:<a@example.com>").await,
        "250 2.1.0 Sender <a@example.com> OK"
    );
    assert!(client.command("MAIL FROM:<b@example.com>").await.starts_with("503 "));
}

#[tokio::test]
async fn transaction_delivers_unstuffed_content() {
    let inbox = Arc::new(Inbox::default());
    let mut chain = HandlerChain::new().with(DomainPolicy);
    chain.add(Arc::clone(&inbox) as Arc<dyn Handler>);
    let chain = chain.wire().unwrap();
    let mut client = Client::start(smtp(&chain));
    client.line().await;

    client.command("EHLO client.example").await;
    client.command("MAIL FROM:<>").await;
    assert_eq!(
        client.command("RCPT TO:<bob@example.com>").await,
        "250 2.1.5 Recipient <bob@example.com> OK"
    );
    assert!(client.command("RCPT TO:<eve@blocked.example>").await.starts_with("550 "));
    assert!(client.command("RCPT TO:<x@broken.example>").await.starts_with("450 "));
    assert!(client.command("DATA").await.starts_with("354 "));

    client
        .send("Subject: test\r\n\r\n..leading dot\r\nbody\r\n.\r\n")
        .await;
    assert_eq!(client.line().await, "250 2.6.0 Message accepted for delivery");

    let messages = inbox.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert!(message.sender().is_none());
    assert_eq!(message.recipients().len(), 1);
    assert_eq!(message.recipients()[0].as_str(), "bob@example.com");
    assert_eq!(
        &message.content()[..],
        b"Subject: test\r\n\r\n.leading dot\r\nbody\r\n"
    );
}

#[tokio::test]
async fn pipelined_transaction_replies_in_order() {
    let chain = HandlerChain::new().with(DomainPolicy).wire().unwrap();
    let mut client = Client::start(smtp(&chain));
    client.line().await;

    client
        .send(
            "EHLO c\r\nMAIL FROM:<a@example.com>\r\nRCPT TO:<x@blocked.example>\r\n\
             RCPT TO:<y@example.com>\r\nDATA\r\nhello\r\n.\r\nQUIT\r\n",
        )
        .await;

    assert!(client.reply().await[0].starts_with("250 "));
    assert!(client.line().await.starts_with("250 2.1.0"));
    assert!(client.line().await.starts_with("550 "));
    assert!(client.line().await.starts_with("250 2.1.5"));
    assert!(client.line().await.starts_with("354 "));
    assert!(client.line().await.starts_with("250 2.6.0"));
    assert!(client.line().await.starts_with("221 "));
    assert!(client.at_eof().await);
}

#[tokio::test]
async fn data_without_recipients_is_refused() {
    let chain = HandlerChain::new().with(DomainPolicy).wire().unwrap();
    let mut client = Client::start(smtp(&chain));
    client.line().await;

    client.command("HELO c").await;
    assert!(client.command("DATA").await.starts_with("503 "));
    client.command("MAIL FROM:<a@example.com>").await;
    client.command("RCPT TO:<x@blocked.example>").await;
    assert!(client.command("DATA").await.starts_with("503 "));
    assert!(client.command("RSET").await.starts_with("250 "));
    assert!(client.command("MAIL FROM:<a@example.com>").await.starts_with("250 "));
}

#[tokio::test]
async fn oversized_message_is_rejected() {
    let chain = HandlerChain::new().wire().unwrap();
    let config = SmtpConfig::builder().max_message_size(16).build();
    let mut client = Client::start(SmtpProtocol::smtp(&chain, config));
    client.line().await;

    client.command("EHLO c").await;
    assert!(client.command("MAIL FROM:<a@example.com> SIZE=100").await.starts_with("552 "));
    client.command("MAIL FROM:<a@example.com>").await;
    client.command("RCPT TO:<b@example.com>").await;
    client.command("DATA").await;
    client.send("0123456789\r\n0123456789\r\n.\r\n").await;
    assert!(client.line().await.starts_with("552 5.3.4"));

    // The transaction is over; a new one can start.
    assert!(client.command("MAIL FROM:<a@example.com>").await.starts_with("250 "));
}

#[tokio::test]
async fn auth_plain_initial_response() {
    let chain = HandlerChain::new().with(Users).wire().unwrap();
    let mut client = Client::start(smtp(&chain));
    client.line().await;
    client.command("EHLO c").await;

    let wrong = format!("AUTH PLAIN {}", plain("alice", "guess"));
    assert!(client.command(&wrong).await.starts_with("535 "));

    let right = format!("AUTH PLAIN {}", plain("alice", "secret"));
    assert!(client.command(&right).await.starts_with("235 "));
    assert!(client.command(&right).await.starts_with("503 "));
}

#[tokio::test]
async fn auth_plain_continuation() {
    let chain = HandlerChain::new().with(Users).wire().unwrap();
    let mut client = Client::start(smtp(&chain));
    client.line().await;
    client.command("EHLO c").await;

    assert_eq!(client.command("AUTH PLAIN").await, "334 ");
    assert!(client.command("*").await.starts_with("501 "));

    assert_eq!(client.command("AUTH PLAIN").await, "334 ");
    assert!(client.command(&plain("alice", "secret")).await.starts_with("235 "));
}

#[tokio::test]
async fn auth_without_hooks_is_not_implemented() {
    let chain = HandlerChain::new().wire().unwrap();
    let mut client = Client::start(smtp(&chain));
    client.line().await;
    client.command("EHLO c").await;

    assert!(client.command("AUTH PLAIN").await.starts_with("502 "));
    assert!(client.command("AUTH CRAM-MD5").await.starts_with("502 "));
}

#[tokio::test]
async fn auth_required_before_mail() {
    let chain = HandlerChain::new().with(Users).wire().unwrap();
    let config = SmtpConfig::builder().auth_required(true).build();
    let mut client = Client::start(SmtpProtocol::smtp(&chain, config));
    client.line().await;
    client.command("EHLO c").await;

    assert!(client.command("MAIL FROM:<a@example.com>").await.starts_with("530 "));
    assert!(client.command("AUTH LOGIN").await.starts_with("504 "));
    let auth = format!("AUTH PLAIN {}", plain("alice", "secret"));
    client.command(&auth).await;
    assert!(client.command("MAIL FROM:<a@example.com>").await.starts_with("250 "));
}

#[tokio::test]
async fn connect_hook_can_refuse() {
    let chain = HandlerChain::new().with(Blocklist).wire().unwrap();
    let mut client = Client::start(smtp(&chain));

    assert_eq!(client.line().await, "554 5.7.1 Go away");
    assert!(client.at_eof().await);
}

#[tokio::test]
async fn unknown_commands_reach_hooks() {
    let chain = HandlerChain::new().with(Xclient).wire().unwrap();
    let mut client = Client::start(smtp(&chain));
    client.line().await;

    assert_eq!(client.command("XCLIENT NAME=x").await, "250 2.0.0 XCLIENT accepted");
    assert_eq!(client.command("FOO").await, "500 5.5.1 Command FOO unrecognized");
    assert!(client.command("VRFY bob").await.starts_with("252 "));
    assert!(client.command("NOOP").await.starts_with("250 "));
}

#[tokio::test]
async fn malformed_arguments_get_501() {
    let chain = HandlerChain::new().wire().unwrap();
    let mut client = Client::start(smtp(&chain));
    client.line().await;

    assert!(client.command("MAIL TO:<a@example.com>").await.starts_with("501 "));
    assert!(client.command("RCPT").await.starts_with("501 "));
}

#[tokio::test]
async fn starttls_without_tls_is_refused() {
    let chain = HandlerChain::new().wire().unwrap();
    let mut client = Client::start(smtp(&chain));
    client.line().await;

    client.send("EHLO c\r\n").await;
    let ehlo = client.reply().await;
    assert!(ehlo.iter().all(|line| !line.contains("STARTTLS")));

    assert_eq!(client.command("STARTTLS").await, "454 4.7.0 TLS not available");
    assert!(client.command("NOOP").await.starts_with("250 "));
}

#[tokio::test]
async fn starttls_failure_after_accepting() {
    // The session claims TLS is available but no acceptor is configured,
    // so the upgrade itself fails after the 220.
    let chain = HandlerChain::new().wire().unwrap();
    let session = Session::builder().start_tls_available(true).build();
    let mut client = Client::start_with(smtp(&chain), session);
    client.line().await;

    client.send("EHLO c\r\n").await;
    assert!(client.reply().await.iter().any(|line| line.ends_with("STARTTLS")));

    assert!(client.command("STARTTLS").await.starts_with("220 "));
    assert_eq!(
        client.line().await,
        "454 4.7.0 TLS not available due to temporary reason"
    );
}

#[tokio::test]
async fn session_exposes_state_to_hooks() {
    struct Seen(Mutex<Option<(Option<String>, Option<String>)>>);

    impl MessageHook for Seen {
        fn on_message(&self, session: &Session, _envelope: &MailEnvelope) -> HookOutcome {
            *self.0.lock().unwrap() = Some((session.helo_domain(), session.authenticated_user()));
            Ok(HookResult::declined())
        }
    }

    impl Handler for Seen {
        fn register(self: Arc<Self>, points: &mut ExtensionPoints) -> Result<(), WiringError> {
            points.add(&MESSAGE_HOOKS, self as Arc<dyn MessageHook>)
        }
    }

    let seen = Arc::new(Seen(Mutex::new(None)));
    let mut chain = HandlerChain::new().with(Users);
    chain.add(Arc::clone(&seen) as Arc<dyn Handler>);
    let chain = chain.wire().unwrap();
    let mut client = Client::start(smtp(&chain));
    client.line().await;

    client.command("EHLO client.example").await;
    client
        .command(&format!("AUTH PLAIN {}", plain("alice", "secret")))
        .await;
    client.command("MAIL FROM:<alice@example.com>").await;
    client.command("RCPT TO:<bob@example.com>").await;
    client.command("DATA").await;
    client.send("hi\r\n.\r\n").await;
    assert!(client.line().await.starts_with("250 "));

    let seen = seen.0.lock().unwrap().clone().unwrap();
    assert_eq!(seen.0.as_deref(), Some("client.example"));
    assert_eq!(seen.1.as_deref(), Some("alice"));
}

#[test]
fn missing_capability_fails_wiring() {
    let err = HandlerChain::new().with(RelayGuard).wire().unwrap_err();
    assert!(matches!(err, WiringError::MissingCapability { .. }));

    assert!(HandlerChain::new().with(Users).with(RelayGuard).wire().is_ok());
}
