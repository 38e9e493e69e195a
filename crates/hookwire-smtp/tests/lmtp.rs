//! LMTP sessions: LHLO, relaxed paths and per-recipient replies.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use hookwire_core::{
    ExtensionPoints, Handler, HandlerChain, HookOutcome, HookResult, Session, TokioExecutor,
    WiringError,
};
use hookwire_smtp::hooks::{DELIVER_HOOKS, MESSAGE_HOOKS};
use hookwire_smtp::{
    DeliverToRecipientHook, MailAddress, MailEnvelope, MessageHook, SmtpConfig, SmtpProtocol,
};

use common::Client;

/// Refuses `denied@`, defers `later@`, and is slow for the first recipient
/// so later evaluations finish first.
struct Mailboxes;

impl DeliverToRecipientHook for Mailboxes {
    fn deliver(
        &self,
        _session: &Session,
        recipient: &MailAddress,
        _envelope: &MailEnvelope,
    ) -> HookOutcome {
        match recipient.local_part() {
            "slow" => {
                std::thread::sleep(Duration::from_millis(100));
                Ok(HookResult::ok())
            }
            "denied" => Ok(HookResult::deny()),
            "later" => Ok(HookResult::deny_soft().with_message("4.2.2 Mailbox full")),
            "nobody" => Ok(HookResult::declined()),
            _ => Ok(HookResult::ok()),
        }
    }
}

impl Handler for Mailboxes {
    fn register(self: Arc<Self>, points: &mut ExtensionPoints) -> Result<(), WiringError> {
        points.add(&DELIVER_HOOKS, self as Arc<dyn DeliverToRecipientHook>)
    }
}

#[derive(Default)]
struct CountingFilter {
    calls: AtomicUsize,
}

impl MessageHook for CountingFilter {
    fn on_message(&self, _session: &Session, envelope: &MailEnvelope) -> HookOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if envelope.content().starts_with(b"SPAM") {
            Ok(HookResult::deny())
        } else {
            Ok(HookResult::ok())
        }
    }
}

impl Handler for CountingFilter {
    fn register(self: Arc<Self>, points: &mut ExtensionPoints) -> Result<(), WiringError> {
        points.add(&MESSAGE_HOOKS, self as Arc<dyn MessageHook>)
    }
}

fn lmtp(chain: &hookwire_core::WiredChain) -> SmtpProtocol {
    SmtpProtocol::lmtp(chain, SmtpConfig::lmtp().build())
        .with_executor(Arc::new(TokioExecutor::new()))
}

async fn transaction(client: &mut Client, recipients: &[&str], body: &str) {
    client.command("LHLO client.example").await;
    client.command("MAIL FROM:sender@example.com").await;
    for recipient in recipients {
        let reply = client.command(&format!("RCPT TO:<{recipient}>")).await;
        assert!(reply.starts_with("250 "), "{reply}");
    }
    assert!(client.command("DATA").await.starts_with("354 "));
    client.send(&format!("{body}\r\n.\r\n")).await;
}

#[tokio::test]
async fn helo_and_ehlo_are_rejected() {
    let chain = HandlerChain::new().wire().unwrap();
    let mut client = Client::start(lmtp(&chain));

    assert_eq!(client.line().await, "220 localhost hookwire LMTP server ready");
    assert!(client.command("HELO client.example").await.starts_with("500 "));
    assert!(client.command("EHLO client.example").await.starts_with("500 "));
    assert!(client.command("LHLO client.example").await.starts_with("250 "));
}

#[tokio::test]
async fn unbracketed_paths_are_accepted() {
    let chain = HandlerChain::new().wire().unwrap();
    let mut client = Client::start(lmtp(&chain));
    client.line().await;

    // No LHLO needed before MAIL either.
    assert!(client.command("MAIL FROM:sender@example.com").await.starts_with("250 "));
    assert!(client.command("RCPT TO:rcpt@example.com").await.starts_with("250 "));
}

#[tokio::test]
async fn one_reply_per_recipient_in_rcpt_order() {
    let chain = HandlerChain::new().with(Mailboxes).wire().unwrap();
    let mut client = Client::start(lmtp(&chain));
    client.line().await;

    transaction(
        &mut client,
        &[
            "slow@example.com",
            "denied@example.com",
            "later@example.com",
            "ok@example.com",
        ],
        "hello",
    )
    .await;

    assert_eq!(client.line().await, "250 2.1.5 <slow@example.com> Delivered");
    assert!(client.line().await.starts_with("550 "));
    assert_eq!(client.line().await, "451 4.2.2 Mailbox full");
    assert_eq!(client.line().await, "250 2.1.5 <ok@example.com> Delivered");

    assert!(client.command("NOOP").await.starts_with("250 "));
}

#[tokio::test]
async fn denied_first_recipient_then_accepted() {
    let chain = HandlerChain::new().with(Mailboxes).wire().unwrap();
    let mut client = Client::start(lmtp(&chain));
    client.line().await;

    transaction(&mut client, &["denied@example.com", "ok@example.com"], "x").await;

    assert!(client.line().await.starts_with("5"));
    assert!(client.line().await.starts_with("2"));
}

#[tokio::test]
async fn undelivered_recipient_is_temporary_failure() {
    let chain = HandlerChain::new().with(Mailboxes).wire().unwrap();
    let mut client = Client::start(lmtp(&chain));
    client.line().await;

    transaction(&mut client, &["nobody@example.com"], "x").await;
    assert!(client.line().await.starts_with("451 "));
}

#[tokio::test]
async fn message_hook_result_repeats_per_recipient() {
    let filter = Arc::new(CountingFilter::default());
    let mut chain = HandlerChain::new();
    chain.add(Arc::clone(&filter) as Arc<dyn Handler>);
    let chain = chain.wire().unwrap();
    let mut client = Client::start(lmtp(&chain));
    client.line().await;

    transaction(&mut client, &["a@example.com", "b@example.com"], "SPAM here").await;
    assert!(client.line().await.starts_with("554 "));
    assert!(client.line().await.starts_with("554 "));
    assert_eq!(filter.calls.load(Ordering::SeqCst), 1);

    transaction(&mut client, &["a@example.com", "b@example.com"], "ham").await;
    assert!(client.line().await.starts_with("250 "));
    assert!(client.line().await.starts_with("250 "));
    assert_eq!(filter.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn oversized_message_fails_every_recipient() {
    let chain = HandlerChain::new().with(Mailboxes).wire().unwrap();
    let config = SmtpConfig::lmtp().max_message_size(8).build();
    let mut client = Client::start(SmtpProtocol::lmtp(&chain, config));
    client.line().await;

    transaction(
        &mut client,
        &["a@example.com", "b@example.com"],
        "far more than eight bytes",
    )
    .await;
    assert!(client.line().await.starts_with("552 "));
    assert!(client.line().await.starts_with("552 "));
}
