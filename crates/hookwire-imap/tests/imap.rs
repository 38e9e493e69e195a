//! IMAP sessions over an in-memory connection.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

use hookwire_core::net::{ServerStream, serve_connection};
use hookwire_core::{
    Capability, Config, ExtensionPoints, Handler, HandlerChain, HookOutcome, HookResult, Session,
    WiringError,
};
use hookwire_imap::hooks::{COMMAND_HOOKS, LOGIN_HOOKS};
use hookwire_imap::{CommandHook, ImapConfig, ImapProtocol, LoginHook};

struct Client {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Client {
    fn start(protocol: ImapProtocol) -> Self {
        let (client, server) = tokio::io::duplex(4096);
        let protocol = Arc::new(protocol);
        tokio::spawn(async move {
            serve_connection(
                protocol,
                ServerStream::plain(server),
                Session::new(),
                &Config::default(),
                None,
            )
            .await
        });
        let (reader, writer) = tokio::io::split(client);
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    async fn line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line.trim_end_matches("\r\n").to_string()
    }

    async fn at_eof(&mut self) -> bool {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap() == 0
    }
}

struct Users;

impl LoginHook for Users {
    fn do_login(&self, _session: &Session, username: &str, password: &str) -> HookOutcome {
        if username == "alice" && password == "open sesame" {
            Ok(HookResult::ok())
        } else {
            Ok(HookResult::declined())
        }
    }
}

impl Handler for Users {
    fn register(self: Arc<Self>, points: &mut ExtensionPoints) -> Result<(), WiringError> {
        points.add(&LOGIN_HOOKS, self as Arc<dyn LoginHook>)
    }
}

/// Answers the ID command (RFC 2971) and advertises it.
struct Id;

const ID: Capability = Capability::new("ID");

impl CommandHook for Id {
    fn do_command(&self, _session: &Session, name: &str, _args: &str) -> HookOutcome {
        if name == "ID" {
            Ok(HookResult::ok())
        } else {
            Ok(HookResult::declined())
        }
    }
}

impl Handler for Id {
    fn provides(&self) -> &[Capability] {
        &[ID]
    }

    fn register(self: Arc<Self>, points: &mut ExtensionPoints) -> Result<(), WiringError> {
        points.add(&COMMAND_HOOKS, self as Arc<dyn CommandHook>)
    }
}

fn protocol(chain: HandlerChain, config: ImapConfig) -> ImapProtocol {
    ImapProtocol::new(&chain.wire().unwrap(), config)
}

#[tokio::test]
async fn greeting_capability_and_logout() {
    let mut client = Client::start(protocol(HandlerChain::new(), ImapConfig::default()));

    assert_eq!(
        client.line().await,
        "* OK [CAPABILITY IMAP4rev1] hookwire IMAP server ready"
    );

    client.send("a1 CAPABILITY").await;
    assert_eq!(client.line().await, "* CAPABILITY IMAP4rev1");
    assert_eq!(client.line().await, "a1 OK CAPABILITY completed");

    client.send("a2 NOOP").await;
    assert_eq!(client.line().await, "a2 OK NOOP completed");

    client.send("a3 LOGOUT").await;
    assert_eq!(client.line().await, "* BYE hookwire IMAP server logging out");
    assert_eq!(client.line().await, "a3 OK LOGOUT completed");
    assert!(client.at_eof().await);
}

#[tokio::test]
async fn chain_capabilities_are_advertised() {
    let chain = HandlerChain::new().with(Id);
    let mut client = Client::start(protocol(chain, ImapConfig::default()));
    assert_eq!(
        client.line().await,
        "* OK [CAPABILITY IMAP4rev1 ID] hookwire IMAP server ready"
    );

    client.send("t1 ID NIL").await;
    assert_eq!(client.line().await, "t1 OK ID completed");

    client.send("t2 SELECT INBOX").await;
    assert_eq!(client.line().await, "t2 BAD Command not recognized: SELECT");
}

#[tokio::test]
async fn login_without_hooks_fails() {
    let mut client = Client::start(protocol(HandlerChain::new(), ImapConfig::default()));
    client.line().await;

    client.send("a1 LOGIN alice secret").await;
    assert_eq!(
        client.line().await,
        "a1 NO [AUTHENTICATIONFAILED] Authentication failed"
    );
}

#[tokio::test]
async fn login_through_hook() {
    let chain = HandlerChain::new().with(Users);
    let mut client = Client::start(protocol(chain, ImapConfig::default()));
    client.line().await;

    client.send("a1 LOGIN alice wrong").await;
    assert!(client.line().await.starts_with("a1 NO [AUTHENTICATIONFAILED]"));

    client.send(r#"a2 LOGIN "alice" "open sesame""#).await;
    assert_eq!(
        client.line().await,
        "a2 OK [CAPABILITY IMAP4rev1] LOGIN completed"
    );

    client.send("a3 LOGIN alice x").await;
    assert_eq!(client.line().await, "a3 BAD Already authenticated");
}

#[tokio::test]
async fn login_disabled_on_plain_connection() {
    let chain = HandlerChain::new().with(Users);
    let config = ImapConfig::builder()
        .server_name("imap.example")
        .plain_auth_disallowed(true)
        .build();
    let mut client = Client::start(protocol(chain, config));
    assert_eq!(
        client.line().await,
        "* OK [CAPABILITY IMAP4rev1 LOGINDISABLED] imap.example ready"
    );

    client.send(r#"a1 LOGIN alice "open sesame""#).await;
    assert!(client.line().await.starts_with("a1 NO [PRIVACYREQUIRED]"));
}

#[tokio::test]
async fn malformed_commands_get_bad() {
    let mut client = Client::start(protocol(HandlerChain::new(), ImapConfig::default()));
    client.line().await;

    client.send("a1 LOGIN alice").await;
    assert!(client.line().await.starts_with("a1 BAD "));

    client.send("+++").await;
    assert_eq!(client.line().await, "* BAD Missing or invalid command tag");

    client.send("a2 STARTTLS").await;
    assert_eq!(client.line().await, "a2 BAD STARTTLS not supported");

    client.send("a3 NOOP").await;
    assert_eq!(client.line().await, "a3 OK NOOP completed");
}
