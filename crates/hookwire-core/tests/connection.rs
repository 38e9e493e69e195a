//! End-to-end tests of the tokio transport over in-memory duplex streams.

#![allow(clippy::unwrap_used)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
};
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;

use hookwire_core::net::{ServerStream, load_acceptor, serve_connection};
use hookwire_core::{
    Config, DecodeError, DecodeErrorKind, Error, Executor, Response, Session, TokioExecutor,
};

enum Cmd {
    Echo(String),
    Slow(String),
    Tls,
    State,
    Quit,
}

struct Toy {
    executor: TokioExecutor,
}

impl hookwire_core::Protocol for Toy {
    type Command = Cmd;

    fn name(&self) -> &'static str {
        "toy"
    }

    fn on_connect(&self, _session: &Session) -> Vec<Response> {
        vec![Response::line("+ ready")]
    }

    fn decode(&self, line: &[u8], _session: &Session) -> Result<Option<Cmd>, DecodeError> {
        let line = std::str::from_utf8(line).map_err(|_| DecodeError::syntax("bad bytes"))?;
        let (verb, arg) = line.split_once(' ').unwrap_or((line, ""));
        match verb {
            "ECHO" => Ok(Some(Cmd::Echo(arg.to_string()))),
            "SLOW" => Ok(Some(Cmd::Slow(arg.to_string()))),
            "TLS" => Ok(Some(Cmd::Tls)),
            "STATE" => Ok(Some(Cmd::State)),
            "QUIT" => Ok(Some(Cmd::Quit)),
            _ => Err(DecodeError::syntax("unknown command")),
        }
    }

    fn handle(&self, command: Cmd, session: &Session) -> Vec<Response> {
        match command {
            Cmd::Echo(arg) => vec![Response::line(format!("+ {arg}"))],
            Cmd::Slow(arg) => {
                let (response, completer) = Response::deferred();
                self.executor.execute(Box::new(move || {
                    std::thread::sleep(Duration::from_millis(50));
                    completer.complete(Response::line(format!("+ slow {arg}")));
                }));
                vec![response]
            }
            Cmd::Tls => vec![Response::start_tls(["+ go ahead"])],
            Cmd::State => vec![Response::line(format!(
                "+ secure={} helo={}",
                session.is_secure(),
                session.contains("helo")
            ))],
            Cmd::Quit => vec![Response::line("+ bye").end_session()],
        }
    }

    fn decode_failed(&self, error: &DecodeError, _session: &Session) -> Response {
        match error.kind() {
            DecodeErrorKind::LineTooLong => Response::line("- line too long"),
            _ => Response::line(format!("- {error}")),
        }
    }

    fn upgrade_failed(&self, _error: &Error, _session: &Session) -> Option<Response> {
        Some(Response::line("- tls unavailable"))
    }

    fn timed_out(&self, _session: &Session) -> Option<Response> {
        Some(Response::line("- idle timeout"))
    }
}

struct Client {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    server: JoinHandle<hookwire_core::Result<()>>,
}

impl Client {
    fn start(config: Config) -> Self {
        let (client, server) = tokio::io::duplex(4096);
        let protocol = Arc::new(Toy {
            executor: TokioExecutor::new(),
        });
        let server = tokio::spawn(async move {
            serve_connection(
                protocol,
                ServerStream::plain(server),
                Session::new(),
                &config,
                None,
            )
            .await
        });
        let (reader, writer) = tokio::io::split(client);
        Self {
            reader: BufReader::new(reader),
            writer,
            server,
        }
    }

    async fn send(&mut self, data: &str) {
        self.writer.write_all(data.as_bytes()).await.unwrap();
    }

    async fn line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line
    }

    async fn at_eof(&mut self) -> bool {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap() == 0
    }
}

#[tokio::test]
async fn greeting_then_commands() {
    let mut client = Client::start(Config::default());
    assert_eq!(client.line().await, "+ ready\r\n");

    client.send("ECHO hello\r\n").await;
    assert_eq!(client.line().await, "+ hello\r\n");

    client.send("QUIT\r\n").await;
    assert_eq!(client.line().await, "+ bye\r\n");
    assert!(client.at_eof().await);
    client.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn pipelined_commands_keep_order() {
    let mut client = Client::start(Config::default());
    client.line().await;

    client.send("SLOW one\r\nECHO two\r\nSLOW three\r\nECHO four\r\n").await;

    assert_eq!(client.line().await, "+ slow one\r\n");
    assert_eq!(client.line().await, "+ two\r\n");
    assert_eq!(client.line().await, "+ slow three\r\n");
    assert_eq!(client.line().await, "+ four\r\n");
}

#[tokio::test]
async fn decode_error_keeps_connection_open() {
    let mut client = Client::start(Config::default());
    client.line().await;

    client.send("WHAT\r\nECHO still here\n").await;
    assert_eq!(client.line().await, "- unknown command\r\n");
    assert_eq!(client.line().await, "+ still here\r\n");
}

#[tokio::test]
async fn oversized_line_rejected() {
    let config = Config::builder().max_line_length(16).build();
    let mut client = Client::start(config);
    client.line().await;

    client.send(&format!("ECHO {}\r\nECHO ok\r\n", "x".repeat(64))).await;
    assert_eq!(client.line().await, "- line too long\r\n");
    assert_eq!(client.line().await, "+ ok\r\n");
}

#[tokio::test]
async fn upgrade_without_tls_reported() {
    let mut client = Client::start(Config::default());
    client.line().await;

    client.send("TLS\r\nECHO plain\r\n").await;
    assert_eq!(client.line().await, "+ go ahead\r\n");
    assert_eq!(client.line().await, "- tls unavailable\r\n");
    assert_eq!(client.line().await, "+ plain\r\n");
}

#[tokio::test(start_paused = true)]
async fn idle_connection_closed() {
    let config = Config::builder()
        .idle_timeout(Duration::from_secs(30))
        .build();
    let mut client = Client::start(config);
    client.line().await;

    assert_eq!(client.line().await, "- idle timeout\r\n");
    assert!(client.at_eof().await);
}

#[tokio::test]
async fn client_disconnect_ends_task() {
    let mut client = Client::start(Config::default());
    client.line().await;

    drop(client.writer);
    drop(client.reader);
    client.server.await.unwrap().unwrap();
}

fn tls_file(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/tls")
        .join(name)
}

fn connector() -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    for cert in CertificateDer::pem_file_iter(tls_file("ca.pem")).unwrap() {
        roots.add(cert.unwrap()).unwrap();
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Serves the toy protocol with STARTTLS available and a `helo` attribute
/// already set.
fn start_tls_server(stream: DuplexStream) -> (Session, JoinHandle<hookwire_core::Result<()>>) {
    let acceptor = load_acceptor(&tls_file("server.pem"), &tls_file("server.key")).unwrap();
    let session = Session::builder().start_tls_available(true).build();
    session.set("helo", "client".to_string());

    let served = session.clone();
    let task = tokio::spawn(async move {
        let protocol = Arc::new(Toy {
            executor: TokioExecutor::new(),
        });
        serve_connection(
            protocol,
            ServerStream::plain(stream),
            served,
            &Config::default(),
            Some(&acceptor),
        )
        .await
    });
    (session, task)
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    line
}

#[tokio::test]
async fn start_tls_handshake_resets_session() {
    let (client, server) = tokio::io::duplex(16 * 1024);
    let (session, task) = start_tls_server(server);

    let mut plain = BufReader::new(client);
    assert_eq!(read_line(&mut plain).await, "+ ready\r\n");
    plain.get_mut().write_all(b"TLS\r\n").await.unwrap();
    assert_eq!(read_line(&mut plain).await, "+ go ahead\r\n");

    let domain = ServerName::try_from("localhost").unwrap();
    let tls = connector()
        .connect(domain, plain.into_inner())
        .await
        .unwrap();
    let mut tls = BufReader::new(tls);

    tls.get_mut().write_all(b"STATE\r\n").await.unwrap();
    tls.get_mut().flush().await.unwrap();
    assert_eq!(read_line(&mut tls).await, "+ secure=true helo=false\r\n");
    assert!(session.is_secure());
    assert!(!session.contains("helo"));

    tls.get_mut().write_all(b"QUIT\r\n").await.unwrap();
    tls.get_mut().flush().await.unwrap();
    assert_eq!(read_line(&mut tls).await, "+ bye\r\n");
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn failed_handshake_keeps_session() {
    let (client, server) = tokio::io::duplex(16 * 1024);
    let (session, task) = start_tls_server(server);

    let mut plain = BufReader::new(client);
    assert_eq!(read_line(&mut plain).await, "+ ready\r\n");
    plain.get_mut().write_all(b"TLS\r\n").await.unwrap();
    assert_eq!(read_line(&mut plain).await, "+ go ahead\r\n");

    // Plaintext where the ClientHello should be.
    plain.get_mut().write_all(b"STATE\r\n").await.unwrap();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(Error::UpgradeFailed(_))));
    assert!(session.contains("helo"));
    assert!(!session.is_secure());
    assert!(session.is_closed());
}
