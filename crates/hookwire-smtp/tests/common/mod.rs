//! Duplex client shared by the SMTP and LMTP tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

use hookwire_core::net::{ServerStream, serve_connection};
use hookwire_core::{Config, Session};
use hookwire_smtp::SmtpProtocol;

pub struct Client {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    pub server: JoinHandle<hookwire_core::Result<()>>,
}

impl Client {
    pub fn start(protocol: SmtpProtocol) -> Self {
        Self::start_with(protocol, Session::new())
    }

    pub fn start_with(protocol: SmtpProtocol, session: Session) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let (client, server) = tokio::io::duplex(16 * 1024);
        let protocol = Arc::new(protocol);
        let server = tokio::spawn(async move {
            serve_connection(
                protocol,
                ServerStream::plain(server),
                session,
                &Config::default(),
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

    pub async fn send(&mut self, data: &str) {
        self.writer.write_all(data.as_bytes()).await.unwrap();
    }

    /// Reads one line without its CRLF.
    pub async fn line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line.trim_end_matches("\r\n").to_string()
    }

    /// Reads a complete (possibly multi-line) reply.
    pub async fn reply(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.line().await;
            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line);
            if last {
                return lines;
            }
        }
    }

    /// Sends a command and returns the first line of its reply.
    pub async fn command(&mut self, command: &str) -> String {
        self.send(&format!("{command}\r\n")).await;
        self.reply().await.remove(0)
    }

    pub async fn at_eof(&mut self) -> bool {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap() == 0
    }
}
