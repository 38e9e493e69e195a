//! TCP accept loop and per-connection driver.

use std::future::{self, Future};
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

use super::framed::{Frame, LineBuffer};
use super::stream::ServerStream;
use super::writer::{ChannelWriter, Outbound};
use crate::config::Config;
use crate::engine::{Connection, Protocol};
use crate::error::{DecodeError, DecodeErrorKind, Error, Result};
use crate::session::Session;

/// Accepts TCP connections and serves `P` on each of them.
pub struct Server<P: Protocol> {
    protocol: Arc<P>,
    config: Arc<Config>,
    tls: Option<TlsAcceptor>,
    implicit_tls: bool,
}

impl<P: Protocol> Clone for Server<P> {
    fn clone(&self) -> Self {
        Self {
            protocol: Arc::clone(&self.protocol),
            config: Arc::clone(&self.config),
            tls: self.tls.clone(),
            implicit_tls: self.implicit_tls,
        }
    }
}

impl<P: Protocol> Server<P> {
    /// Creates a plaintext server.
    #[must_use]
    pub fn new(protocol: Arc<P>, config: Config) -> Self {
        Self {
            protocol,
            config: Arc::new(config),
            tls: None,
            implicit_tls: false,
        }
    }

    /// Enables TLS. Without [`Server::implicit_tls`], clients upgrade with
    /// STARTTLS.
    #[must_use]
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Performs the TLS handshake as soon as a connection is accepted.
    #[must_use]
    pub const fn implicit_tls(mut self, enabled: bool) -> Self {
        self.implicit_tls = enabled;
        self
    }

    /// Serves connections from `listener` forever.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener address cannot be read.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        self.serve_until(listener, future::pending()).await
    }

    /// Serves connections until `shutdown` completes.
    ///
    /// Connections already accepted keep running on their own tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener address cannot be read.
    pub async fn serve_until<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local = listener.local_addr()?;
        tracing::info!(
            protocol = self.protocol.name(),
            %local,
            tls = self.tls.is_some(),
            implicit_tls = self.implicit_tls,
            "listening"
        );

        tokio::pin!(shutdown);
        loop {
            let (socket, peer) = tokio::select! {
                biased;
                () = &mut shutdown => {
                    tracing::info!(%local, "listener shut down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let server = self.clone();
            tokio::spawn(async move {
                let session = server.session_for(&socket);
                let span = tracing::info_span!("connection", session = %session.id(), %peer);
                async move {
                    if let Err(e) = server.handle(socket, session).await {
                        tracing::warn!(error = %e, "connection ended with error");
                    }
                }
                .instrument(span)
                .await;
            });
        }
    }

    fn session_for(&self, socket: &TcpStream) -> Session {
        let mut builder = Session::builder()
            .start_tls_available(self.tls.is_some() && !self.implicit_tls)
            .secure(self.implicit_tls);
        if let Ok(peer) = socket.peer_addr() {
            builder = builder.peer_addr(peer);
        }
        if let Ok(local) = socket.local_addr() {
            builder = builder.local_addr(local);
        }
        builder.build()
    }

    async fn handle(&self, socket: TcpStream, session: Session) -> Result<()> {
        let stream = match (&self.tls, self.implicit_tls) {
            (Some(acceptor), true) => ServerStream::accept(socket, acceptor).await?,
            _ => ServerStream::plain(socket),
        };
        serve_connection(
            Arc::clone(&self.protocol),
            stream,
            session,
            &self.config,
            self.tls.as_ref(),
        )
        .await
    }
}

impl<P: Protocol> std::fmt::Debug for Server<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("protocol", &self.protocol.name())
            .field("config", &self.config)
            .field("tls", &self.tls.is_some())
            .field("implicit_tls", &self.implicit_tls)
            .finish()
    }
}

enum Event {
    Outbound(Option<Outbound>),
    Read(std::io::Result<usize>),
    Idle,
}

/// Serves one connection over `stream` until either side closes it.
///
/// STARTTLS is offered when `tls` is set and the stream is not yet
/// encrypted.
///
/// # Errors
///
/// Returns an error on I/O failure, a failed handshake, or when the
/// connection has to be dropped (full response queue).
pub async fn serve_connection<P, S>(
    protocol: Arc<P>,
    stream: ServerStream<S>,
    session: Session,
    config: &Config,
    tls: Option<&TlsAcceptor>,
) -> Result<()>
where
    P: Protocol,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (writer, rx) = ChannelWriter::channel(tls.is_some() && !stream.is_tls());
    let connection = Connection::open(protocol, session, writer, config)?;
    let result = drive(&connection, stream, rx, config, tls).await;
    connection.on_disconnect();
    result
}

async fn drive<P, S>(
    connection: &Connection<P, ChannelWriter>,
    mut stream: ServerStream<S>,
    mut rx: UnboundedReceiver<Outbound>,
    config: &Config,
    tls: Option<&TlsAcceptor>,
) -> Result<()>
where
    P: Protocol,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut lines = LineBuffer::new(config.max_line_length);

    loop {
        // Everything produced so far reaches the wire before the next
        // line is looked at, so an upgrade happens between two lines.
        while let Ok(message) = rx.try_recv() {
            match message {
                Outbound::Bytes(bytes) => write(&mut stream, &bytes).await?,
                Outbound::StartTls => {
                    stream = upgrade(connection, stream, &mut lines, tls).await?;
                }
                Outbound::Close => {
                    let _ = stream.shutdown().await;
                    return Ok(());
                }
            }
        }

        if let Some(frame) = lines.next_frame() {
            match frame {
                Frame::Line(line) => connection.on_line(&line)?,
                Frame::Oversized(len) => {
                    let error = DecodeError::new(
                        DecodeErrorKind::LineTooLong,
                        Error::LineTooLong(config.max_line_length).to_string(),
                    );
                    tracing::debug!(discarded = len, "oversized line");
                    connection.on_decode_error(&error)?;
                }
            }
            continue;
        }

        let idle = async {
            match config.idle_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => future::pending().await,
            }
        };

        let event = tokio::select! {
            biased;
            message = rx.recv() => Event::Outbound(message),
            read = lines.read_from(&mut stream) => Event::Read(read),
            () = idle => Event::Idle,
        };

        match event {
            Event::Outbound(Some(Outbound::Bytes(bytes))) => write(&mut stream, &bytes).await?,
            Event::Outbound(Some(Outbound::StartTls)) => {
                stream = upgrade(connection, stream, &mut lines, tls).await?;
            }
            Event::Outbound(Some(Outbound::Close) | None) => {
                let _ = stream.shutdown().await;
                return Ok(());
            }
            Event::Read(read) => {
                if read? == 0 {
                    tracing::debug!("client closed the connection");
                    return Ok(());
                }
            }
            Event::Idle => connection.on_timeout()?,
        }
    }
}

async fn write<S>(stream: &mut ServerStream<S>, bytes: &[u8]) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(bytes).await?;
    stream.flush().await?;
    Ok(())
}

/// Runs the handshake the transport queued and reports its outcome to the
/// connection. A failed handshake leaves no usable stream, so the error
/// ends the connection.
async fn upgrade<P, S>(
    connection: &Connection<P, ChannelWriter>,
    stream: ServerStream<S>,
    lines: &mut LineBuffer,
    tls: Option<&TlsAcceptor>,
) -> Result<ServerStream<S>>
where
    P: Protocol,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let dropped = lines.clear();
    if dropped > 0 {
        tracing::warn!(dropped, "discarding plaintext received before TLS handshake");
    }
    let upgraded = match tls {
        Some(acceptor) => stream.upgrade(acceptor).await,
        None => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "no TLS acceptor",
        )),
    };
    match upgraded {
        Ok(stream) => {
            connection.on_upgrade(Ok(()))?;
            tracing::info!("TLS established");
            Ok(stream)
        }
        Err(e) => {
            tracing::warn!(error = %e, "TLS handshake failed");
            // The session keeps its attributes; the stream is unusable.
            connection
                .on_upgrade(Err(e))
                .and(Err(Error::UpgradeFailed("handshake failed".to_string())))
        }
    }
}
