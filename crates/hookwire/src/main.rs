//! `hookwire` - SMTP, LMTP and IMAP servers from the command line.
//!
//! Wires a handler chain from a settings file and serves one protocol on
//! one listener until interrupted.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod handlers;
mod settings;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use hookwire_core::net::{Server, load_acceptor};
use hookwire_core::{HandlerChain, Protocol, WiredChain};
use hookwire_imap::ImapProtocol;
use hookwire_smtp::{Extensions, SmtpProtocol};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use handlers::{EnvelopeLogger, LocalDomains, StaticUsers};
use settings::Settings;

/// Line protocol servers built from hook handlers.
#[derive(Parser)]
#[command(name = "hookwire", version)]
#[command(about = "SMTP, LMTP and IMAP servers built from hook handlers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve SMTP (RFC 5321).
    Smtp(ServeArgs),
    /// Serve LMTP (RFC 2033).
    Lmtp(ServeArgs),
    /// Serve IMAP4rev1 greeting, capability and login.
    Imap(ServeArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Address to listen on
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// PEM certificate chain, enables STARTTLS
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Start TLS on accept instead of offering STARTTLS
    #[arg(long, requires = "tls_cert")]
    implicit_tls: bool,

    /// Host name in greetings, overrides the settings file
    #[arg(long)]
    hello_name: Option<String>,
}

impl ServeArgs {
    async fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path).await?,
            None => Settings::default(),
        };
        if let Some(name) = &self.hello_name {
            settings.hello_name = Some(name.clone());
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "hookwire=info,hookwire_core=info,hookwire_smtp=info,hookwire_imap=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Cli::parse().command {
        Commands::Smtp(args) => {
            let settings = args.settings().await?;
            let protocol = SmtpProtocol::smtp(&wire(&settings, true)?, settings.smtp(false));
            serve(protocol, &args, &settings, 2525).await
        }
        Commands::Lmtp(args) => {
            let settings = args.settings().await?;
            let protocol = SmtpProtocol::lmtp(&wire(&settings, true)?, settings.smtp(true));
            serve(protocol, &args, &settings, 2424).await
        }
        Commands::Imap(args) => {
            let settings = args.settings().await?;
            let protocol = ImapProtocol::new(&wire(&settings, false)?, settings.imap());
            serve(protocol, &args, &settings, 1143).await
        }
    }
}

/// Builds the handler chain. SMTP and LMTP also advertise the standard
/// ESMTP keywords.
fn wire(settings: &Settings, esmtp: bool) -> anyhow::Result<WiredChain> {
    let mut chain = HandlerChain::new();
    if esmtp {
        chain = chain.with(Extensions::standard());
    }
    let mut chain = chain
        .with(LocalDomains::new(settings.local_domains.iter().cloned()))
        .with(EnvelopeLogger);
    if !settings.users.is_empty() {
        chain = chain.with(StaticUsers::new(settings.users.clone()));
    }
    chain.wire().context("wiring handler chain")
}

async fn serve<P: Protocol>(
    protocol: P,
    args: &ServeArgs,
    settings: &Settings,
    default_port: u16,
) -> anyhow::Result<()> {
    let mut server = Server::new(Arc::new(protocol), settings.engine());
    if let (Some(cert), Some(key)) = (&args.tls_cert, &args.tls_key) {
        let acceptor = load_acceptor(cert, key).context("loading TLS certificate")?;
        server = server.with_tls(acceptor).implicit_tls(args.implicit_tls);
    }

    let listen = args
        .listen
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], default_port)));
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;

    server.serve_until(listener, shutdown_signal()).await?;
    info!("Stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn tls_key_requires_certificate() {
        assert!(Cli::try_parse_from(["hookwire", "smtp", "--tls-key", "key.pem"]).is_err());
        let cli = Cli::try_parse_from([
            "hookwire",
            "lmtp",
            "--listen",
            "0.0.0.0:24",
            "--tls-cert",
            "cert.pem",
            "--tls-key",
            "key.pem",
        ])
        .unwrap();
        let Commands::Lmtp(args) = cli.command else {
            panic!("expected lmtp");
        };
        assert_eq!(args.listen, Some(SocketAddr::from(([0, 0, 0, 0], 24))));
        assert!(!args.implicit_tls);
    }

    #[test]
    fn chain_without_users_has_no_auth() {
        let chain = wire(&Settings::default(), true).unwrap();
        assert!(!chain.has_capability(&hookwire_smtp::types::extension::AUTH));
        assert_eq!(
            chain.advertised().map(|c| c.name()).collect::<Vec<_>>(),
            ["PIPELINING", "8BITMIME", "ENHANCEDSTATUSCODES"]
        );
    }

    #[test]
    fn imap_chain_advertises_nothing_extra() {
        let settings = Settings {
            users: [("alice".to_string(), "secret".to_string())].into(),
            ..Settings::default()
        };
        let chain = wire(&settings, false).unwrap();
        assert_eq!(chain.advertised().count(), 0);
        assert_eq!(chain.hooks(&hookwire_imap::hooks::LOGIN_HOOKS).len(), 1);
    }
}
