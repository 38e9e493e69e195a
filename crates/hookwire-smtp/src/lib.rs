//! # hookwire-smtp
//!
//! SMTP (RFC 5321) and LMTP (RFC 2033) servers built from hook handlers.
//!
//! ## Features
//!
//! - **Hooks**: connect, HELO, MAIL, RCPT, message, per-recipient delivery,
//!   AUTH, QUIT and unknown commands
//! - **LMTP**: one reply per recipient, in RCPT order, with delivery hooks
//!   evaluated off the connection task
//! - **STARTTLS**: offered when the transport supports it, session state
//!   discarded after the handshake
//! - **AUTH PLAIN**: initial response or `334` continuation
//! - **Message size**: `SIZE` advertised and enforced
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use hookwire_core::{Config, HandlerChain};
//! use hookwire_core::net::Server;
//! use hookwire_smtp::{Extensions, SmtpConfig, SmtpProtocol};
//!
//! let chain = HandlerChain::new()
//!     .with(Extensions::standard())
//!     .with(MyRecipientPolicy::default())
//!     .wire()?;
//! let protocol = SmtpProtocol::smtp(&chain, SmtpConfig::default());
//! Server::new(Arc::new(protocol), Config::default())
//!     .serve(listener)
//!     .await?;
//! ```
//!
//! ## Modules
//!
//! - [`hooks`]: hook traits and extension points
//! - [`protocol`]: the SMTP/LMTP state machine
//! - [`types`]: replies, addresses, envelopes and extensions

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
mod config;
mod error;
mod handlers;
pub mod hooks;
mod lmtp;
pub mod protocol;
mod session;
pub mod types;

pub use command::{Command, Parameter};
pub use config::{SmtpConfig, SmtpConfigBuilder};
pub use error::{Error, Result};
pub use handlers::Extensions;
pub use hooks::{
    AuthHook, ConnectHook, DeliverToRecipientHook, HeloHook, MailHook, MessageHook, QuitHook,
    RcptHook, UnknownHook,
};
pub use protocol::{Input, Mode, SmtpProtocol};
pub use session::{SmtpSessionExt, Transaction};
pub use types::{MailAddress, MailEnvelope, Reply, ReplyCode};
