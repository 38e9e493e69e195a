//! # hookwire-imap
//!
//! A minimal IMAP4rev1 front end on the hookwire engine: greeting,
//! CAPABILITY, NOOP, LOGOUT, STARTTLS and LOGIN. Everything else is offered
//! to [`CommandHook`]s and answered `BAD` when none takes it.
//!
//! Capabilities are assembled per session: `IMAP4rev1`, whatever the wired
//! handlers advertise, `STARTTLS` while the connection can still upgrade,
//! and `LOGINDISABLED` while plaintext LOGIN is refused.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
mod config;
mod error;
pub mod hooks;
pub mod lexer;
mod protocol;
pub mod types;

pub use command::{Command, Parsed, TaggedCommand};
pub use config::{ImapConfig, ImapConfigBuilder};
pub use error::{Error, Result};
pub use hooks::{CommandHook, LoginHook};
pub use protocol::{ImapProtocol, ImapSessionExt};
pub use types::{Capability, ResponseCode, Status};
