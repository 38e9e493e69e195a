//! # hookwire-core
//!
//! Engine for stateful, line-oriented protocol servers (SMTP, LMTP, IMAP).
//!
//! ## Features
//!
//! - **Ordered responses**: responses reach the client in submission order,
//!   even when some are computed later on other threads
//! - **Hook pipeline**: typed extension points, first non-declined result
//!   wins, per-target fan-out
//! - **Wiring validation**: missing capabilities and duplicate singletons are
//!   rejected before the first connection
//! - **STARTTLS**: upgrade after every earlier response is flushed, with a
//!   session reset
//! - **Tokio transport**: accept loop, line framing, implicit TLS and idle
//!   timeouts
//!
//! ## Flow
//!
//! ```text
//! bytes ─→ net::LineBuffer ─→ Connection::on_line ─→ Protocol::decode
//!                                                        │
//!                        HookList::run ←─ Protocol::handle
//!                                                        │
//! bytes ←─ net::ChannelWriter ←─ ResponseTransport ←─ Response
//! ```
//!
//! ## Modules
//!
//! - [`chain`]: handlers, extension points and wiring
//! - [`hook`]: hook results and aggregation
//! - [`transport`]: the response ordering queue
//! - [`engine`]: the per-connection command loop
//! - [`net`]: tokio TCP/TLS transport

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod chain;
pub mod codec;
pub mod config;
pub mod engine;
mod error;
pub mod executor;
pub mod hook;
pub mod net;
pub mod response;
pub mod session;
pub mod transport;

pub use chain::{Capability, ExtensionPoint, ExtensionPoints, Handler, HandlerChain, WiredChain};
pub use codec::ResponseEncoder;
pub use config::{Charset, Config, ConfigBuilder, LineTerminator};
pub use engine::{Connection, Protocol};
pub use error::{DecodeError, DecodeErrorKind, Error, Result, WiringError};
pub use executor::{Executor, InlineExecutor, TokioExecutor};
pub use hook::{HookError, HookList, HookOutcome, HookResult, HookReturnCode};
pub use response::{Completer, Deferred, Response, ResponseKind};
pub use session::{Session, SessionBuilder, SessionId, SessionState};
pub use transport::{ResponseTransport, ResponseWriter, Upgrade};
