//! Tokio line transport.
//!
//! Implements the byte side of a connection: TCP accept loop, line framing,
//! outbound writes and the in-place TLS upgrade. The protocol logic stays in
//! [`Connection`](crate::engine::Connection); this module only moves bytes.

mod framed;
mod server;
mod stream;
mod tls;
mod writer;

pub use framed::{Frame, LineBuffer};
pub use server::{Server, serve_connection};
pub use stream::ServerStream;
pub use tls::{acceptor_from, load_acceptor};
pub use writer::{ChannelWriter, Outbound};
