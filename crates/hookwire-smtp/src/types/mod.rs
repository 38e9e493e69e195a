//! Core SMTP types.

mod address;
mod envelope;
pub mod extension;
mod reply;

pub use address::MailAddress;
pub use envelope::MailEnvelope;
pub use extension::{AuthMechanism, Extension};
pub use reply::{Reply, ReplyCode};
