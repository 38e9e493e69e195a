//! LMTP delivery: one reply per recipient after DATA.

use std::sync::Arc;

use hookwire_core::{HookResult, HookReturnCode, Response, Session};

use crate::protocol::{Replies, SmtpProtocol};
use crate::types::{MailAddress, MailEnvelope, Reply, ReplyCode};

impl SmtpProtocol {
    /// Produces the per-recipient replies for a received message.
    ///
    /// With delivery hooks wired, each recipient is evaluated on the
    /// executor and answered through a deferred response, so replies stay
    /// in RCPT order however the evaluations interleave. Otherwise the
    /// message hooks run once and their reply is repeated per recipient.
    pub(crate) fn deliver_to_recipients(
        &self,
        session: &Session,
        envelope: MailEnvelope,
    ) -> Vec<Response> {
        if self.hooks.deliver.is_empty() {
            let reply = self.accept_message(session, &envelope);
            return envelope
                .recipients()
                .iter()
                .map(|_| reply.clone().into())
                .collect();
        }

        let recipients = envelope.recipients().to_vec();
        let envelope = Arc::new(envelope);
        let hook_session = session.clone();
        self.hooks.deliver.fan_out_deferred(
            self.executor.as_ref(),
            recipients,
            move |hook, recipient| hook.deliver(&hook_session, recipient, &envelope),
            |recipient, result| delivery_reply(recipient, result.as_ref()).into(),
            |recipient| {
                Reply::line(
                    ReplyCode::LOCAL_ERROR,
                    format!("4.3.0 <{recipient}> Delivery did not complete"),
                )
                .into()
            },
        )
    }
}

/// Reply for one recipient. No hook taking the message is a temporary
/// failure, so the client retries instead of losing it.
fn delivery_reply(recipient: &MailAddress, result: Option<&HookResult>) -> Reply {
    Replies {
        ok: Reply::line(ReplyCode::OK, format!("2.1.5 <{recipient}> Delivered")),
        deny: Reply::line(
            ReplyCode::MAILBOX_UNAVAILABLE,
            format!("5.1.1 <{recipient}> Delivery refused"),
        ),
        deny_soft: Reply::line(
            ReplyCode::LOCAL_ERROR,
            format!("4.2.0 <{recipient}> Temporary delivery failure"),
        ),
    }
    .pick(result, HookReturnCode::DenySoft)
    .1
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_reply() {
        let rcpt = MailAddress::new("a@example.com").unwrap();

        let reply = delivery_reply(&rcpt, Some(&HookResult::ok()));
        assert_eq!(reply.to_lines(), ["250 2.1.5 <a@example.com> Delivered"]);

        let reply = delivery_reply(&rcpt, Some(&HookResult::deny()));
        assert!(reply.is_permanent_error());

        let reply = delivery_reply(&rcpt, None);
        assert!(reply.is_transient_error());
    }
}
