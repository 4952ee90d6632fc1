//! Contact requests and their responses. The server tracks every request in
//! flight keyed by its id, enforces that the response comes from the right
//! party, and mutates both contact sets on acceptance. Stale requests are
//! swept by the selector's housekeeping.

use crate::context::ServerContext;
use crate::handlers::{reject, sender_is_registered};
use crate::repository::PendingContactRequest;
use crate::router::{HandlerError, MessageHandler};
use chassis::wire::{MessageBody, MessageType, ProtocolMessage};
use chrono::Utc;

pub struct ContactRequestServerHandler;

impl ContactRequestServerHandler {
    fn handle_request(
        &self,
        msg: &ProtocolMessage,
        ctx: &ServerContext,
        request_id: &str,
    ) -> Result<(), HandlerError> {
        if !sender_is_registered(msg, ctx) {
            reject(ctx, msg, request_id, "Sender not registered");
            return Ok(());
        }

        if msg.from == msg.to {
            reject(ctx, msg, request_id, "Cannot send a contact request to yourself");
            return Ok(());
        }

        if !ctx.users.contains(&msg.to) {
            reject(ctx, msg, request_id, "Recipient does not exist");
            return Ok(());
        }

        let already_contacts = ctx
            .users
            .with(&msg.from, |sender| sender.is_contact(msg.to))
            .unwrap_or(false);

        if already_contacts {
            reject(ctx, msg, request_id, "Already contacts");
            return Ok(());
        }

        let inserted = ctx.pending_requests.insert_new(
            request_id.to_string(),
            PendingContactRequest {
                request_id: request_id.to_string(),
                sender: msg.from,
                receiver: msg.to,
                created: Utc::now(),
            },
        );

        if !inserted {
            reject(ctx, msg, request_id, "Request already pending");
            return Ok(());
        }

        ctx.send(msg);
        Ok(())
    }

    fn handle_response(
        &self,
        msg: &ProtocolMessage,
        ctx: &ServerContext,
        request_id: &str,
        accepted: bool,
    ) -> Result<(), HandlerError> {
        if !sender_is_registered(msg, ctx) {
            reject(ctx, msg, request_id, "Sender not registered");
            return Ok(());
        }

        let pending = match ctx.pending_requests.get(&request_id.to_string()) {
            Some(pending) => pending,
            None => {
                reject(ctx, msg, request_id, "Unknown contact request");
                return Ok(());
            }
        };

        // The responder must be the original receiver and must address the
        // original sender.
        if pending.receiver != msg.from || pending.sender != msg.to {
            reject(ctx, msg, request_id, "Contact request mismatch");
            return Ok(());
        }

        ctx.pending_requests.remove(&request_id.to_string());

        if accepted {
            ctx.users.update(&pending.sender, |user| {
                user.contacts.insert(pending.receiver);
            });
            ctx.users.update(&pending.receiver, |user| {
                user.contacts.insert(pending.sender);
            });
        }

        // The original sender learns the outcome either way.
        ctx.send(msg);
        Ok(())
    }
}

impl MessageHandler for ContactRequestServerHandler {
    fn name(&self) -> &'static str {
        "ContactRequestServerHandler"
    }

    fn can_handle(&self, kind: MessageType) -> bool {
        match kind {
            MessageType::ContactRequest | MessageType::ContactRequestResponse => true,
            _ => false,
        }
    }

    fn handle(&self, msg: &ProtocolMessage, ctx: &ServerContext) -> Result<(), HandlerError> {
        match &msg.body {
            MessageBody::ContactRequest { request_id } => self.handle_request(msg, ctx, request_id),
            MessageBody::ContactRequestResponse { request_id, accepted } => {
                self.handle_response(msg, ctx, request_id, *accepted)
            }
            _ => Err(HandlerError::Invariant("contact message without request body")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testkit::bed;
    use chassis::wire::AckStatus;
    use chrono::Duration;
    use mio::Token;

    fn request(from: u32, to: u32, id: &str) -> ProtocolMessage {
        ProtocolMessage::new(
            MessageType::ContactRequest,
            from,
            to,
            MessageBody::ContactRequest {
                request_id: id.to_string(),
            },
        )
    }

    fn response(from: u32, to: u32, id: &str, accepted: bool) -> ProtocolMessage {
        ProtocolMessage::new(
            MessageType::ContactRequestResponse,
            from,
            to,
            MessageBody::ContactRequestResponse {
                request_id: id.to_string(),
                accepted,
            },
        )
    }

    fn failed_reason(msg: &ProtocolMessage) -> String {
        match &msg.body {
            MessageBody::Ack(ack) => {
                assert_eq!(ack.status, AckStatus::Failed);
                ack.error_reason.clone().unwrap_or_default()
            }
            body => panic!("Expected ack, got {:?}", body),
        }
    }

    #[test]
    fn test_request_accept_roundtrip() {
        let bed = bed();
        bed.connect_user(Token(1), 1, "alice");
        bed.connect_user(Token(2), 2, "bob");

        let req = request(1, 2, "r1");
        bed.run_as(Token(1), || ContactRequestServerHandler.handle(&req, &bed.ctx))
            .unwrap();

        // Forwarded to the receiver, tracked as pending.
        assert_eq!(bed.sent_to(2), vec![req]);
        assert_eq!(bed.ctx.pending_requests.len(), 1);

        let resp = response(2, 1, "r1", true);
        bed.run_as(Token(2), || ContactRequestServerHandler.handle(&resp, &bed.ctx))
            .unwrap();

        // Forwarded to the original sender, contacts mutual, pending gone.
        assert_eq!(bed.sent_to(1), vec![resp]);
        assert_eq!(bed.ctx.pending_requests.len(), 0);
        assert!(bed.ctx.users.get(&1).unwrap().is_contact(2));
        assert!(bed.ctx.users.get(&2).unwrap().is_contact(1));
    }

    #[test]
    fn test_request_decline_leaves_contacts_untouched() {
        let bed = bed();
        bed.connect_user(Token(1), 1, "alice");
        bed.connect_user(Token(2), 2, "bob");

        bed.run_as(Token(1), || {
            ContactRequestServerHandler.handle(&request(1, 2, "r1"), &bed.ctx)
        })
        .unwrap();
        bed.sent_to(2);

        bed.run_as(Token(2), || {
            ContactRequestServerHandler.handle(&response(2, 1, "r1", false), &bed.ctx)
        })
        .unwrap();

        assert_eq!(bed.sent_to(1).len(), 1);
        assert!(!bed.ctx.users.get(&1).unwrap().is_contact(2));
        assert!(!bed.ctx.users.get(&2).unwrap().is_contact(1));
        assert_eq!(bed.ctx.pending_requests.len(), 0);
    }

    #[test]
    fn test_self_request_rejected() {
        let bed = bed();
        bed.connect_user(Token(1), 1, "alice");

        bed.run_as(Token(1), || {
            ContactRequestServerHandler.handle(&request(1, 1, "r1"), &bed.ctx)
        })
        .unwrap();

        let to_sender = bed.sent_to(1);
        assert_eq!(failed_reason(&to_sender[0]), "Cannot send a contact request to yourself");
        assert_eq!(bed.ctx.pending_requests.len(), 0);
    }

    #[test]
    fn test_already_contacts_rejected() {
        let bed = bed();
        bed.connect_user(Token(1), 1, "alice");
        bed.connect_user(Token(2), 2, "bob");
        bed.befriend(1, 2);

        bed.run_as(Token(1), || {
            ContactRequestServerHandler.handle(&request(1, 2, "r1"), &bed.ctx)
        })
        .unwrap();

        let to_sender = bed.sent_to(1);
        assert_eq!(failed_reason(&to_sender[0]), "Already contacts");
        assert!(bed.sent_to(2).is_empty());
    }

    #[test]
    fn test_response_from_wrong_party_rejected() {
        let bed = bed();
        bed.connect_user(Token(1), 1, "alice");
        bed.connect_user(Token(2), 2, "bob");
        bed.connect_user(Token(3), 3, "mallory");

        bed.run_as(Token(1), || {
            ContactRequestServerHandler.handle(&request(1, 2, "r1"), &bed.ctx)
        })
        .unwrap();
        bed.sent_to(2);

        // Mallory tries to accept Bob's request.
        bed.run_as(Token(3), || {
            ContactRequestServerHandler.handle(&response(3, 1, "r1", true), &bed.ctx)
        })
        .unwrap();

        assert_eq!(failed_reason(&bed.sent_to(3)[0]), "Contact request mismatch");
        assert!(bed.sent_to(1).is_empty());
        assert!(!bed.ctx.users.get(&1).unwrap().is_contact(2));
        assert_eq!(bed.ctx.pending_requests.len(), 1);
    }

    #[test]
    fn test_sweep_drops_stale_requests() {
        let bed = bed();
        bed.connect_user(Token(1), 1, "alice");
        bed.connect_user(Token(2), 2, "bob");

        bed.run_as(Token(1), || {
            ContactRequestServerHandler.handle(&request(1, 2, "r1"), &bed.ctx)
        })
        .unwrap();

        // Backdate the request past the sweep horizon.
        bed.ctx.pending_requests.update(&"r1".to_string(), |pending| {
            pending.created = Utc::now() - Duration::days(8);
        });

        bed.ctx.sweep_pending(Duration::days(7));
        assert_eq!(bed.ctx.pending_requests.len(), 0);
    }
}
