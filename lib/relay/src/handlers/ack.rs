//! Forwarding of client-generated acknowledgements (DELIVERED, READ, ...).
//! The server relays an ack to its recipient under the same relationship
//! gate as chat traffic; acks addressed to the server itself are dropped.

use crate::context::ServerContext;
use crate::handlers::{reject, sender_is_registered, shares_group};
use crate::router::{HandlerError, MessageHandler};
use chassis::wire::{MessageBody, MessageType, ProtocolMessage};
use chassis::SERVER_ID;

pub struct AckMessageHandler;

impl MessageHandler for AckMessageHandler {
    fn name(&self) -> &'static str {
        "AckMessageHandler"
    }

    fn can_handle(&self, kind: MessageType) -> bool {
        kind == MessageType::MessageAck
    }

    fn handle(&self, msg: &ProtocolMessage, ctx: &ServerContext) -> Result<(), HandlerError> {
        let ack = match &msg.body {
            MessageBody::Ack(ack) => ack,
            _ => return Err(HandlerError::Invariant("ack message without ack body")),
        };

        if msg.to == SERVER_ID {
            return Ok(());
        }

        let acked_id = ack.acknowledged_message_id.as_str();

        if !sender_is_registered(msg, ctx) {
            reject(ctx, msg, acked_id, "Sender not registered");
            return Ok(());
        }

        if !ctx.users.contains(&msg.to) {
            reject(ctx, msg, acked_id, "Recipient does not exist");
            return Ok(());
        }

        let related = ctx
            .users
            .with(&msg.from, |sender| sender.is_contact(msg.to))
            .unwrap_or(false)
            || shares_group(ctx, msg.from, msg.to);

        if !related {
            reject(ctx, msg, acked_id, "Recipient not in contacts");
            return Ok(());
        }

        ctx.send(msg);
        Ok(())
    }
}
