//! Point-to-point and group relaying of chat traffic (TEXT, MEDIA,
//! REACTION). The server acknowledges acceptance with a SENT ack before
//! forwarding; every rejection answers the sender with a FAILED ack carrying
//! the reason.

use crate::context::ServerContext;
use crate::handlers::{reject, sender_is_registered};
use crate::router::{HandlerError, MessageHandler};
use chassis::wire::{ack, MessageBody, MessageType, ProtocolMessage};

pub struct RelayMessageHandler;

fn message_id(msg: &ProtocolMessage) -> Option<&str> {
    match &msg.body {
        MessageBody::Text(text) => Some(&text.message_id),
        MessageBody::Media(media) => Some(&media.message_id),
        MessageBody::Reaction(reaction) => Some(&reaction.message_id),
        _ => None,
    }
}

impl MessageHandler for RelayMessageHandler {
    fn name(&self) -> &'static str {
        "RelayMessageHandler"
    }

    fn can_handle(&self, kind: MessageType) -> bool {
        match kind {
            MessageType::Text | MessageType::Media | MessageType::Reaction => true,
            _ => false,
        }
    }

    fn handle(&self, msg: &ProtocolMessage, ctx: &ServerContext) -> Result<(), HandlerError> {
        let message_id = message_id(msg).ok_or(HandlerError::Invariant("relay message without id"))?;

        if !sender_is_registered(msg, ctx) {
            reject(ctx, msg, message_id, "Sender not registered");
            return Ok(());
        }

        // Recipient resolution: users first, then groups. The two id spaces
        // share one sequence so at most one can match.
        if let Some(_recipient) = ctx.users.get(&msg.to) {
            let in_contacts = ctx
                .users
                .with(&msg.from, |sender| sender.is_contact(msg.to))
                .unwrap_or(false);

            if !in_contacts {
                reject(ctx, msg, message_id, "Recipient not in contacts");
                return Ok(());
            }

            ctx.send(&ack::sent(message_id, msg.from));
            ctx.send(msg);
        } else if let Some(group) = ctx.groups.get(&msg.to) {
            if !group.is_member(msg.from) {
                reject(ctx, msg, message_id, "Sender not in group");
                return Ok(());
            }

            ctx.send(&ack::sent(message_id, msg.from));

            // Fan out against the membership snapshot taken above; later
            // membership changes must not alter this delivery. The group id
            // stays in `to` so recipients can attribute the message.
            for member in group.members.iter() {
                if *member != msg.from {
                    ctx.send_to(msg, *member);
                }
            }
        } else {
            reject(ctx, msg, message_id, "Recipient does not exist");
        }

        Ok(())
    }
}
