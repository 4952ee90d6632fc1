//! The pluggable message handlers. Each one owns a disjoint slice of the
//! message-type space; the router checks that at registration. Handlers run
//! on the worker pool with the originating connection available through the
//! context's thread-local.

pub mod ack;
pub mod contact;
pub mod group;
pub mod key_exchange;
pub mod relay;
pub mod user;

pub use self::ack::AckMessageHandler;
pub use self::contact::ContactRequestServerHandler;
pub use self::group::GroupMessageHandler;
pub use self::key_exchange::KeyExchangeHandler;
pub use self::relay::RelayMessageHandler;
pub use self::user::UserManagementMessageHandler;

use crate::context::ServerContext;
use chassis::wire::{codec, MessageBody, MessageType, Params, ProtocolMessage};
use chassis::{ClientId, SERVER_ID};

/// A sender is registered when its claimed `from` id matches the id bound to
/// the originating connection and that user exists.
pub(crate) fn sender_is_registered(msg: &ProtocolMessage, ctx: &ServerContext) -> bool {
    ctx.current_client() == Some(msg.from) && ctx.users.contains(&msg.from)
}

/// True when the two users share membership in at least one group.
pub(crate) fn shares_group(ctx: &ServerContext, a: ClientId, b: ClientId) -> bool {
    ctx.groups.any(|_, group| group.is_member(a) && group.is_member(b))
}

/// Builds a server-originated management message.
pub(crate) fn management(kind: MessageType, to: ClientId, params: Params) -> ProtocolMessage {
    ProtocolMessage::new(kind, SERVER_ID, to, MessageBody::Management(params))
}

/// Sends a FAILED ack for a message whose sender may not be identified yet:
/// prefers the client queue, falls back to the raw connection.
pub(crate) fn reject(ctx: &ServerContext, msg: &ProtocolMessage, message_id: &str, reason: &str) {
    let ack = chassis::wire::ack::failed(message_id, reason, msg.from);

    if ctx.current_client() == Some(msg.from) {
        ctx.send(&ack);
    } else if let Some(token) = ctx.current_token() {
        ctx.send_direct(token, &codec::encode(&ack));
    }
}
