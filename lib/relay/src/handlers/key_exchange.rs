//! The key-exchange handler covers two very different jobs: completing the
//! server handshake for the current connection, and blindly relaying the
//! client-to-client key-exchange legs used for end-to-end group keys. The
//! server never interprets the relayed legs beyond caching the sender's
//! public key.

use crate::context::ServerContext;
use crate::handlers::sender_is_registered;
use crate::router::{HandlerError, MessageHandler};
use chassis::logging;
use chassis::wire::{MessageBody, MessageType, ProtocolMessage};

pub struct KeyExchangeHandler {
    log: logging::Logger,
}

impl KeyExchangeHandler {
    pub fn new(log: &logging::Logger) -> KeyExchangeHandler {
        KeyExchangeHandler {
            log: log.new(logging::o!()),
        }
    }

    fn complete_handshake(&self, msg: &ProtocolMessage, ctx: &ServerContext) -> Result<(), HandlerError> {
        let token = ctx.current_token().ok_or(HandlerError::MissingConnection)?;

        let public_key = match &msg.body {
            MessageBody::PublicKey(public_key) => public_key,
            _ => return Err(HandlerError::Invariant("key exchange without public key")),
        };

        if !ctx.session().is_pending(token) {
            logging::warn!(self.log, "key exchange response without pending exchange";
                           "context" => "handshake",
                           "token" => token.0);
            ctx.close(token);
            return Ok(());
        }

        if !ctx.session().complete(token, public_key) {
            logging::warn!(self.log, "key exchange completion failed";
                           "context" => "handshake",
                           "token" => token.0);
            ctx.close(token);
            return Ok(());
        }

        logging::debug!(self.log, "connection encryption established";
                        "context" => "handshake",
                        "token" => token.0);

        Ok(())
    }

    fn relay_peer_exchange(&self, msg: &ProtocolMessage, ctx: &ServerContext) -> Result<(), HandlerError> {
        // The relayed legs trust `from` for both the key cache and the
        // forwarded packet, so the sender must be the identified client on
        // this connection.
        if !sender_is_registered(msg, ctx) {
            logging::warn!(self.log, "key exchange from unidentified or spoofed sender";
                           "context" => "relay",
                           "from" => msg.from,
                           "to" => msg.to);
            ctx.close_current();
            return Ok(());
        }

        // Opportunistically remember the announced public key.
        if msg.kind == MessageType::KeyExchange {
            if let MessageBody::PublicKey(public_key) = &msg.body {
                ctx.users.update(&msg.from, |user| user.public_key = Some(*public_key));
            }
        }

        if !ctx.users.contains(&msg.to) {
            logging::debug!(self.log, "dropping key exchange for unknown recipient";
                            "context" => "relay",
                            "from" => msg.from,
                            "to" => msg.to);
            return Ok(());
        }

        ctx.send(msg);
        Ok(())
    }
}

impl MessageHandler for KeyExchangeHandler {
    fn name(&self) -> &'static str {
        "KeyExchangeHandler"
    }

    fn can_handle(&self, kind: MessageType) -> bool {
        match kind {
            MessageType::ServerKeyExchangeResponse
            | MessageType::KeyExchange
            | MessageType::KeyExchangeResponse => true,
            _ => false,
        }
    }

    fn handle(&self, msg: &ProtocolMessage, ctx: &ServerContext) -> Result<(), HandlerError> {
        match msg.kind {
            MessageType::ServerKeyExchangeResponse => self.complete_handshake(msg, ctx),
            _ => self.relay_peer_exchange(msg, ctx),
        }
    }
}
