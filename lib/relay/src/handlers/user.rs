//! User lifecycle and contact-set management: CREATE_USER, CONNECT_USER,
//! UPDATE_PSEUDO, ADD_CONTACT, REMOVE_CONTACT.

use crate::context::ServerContext;
use crate::handlers::{management, reject, sender_is_registered};
use crate::repository::UserInfo;
use crate::router::{HandlerError, MessageHandler};
use chassis::choose;
use chassis::wire::{codec, ErrorLevel, MessageType, Params, ProtocolMessage};
use chassis::SERVER_ID;
use chrono::Utc;

pub struct UserManagementMessageHandler;

impl UserManagementMessageHandler {
    /// Assigns a fresh id, registers the user and binds the originating
    /// connection to it.
    fn create_user(&self, _msg: &ProtocolMessage, ctx: &ServerContext, params: &Params) -> Result<(), HandlerError> {
        let token = ctx.current_token().ok_or(HandlerError::MissingConnection)?;

        if ctx.is_identified(token) {
            let error = ctx.error_message(
                ErrorLevel::Error,
                "ALREADY_CONNECTED",
                "Connection is already identified",
                SERVER_ID,
            );
            ctx.send_direct(token, &codec::encode(&error));
            return Ok(());
        }

        let id = ctx.next_id();

        let requested = params.get("pseudo").unwrap_or("").trim();
        let pseudo = choose!(requested.is_empty() => format!("User{}", id), requested.to_string());

        ctx.users.insert(id, UserInfo::new(id, pseudo.clone()));

        if !ctx.register_current(id) {
            return Err(HandlerError::Invariant("fresh id failed to register"));
        }

        ctx.send(&management(
            MessageType::CreateUser,
            id,
            Params::new().with("clientId", id).with("pseudo", &pseudo),
        ));

        Ok(())
    }

    /// Re-binds an existing user to a new connection. Failures answer with an
    /// ERROR on the raw socket and close it.
    fn connect_user(&self, msg: &ProtocolMessage, ctx: &ServerContext) -> Result<(), HandlerError> {
        let token = ctx.current_token().ok_or(HandlerError::MissingConnection)?;
        let claimed = msg.from;

        let user = match ctx.users.get(&claimed) {
            Some(user) => user,
            None => {
                let error = ctx.error_message(
                    ErrorLevel::Error,
                    "USER_NOT_FOUND",
                    &format!("No user with id {}", claimed),
                    claimed,
                );
                ctx.send_direct(token, &codec::encode(&error));
                ctx.close(token);
                return Ok(());
            }
        };

        if !ctx.register_current(claimed) {
            let error = ctx.error_message(
                ErrorLevel::Error,
                "ALREADY_CONNECTED",
                &format!("Client {} is already connected", claimed),
                claimed,
            );
            ctx.send_direct(token, &codec::encode(&error));
            ctx.close(token);
            return Ok(());
        }

        ctx.users.update(&claimed, |user| user.last_login = Utc::now());

        ctx.send(&management(
            MessageType::ConnectUser,
            claimed,
            Params::new().with("clientId", claimed).with("pseudo", &user.username),
        ));

        Ok(())
    }

    fn update_pseudo(&self, msg: &ProtocolMessage, ctx: &ServerContext, params: &Params) -> Result<(), HandlerError> {
        if !sender_is_registered(msg, ctx) {
            reject(ctx, msg, "", "Sender not registered");
            return Ok(());
        }

        let new_pseudo = params.get("newPseudo").unwrap_or("").trim().to_string();

        if new_pseudo.is_empty() {
            reject(ctx, msg, "", "Pseudo cannot be empty");
            return Ok(());
        }

        ctx.users.update(&msg.from, |user| user.username = new_pseudo.clone());

        // Fan the new pseudo out to currently-connected contacts only; there
        // is no offline queueing for this notification.
        let contacts = ctx
            .users
            .get(&msg.from)
            .map(|user| user.contacts)
            .unwrap_or_default();

        for contact in contacts.iter() {
            if ctx.is_connected(*contact) {
                ctx.send(&management(
                    MessageType::UpdatePseudo,
                    *contact,
                    Params::new().with("contactId", msg.from).with("newPseudo", &new_pseudo),
                ));
            }
        }

        Ok(())
    }

    fn add_contact(&self, msg: &ProtocolMessage, ctx: &ServerContext, params: &Params) -> Result<(), HandlerError> {
        if !sender_is_registered(msg, ctx) {
            reject(ctx, msg, "", "Sender not registered");
            return Ok(());
        }

        let target = match params.get_u32("contactId") {
            Some(target) => target,
            None => return Err(HandlerError::MissingParam("contactId")),
        };

        if target == msg.from {
            reject(ctx, msg, "", "Cannot add yourself as a contact");
            return Ok(());
        }

        if !ctx.users.contains(&target) {
            reject(ctx, msg, "", "Contact does not exist");
            return Ok(());
        }

        ctx.users.update(&msg.from, |user| {
            user.contacts.insert(target);
        });

        // Tell the target who added them, if they are online right now.
        if ctx.is_connected(target) {
            let sender_pseudo = ctx
                .users
                .with(&msg.from, |user| user.username.clone())
                .unwrap_or_default();

            ctx.send(&management(
                MessageType::AddContact,
                target,
                Params::new().with("contactId", msg.from).with("pseudo", &sender_pseudo),
            ));
        }

        Ok(())
    }

    /// One-sided removal; the peer's contact list is the peer's business.
    fn remove_contact(&self, msg: &ProtocolMessage, ctx: &ServerContext, params: &Params) -> Result<(), HandlerError> {
        if !sender_is_registered(msg, ctx) {
            reject(ctx, msg, "", "Sender not registered");
            return Ok(());
        }

        let target = match params.get_u32("contactId") {
            Some(target) => target,
            None => return Err(HandlerError::MissingParam("contactId")),
        };

        let was_contact = ctx
            .users
            .update(&msg.from, |user| user.contacts.shift_remove(&target))
            .unwrap_or(false);

        if !was_contact {
            reject(ctx, msg, "", "Not a contact");
            return Ok(());
        }

        ctx.send(&management(
            MessageType::RemoveContact,
            msg.from,
            Params::new().with("contactId", target).with("ack", true),
        ));

        Ok(())
    }
}

impl MessageHandler for UserManagementMessageHandler {
    fn name(&self) -> &'static str {
        "UserManagementMessageHandler"
    }

    fn can_handle(&self, kind: MessageType) -> bool {
        match kind {
            MessageType::CreateUser
            | MessageType::ConnectUser
            | MessageType::UpdatePseudo
            | MessageType::AddContact
            | MessageType::RemoveContact => true,
            _ => false,
        }
    }

    fn handle(&self, msg: &ProtocolMessage, ctx: &ServerContext) -> Result<(), HandlerError> {
        let params = msg
            .params()
            .ok_or(HandlerError::Invariant("management message without params"))?;

        match msg.kind {
            MessageType::CreateUser => self.create_user(msg, ctx, params),
            MessageType::ConnectUser => self.connect_user(msg, ctx),
            MessageType::UpdatePseudo => self.update_pseudo(msg, ctx, params),
            MessageType::AddContact => self.add_contact(msg, ctx, params),
            MessageType::RemoveContact => self.remove_contact(msg, ctx, params),
            _ => Err(HandlerError::Invariant("unroutable user management kind")),
        }
    }
}
