use crate::context::ServerContext;
use chassis::wire::{MessageType, ProtocolMessage};

/// Failures a handler may surface. Validation problems are not errors — they
/// are answered with FAILED acks or ERROR messages inside the handler. These
/// variants cover broken invariants; the dispatcher logs and swallows them.
#[derive(Debug, Eq, PartialEq)]
pub enum HandlerError {
    /// The dispatcher did not provide a current connection.
    MissingConnection,
    /// A management message is missing a required parameter.
    MissingParam(&'static str),
    Invariant(&'static str),
}

pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// True if this handler owns the given message type.
    fn can_handle(&self, kind: MessageType) -> bool;

    fn handle(&self, msg: &ProtocolMessage, ctx: &ServerContext) -> Result<(), HandlerError>;
}

#[derive(Debug, Eq, PartialEq)]
pub enum RouteError {
    /// No registered handler claims the message type. Fatal for the message;
    /// the worker logs it.
    NoHandler(MessageType),
    Handler(HandlerError),
}

#[derive(Debug, Eq, PartialEq)]
pub struct RegistrationConflict {
    pub kind: MessageType,
    pub existing: &'static str,
    pub added: &'static str,
}

/// Ordered handler registry. Registration is conflict-checked: at most one
/// handler may claim any message type.
pub struct Router {
    handlers: Vec<Box<dyn MessageHandler>>,
}

impl Router {
    pub fn new() -> Router {
        Router { handlers: Vec::new() }
    }

    pub fn try_register(&mut self, handler: Box<dyn MessageHandler>) -> Result<(), RegistrationConflict> {
        for kind in MessageType::ALL.iter() {
            if !handler.can_handle(*kind) {
                continue;
            }

            if let Some(existing) = self.handlers.iter().find(|registered| registered.can_handle(*kind)) {
                return Err(RegistrationConflict {
                    kind: *kind,
                    existing: existing.name(),
                    added: handler.name(),
                });
            }
        }

        self.handlers.push(handler);
        Ok(())
    }

    /// Registers a handler, panicking on conflict. Registration happens once
    /// at startup; a conflict is a programming error.
    pub fn register(&mut self, handler: Box<dyn MessageHandler>) -> &mut Router {
        if let Err(conflict) = self.try_register(handler) {
            panic!(
                "Handler registration conflict: {} and {} both claim {}",
                conflict.existing, conflict.added, conflict.kind
            );
        }

        self
    }

    /// Dispatches the message to the first handler claiming its type.
    pub fn route(&self, msg: &ProtocolMessage, ctx: &ServerContext) -> Result<(), RouteError> {
        match self.handlers.iter().find(|handler| handler.can_handle(msg.kind)) {
            Some(handler) => handler.handle(msg, ctx).map_err(RouteError::Handler),
            None => Err(RouteError::NoHandler(msg.kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubHandler {
        name: &'static str,
        kinds: &'static [MessageType],
    }

    impl MessageHandler for StubHandler {
        fn name(&self) -> &'static str {
            self.name
        }

        fn can_handle(&self, kind: MessageType) -> bool {
            self.kinds.contains(&kind)
        }

        fn handle(&self, _msg: &ProtocolMessage, _ctx: &ServerContext) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn test_conflicting_registration_rejected() {
        let mut router = Router::new();

        router
            .try_register(Box::new(StubHandler {
                name: "first",
                kinds: &[MessageType::Text, MessageType::Media],
            }))
            .unwrap();

        let conflict = router
            .try_register(Box::new(StubHandler {
                name: "second",
                kinds: &[MessageType::Media],
            }))
            .unwrap_err();

        assert_eq!(conflict.kind, MessageType::Media);
        assert_eq!(conflict.existing, "first");
        assert_eq!(conflict.added, "second");
    }

    #[test]
    fn test_disjoint_registration_accepted() {
        let mut router = Router::new();

        router
            .try_register(Box::new(StubHandler {
                name: "text",
                kinds: &[MessageType::Text],
            }))
            .unwrap();
        router
            .try_register(Box::new(StubHandler {
                name: "ack",
                kinds: &[MessageType::MessageAck],
            }))
            .unwrap();
    }
}
