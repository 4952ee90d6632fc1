//! The facade handlers see: repositories, send paths, connection
//! registration, presence checks and the thread-local current connection.
//! Workers never touch sockets — every send frames bytes, queues them and
//! pokes the selector through the waker.

use crate::identity::IdGenerator;
use crate::net::Command;
use crate::repository::{GroupRepository, RequestRepository, UserRepository};
use crate::session::SessionService;
use chassis::logging;
use chassis::wire::{codec, ErrorLevel, ErrorMessage, MessageBody, MessageType, Packet, ProtocolMessage};
use chassis::{ClientId, SERVER_ID};
use bytes::Bytes;
use chrono::Duration;
use chrono::Utc;
use crossbeam_channel::Sender;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mio::{Token, Waker};
use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::Arc;

thread_local! {
    static CURRENT_CONNECTION: Cell<Option<usize>> = Cell::new(None);
}

/// Binds the thread-local current connection for the duration of a handler
/// call. Set by the dispatcher before handing a packet to a worker.
pub(crate) fn set_current(token: Token) {
    CURRENT_CONNECTION.with(|cell| cell.set(Some(token.0)));
}

pub(crate) fn clear_current() {
    CURRENT_CONNECTION.with(|cell| cell.set(None));
}

pub fn current_connection() -> Option<Token> {
    CURRENT_CONNECTION.with(|cell| cell.get().map(Token))
}

pub struct ServerContext {
    pub users: UserRepository,
    pub groups: GroupRepository,
    pub pending_requests: RequestRepository,
    ids: IdGenerator,
    session: SessionService,
    /// client id → live connection. Registration is insert-if-absent, which
    /// is what enforces at most one active session per id.
    connected: DashMap<ClientId, Token>,
    /// live connection → identified client id.
    bound: DashMap<Token, ClientId>,
    /// Per-client FIFO of framed outbound buffers. Any thread pushes, only
    /// the selector loop pops. Entries survive disconnection.
    queues: DashMap<ClientId, VecDeque<Bytes>>,
    commands: Sender<Command>,
    waker: Arc<Waker>,
    log: logging::Logger,
}

impl ServerContext {
    pub fn new(
        session: SessionService,
        commands: Sender<Command>,
        waker: Arc<Waker>,
        log: &logging::Logger,
    ) -> ServerContext {
        ServerContext {
            users: UserRepository::new(),
            groups: GroupRepository::new(),
            pending_requests: RequestRepository::new(),
            ids: IdGenerator::new(),
            session,
            connected: DashMap::new(),
            bound: DashMap::new(),
            queues: DashMap::new(),
            commands,
            waker,
            log: log.new(logging::o!()),
        }
    }

    #[inline]
    pub fn next_id(&self) -> ClientId {
        self.ids.next_id()
    }

    #[inline]
    pub fn session(&self) -> &SessionService {
        &self.session
    }

    /// The connection whose packet is currently being handled on this worker.
    #[inline]
    pub fn current_token(&self) -> Option<Token> {
        current_connection()
    }

    /// The identified client bound to the current connection, if any.
    pub fn current_client(&self) -> Option<ClientId> {
        let token = self.current_token()?;
        self.bound.get(&token).map(|entry| *entry.value())
    }

    /// Binds the current connection to the given client id. Fails when the id
    /// already has a live connection or the connection is already identified.
    pub fn register_current(&self, client: ClientId) -> bool {
        let token = match self.current_token() {
            Some(token) => token,
            None => return false,
        };

        if self.bound.contains_key(&token) {
            return false;
        }

        match self.connected.entry(client) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(token);
                self.bound.insert(token, client);

                logging::debug!(self.log, "connection identified";
                                "context" => "register",
                                "token" => token.0,
                                "client_id" => client);
                true
            }
        }
    }

    /// Unbinds a closing connection from its client id. The client's send
    /// queue is retained so a reconnect picks up pending traffic.
    pub fn unbind(&self, token: Token) {
        if let Some((_, client)) = self.bound.remove(&token) {
            self.connected.remove_if(&client, |_, bound_token| *bound_token == token);

            logging::debug!(self.log, "connection unbound";
                            "context" => "unbind",
                            "token" => token.0,
                            "client_id" => client);
        }
    }

    /// Removes a client entirely: binding and queued frames.
    pub fn remove_client(&self, client: ClientId) {
        if let Some((_, token)) = self.connected.remove(&client) {
            self.bound.remove(&token);
        }

        self.queues.remove(&client);
    }

    #[inline]
    pub fn is_connected(&self, client: ClientId) -> bool {
        self.connected.contains_key(&client)
    }

    #[inline]
    pub fn is_identified(&self, token: Token) -> bool {
        self.bound.contains_key(&token)
    }

    #[inline]
    pub fn connection_of(&self, client: ClientId) -> Option<Token> {
        self.connected.get(&client).map(|entry| *entry.value())
    }

    /// Sends a message routed by its `to` field.
    #[inline]
    pub fn send(&self, msg: &ProtocolMessage) {
        self.send_packet(codec::encode(msg));
    }

    /// Sends a message to an explicit recipient, ignoring `to`. Used for
    /// group fan-out where `to` stays the group id.
    #[inline]
    pub fn send_to(&self, msg: &ProtocolMessage, client: ClientId) {
        self.send_packet_to(codec::encode(msg), client);
    }

    #[inline]
    pub fn send_packet(&self, packet: Packet) {
        let recipient = packet.to;
        self.send_packet_to(packet, recipient);
    }

    /// Frames (and, when the recipient's session is established, encrypts)
    /// the packet, queues it on the recipient's FIFO and wakes the selector.
    /// Queuing succeeds even when the recipient is offline.
    pub fn send_packet_to(&self, packet: Packet, client: ClientId) {
        let frame = self.seal_for(self.connection_of(client), &packet);

        self.queues.entry(client).or_default().push_back(frame);

        drop(self.commands.send(Command::Flush(client)));
        drop(self.waker.wake());
    }

    /// Writes a packet straight to a connection that has not identified yet
    /// (handshake errors, CONNECT_USER rejections).
    pub fn send_direct(&self, token: Token, packet: &Packet) {
        let frame = self.seal_for(Some(token), packet);

        drop(self.commands.send(Command::Direct(token, frame)));
        drop(self.waker.wake());
    }

    /// Asks the selector to close a connection.
    pub fn close(&self, token: Token) {
        drop(self.commands.send(Command::Close(token)));
        drop(self.waker.wake());
    }

    pub fn close_current(&self) {
        if let Some(token) = self.current_token() {
            self.close(token);
        }
    }

    /// Drains every frame queued for the client. Called only by the selector
    /// loop when flushing to the live connection.
    pub(crate) fn drain_queue(&self, client: ClientId) -> Vec<Bytes> {
        match self.queues.get_mut(&client) {
            Some(mut queue) => queue.drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Builds a server-originated error message.
    pub fn error_message(&self, level: ErrorLevel, kind: &str, text: &str, to: ClientId) -> ProtocolMessage {
        ProtocolMessage::new(
            MessageType::Error,
            SERVER_ID,
            to,
            MessageBody::Error(ErrorMessage {
                level,
                kind: kind.to_string(),
                message: text.to_string(),
            }),
        )
    }

    /// Drops pending contact requests older than the given age.
    pub fn sweep_pending(&self, max_age: Duration) {
        let cutoff = Utc::now() - max_age;
        let before = self.pending_requests.len();

        self.pending_requests.retain(|_, request| request.created >= cutoff);

        let swept = before - self.pending_requests.len();
        if swept > 0 {
            logging::info!(self.log, "swept stale contact requests";
                           "context" => "sweep",
                           "count" => swept);
        }
    }

    fn seal_for(&self, token: Option<Token>, packet: &Packet) -> Bytes {
        if let Some(token) = token {
            if self.session.should_encrypt(packet.kind) {
                if let Some(wrapped) = self.session.encrypt_outgoing(token, packet) {
                    return wrapped.encode();
                }
            }
        }

        packet.encode()
    }
}
