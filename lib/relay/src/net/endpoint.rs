//! The selector loop. A single thread owns the listening socket and every
//! client socket; worker threads only ever reach it through the command
//! channel plus waker. Housekeeping (handshake and identification timeouts,
//! pending-request sweeping) rides the poll timeout.

use crate::config::Config;
use crate::context::ServerContext;
use crate::dispatch::Dispatcher;
use crate::net::connection::Connection;
use crate::net::{Command, ErrorUtils, NetworkError};
use chassis::logging;
use chrono::Duration as MaxAge;
use crossbeam_channel::Receiver;
use hashbrown::HashMap;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const WAKER_TOKEN: Token = Token(0);
const LISTENER_TOKEN: Token = Token(1);
const FIRST_CONNECTION_TOKEN: usize = 2;

const POLL_TIMEOUT: Duration = Duration::from_millis(250);
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_millis(250);
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const PENDING_REQUEST_MAX_AGE_DAYS: i64 = 7;

pub struct Endpoint {
    listener: TcpListener,
    poll: Poll,
    events: Events,

    connections: HashMap<Token, Connection>,
    next_token: usize,

    ctx: Arc<ServerContext>,
    dispatcher: Dispatcher,
    commands: Receiver<Command>,

    config: Config,
    stop: Arc<AtomicBool>,

    housekeeping_time: Instant,
    sweep_time: Instant,

    ready: Vec<(Token, bool, bool)>,
    log: logging::Logger,
}

impl Endpoint {
    pub fn new(
        mut listener: TcpListener,
        poll: Poll,
        ctx: Arc<ServerContext>,
        dispatcher: Dispatcher,
        commands: Receiver<Command>,
        config: Config,
        stop: Arc<AtomicBool>,
        log: &logging::Logger,
    ) -> io::Result<Endpoint> {
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let now = Instant::now();

        Ok(Endpoint {
            listener,
            poll,
            events: Events::with_capacity(1024),
            connections: HashMap::new(),
            next_token: FIRST_CONNECTION_TOKEN,
            ctx,
            dispatcher,
            commands,
            config,
            stop,
            housekeeping_time: now,
            sweep_time: now,
            ready: Vec::new(),
            log: log.new(logging::o!()),
        })
    }

    #[inline]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the loop until `stop` is flipped and the waker fires. Shutdown
    /// drains the worker pool first, then closes every socket.
    pub fn run(&mut self) -> io::Result<()> {
        logging::info!(self.log, "selector loop started";
                       "context" => "run",
                       "workers" => self.dispatcher.workers(),
                       "port" => self.config.port);

        while !self.stop.load(Ordering::SeqCst) {
            if let Err(err) = self.poll.poll(&mut self.events, Some(POLL_TIMEOUT)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }

                // A failing selector is not survivable.
                self.shutdown();
                return Err(err);
            }

            let mut ready = std::mem::take(&mut self.ready);
            ready.clear();

            for event in self.events.iter() {
                ready.push((event.token(), event.is_readable(), event.is_writable()));
            }

            for (token, readable, writable) in ready.iter().cloned() {
                match token {
                    WAKER_TOKEN => self.drain_commands(),
                    LISTENER_TOKEN => self.accept_connections(),
                    token => self.connection_event(token, readable, writable),
                }
            }

            self.ready = ready;

            self.housekeeping(Instant::now());
        }

        self.shutdown();
        Ok(())
    }

    /// Accepts every pending connection and initiates the key exchange on
    /// each: the SERVER_KEY_EXCHANGE packet goes out before anything else.
    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, address)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;

                    if let Err(err) =
                        self.poll
                            .registry()
                            .register(&mut stream, token, Interest::READABLE)
                    {
                        logging::error!(self.log, "connection registration failed";
                                        "context" => "accept",
                                        "error" => %err);
                        continue;
                    }

                    let mut conn = Connection::new(
                        token,
                        stream,
                        self.config.read_buffer_size,
                        Instant::now(),
                        &self.log,
                    );

                    let offer = self.ctx.session().initiate(token);
                    conn.push_frame(offer.encode());

                    let flushed = conn.flush();

                    logging::info!(self.log, "connection accepted";
                                   "context" => "accept",
                                   "token" => token.0,
                                   "address" => %address);

                    if flushed.has_failed() {
                        self.ctx.session().on_closed(token);
                        drop(self.poll.registry().deregister(conn.stream_mut()));
                        conn.close();
                        continue;
                    }

                    self.connections.insert(token, conn);

                    if let Ok(false) = flushed {
                        self.update_write_interest(token, true);
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    logging::error!(self.log, "accept failed"; "context" => "accept", "error" => %err);
                    break;
                }
            }
        }
    }

    fn connection_event(&mut self, token: Token, readable: bool, writable: bool) {
        if !self.connections.contains_key(&token) {
            return;
        }

        let mut failed = readable && self.read_connection(token);

        if !failed && writable {
            failed = self.flush_connection(token);
        }

        if failed {
            self.close_connection(token);
        }
    }

    /// Drains the socket and submits every complete packet to the worker
    /// pool. Returns true when the connection must be closed.
    fn read_connection(&mut self, token: Token) -> bool {
        let mut packets = Vec::new();

        let failed = {
            let conn = match self.connections.get_mut(&token) {
                Some(conn) => conn,
                None => return false,
            };

            match conn.receive() {
                Ok(_) | Err(NetworkError::Wait) => loop {
                    match conn.extract(self.config.max_message_size) {
                        Ok(Some(packet)) => packets.push(packet),
                        Ok(None) => break false,
                        Err(err) => {
                            logging::debug!(self.log, "read failed";
                                            "context" => "read",
                                            "token" => token.0,
                                            "error" => ?err);
                            break true;
                        }
                    }
                },
                Err(err) => {
                    logging::debug!(self.log, "receive failed";
                                    "context" => "read",
                                    "token" => token.0,
                                    "error" => ?err);
                    true
                }
            }
        };

        for packet in packets {
            self.dispatcher.dispatch(token, packet);
        }

        failed
    }

    /// Flushes staged frames and keeps the write interest in sync with the
    /// egress state. Returns true when the connection must be closed.
    fn flush_connection(&mut self, token: Token) -> bool {
        let result = match self.connections.get_mut(&token) {
            Some(conn) => conn.flush(),
            None => return false,
        };

        match result {
            Ok(true) => {
                self.update_write_interest(token, false);
                false
            }
            Ok(false) => {
                self.update_write_interest(token, true);
                false
            }
            Err(err) => {
                logging::debug!(self.log, "flush failed";
                                "context" => "write",
                                "token" => token.0,
                                "error" => ?err);
                true
            }
        }
    }

    fn update_write_interest(&mut self, token: Token, wanted: bool) {
        let registry = self.poll.registry();

        if let Some(conn) = self.connections.get_mut(&token) {
            if conn.write_interest() == wanted {
                return;
            }

            let interest = if wanted {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };

            let stream = conn.stream_mut();
            if registry.reregister(stream, token, interest).is_ok() {
                conn.set_write_interest(wanted);
            }
        }
    }

    /// Applies everything the workers queued since the last wake-up.
    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Flush(client) => {
                    let token = match self.ctx.connection_of(client) {
                        Some(token) => token,
                        // Offline recipient: frames stay queued for later.
                        None => continue,
                    };

                    let frames = self.ctx.drain_queue(client);

                    match self.connections.get_mut(&token) {
                        Some(conn) => {
                            for frame in frames {
                                conn.push_frame(frame);
                            }
                        }
                        None => continue,
                    }

                    if self.flush_connection(token) {
                        self.close_connection(token);
                    }
                }
                Command::Direct(token, frame) => {
                    match self.connections.get_mut(&token) {
                        Some(conn) => conn.push_frame(frame),
                        None => continue,
                    }

                    if self.flush_connection(token) {
                        self.close_connection(token);
                    }
                }
                Command::Close(token) => self.close_connection(token),
            }
        }
    }

    /// Closes a connection: final best-effort flush, deregistration, key
    /// material teardown, identity unbinding. The client's send queue is
    /// retained for a reconnect.
    fn close_connection(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            drop(conn.flush());
            drop(self.poll.registry().deregister(conn.stream_mut()));
            conn.close();

            self.ctx.session().on_closed(token);
            self.ctx.unbind(token);

            logging::info!(self.log, "connection closed"; "context" => "close", "token" => token.0);
        }
    }

    fn housekeeping(&mut self, now: Instant) {
        if now.duration_since(self.housekeeping_time) < HOUSEKEEPING_INTERVAL {
            return;
        }
        self.housekeeping_time = now;

        let key_exchange_timeout = self.config.key_exchange_timeout();
        let identify_timeout = self.config.identify_timeout();

        let mut expired = Vec::new();

        for (token, conn) in self.connections.iter() {
            match self.ctx.session().established_at(*token) {
                // Handshake never completed.
                None => {
                    if now.duration_since(conn.accepted()) >= key_exchange_timeout {
                        expired.push((*token, "key exchange timeout"));
                    }
                }
                // Encrypted but anonymous for too long.
                Some(established) => {
                    if !self.ctx.is_identified(*token)
                        && now.duration_since(established) >= identify_timeout
                    {
                        expired.push((*token, "identification timeout"));
                    }
                }
            }
        }

        for (token, reason) in expired {
            logging::info!(self.log, "closing connection on timeout";
                           "context" => "housekeeping",
                           "token" => token.0,
                           "reason" => reason);
            self.close_connection(token);
        }

        if now.duration_since(self.sweep_time) >= SWEEP_INTERVAL {
            self.sweep_time = now;
            self.ctx.sweep_pending(MaxAge::days(PENDING_REQUEST_MAX_AGE_DAYS));
        }
    }

    fn shutdown(&mut self) {
        logging::info!(self.log, "selector loop stopping"; "context" => "shutdown");

        // Reverse order: workers first so nothing new lands on the sockets.
        self.dispatcher.join();

        let tokens: Vec<Token> = self.connections.keys().cloned().collect();
        for token in tokens {
            self.close_connection(token);
        }
    }
}
