//! Worker pool processing framed packets off the selector loop. Packets are
//! pinned to a worker by connection token, which serializes every
//! connection's traffic and preserves per-sender order end to end.

use crate::context::{self, ServerContext};
use crate::router::{RouteError, Router};
use crate::session::SecurityError;
use chassis::logging;
use chassis::wire::{codec, CodecError, MessageBody, MessageType, Packet};
use crossbeam_channel::{unbounded, Sender};
use mio::Token;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

#[derive(Debug)]
enum DispatchError {
    /// A non-handshake packet arrived before encryption was established.
    HandshakeViolation(MessageType),
    /// A plaintext packet of a type that must be wrapped arrived after
    /// establishment.
    PlaintextViolation(MessageType),
    Security(SecurityError),
    Codec(CodecError),
}

struct Job {
    token: Token,
    packet: Packet,
}

pub struct Dispatcher {
    senders: Vec<Sender<Job>>,
    threads: Vec<thread::JoinHandle<()>>,
    log: logging::Logger,
}

impl Dispatcher {
    /// Spawns the worker pool. Each worker owns its FIFO; `dispatch` pins a
    /// connection's packets to one worker.
    pub fn spawn(
        workers: usize,
        router: Arc<Router>,
        ctx: Arc<ServerContext>,
        log: &logging::Logger,
    ) -> Dispatcher {
        let mut senders = Vec::with_capacity(workers);
        let mut threads = Vec::with_capacity(workers);

        for index in 0..workers {
            let (tx, rx) = unbounded::<Job>();
            let router = router.clone();
            let ctx = ctx.clone();
            let worker_log = log.new(logging::o!("worker" => index));

            let handle = thread::Builder::new()
                .name(format!("relay-worker-{}", index))
                .spawn(move || {
                    for job in rx.iter() {
                        context::set_current(job.token);

                        let token = job.token;
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                            process(&router, &ctx, job, &worker_log)
                        }));

                        match outcome {
                            Ok(Ok(())) => (),
                            // Every dispatch-level failure is a protocol or
                            // security violation and kills the connection.
                            Ok(Err(error)) => {
                                logging::debug!(worker_log, "packet rejected";
                                                "context" => "process",
                                                "token" => token.0,
                                                "error" => ?error);

                                ctx.close(token);
                            }
                            Err(_) => {
                                // A panicking handler must not poison the pool.
                                logging::crit!(worker_log, "handler panicked";
                                               "context" => "process",
                                               "token" => token.0);
                            }
                        }

                        context::clear_current();
                    }
                })
                .expect("Error spawning worker thread");

            senders.push(tx);
            threads.push(handle);
        }

        Dispatcher {
            senders,
            threads,
            log: log.new(logging::o!()),
        }
    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    /// Submits a framed packet for processing on the connection's worker.
    #[inline]
    pub fn dispatch(&self, token: Token, packet: Packet) {
        let index = token.0 % self.senders.len();
        drop(self.senders[index].send(Job { token, packet }));
    }

    /// Drops the queues and joins every worker.
    pub fn join(&mut self) {
        logging::debug!(self.log, "draining worker pool"; "context" => "join", "workers" => self.senders.len());

        self.senders.clear();

        for handle in self.threads.drain(..) {
            drop(handle.join());
        }
    }
}

/// Gate, unwrap, decode, route.
fn process(
    router: &Router,
    ctx: &ServerContext,
    job: Job,
    log: &logging::Logger,
) -> Result<(), DispatchError> {
    let token = job.token;
    let session = ctx.session();

    let packet = if !session.is_established(token) {
        // Until the handshake completes only the client's key-exchange
        // response is acceptable.
        if job.packet.kind != MessageType::ServerKeyExchangeResponse {
            return Err(DispatchError::HandshakeViolation(job.packet.kind));
        }

        job.packet
    } else {
        match job.packet.kind {
            MessageType::Encrypted => session
                .decrypt_incoming(token, &job.packet)
                .map_err(DispatchError::Security)?,
            kind if kind.is_handshake() => job.packet,
            kind => return Err(DispatchError::PlaintextViolation(kind)),
        }
    };

    let msg = codec::decode(&packet).map_err(DispatchError::Codec)?;

    if let MessageBody::None = msg.body {
        return Ok(());
    }

    match router.route(&msg, ctx) {
        Ok(()) => Ok(()),
        Err(RouteError::NoHandler(kind)) => {
            // Fatal for the message, not the connection.
            logging::error!(log, "no handler for message type";
                            "context" => "route",
                            "kind" => %kind);
            Ok(())
        }
        Err(RouteError::Handler(error)) => {
            logging::warn!(log, "handler failed";
                           "context" => "route",
                           "kind" => %msg.kind,
                           "error" => ?error);
            Ok(())
        }
    }
}
