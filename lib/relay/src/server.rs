//! Construction and lifecycle of the relay server: binds the listener,
//! builds the shared context and the router, spawns the worker pool and
//! hands everything to the selector loop.

use crate::config::Config;
use crate::context::ServerContext;
use crate::dispatch::Dispatcher;
use crate::handlers::{
    AckMessageHandler, ContactRequestServerHandler, GroupMessageHandler, KeyExchangeHandler,
    RelayMessageHandler, UserManagementMessageHandler,
};
use crate::net::endpoint::{Endpoint, WAKER_TOKEN};
use crate::router::Router;
use crate::session::{AeadCipher, SessionService};
use chassis::logging;
use crossbeam_channel::unbounded;
use mio::net::TcpListener;
use mio::{Poll, Waker};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct Server {
    endpoint: Endpoint,
    ctx: Arc<ServerContext>,
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
    local_addr: SocketAddr,
}

/// Cloneable handle for stopping a running server from another thread.
#[derive(Clone)]
pub struct ServerHandle {
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ServerHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        drop(self.waker.wake());
    }
}

impl Server {
    /// Binds the listener and wires the full stack. The server does not
    /// process anything until `run` is called.
    pub fn bind(config: Config, log: &logging::Logger) -> io::Result<Server> {
        let config = config.normalized();

        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let address: SocketAddr = format!("0.0.0.0:{}", config.port)
            .parse()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, format!("{}", err)))?;
        let listener = TcpListener::bind(address)?;
        let local_addr = listener.local_addr()?;

        let (commands_tx, commands_rx) = unbounded();

        let session = SessionService::new(Box::new(AeadCipher), log);
        let ctx = Arc::new(ServerContext::new(session, commands_tx, waker.clone(), log));

        let router = Arc::new(Self::build_router(log));
        let dispatcher = Dispatcher::spawn(config.worker_threads, router, ctx.clone(), log);

        let stop = Arc::new(AtomicBool::new(false));
        let endpoint = Endpoint::new(
            listener,
            poll,
            ctx.clone(),
            dispatcher,
            commands_rx,
            config,
            stop.clone(),
            log,
        )?;

        logging::info!(log, "server bound"; "address" => %local_addr);

        Ok(Server {
            endpoint,
            ctx,
            stop,
            waker,
            local_addr,
        })
    }

    /// The handler set of the relay. Registration is conflict-checked; a
    /// double claim on any message type panics at startup.
    fn build_router(log: &logging::Logger) -> Router {
        let mut router = Router::new();

        router
            .register(Box::new(RelayMessageHandler))
            .register(Box::new(AckMessageHandler))
            .register(Box::new(ContactRequestServerHandler))
            .register(Box::new(UserManagementMessageHandler))
            .register(Box::new(GroupMessageHandler))
            .register(Box::new(KeyExchangeHandler::new(log)));

        router
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[inline]
    pub fn context(&self) -> Arc<ServerContext> {
        self.ctx.clone()
    }

    #[inline]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            stop: self.stop.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Runs the selector loop on the calling thread until `stop`.
    pub fn run(mut self) -> io::Result<()> {
        self.endpoint.run()
    }
}
