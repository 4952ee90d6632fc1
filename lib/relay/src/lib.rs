//! The server-side relay and session engine of the chat service: the
//! selector loop that owns every socket, the per-connection key-exchange
//! handshake, the worker pool dispatching typed messages to handlers, and
//! the repositories backing users, groups and contact requests.

#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod config;
pub mod context;
pub mod dispatch;
pub mod handlers;
pub mod identity;
pub mod net;
pub mod repository;
pub mod router;
pub mod server;
pub mod session;

pub use crate::config::Config;
pub use crate::context::ServerContext;
pub use crate::server::{Server, ServerHandle};
