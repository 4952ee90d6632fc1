#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

/// Identifier of a client or group. Id 0 is reserved for the server itself
/// and for connections that have not identified yet.
pub type ClientId = u32;

pub const SERVER_ID: ClientId = 0;

pub mod crypto;
pub mod encoding;
pub mod logging;
pub mod wire;

mod util;
