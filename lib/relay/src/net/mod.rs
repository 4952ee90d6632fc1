//! Socket plumbing for the relay: buffered non-blocking reads, per-connection
//! framing state and the selector loop.

pub mod buffer;
pub mod connection;
pub mod endpoint;

use chassis::wire::FrameError;
use chassis::ClientId;
use bytes::Bytes;
use mio::Token;
use std::io;
use std::net;

pub type NetworkResult<T> = Result<T, NetworkError>;

/// Socket-layer errors. `Wait` means the operation would block and should be
/// retried on the next readiness event; `Fatal` closes the connection.
#[derive(Debug, Eq, PartialEq)]
pub enum NetworkError {
    Wait,
    Fatal(ErrorType),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorType {
    Frame(FrameError),
    PeerClosed,
    AddrParse,
    Io(io::ErrorKind),
}

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => NetworkError::Wait,
            io::ErrorKind::UnexpectedEof => NetworkError::Fatal(ErrorType::PeerClosed),
            kind => NetworkError::Fatal(ErrorType::Io(kind)),
        }
    }
}

impl From<FrameError> for NetworkError {
    #[inline]
    fn from(frame_error: FrameError) -> Self {
        NetworkError::Fatal(ErrorType::Frame(frame_error))
    }
}

impl From<net::AddrParseError> for NetworkError {
    #[inline]
    fn from(_: net::AddrParseError) -> Self {
        NetworkError::Fatal(ErrorType::AddrParse)
    }
}

pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for NetworkResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(NetworkError::Wait) => false,
            _ => true,
        }
    }
}

/// Commands pushed by worker threads and drained by the selector loop after a
/// waker event. This is the only way workers influence socket state.
#[derive(Debug)]
pub enum Command {
    /// New frames were queued for this client; flush them to its connection.
    Flush(ClientId),
    /// Write a frame straight to a connection that has not identified yet.
    Direct(Token, Bytes),
    /// Close the connection.
    Close(Token),
}
