use crate::net::buffer::Buffer;
use crate::net::{ErrorType, NetworkError, NetworkResult};
use chassis::logging;
use chassis::wire::Packet;
use bytes::{Buf, Bytes};
use mio::net::TcpStream;
use mio::Token;
use std::collections::VecDeque;
use std::io::Write;
use std::net::Shutdown;
use std::time::Instant;

/// Per-socket bookkeeping owned exclusively by the selector loop: the read
/// buffer packets are framed out of and the staged outbound frames. Identity
/// and encryption state live in the shared tables so worker threads can
/// observe them.
pub struct Connection {
    token: Token,
    stream: TcpStream,
    accepted: Instant,
    read_buffer: Buffer,
    outbound: VecDeque<Bytes>,
    write_interest: bool,
    log: logging::Logger,
}

impl Connection {
    pub fn new(
        token: Token,
        stream: TcpStream,
        read_limit: usize,
        now: Instant,
        log: &logging::Logger,
    ) -> Connection {
        Connection {
            token,
            stream,
            accepted: now,
            read_buffer: Buffer::new(read_limit),
            outbound: VecDeque::new(),
            write_interest: false,
            log: log.new(logging::o!("token" => token.0)),
        }
    }

    #[inline]
    pub fn token(&self) -> Token {
        self.token
    }

    #[inline]
    pub fn accepted(&self) -> Instant {
        self.accepted
    }

    #[inline]
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Returns true if there are staged frames waiting to be written.
    #[inline]
    pub fn has_egress(&self) -> bool {
        !self.outbound.is_empty()
    }

    #[inline]
    pub fn write_interest(&self) -> bool {
        self.write_interest
    }

    #[inline]
    pub fn set_write_interest(&mut self, interest: bool) {
        self.write_interest = interest;
    }

    /// Reads all available data off the socket into the read buffer.
    #[inline]
    pub fn receive(&mut self) -> NetworkResult<usize> {
        logging::trace!(self.log, "receiving data from network"; "context" => "receive");

        let count = self.read_buffer.ingress(&mut self.stream)?;
        Ok(count)
    }

    /// Attempts to peel one complete packet off the read buffer. Returns
    /// `Ok(None)` while the buffered data holds only a partial packet; the
    /// partial bytes are retained across calls.
    pub fn extract(&mut self, max_payload: usize) -> NetworkResult<Option<Packet>> {
        match Packet::extract(self.read_buffer.read_slice(), max_payload) {
            Ok(Some((packet, consumed))) => {
                self.read_buffer.consume(consumed);

                logging::trace!(self.log, "packet framed";
                                "context" => "extract",
                                "kind" => %packet.kind,
                                "from" => packet.from,
                                "to" => packet.to,
                                "payload_size" => packet.payload.len());

                Ok(Some(packet))
            }
            Ok(None) => Ok(None),
            Err(frame_error) => {
                logging::debug!(self.log, "framing error";
                                "context" => "extract",
                                "error" => ?frame_error,
                                "buffered" => self.read_buffer.len());

                Err(NetworkError::Fatal(ErrorType::Frame(frame_error)))
            }
        }
    }

    /// Stages an encoded frame for writing.
    #[inline]
    pub fn push_frame(&mut self, frame: Bytes) {
        self.outbound.push_back(frame);
    }

    /// Writes staged frames until the queue drains or the socket would block.
    /// Returns `Ok(true)` when fully drained. A partially written head frame
    /// is kept with its cursor advanced.
    pub fn flush(&mut self) -> NetworkResult<bool> {
        while let Some(head) = self.outbound.front_mut() {
            match self.stream.write(head) {
                Ok(0) => return Err(NetworkError::Fatal(ErrorType::PeerClosed)),
                Ok(count) if count < head.len() => {
                    head.advance(count);
                    return Ok(false);
                }
                Ok(_) => {
                    self.outbound.pop_front();
                }
                Err(err) => {
                    return match NetworkError::from(err) {
                        NetworkError::Wait => Ok(false),
                        fatal => Err(fatal),
                    };
                }
            }
        }

        Ok(true)
    }

    /// Shuts the socket down and clears buffered state. Staged frames that
    /// were not flushed are dropped.
    pub fn close(&mut self) {
        logging::debug!(self.log, "closing connection";
                        "context" => "close",
                        "buffered_read" => self.read_buffer.len(),
                        "staged_frames" => self.outbound.len());

        self.read_buffer.clear();
        self.outbound.clear();

        // The peer may already be gone; a failed shutdown is fine.
        drop(self.stream.shutdown(Shutdown::Both));
    }

    #[cfg(test)]
    pub(crate) fn feed(&mut self, data: &[u8]) {
        self.read_buffer.push(data);
    }
}
