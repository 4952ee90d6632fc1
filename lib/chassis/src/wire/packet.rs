use crate::wire::message::MessageType;
use crate::ClientId;
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the fixed packet header: `i32 length | i32 type | u32 from | u32 to`,
/// all big-endian. The length counts payload bytes only.
pub const HEADER_SIZE: usize = 16;

/// Hard ceiling on the payload size of a single packet.
pub const MAX_MESSAGE_SIZE: usize = 1 << 20;

/// Framing-level failures. Either one closes the offending connection.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameError {
    BadLength(i32),
    UnknownType(i32),
}

/// Decoded packet header.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Header {
    pub length: i32,
    pub code: i32,
    pub from: ClientId,
    pub to: ClientId,
}

impl Header {
    /// Reads a header off the front of the buffer. Returns `None` while fewer
    /// than `HEADER_SIZE` bytes are available.
    #[inline]
    pub fn peek(buf: &[u8]) -> Option<Header> {
        if buf.len() < HEADER_SIZE {
            return None;
        }

        Some(Header {
            length: BigEndian::read_i32(&buf[0..4]),
            code: BigEndian::read_i32(&buf[4..8]),
            from: BigEndian::read_u32(&buf[8..12]),
            to: BigEndian::read_u32(&buf[12..16]),
        })
    }

    /// Validates the header bounds and resolves the message type.
    #[inline]
    pub fn validate(&self, max_payload: usize) -> Result<MessageType, FrameError> {
        if self.length < 0 || self.length as usize > max_payload {
            return Err(FrameError::BadLength(self.length));
        }

        MessageType::from_code(self.code).ok_or(FrameError::UnknownType(self.code))
    }
}

/// The framed unit of the wire protocol: a validated header plus an opaque
/// payload whose interpretation is determined by the message type.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Packet {
    pub kind: MessageType,
    pub from: ClientId,
    pub to: ClientId,
    pub payload: Bytes,
}

impl Packet {
    #[inline]
    pub fn new<P: Into<Bytes>>(kind: MessageType, from: ClientId, to: ClientId, payload: P) -> Packet {
        Packet {
            kind,
            from,
            to,
            payload: payload.into(),
        }
    }

    /// Total number of bytes this packet occupies on the wire.
    #[inline]
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serializes the packet into a single wire frame.
    pub fn encode(&self) -> Bytes {
        let mut frame = BytesMut::with_capacity(self.frame_len());

        frame.put_i32(self.payload.len() as i32);
        frame.put_i32(self.kind.code());
        frame.put_u32(self.from);
        frame.put_u32(self.to);
        frame.put_slice(&self.payload);

        frame.freeze()
    }

    /// Attempts to extract one packet from the front of the buffer.
    ///
    /// Returns `Ok(None)` while the buffer holds a partial packet; on success
    /// the returned count is the number of bytes consumed from the buffer.
    pub fn extract(buf: &[u8], max_payload: usize) -> Result<Option<(Packet, usize)>, FrameError> {
        let header = match Header::peek(buf) {
            Some(header) => header,
            None => return Ok(None),
        };

        let kind = header.validate(max_payload)?;
        let total = HEADER_SIZE + header.length as usize;

        if buf.len() < total {
            return Ok(None);
        }

        let packet = Packet {
            kind,
            from: header.from,
            to: header.to,
            payload: Bytes::copy_from_slice(&buf[HEADER_SIZE..total]),
        };

        Ok(Some((packet, total)))
    }
}
