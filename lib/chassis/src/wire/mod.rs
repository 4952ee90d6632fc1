//! The wire contract spoken by the relay server and its clients: framed
//! packets, typed protocol messages and their codec.

pub mod ack;
pub mod codec;
pub mod message;
pub mod packet;

pub use self::codec::{decode, encode, CodecError};
pub use self::message::{
    AckMessage, AckStatus, ChatMessage, ErrorLevel, ErrorMessage, MediaMessage, MessageBody,
    MessageType, Params, ProtocolMessage, ReactionMessage,
};
pub use self::packet::{FrameError, Header, Packet, HEADER_SIZE, MAX_MESSAGE_SIZE};
