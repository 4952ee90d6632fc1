use crate::ClientId;
use bytes::Bytes;
use indexmap::IndexMap;
use std::fmt;

/// Closed enumeration of wire tags. Codes are part of the protocol and never
/// reused.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MessageType {
    None,
    Text,
    Media,
    Reaction,
    MessageAck,
    Error,
    CreateUser,
    ConnectUser,
    UpdatePseudo,
    AddContact,
    RemoveContact,
    ContactRequest,
    ContactRequestResponse,
    CreateGroup,
    DeleteGroup,
    LeaveGroup,
    AddGroupMember,
    RemoveGroupMember,
    UpdateGroupName,
    KeyExchange,
    KeyExchangeResponse,
    ServerKeyExchange,
    ServerKeyExchangeResponse,
    Encrypted,
}

impl MessageType {
    pub const ALL: [MessageType; 24] = [
        MessageType::None,
        MessageType::Text,
        MessageType::Media,
        MessageType::Reaction,
        MessageType::MessageAck,
        MessageType::Error,
        MessageType::CreateUser,
        MessageType::ConnectUser,
        MessageType::UpdatePseudo,
        MessageType::AddContact,
        MessageType::RemoveContact,
        MessageType::ContactRequest,
        MessageType::ContactRequestResponse,
        MessageType::CreateGroup,
        MessageType::DeleteGroup,
        MessageType::LeaveGroup,
        MessageType::AddGroupMember,
        MessageType::RemoveGroupMember,
        MessageType::UpdateGroupName,
        MessageType::KeyExchange,
        MessageType::KeyExchangeResponse,
        MessageType::ServerKeyExchange,
        MessageType::ServerKeyExchangeResponse,
        MessageType::Encrypted,
    ];

    #[inline]
    pub fn code(self) -> i32 {
        match self {
            MessageType::None => 0,
            MessageType::Text => 1,
            MessageType::Media => 2,
            MessageType::Reaction => 3,
            MessageType::MessageAck => 4,
            MessageType::Error => 5,
            MessageType::CreateUser => 10,
            MessageType::ConnectUser => 11,
            MessageType::UpdatePseudo => 12,
            MessageType::AddContact => 13,
            MessageType::RemoveContact => 14,
            MessageType::ContactRequest => 15,
            MessageType::ContactRequestResponse => 16,
            MessageType::CreateGroup => 20,
            MessageType::DeleteGroup => 21,
            MessageType::LeaveGroup => 22,
            MessageType::AddGroupMember => 23,
            MessageType::RemoveGroupMember => 24,
            MessageType::UpdateGroupName => 25,
            MessageType::KeyExchange => 30,
            MessageType::KeyExchangeResponse => 31,
            MessageType::ServerKeyExchange => 32,
            MessageType::ServerKeyExchangeResponse => 33,
            MessageType::Encrypted => 40,
        }
    }

    pub fn from_code(code: i32) -> Option<MessageType> {
        Self::ALL.iter().cloned().find(|kind| kind.code() == code)
    }

    /// Handshake legs are never wrapped in an ENCRYPTED frame.
    #[inline]
    pub fn is_handshake(self) -> bool {
        match self {
            MessageType::KeyExchange
            | MessageType::KeyExchangeResponse
            | MessageType::ServerKeyExchange
            | MessageType::ServerKeyExchangeResponse => true,
            _ => false,
        }
    }

    /// True for the management operations whose payload is a key/value
    /// parameter map.
    #[inline]
    pub fn is_management(self) -> bool {
        match self {
            MessageType::CreateUser
            | MessageType::ConnectUser
            | MessageType::UpdatePseudo
            | MessageType::AddContact
            | MessageType::RemoveContact
            | MessageType::CreateGroup
            | MessageType::DeleteGroup
            | MessageType::LeaveGroup
            | MessageType::AddGroupMember
            | MessageType::RemoveGroupMember
            | MessageType::UpdateGroupName => true,
            _ => false,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Acknowledgement status. The byte values are part of the wire contract.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AckStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
    CriticalFailure,
}

impl AckStatus {
    #[inline]
    pub fn code(self) -> u8 {
        match self {
            AckStatus::Sending => 0,
            AckStatus::Sent => 1,
            AckStatus::Delivered => 2,
            AckStatus::Read => 3,
            AckStatus::Failed => 4,
            AckStatus::CriticalFailure => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<AckStatus> {
        match code {
            0 => Some(AckStatus::Sending),
            1 => Some(AckStatus::Sent),
            2 => Some(AckStatus::Delivered),
            3 => Some(AckStatus::Read),
            4 => Some(AckStatus::Failed),
            5 => Some(AckStatus::CriticalFailure),
            _ => None,
        }
    }
}

/// Severity of a server-to-client error message.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorLevel::Info => "INFO",
            ErrorLevel::Warning => "WARNING",
            ErrorLevel::Error => "ERROR",
            ErrorLevel::Critical => "CRITICAL",
        }
    }

    pub fn from_str(value: &str) -> Option<ErrorLevel> {
        match value {
            "INFO" => Some(ErrorLevel::Info),
            "WARNING" => Some(ErrorLevel::Warning),
            "ERROR" => Some(ErrorLevel::Error),
            "CRITICAL" => Some(ErrorLevel::Critical),
            _ => None,
        }
    }
}

/// Ordered key/value parameter map carried by management messages. Values are
/// strings on the wire; typed accessors parse on demand. Insertion order is
/// preserved so that encoding is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: IndexMap<String, String>,
}

impl Params {
    #[inline]
    pub fn new() -> Params {
        Params {
            entries: IndexMap::new(),
        }
    }

    /// Builder-style insert.
    #[inline]
    pub fn with<V: ToString>(mut self, key: &str, value: V) -> Params {
        self.set(key, value);
        self
    }

    #[inline]
    pub fn set<V: ToString>(&mut self, key: &str, value: V) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    #[inline]
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|value| value.parse().ok())
    }

    #[inline]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|value| value.parse().ok())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChatMessage {
    pub message_id: String,
    pub timestamp: i64,
    pub reply_to: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MediaMessage {
    pub message_id: String,
    pub timestamp: i64,
    pub reply_to: Option<String>,
    pub media_name: String,
    pub chunk: u32,
    pub size: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReactionMessage {
    pub message_id: String,
    pub timestamp: i64,
    pub reacted_message_id: String,
    pub reaction: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AckMessage {
    pub acknowledged_message_id: String,
    pub status: AckStatus,
    pub error_reason: Option<String>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ErrorMessage {
    pub level: ErrorLevel,
    pub kind: String,
    pub message: String,
}

/// Typed payload of a decoded packet.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum MessageBody {
    None,
    Text(ChatMessage),
    Media(MediaMessage),
    Reaction(ReactionMessage),
    Ack(AckMessage),
    Management(Params),
    ContactRequest {
        request_id: String,
    },
    ContactRequestResponse {
        request_id: String,
        accepted: bool,
    },
    Error(ErrorMessage),
    /// Shared by all four key-exchange legs.
    PublicKey([u8; 32]),
    Encrypted {
        sequence: u64,
        ciphertext: Bytes,
    },
}

/// The typed, decoded view of a packet: the header routing fields plus the
/// parsed payload.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ProtocolMessage {
    pub kind: MessageType,
    pub from: ClientId,
    pub to: ClientId,
    pub body: MessageBody,
}

impl ProtocolMessage {
    #[inline]
    pub fn new(kind: MessageType, from: ClientId, to: ClientId, body: MessageBody) -> ProtocolMessage {
        ProtocolMessage { kind, from, to, body }
    }

    /// Management parameter view, when this message carries one.
    #[inline]
    pub fn params(&self) -> Option<&Params> {
        match &self.body {
            MessageBody::Management(params) => Some(params),
            _ => None,
        }
    }
}
