//! Translation between framed packets and typed protocol messages. The codec
//! never performs I/O; framing bounds are enforced one layer below.
//!
//! Chat, acknowledgement and management payloads use a pipe-delimited textual
//! encoding with a fixed part count per variant (the last part is free-form).
//! Key-exchange payloads are raw public-key bytes and ENCRYPTED payloads are
//! a big-endian sequence number followed by the ciphertext.

use crate::encoding::base64;
use crate::wire::message::{
    AckMessage, AckStatus, ChatMessage, ErrorLevel, ErrorMessage, MediaMessage, MessageBody,
    MessageType, Params, ProtocolMessage, ReactionMessage,
};
use crate::wire::packet::Packet;
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CodecError {
    /// The message-type code is not registered.
    UnknownType(i32),
    /// The payload does not split into the expected number of sub-fields.
    MalformedPayload {
        kind: MessageType,
        expected: usize,
        found: usize,
    },
    /// A sub-field failed to parse.
    InvalidField {
        kind: MessageType,
        field: &'static str,
    },
    /// A textual payload is not valid UTF-8.
    Utf8(MessageType),
}

#[inline]
fn invalid(kind: MessageType, field: &'static str) -> CodecError {
    CodecError::InvalidField { kind, field }
}

/// Splits a textual payload into exactly `expected` parts. Only the last part
/// may contain the delimiter.
fn split_parts(payload: &str, expected: usize, kind: MessageType) -> Result<Vec<&str>, CodecError> {
    let parts: Vec<&str> = payload.splitn(expected, '|').collect();

    if parts.len() != expected {
        return Err(CodecError::MalformedPayload {
            kind,
            expected,
            found: parts.len(),
        });
    }

    Ok(parts)
}

fn payload_str(packet: &Packet) -> Result<&str, CodecError> {
    std::str::from_utf8(&packet.payload).map_err(|_| CodecError::Utf8(packet.kind))
}

fn opt_field(part: &str) -> Option<String> {
    if part.is_empty() {
        None
    } else {
        Some(part.to_string())
    }
}

fn opt_str(field: &Option<String>) -> &str {
    field.as_ref().map(String::as_str).unwrap_or("")
}

/// Parses a framed packet into its typed view.
pub fn decode(packet: &Packet) -> Result<ProtocolMessage, CodecError> {
    let body = match packet.kind {
        MessageType::None => MessageBody::None,
        MessageType::Text => {
            let payload = payload_str(packet)?;
            let parts = split_parts(payload, 4, packet.kind)?;

            MessageBody::Text(ChatMessage {
                message_id: parts[0].to_string(),
                timestamp: parts[1]
                    .parse()
                    .map_err(|_| invalid(packet.kind, "timestamp"))?,
                reply_to: opt_field(parts[2]),
                content: parts[3].to_string(),
            })
        }
        MessageType::Media => {
            let payload = payload_str(packet)?;
            let parts = split_parts(payload, 7, packet.kind)?;

            MessageBody::Media(MediaMessage {
                message_id: parts[0].to_string(),
                timestamp: parts[1]
                    .parse()
                    .map_err(|_| invalid(packet.kind, "timestamp"))?,
                reply_to: opt_field(parts[2]),
                media_name: parts[3].to_string(),
                chunk: parts[4].parse().map_err(|_| invalid(packet.kind, "chunk"))?,
                size: parts[5].parse().map_err(|_| invalid(packet.kind, "size"))?,
                data: base64::decode(parts[6]).map_err(|_| invalid(packet.kind, "data"))?,
            })
        }
        MessageType::Reaction => {
            let payload = payload_str(packet)?;
            let parts = split_parts(payload, 4, packet.kind)?;

            MessageBody::Reaction(ReactionMessage {
                message_id: parts[0].to_string(),
                timestamp: parts[1]
                    .parse()
                    .map_err(|_| invalid(packet.kind, "timestamp"))?,
                reacted_message_id: parts[2].to_string(),
                reaction: parts[3].to_string(),
            })
        }
        MessageType::MessageAck => {
            let payload = payload_str(packet)?;
            let parts = split_parts(payload, 3, packet.kind)?;

            let status_code = parts[1].parse().map_err(|_| invalid(packet.kind, "status"))?;
            let status =
                AckStatus::from_code(status_code).ok_or_else(|| invalid(packet.kind, "status"))?;

            MessageBody::Ack(AckMessage {
                acknowledged_message_id: parts[0].to_string(),
                status,
                error_reason: opt_field(parts[2]),
            })
        }
        MessageType::Error => {
            let payload = payload_str(packet)?;
            let parts = split_parts(payload, 3, packet.kind)?;

            MessageBody::Error(ErrorMessage {
                level: ErrorLevel::from_str(parts[0]).ok_or_else(|| invalid(packet.kind, "level"))?,
                kind: parts[1].to_string(),
                message: parts[2].to_string(),
            })
        }
        MessageType::ContactRequest => {
            let payload = payload_str(packet)?;

            if payload.is_empty() {
                return Err(invalid(packet.kind, "requestId"));
            }

            MessageBody::ContactRequest {
                request_id: payload.to_string(),
            }
        }
        MessageType::ContactRequestResponse => {
            let payload = payload_str(packet)?;
            let parts = split_parts(payload, 2, packet.kind)?;

            MessageBody::ContactRequestResponse {
                request_id: parts[0].to_string(),
                accepted: parts[1].parse().map_err(|_| invalid(packet.kind, "accepted"))?,
            }
        }
        kind if kind.is_management() => {
            let payload = payload_str(packet)?;
            let mut params = Params::new();

            if !payload.is_empty() {
                for pair in payload.split('|') {
                    let mut kv = pair.splitn(2, '=');
                    let key = kv.next().unwrap_or("");
                    let value = kv.next().ok_or_else(|| invalid(packet.kind, "params"))?;

                    if key.is_empty() {
                        return Err(invalid(packet.kind, "params"));
                    }

                    params.set(key, value);
                }
            }

            MessageBody::Management(params)
        }
        kind if kind.is_handshake() => {
            if packet.payload.len() != 32 {
                return Err(invalid(packet.kind, "publicKey"));
            }

            let mut key = [0u8; 32];
            key.copy_from_slice(&packet.payload);
            MessageBody::PublicKey(key)
        }
        MessageType::Encrypted => {
            if packet.payload.len() < 8 {
                return Err(invalid(packet.kind, "sequence"));
            }

            MessageBody::Encrypted {
                sequence: BigEndian::read_u64(&packet.payload[..8]),
                ciphertext: packet.payload.slice(8..),
            }
        }
        kind => return Err(CodecError::UnknownType(kind.code())),
    };

    Ok(ProtocolMessage {
        kind: packet.kind,
        from: packet.from,
        to: packet.to,
        body,
    })
}

/// Serializes a typed message back into a framed packet.
///
/// The message body must match the message kind; a mismatch is a programming
/// error and panics.
pub fn encode(msg: &ProtocolMessage) -> Packet {
    let payload: Bytes = match &msg.body {
        MessageBody::None => Bytes::new(),
        MessageBody::Text(text) => format!(
            "{}|{}|{}|{}",
            text.message_id,
            text.timestamp,
            opt_str(&text.reply_to),
            text.content
        )
        .into(),
        MessageBody::Media(media) => format!(
            "{}|{}|{}|{}|{}|{}|{}",
            media.message_id,
            media.timestamp,
            opt_str(&media.reply_to),
            media.media_name,
            media.chunk,
            media.size,
            base64::encode(&media.data)
        )
        .into(),
        MessageBody::Reaction(reaction) => format!(
            "{}|{}|{}|{}",
            reaction.message_id, reaction.timestamp, reaction.reacted_message_id, reaction.reaction
        )
        .into(),
        MessageBody::Ack(ack) => format!(
            "{}|{}|{}",
            ack.acknowledged_message_id,
            ack.status.code(),
            opt_str(&ack.error_reason)
        )
        .into(),
        MessageBody::Error(error) => {
            format!("{}|{}|{}", error.level.as_str(), error.kind, error.message).into()
        }
        MessageBody::ContactRequest { request_id } => request_id.clone().into(),
        MessageBody::ContactRequestResponse { request_id, accepted } => {
            format!("{}|{}", request_id, accepted).into()
        }
        MessageBody::Management(params) => {
            let encoded: Vec<String> = params
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect();
            encoded.join("|").into()
        }
        MessageBody::PublicKey(key) => Bytes::copy_from_slice(&key[..]),
        MessageBody::Encrypted { sequence, ciphertext } => {
            let mut payload = BytesMut::with_capacity(8 + ciphertext.len());
            payload.put_u64(*sequence);
            payload.put_slice(ciphertext);
            payload.freeze()
        }
    };

    debug_assert!(body_matches(msg), "message body does not match type {}", msg.kind);

    Packet::new(msg.kind, msg.from, msg.to, payload)
}

fn body_matches(msg: &ProtocolMessage) -> bool {
    match (&msg.body, msg.kind) {
        (MessageBody::None, MessageType::None)
        | (MessageBody::Text(_), MessageType::Text)
        | (MessageBody::Media(_), MessageType::Media)
        | (MessageBody::Reaction(_), MessageType::Reaction)
        | (MessageBody::Ack(_), MessageType::MessageAck)
        | (MessageBody::Error(_), MessageType::Error)
        | (MessageBody::ContactRequest { .. }, MessageType::ContactRequest)
        | (MessageBody::ContactRequestResponse { .. }, MessageType::ContactRequestResponse)
        | (MessageBody::Encrypted { .. }, MessageType::Encrypted) => true,
        (MessageBody::Management(_), kind) => kind.is_management(),
        (MessageBody::PublicKey(_), kind) => kind.is_handshake(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::packet::MAX_MESSAGE_SIZE;
    use rand::RngCore;

    fn roundtrip(msg: ProtocolMessage) {
        let packet = encode(&msg);
        let decoded = decode(&packet).unwrap();
        assert_eq!(decoded, msg);

        // The re-encoded packet must be byte-identical.
        assert_eq!(encode(&decoded), packet);
    }

    #[test]
    fn test_text_roundtrip() {
        roundtrip(ProtocolMessage::new(
            MessageType::Text,
            1,
            2,
            MessageBody::Text(ChatMessage {
                message_id: "m1".to_string(),
                timestamp: 1700000000123,
                reply_to: None,
                content: "hello | world".to_string(),
            }),
        ));
    }

    #[test]
    fn test_text_with_reply_roundtrip() {
        roundtrip(ProtocolMessage::new(
            MessageType::Text,
            3,
            4,
            MessageBody::Text(ChatMessage {
                message_id: "m2".to_string(),
                timestamp: 0,
                reply_to: Some("m1".to_string()),
                content: String::new(),
            }),
        ));
    }

    #[test]
    fn test_media_roundtrip_binary_payload() {
        let mut data = vec![0u8; 65536];
        rand::thread_rng().fill_bytes(&mut data);

        let msg = ProtocolMessage::new(
            MessageType::Media,
            1,
            2,
            MessageBody::Media(MediaMessage {
                message_id: "m3".to_string(),
                timestamp: 42,
                reply_to: None,
                media_name: "cat.png".to_string(),
                chunk: 0,
                size: 65536,
                data,
            }),
        );

        assert!(encode(&msg).payload.len() <= MAX_MESSAGE_SIZE);
        roundtrip(msg);
    }

    #[test]
    fn test_reaction_roundtrip() {
        roundtrip(ProtocolMessage::new(
            MessageType::Reaction,
            1,
            2,
            MessageBody::Reaction(ReactionMessage {
                message_id: "m4".to_string(),
                timestamp: 7,
                reacted_message_id: "m1".to_string(),
                reaction: "👍".to_string(),
            }),
        ));
    }

    #[test]
    fn test_ack_roundtrip() {
        roundtrip(ProtocolMessage::new(
            MessageType::MessageAck,
            0,
            1,
            MessageBody::Ack(AckMessage {
                acknowledged_message_id: "m1".to_string(),
                status: AckStatus::Failed,
                error_reason: Some("Recipient not in contacts".to_string()),
            }),
        ));
    }

    #[test]
    fn test_error_roundtrip() {
        roundtrip(ProtocolMessage::new(
            MessageType::Error,
            0,
            1,
            MessageBody::Error(ErrorMessage {
                level: ErrorLevel::Error,
                kind: "ALREADY_CONNECTED".to_string(),
                message: "Client 1 is already connected".to_string(),
            }),
        ));
    }

    #[test]
    fn test_management_roundtrip() {
        roundtrip(ProtocolMessage::new(
            MessageType::CreateGroup,
            1,
            0,
            MessageBody::Management(Params::new().with("groupId", 10u32).with("name", "g").with("ack", true)),
        ));
    }

    #[test]
    fn test_management_empty_roundtrip() {
        roundtrip(ProtocolMessage::new(
            MessageType::DeleteGroup,
            1,
            0,
            MessageBody::Management(Params::new()),
        ));
    }

    #[test]
    fn test_contact_request_roundtrip() {
        roundtrip(ProtocolMessage::new(
            MessageType::ContactRequest,
            1,
            2,
            MessageBody::ContactRequest {
                request_id: "r1".to_string(),
            },
        ));
        roundtrip(ProtocolMessage::new(
            MessageType::ContactRequestResponse,
            2,
            1,
            MessageBody::ContactRequestResponse {
                request_id: "r1".to_string(),
                accepted: true,
            },
        ));
    }

    #[test]
    fn test_key_exchange_roundtrip() {
        roundtrip(ProtocolMessage::new(
            MessageType::ServerKeyExchange,
            0,
            0,
            MessageBody::PublicKey([9u8; 32]),
        ));
    }

    #[test]
    fn test_encrypted_roundtrip() {
        roundtrip(ProtocolMessage::new(
            MessageType::Encrypted,
            1,
            2,
            MessageBody::Encrypted {
                sequence: 77,
                ciphertext: Bytes::from_static(b"opaque"),
            },
        ));
    }

    #[test]
    fn test_decode_encode_is_byte_identical() {
        let packet = Packet::new(MessageType::Text, 5, 6, &b"m9|123||payload with | pipes"[..]);
        let decoded = decode(&packet).unwrap();
        assert_eq!(encode(&decoded), packet);
    }

    #[test]
    fn test_text_part_count_mismatch() {
        let packet = Packet::new(MessageType::Text, 1, 2, &b"m1|123"[..]);

        assert_eq!(
            decode(&packet).unwrap_err(),
            CodecError::MalformedPayload {
                kind: MessageType::Text,
                expected: 4,
                found: 2
            }
        );
    }

    #[test]
    fn test_ack_bad_status() {
        let packet = Packet::new(MessageType::MessageAck, 1, 2, &b"m1|9|"[..]);

        assert_eq!(
            decode(&packet).unwrap_err(),
            CodecError::InvalidField {
                kind: MessageType::MessageAck,
                field: "status"
            }
        );
    }

    #[test]
    fn test_management_missing_separator() {
        let packet = Packet::new(MessageType::CreateUser, 1, 0, &b"pseudo"[..]);

        assert_eq!(
            decode(&packet).unwrap_err(),
            CodecError::InvalidField {
                kind: MessageType::CreateUser,
                field: "params"
            }
        );
    }

    #[test]
    fn test_key_exchange_bad_length() {
        let packet = Packet::new(MessageType::KeyExchange, 1, 2, &b"short"[..]);

        assert_eq!(
            decode(&packet).unwrap_err(),
            CodecError::InvalidField {
                kind: MessageType::KeyExchange,
                field: "publicKey"
            }
        );
    }

    #[test]
    fn test_non_utf8_text_payload() {
        let packet = Packet::new(MessageType::Text, 1, 2, &[0xff, 0xfe, 0x00][..]);

        assert_eq!(decode(&packet).unwrap_err(), CodecError::Utf8(MessageType::Text));
    }
}
