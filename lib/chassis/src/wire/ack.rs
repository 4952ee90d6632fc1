//! Canonical construction of acknowledgement messages. All server-originated
//! acks carry the server id in `from`.

use crate::wire::message::{AckMessage, AckStatus, MessageBody, MessageType, ProtocolMessage};
use crate::{ClientId, SERVER_ID};

#[inline]
fn ack(message_id: &str, status: AckStatus, reason: Option<String>, to: ClientId) -> ProtocolMessage {
    ProtocolMessage::new(
        MessageType::MessageAck,
        SERVER_ID,
        to,
        MessageBody::Ack(AckMessage {
            acknowledged_message_id: message_id.to_string(),
            status,
            error_reason: reason,
        }),
    )
}

/// The server accepted the message and queued it for the recipient.
#[inline]
pub fn sent(message_id: &str, to: ClientId) -> ProtocolMessage {
    ack(message_id, AckStatus::Sent, None, to)
}

/// The recipient's client received the message.
#[inline]
pub fn delivered(message_id: &str, to: ClientId) -> ProtocolMessage {
    ack(message_id, AckStatus::Delivered, None, to)
}

/// The recipient read the message.
#[inline]
pub fn read(message_id: &str, to: ClientId) -> ProtocolMessage {
    ack(message_id, AckStatus::Read, None, to)
}

/// The message was rejected; the reason is surfaced to the sender.
#[inline]
pub fn failed(message_id: &str, reason: &str, to: ClientId) -> ProtocolMessage {
    ack(message_id, AckStatus::Failed, Some(reason.to_string()), to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_carries_reason() {
        let msg = failed("m1", "Recipient not in contacts", 7);

        assert_eq!(msg.kind, MessageType::MessageAck);
        assert_eq!(msg.from, SERVER_ID);
        assert_eq!(msg.to, 7);

        match msg.body {
            MessageBody::Ack(ack) => {
                assert_eq!(ack.acknowledged_message_id, "m1");
                assert_eq!(ack.status, AckStatus::Failed);
                assert_eq!(ack.error_reason.as_deref(), Some("Recipient not in contacts"));
            }
            body => panic!("Unexpected body {:?}", body),
        }
    }

    #[test]
    fn test_statuses() {
        assert_eq!(
            match sent("m", 1).body {
                MessageBody::Ack(a) => a.status,
                _ => unreachable!(),
            },
            AckStatus::Sent
        );
        assert_eq!(
            match delivered("m", 1).body {
                MessageBody::Ack(a) => a.status,
                _ => unreachable!(),
            },
            AckStatus::Delivered
        );
        assert_eq!(
            match read("m", 1).body {
                MessageBody::Ack(a) => a.status,
                _ => unreachable!(),
            },
            AckStatus::Read
        );
    }
}
