use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-message header stamped when a message is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Unique id of this message. Replies reference it as their `parent`.
    pub msg_id: Uuid,

    /// When this message was created.
    pub date: DateTime<Utc>,

    /// Schema version for forward-compatible evolution.
    #[serde(default = "default_version")]
    pub version: u16,
}

/// Default version for messages that omit the field (backward compat).
fn default_version() -> u16 {
    1
}

/// Logical message exchanged between hub, engines, and clients.
///
/// The `topic` doubles as the message kind for routing and PUB/SUB
/// filtering. `content` is the MessagePack-encoded payload; `buffers` carry
/// opaque binary attachments that are never inspected by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,

    pub header: MessageHeader,

    /// `msg_id` of the request this message answers, if any.
    #[serde(default)]
    pub parent: Option<Uuid>,

    #[serde(with = "serde_bytes")]
    pub content: Vec<u8>,

    #[serde(default)]
    pub buffers: Vec<Vec<u8>>,
}

impl Message {
    /// Create a new message, serializing the payload with MessagePack.
    pub fn new<T: Serialize>(
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Ok(Self {
            topic: topic.into(),
            header: MessageHeader {
                msg_id: Uuid::new_v4(),
                date: Utc::now(),
                version: 1,
            },
            parent: None,
            content: rmp_serde::to_vec_named(payload)?,
            buffers: Vec::new(),
        })
    }

    /// Create a reply to the message with id `parent`.
    pub fn reply_to<T: Serialize>(
        topic: impl Into<String>,
        payload: &T,
        parent: Uuid,
    ) -> Result<Self, rmp_serde::encode::Error> {
        let mut msg = Self::new(topic, payload)?;
        msg.parent = Some(parent);
        Ok(msg)
    }

    pub fn msg_id(&self) -> Uuid {
        self.header.msg_id
    }

    /// Deserialize the payload into the expected type.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, rmp_serde::decode::Error> {
        rmp_serde::from_slice(&self.content)
    }

    /// Serialize this entire message envelope to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    /// Deserialize a message envelope from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Helper module for serde to handle `Vec<u8>` as raw bytes in MessagePack.
mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_decodes() {
        let msg = Message::new("taskhub.test", &"hello world".to_string()).unwrap();
        assert_eq!(msg.topic, "taskhub.test");
        assert!(msg.parent.is_none());
        assert_eq!(msg.decode::<String>().unwrap(), "hello world");
    }

    #[test]
    fn envelope_bytes_keep_header_and_buffers() {
        let mut msg = Message::new("execute", &42u64).unwrap();
        msg.buffers.push(vec![1, 2, 3]);
        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded, msg);
        assert_eq!(decoded.decode::<u64>().unwrap(), 42);
    }

    #[test]
    fn reply_references_parent() {
        let request = Message::new("queue_status", &()).unwrap();
        let reply = Message::reply_to("queue_status", &true, request.msg_id()).unwrap();
        assert_eq!(reply.parent, Some(request.msg_id()));
        assert_ne!(reply.msg_id(), request.msg_id());
    }
}
