use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::WireError;
use crate::message::Message;

/// Publishes messages to subscribers via the PUB/SUB pattern.
///
/// The hub uses this for heartbeat pings and lifecycle notices.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a message. Subscribers filter by the message's topic.
    async fn publish(&self, message: Message) -> Result<(), WireError>;
}

/// Blanket implementation so `Arc<dyn EventPublisher>` can be used directly.
#[async_trait]
impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    async fn publish(&self, message: Message) -> Result<(), WireError> {
        (**self).publish(message).await
    }
}

/// Subscribes to messages matching topic prefixes via the PUB/SUB pattern.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Subscribe to messages with topics matching the given prefix.
    async fn subscribe(&self, topic_prefix: &str) -> Result<(), WireError>;

    /// Receive the next message. Blocks until a message is available.
    async fn recv(&self) -> Result<Message, WireError>;
}

/// Sends a request and waits for the matching reply.
#[async_trait]
pub trait RequestSender: Send + Sync {
    async fn request(&self, msg: Message, timeout: Duration) -> Result<Message, WireError>;
}
