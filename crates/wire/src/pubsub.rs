use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use zeromq::prelude::*;
use zeromq::{PubSocket, SubSocket, ZmqMessage};

use crate::error::WireError;
use crate::message::Message;
use crate::session::Session;
use crate::traits::{EventPublisher, EventSubscriber};
use crate::transport::Transport;

/// ZeroMQ PUB socket used by the hub for broadcasts.
///
/// Messages go out as `[topic, signature, envelope]`; the leading topic
/// frame is what SUB sockets prefix-match against.
pub struct ZmqPublisher {
    socket: Mutex<PubSocket>,
    session: Session,
}

impl ZmqPublisher {
    /// Bind a PUB socket; engines connect their SUB sockets to it.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn bind(transport: &Transport, session: Session) -> Result<Self, WireError> {
        transport.prepare_bind()?;
        let mut socket = PubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "binding PUB socket");
        socket.bind(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
            session,
        })
    }
}

#[async_trait]
impl EventPublisher for ZmqPublisher {
    async fn publish(&self, message: Message) -> Result<(), WireError> {
        let mut frames = self.session.pack(&message)?.into_iter();
        let topic = frames
            .next()
            .ok_or_else(|| WireError::Malformed("packed message has no topic frame".into()))?;
        let mut zmq_msg = ZmqMessage::from(topic);
        for frame in frames {
            zmq_msg.push_back(frame.into());
        }

        self.socket.lock().await.send(zmq_msg).await?;
        debug!(topic = %message.topic, "published message");
        Ok(())
    }
}

/// ZeroMQ SUB socket used by engines to follow hub broadcasts.
pub struct ZmqSubscriber {
    socket: Mutex<SubSocket>,
    session: Session,
}

impl ZmqSubscriber {
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport, session: Session) -> Result<Self, WireError> {
        let mut socket = SubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting SUB socket");
        socket.connect(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
            session,
        })
    }
}

#[async_trait]
impl EventSubscriber for ZmqSubscriber {
    /// An empty prefix subscribes to every topic.
    async fn subscribe(&self, topic_prefix: &str) -> Result<(), WireError> {
        self.socket.lock().await.subscribe(topic_prefix).await?;
        info!(topic_prefix = %topic_prefix, "subscribed to topic prefix");
        Ok(())
    }

    async fn recv(&self) -> Result<Message, WireError> {
        let zmq_msg = self.socket.lock().await.recv().await?;
        let frames: Vec<&[u8]> = zmq_msg.iter().map(|f| f.as_ref()).collect();
        let message = self.session.unpack(&frames)?;
        debug!(topic = %message.topic, "received message");
        Ok(message)
    }
}
