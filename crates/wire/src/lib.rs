pub mod error;
pub mod message;
pub mod protocol;
pub mod pubsub;
pub mod reqrep;
pub mod session;
pub mod traits;
pub mod transport;

pub use error::WireError;
pub use message::{Message, MessageHeader};
pub use protocol::{topics, Broadcast, EngineQueue, HubReply, HubRequest, QueueEntry};
pub use pubsub::{ZmqPublisher, ZmqSubscriber};
pub use reqrep::{PeerId, ZmqRequestClient, ZmqRouter};
pub use session::Session;
pub use traits::{EventPublisher, EventSubscriber, RequestSender};
pub use transport::Transport;
