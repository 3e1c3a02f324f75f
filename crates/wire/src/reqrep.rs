//! Identity-addressed messaging over ZeroMQ DEALER/ROUTER sockets.
//!
//! - [`ZmqRouter`] wraps the hub's ROUTER socket: every inbound message
//!   comes with the [`PeerId`] of the DEALER that sent it, and replies are
//!   addressed back to that peer.
//! - [`ZmqRequestClient`] wraps a DEALER socket used by engines and clients.
//!   Replies are matched to requests by the reply's `parent` id; messages
//!   that answer no outstanding request (e.g. `execute`) land in an inbox.
//!
//! ## Framing (zeromq-rs 0.4)
//!
//! zeromq-rs ROUTER pushes peer identity as first frame on recv and pops it
//! on send. DEALER sends/receives raw application frames. So:
//! - DEALER sends: `[topic, signature, envelope]`
//! - ROUTER receives: `[identity, topic, signature, envelope]`
//! - ROUTER sends: `[identity, topic, signature, envelope]`
//! - DEALER receives: `[topic, signature, envelope]`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use zeromq::prelude::*;
use zeromq::{DealerSocket, RouterSocket, ZmqMessage};

use crate::error::WireError;
use crate::message::Message;
use crate::session::Session;
use crate::traits::RequestSender;
use crate::transport::Transport;

/// Routing identity of a peer connected to a ROUTER socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(pub Vec<u8>);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// Build a ZMQ message out of frames, optionally prefixed by a routing identity.
fn to_zmq(identity: Option<&PeerId>, frames: Vec<Vec<u8>>) -> Result<ZmqMessage, WireError> {
    let mut all = Vec::with_capacity(frames.len() + 1);
    if let Some(peer) = identity {
        all.push(peer.0.clone());
    }
    all.extend(frames);
    let mut iter = all.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| WireError::Malformed("no frames to send".into()))?;
    let mut zmq_msg = ZmqMessage::from(first);
    for frame in iter {
        zmq_msg.push_back(frame.into());
    }
    Ok(zmq_msg)
}

/// Application frames with any leading empty delimiter frames removed.
fn data_frames<'a>(frames: &'a [&'a [u8]]) -> Vec<&'a [u8]> {
    frames
        .iter()
        .copied()
        .skip_while(|f| f.is_empty())
        .collect()
}

// ── ROUTER ───────────────────────────────────────────────────────────

/// ZeroMQ ROUTER socket owned by a single event loop.
pub struct ZmqRouter {
    socket: RouterSocket,
    session: Session,
}

impl ZmqRouter {
    /// Bind a ROUTER socket on the given transport endpoint.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn bind(transport: &Transport, session: Session) -> Result<Self, WireError> {
        transport.prepare_bind()?;
        let mut socket = RouterSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "binding ROUTER socket");
        socket.bind(&endpoint).await?;
        Ok(Self { socket, session })
    }

    /// Receive the next message from any connected peer.
    ///
    /// Frames that fail to unpack (malformed, unsigned, replayed) are
    /// returned as errors; the socket stays usable.
    pub async fn recv(&mut self) -> Result<(PeerId, Message), WireError> {
        let zmq_msg = self.socket.recv().await?;
        let frames: Vec<&[u8]> = zmq_msg.iter().map(|f| f.as_ref()).collect();

        let Some((identity, rest)) = frames.split_first() else {
            return Err(WireError::Malformed("empty ROUTER message".into()));
        };
        let peer = PeerId(identity.to_vec());
        let message = self.session.unpack(&data_frames(rest))?;

        debug!(peer = %peer, topic = %message.topic, msg_id = %message.msg_id(), "received");
        Ok((peer, message))
    }

    /// Send a message to the peer identified by `peer`.
    pub async fn send(&mut self, peer: &PeerId, message: &Message) -> Result<(), WireError> {
        let frames = self.session.pack(message)?;
        self.socket.send(to_zmq(Some(peer), frames)?).await?;
        debug!(peer = %peer, topic = %message.topic, "sent");
        Ok(())
    }
}

// ── DEALER ───────────────────────────────────────────────────────────

/// Internal command sent from the public API to the background event loop.
struct SendCommand {
    zmq_msg: ZmqMessage,
}

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Message>>>>;

/// ZeroMQ DEALER-socket client for issuing requests and awaiting replies.
///
/// The DEALER socket is owned entirely by a background task that alternates
/// between sending outbound messages (received via an mpsc channel) and
/// receiving inbound ones (dispatched by `parent` id, or to the inbox).
pub struct ZmqRequestClient {
    send_tx: mpsc::Sender<SendCommand>,
    pending: PendingMap,
    session: Session,
    _loop_handle: tokio::task::JoinHandle<()>,
}

impl ZmqRequestClient {
    /// Connect a DEALER socket to a ROUTER endpoint.
    ///
    /// Returns the client and the receiver for unsolicited messages.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(
        transport: &Transport,
        session: Session,
    ) -> Result<(Self, mpsc::Receiver<Message>), WireError> {
        let mut socket = DealerSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting DEALER socket");
        socket.connect(&endpoint).await?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (send_tx, send_rx) = mpsc::channel::<SendCommand>(256);
        let (inbox_tx, inbox_rx) = mpsc::channel::<Message>(256);

        let loop_pending = Arc::clone(&pending);
        let loop_session = session.clone();
        let loop_handle = tokio::spawn(async move {
            Self::event_loop(socket, send_rx, loop_pending, inbox_tx, loop_session).await;
        });

        Ok((
            Self {
                send_tx,
                pending,
                session,
                _loop_handle: loop_handle,
            },
            inbox_rx,
        ))
    }

    /// Single-threaded event loop owning the DEALER socket.
    async fn event_loop(
        mut socket: DealerSocket,
        mut send_rx: mpsc::Receiver<SendCommand>,
        pending: PendingMap,
        inbox: mpsc::Sender<Message>,
        session: Session,
    ) {
        loop {
            tokio::select! {
                Some(cmd) = send_rx.recv() => {
                    if let Err(e) = socket.send(cmd.zmq_msg).await {
                        warn!(error = %e, "DEALER send failed");
                    }
                }
                result = socket.recv() => {
                    match result {
                        Ok(zmq_msg) => {
                            Self::dispatch(&pending, &inbox, &session, zmq_msg).await;
                        }
                        Err(e) => {
                            debug!(error = %e, "DEALER recv loop ending");
                            break;
                        }
                    }
                }
                else => break,
            }
        }
    }

    /// Route an inbound message to the waiting caller or the inbox.
    async fn dispatch(
        pending: &Mutex<HashMap<Uuid, oneshot::Sender<Message>>>,
        inbox: &mpsc::Sender<Message>,
        session: &Session,
        zmq_msg: ZmqMessage,
    ) {
        let frames: Vec<&[u8]> = zmq_msg.iter().map(|f| f.as_ref()).collect();
        let message = match session.unpack(&data_frames(&frames)) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "dropping undecodable message");
                return;
            }
        };

        if let Some(parent) = message.parent {
            if let Some(tx) = pending.lock().await.remove(&parent) {
                let _ = tx.send(message);
                return;
            }
            debug!(parent = %parent, "reply for unknown request, delivering to inbox");
        }

        if inbox.send(message).await.is_err() {
            debug!("inbox closed, dropping unsolicited message");
        }
    }

    /// Send a message without waiting for any reply.
    pub async fn send(&self, msg: &Message) -> Result<(), WireError> {
        let frames = self.session.pack(msg)?;
        self.send_tx
            .send(SendCommand {
                zmq_msg: to_zmq(None, frames)?,
            })
            .await
            .map_err(|_| WireError::Transport("client event loop closed".into()))?;
        Ok(())
    }
}

#[async_trait]
impl RequestSender for ZmqRequestClient {
    /// Send a request and wait for the reply whose `parent` is its `msg_id`.
    ///
    /// Returns `WireError::Timeout` if no reply arrives within `timeout`.
    async fn request(&self, msg: Message, timeout_dur: Duration) -> Result<Message, WireError> {
        let id = msg.msg_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.send(&msg).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }
        debug!(msg_id = %id, topic = %msg.topic, "sent request");

        match tokio::time::timeout(timeout_dur, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                Err(WireError::Transport("reply channel closed unexpectedly".into()))
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(WireError::Timeout(timeout_dur))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_displays_as_hex() {
        assert_eq!(PeerId(vec![0xde, 0xad]).to_string(), "dead");
    }

    #[test]
    fn zmq_frames_prefix_identity() {
        let msg = to_zmq(Some(&PeerId(vec![1])), vec![b"t".to_vec(), vec![], b"e".to_vec()]).unwrap();
        let frames: Vec<_> = msg.iter().map(|f| f.to_vec()).collect();
        assert_eq!(frames, vec![vec![1], b"t".to_vec(), vec![], b"e".to_vec()]);
    }

    #[test]
    fn leading_delimiters_are_skipped() {
        let raw: Vec<&[u8]> = vec![&b""[..], &b"topic"[..], &b""[..], &b"env"[..]];
        assert_eq!(data_frames(&raw), vec![&b"topic"[..], &b""[..], &b"env"[..]]);
    }
}
