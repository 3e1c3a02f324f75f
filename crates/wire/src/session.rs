//! Message signing and frame packing.
//!
//! A [`Session`] turns a [`Message`] into wire frames `[topic, signature,
//! envelope]` and back. With a shared key the signature is an HMAC-SHA256
//! over the topic and envelope bytes; without one the signature frame is
//! empty and not checked. Signed sessions remember recently seen digests
//! and reject replays.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use hmac::{Hmac, Mac};
use lru::LruCache;
use sha2::Sha256;

use crate::error::WireError;
use crate::message::Message;

type HmacSha256 = Hmac<Sha256>;

/// How many recent digests are kept for replay detection.
const DIGEST_HISTORY: usize = 65_536;

/// Signs, packs and unpacks messages. Cheap to clone; clones share the
/// digest history.
#[derive(Clone)]
pub struct Session {
    key: Option<Arc<[u8]>>,
    seen: Arc<Mutex<LruCache<String, ()>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("signed", &self.key.is_some())
            .finish()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::unsigned()
    }
}

impl Session {
    /// A session that signs every message with `key`.
    pub fn signed(key: impl AsRef<[u8]>) -> Self {
        Self::build(Some(Arc::from(key.as_ref())))
    }

    /// A session that neither signs nor verifies.
    pub fn unsigned() -> Self {
        Self::build(None)
    }

    /// Signed when `key` is present and non-empty, unsigned otherwise.
    pub fn from_key(key: Option<&str>) -> Self {
        match key {
            Some(k) if !k.is_empty() => Self::signed(k),
            _ => Self::unsigned(),
        }
    }

    fn build(key: Option<Arc<[u8]>>) -> Self {
        let capacity = NonZeroUsize::new(DIGEST_HISTORY).unwrap_or(NonZeroUsize::MIN);
        Self {
            key,
            seen: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn is_signed(&self) -> bool {
        self.key.is_some()
    }

    fn mac(key: &[u8], parts: &[&[u8]]) -> Result<HmacSha256, WireError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|e| WireError::Transport(format!("invalid session key: {e}")))?;
        for part in parts {
            mac.update(part);
        }
        Ok(mac)
    }

    /// Hex HMAC digest over the given frames, or an empty string if unsigned.
    pub fn sign(&self, parts: &[&[u8]]) -> Result<String, WireError> {
        match &self.key {
            Some(key) => Ok(hex::encode(Self::mac(key, parts)?.finalize().into_bytes())),
            None => Ok(String::new()),
        }
    }

    /// Encode a message as `[topic, signature, envelope]` frames.
    pub fn pack(&self, message: &Message) -> Result<Vec<Vec<u8>>, WireError> {
        let envelope = message.to_bytes()?;
        let topic = message.topic.as_bytes().to_vec();
        let signature = self.sign(&[topic.as_slice(), envelope.as_slice()])?;
        Ok(vec![topic, signature.into_bytes(), envelope])
    }

    /// Verify and decode `[topic, signature, envelope]` frames.
    pub fn unpack(&self, frames: &[&[u8]]) -> Result<Message, WireError> {
        let [topic, signature, envelope] = frames else {
            return Err(WireError::Malformed(format!(
                "expected [topic, signature, envelope], got {} frames",
                frames.len()
            )));
        };

        if let Some(key) = &self.key {
            if signature.is_empty() {
                return Err(WireError::Unsigned);
            }
            let expected = hex::decode(signature).map_err(|_| WireError::BadSignature)?;
            Self::mac(key, &[*topic, *envelope])?
                .verify_slice(&expected)
                .map_err(|_| WireError::BadSignature)?;

            let digest = String::from_utf8_lossy(signature).into_owned();
            let mut seen = self
                .seen
                .lock()
                .map_err(|_| WireError::Transport("digest history poisoned".into()))?;
            if seen.put(digest, ()).is_some() {
                return Err(WireError::ReplayedSignature);
            }
        }

        let message = Message::from_bytes(envelope)?;
        if message.topic.as_bytes() != *topic {
            return Err(WireError::Malformed(format!(
                "topic frame does not match envelope topic '{}'",
                message.topic
            )));
        }
        Ok(message)
    }
}
