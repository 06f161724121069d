/*
    topic.rs - Sync keys and discovery topics

    Peers that share only a database's sync key rendezvous on the topic
    derived from it. The topic is the Blake3 hash of the key, so it is the
    same on every peer and unrelated keys do not collide in practice.
*/

use crate::core_sync::errors::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Domain separation for topic hashing
const TOPIC_CONTEXT: &[u8] = b"meshstore/topic/v1:";

/// 256-bit discovery topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Topic([u8; 32]);

impl Topic {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Topic(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the hex form produced by [`Topic::to_hex`]
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let bytes: [u8; 32] = bytes.try_into().ok()?;
        Some(Topic(bytes))
    }

    /// Short prefix for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Validated sync key: 64 lowercase hex characters
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SyncKey(String);

impl SyncKey {
    pub fn parse(key: &str) -> SyncResult<Self> {
        if key.len() != 64 {
            return Err(SyncError::InvalidKey(format!(
                "expected 64 hex characters, got {}",
                key.len()
            )));
        }
        if !key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(SyncError::InvalidKey(
                "key must contain only lowercase hex characters".to_string(),
            ));
        }
        Ok(SyncKey(key.to_string()))
    }

    /// Generate a random key
    pub fn generate() -> Self {
        let bytes: [u8; 32] = rand::random();
        SyncKey(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn topic(&self) -> Topic {
        derive_topic(&self.0)
    }
}

impl FromStr for SyncKey {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SyncKey::parse(s)
    }
}

// Keys are secrets; keep them out of logs
impl fmt::Debug for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncKey({}…)", &self.0[..8])
    }
}

/// Derive the discovery topic for a database identifier
pub fn derive_topic(database_id: &str) -> Topic {
    let mut hasher = blake3::Hasher::new();
    hasher.update(TOPIC_CONTEXT);
    hasher.update(database_id.as_bytes());
    Topic(*hasher.finalize().as_bytes())
}
