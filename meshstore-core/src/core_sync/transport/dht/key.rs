/*
    key.rs - Points in the 256-bit XOR keyspace

    Peers and topics share one keyspace: a peer sits at the Blake3 hash of
    its id, a topic at its own (already Blake3) bytes. Closeness is XOR
    distance, and the bucket a contact lands in is the position of the first
    bit where it differs from the local key.
*/

use crate::core_sync::topic::Topic;
use std::fmt;

/// 256-bit key for XOR-based keyspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DhtKey([u8; 32]);

impl DhtKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        DhtKey(bytes)
    }

    /// Position of a peer in the keyspace
    pub fn for_peer(peer_id: &str) -> Self {
        DhtKey(*blake3::hash(peer_id.as_bytes()).as_bytes())
    }

    /// Position of a topic; providers are stored around it
    pub fn for_topic(topic: &Topic) -> Self {
        DhtKey(*topic.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(DhtKey(bytes))
    }

    /// XOR distance between two keys
    pub fn distance(&self, other: &DhtKey) -> DhtKey {
        let mut result = [0u8; 32];
        for (out, (a, b)) in result.iter_mut().zip(self.0.iter().zip(other.0.iter())) {
            *out = a ^ b;
        }
        DhtKey(result)
    }

    /// Count leading zero bits
    pub fn leading_zeros(&self) -> u32 {
        let mut count = 0;
        for byte in &self.0 {
            if *byte == 0 {
                count += 8;
            } else {
                count += byte.leading_zeros();
                break;
            }
        }
        count
    }

    /// Bucket of this key relative to `reference`; `None` for the same key
    pub fn bucket_index(&self, reference: &DhtKey) -> Option<usize> {
        let leading = self.distance(reference).leading_zeros();
        if leading >= 256 {
            None
        } else {
            Some(255 - leading as usize)
        }
    }
}

impl fmt::Display for DhtKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 bytes are enough to tell keys apart in logs
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_sync::topic::derive_topic;

    #[test]
    fn test_distance_symmetric_and_zero_to_self() {
        let a = DhtKey::for_peer("peer-a");
        let b = DhtKey::for_peer("peer-b");
        assert_eq!(a.distance(&b), b.distance(&a));
        assert_eq!(a.distance(&a), DhtKey::from_bytes([0; 32]));
    }

    #[test]
    fn test_bucket_index() {
        let zero = DhtKey::from_bytes([0; 32]);
        let mut high = [0u8; 32];
        high[0] = 0x80;
        let mut low = [0u8; 32];
        low[31] = 0x01;

        assert_eq!(DhtKey::from_bytes(high).bucket_index(&zero), Some(255));
        assert_eq!(DhtKey::from_bytes(low).bucket_index(&zero), Some(0));
        assert_eq!(zero.bucket_index(&zero), None);
    }

    #[test]
    fn test_topic_key_and_hex() {
        let topic = derive_topic("db");
        let key = DhtKey::for_topic(&topic);
        assert_eq!(key.as_bytes(), topic.as_bytes());
        assert_eq!(DhtKey::from_hex(&key.to_hex()), Some(key));
        assert_eq!(DhtKey::from_hex("zz"), None);
        assert_eq!(key.to_string().len(), 16);
    }
}
