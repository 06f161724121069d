/*
    routing_table.rs - Kademlia k-buckets

    256 buckets, one per bit of XOR distance from the local key, each
    holding at most `bucket_size` contacts ordered from least to most
    recently seen. A full bucket only admits a newcomer once its oldest
    entry has gone quiet, so long-lived contacts are preferred.
*/

use super::key::DhtKey;
use crate::core_sync::transport::PeerInfo;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// How long a contact may stay silent before a newcomer can replace it
const STALE_AFTER: Duration = Duration::from_secs(15 * 60);

/// A peer reachable at a known listener address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub peer_id: String,
    pub key: DhtKey,
    pub addr: SocketAddr,
}

impl Contact {
    pub fn new(peer_id: impl Into<String>, addr: SocketAddr) -> Self {
        let peer_id = peer_id.into();
        Contact { key: DhtKey::for_peer(&peer_id), peer_id, addr }
    }

    /// Contact for a discovered peer; `None` without an address
    pub fn from_peer(peer: &PeerInfo) -> Option<Self> {
        peer.addr.map(|addr| Contact::new(peer.peer_id.clone(), addr))
    }

    pub fn to_peer_info(&self) -> PeerInfo {
        PeerInfo::new(self.peer_id.clone(), Some(self.addr))
    }
}

struct Entry {
    contact: Contact,
    last_seen: Instant,
}

pub struct RoutingTable {
    local: DhtKey,
    bucket_size: usize,
    buckets: Vec<VecDeque<Entry>>,
}

impl RoutingTable {
    pub fn new(local_peer: &str, bucket_size: usize) -> Self {
        RoutingTable {
            local: DhtKey::for_peer(local_peer),
            bucket_size,
            buckets: (0..256).map(|_| VecDeque::new()).collect(),
        }
    }

    /// Record that `contact` was heard from; returns whether it is in the table
    pub fn insert(&mut self, contact: Contact) -> bool {
        let Some(index) = contact.key.bucket_index(&self.local) else {
            return false;
        };
        let bucket = &mut self.buckets[index];

        if let Some(pos) = bucket.iter().position(|e| e.contact.peer_id == contact.peer_id) {
            bucket.remove(pos);
        } else if bucket.len() >= self.bucket_size {
            match bucket.front() {
                Some(oldest) if oldest.last_seen.elapsed() >= STALE_AFTER => {
                    bucket.pop_front();
                }
                _ => return false,
            }
        }

        bucket.push_back(Entry { contact, last_seen: Instant::now() });
        true
    }

    /// Drop a contact that stopped answering
    pub fn remove(&mut self, peer_id: &str) -> bool {
        let key = DhtKey::for_peer(peer_id);
        let Some(index) = key.bucket_index(&self.local) else {
            return false;
        };
        let bucket = &mut self.buckets[index];
        match bucket.iter().position(|e| e.contact.peer_id == peer_id) {
            Some(pos) => {
                bucket.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Up to `count` contacts nearest to `target`, nearest first
    pub fn closest(&self, target: &DhtKey, count: usize) -> Vec<Contact> {
        let mut contacts: Vec<Contact> = self
            .buckets
            .iter()
            .flat_map(|bucket| bucket.iter().map(|e| e.contact.clone()))
            .collect();
        contacts.sort_by_key(|c| c.key.distance(target));
        contacts.truncate(count);
        contacts
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
