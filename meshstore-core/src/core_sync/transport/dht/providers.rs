/*
    providers.rs - Provider records

    Who announced which topic, as told to this node by Provide requests.
    Records expire unless the provider publishes again within the TTL.
*/

use super::key::DhtKey;
use super::routing_table::Contact;
use super::BUCKET_SIZE;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Record {
    contact: Contact,
    expires: Instant,
}

pub struct ProviderStore {
    ttl: Duration,
    records: HashMap<DhtKey, HashMap<String, Record>>,
}

impl ProviderStore {
    pub fn new(ttl: Duration) -> Self {
        ProviderStore { ttl, records: HashMap::new() }
    }

    /// Store or refresh a provider for `key`. Past `BUCKET_SIZE` providers
    /// the record closest to expiry gives way.
    pub fn add(&mut self, key: DhtKey, contact: Contact) {
        let expires = Instant::now() + self.ttl;
        let records = self.records.entry(key).or_default();
        records.insert(contact.peer_id.clone(), Record { contact, expires });

        if records.len() > BUCKET_SIZE {
            let oldest = records
                .iter()
                .min_by_key(|(_, record)| record.expires)
                .map(|(peer_id, _)| peer_id.clone());
            if let Some(peer_id) = oldest {
                records.remove(&peer_id);
            }
        }
    }

    /// Live providers for `key`; expired ones are dropped on the way
    pub fn providers(&mut self, key: &DhtKey) -> Vec<Contact> {
        let now = Instant::now();
        let Some(records) = self.records.get_mut(key) else {
            return Vec::new();
        };
        records.retain(|_, record| record.expires > now);
        let live = records.values().map(|record| record.contact.clone()).collect();
        if records.is_empty() {
            self.records.remove(key);
        }
        live
    }
}
