//! Kademlia topic discovery for the direct backend
//!
//! Peers form a DHT over their own listeners. Announcing a topic stores a
//! provider record on the peers closest to the topic's key; looking a topic
//! up walks toward that key and collects the providers it finds.

pub mod key;
pub mod providers;
pub mod routing_table;
pub mod search;

pub use key::DhtKey;
pub use providers::ProviderStore;
pub use routing_table::{Contact, RoutingTable};
pub use search::Shortlist;

/// Contacts per bucket, and providers stored per topic (k)
pub const BUCKET_SIZE: usize = 20;

/// Concurrent queries per lookup round
pub const ALPHA: usize = 3;

/// Rounds before a lookup settles for what it has
pub const MAX_LOOKUP_ROUNDS: usize = 8;
