//! Peer-to-peer replication
//!
//! A sync key names a topic; a transport finds peers on that topic and
//! hands back connections; the mesh protocol runs on each connection and
//! keeps the local store converged with everyone it can reach.

pub mod errors;
pub mod mesh;
pub mod message;
pub mod relay_server;
pub mod session;
pub mod topic;
pub mod transport;

pub use errors::{SyncError, SyncResult};
pub use mesh::{LinkState, MeshProtocol};
pub use message::MeshMessage;
pub use relay_server::RelayServer;
pub use session::SyncSession;
pub use topic::{derive_topic, SyncKey, Topic};
pub use transport::{
    create_transport, Connection, Direction, DirectTransport, DisabledTransport, PeerInfo,
    RelayTransport, Transport, TransportError, TransportMode, TransportResult,
};
