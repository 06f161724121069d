/*
    transport - Pluggable peer discovery and connection

    A transport finds peers under a topic and yields one `Connection` per
    established link, inbound or outbound. The mesh protocol only sees this
    contract; how peers are found and how bytes move is the backend's concern.

    Backends:
    - Direct:   TCP listener + Kademlia provider discovery, point-to-point streams
    - Relay:    one outbound link to a relay service that forwards traffic
    - Disabled: local-only operation; finds nobody, connects to nobody

    Workflow:
    1. connect(topic) registers interest and returns the connection stream
    2. announce(topic) makes this peer discoverable
    3. leave(topic) / disconnect() release discovery state and every link
*/

pub mod connection;
pub mod dht;
pub mod direct;
pub mod disabled;
pub mod framing;
pub mod relay;
pub mod secure;

pub use connection::{Connection, Direction};
pub use direct::DirectTransport;
pub use disabled::DisabledTransport;
pub use relay::{RelayFrame, RelayTransport};

use crate::config::SyncConfig;
use crate::core_sync::topic::Topic;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised by transports and connections
#[derive(Debug, Error)]
pub enum TransportError {
    /// Backend cannot run with the current configuration or environment
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// A peer as seen by discovery
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<SocketAddr>,
}

impl PeerInfo {
    pub fn new(peer_id: impl Into<String>, addr: Option<SocketAddr>) -> Self {
        PeerInfo { peer_id: peer_id.into(), addr }
    }
}

/// Which backend a database syncs through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    Direct,
    Relay,
    Disabled,
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" | "p2p" | "direct_p2p" => Ok(TransportMode::Direct),
            "relay" => Ok(TransportMode::Relay),
            "disabled" | "none" | "local" => Ok(TransportMode::Disabled),
            other => Err(format!("unknown transport mode '{}'", other)),
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportMode::Direct => "direct",
            TransportMode::Relay => "relay",
            TransportMode::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// Peer discovery and connection backend
#[async_trait]
pub trait Transport: Send + Sync {
    /// Backend name for diagnostics
    fn name(&self) -> &'static str;

    /// Make this peer discoverable under `topic`
    async fn announce(&self, topic: &Topic) -> TransportResult<()>;

    /// Best-effort snapshot of peers currently known under `topic`
    async fn lookup(&self, topic: &Topic) -> TransportResult<Vec<PeerInfo>>;

    /// Stream of established connections under `topic`; ends on leave/disconnect
    async fn connect(&self, topic: &Topic) -> TransportResult<mpsc::Receiver<Connection>>;

    /// Stop announcing `topic` and close its connections
    async fn leave(&self, topic: &Topic) -> TransportResult<()>;

    /// Tear down every connection, listener and topic
    async fn disconnect(&self) -> TransportResult<()>;

    /// Address other peers can dial, when the backend listens
    async fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Build the backend selected by `config`
pub fn create_transport(config: &SyncConfig, peer_id: &str) -> TransportResult<Arc<dyn Transport>> {
    match config.mode {
        TransportMode::Direct => Ok(Arc::new(DirectTransport::new(peer_id, config))),
        TransportMode::Relay => {
            let relay_address = config.relay_address.clone().ok_or_else(|| {
                TransportError::Unavailable("relay mode requires a relay address".to_string())
            })?;
            Ok(Arc::new(RelayTransport::new(peer_id, relay_address, config)))
        }
        TransportMode::Disabled => Ok(Arc::new(DisabledTransport::new())),
    }
}
