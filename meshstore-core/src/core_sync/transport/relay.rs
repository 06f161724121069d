/*
    relay.rs - Relay-forwarded backend

    Keeps one outbound TCP link to a relay service. The relay tracks who
    joined which topic and forwards opaque payloads between members; it
    never looks inside them. Each member the relay reports becomes one
    virtual Connection multiplexed over the shared link.

    Link protocol, JSON frames tagged by "type":
      client -> relay: join, leave, send
      relay -> client: peer_joined, peer_left, deliver

    With encryption on, the member with the smaller id initiates the Noise
    handshake, so payloads stay opaque to the relay as well.
*/

use super::connection::{Connection, Direction, IoGuard, CONNECTION_BUFFER};
use super::framing::{read_json, write_json};
use super::secure::secure;
use super::{PeerInfo, Transport, TransportError, TransportResult};
use crate::config::SyncConfig;
use crate::core_sync::topic::Topic;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Frames exchanged with the relay service. Topics travel as hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    Join {
        topic: String,
        peer_id: String,
    },
    Leave {
        topic: String,
    },
    Send {
        topic: String,
        to: String,
        #[serde(with = "hex::serde")]
        payload: Vec<u8>,
    },
    PeerJoined {
        topic: String,
        peer_id: String,
    },
    PeerLeft {
        topic: String,
        peer_id: String,
    },
    Deliver {
        topic: String,
        from: String,
        #[serde(with = "hex::serde")]
        payload: Vec<u8>,
    },
}

const OUTBOX_BUFFER: usize = 1024;
const INCOMING_BUFFER: usize = 16;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct RelayTopic {
    joined: bool,
    incoming: Option<mpsc::Sender<Connection>>,
    members: HashSet<String>,
    // Delivery side of each virtual connection
    peers: HashMap<String, mpsc::Sender<Vec<u8>>>,
}

/// Everything the link reader needs to route frames
struct Router {
    peer_id: String,
    encryption: bool,
    timeout: Duration,
    topics: Mutex<HashMap<Topic, RelayTopic>>,
}

impl Router {
    /// Build a virtual connection to `peer_id` and hand it to the mesh.
    /// Caller holds the topic entry; handshakes run in their own task.
    fn open_virtual(&self, topic: Topic, state: &mut RelayTopic, peer_id: &str, out: &mpsc::Sender<RelayFrame>) {
        let Some(incoming) = state.incoming.clone() else {
            return;
        };
        if state.peers.contains_key(peer_id) {
            return;
        }

        let (deliver_tx, deliver_rx) = mpsc::channel::<Vec<u8>>(CONNECTION_BUFFER);
        let (app_tx, mut app_rx) = mpsc::channel::<Vec<u8>>(CONNECTION_BUFFER);
        let out = out.clone();
        let to = peer_id.to_string();
        let topic_hex = topic.to_hex();
        let forward = tokio::spawn(async move {
            while let Some(payload) = app_rx.recv().await {
                let frame = RelayFrame::Send { topic: topic_hex.clone(), to: to.clone(), payload };
                if out.send(frame).await.is_err() {
                    break;
                }
            }
        });
        state.peers.insert(peer_id.to_string(), deliver_tx);

        let direction = if self.peer_id.as_str() < peer_id {
            Direction::Outbound
        } else {
            Direction::Inbound
        };
        let conn = Connection::new(
            PeerInfo::new(peer_id, None),
            direction,
            app_tx,
            deliver_rx,
            Arc::new(IoGuard::new(vec![forward])),
        );

        let encryption = self.encryption;
        let timeout = self.timeout;
        tokio::spawn(async move {
            let conn = if encryption {
                match secure(conn, direction == Direction::Outbound, timeout).await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Relay link handshake failed");
                        return;
                    }
                }
            } else {
                conn
            };
            info!(peer_id = %conn.peer_id(), ?direction, encrypted = encryption, "Relayed link established");
            let _ = incoming.send(conn).await;
        });
    }

    async fn route(&self, frame: RelayFrame, out: &mpsc::Sender<RelayFrame>) {
        match frame {
            RelayFrame::PeerJoined { topic, peer_id } => {
                let Some(topic) = Topic::from_hex(&topic) else { return };
                if peer_id == self.peer_id {
                    return;
                }
                let mut topics = lock(&self.topics);
                if let Some(state) = topics.get_mut(&topic) {
                    debug!(peer_id = %peer_id, topic = %topic.short(), "Relay member joined");
                    state.members.insert(peer_id.clone());
                    self.open_virtual(topic, state, &peer_id, out);
                }
            }
            RelayFrame::PeerLeft { topic, peer_id } => {
                let Some(topic) = Topic::from_hex(&topic) else { return };
                if let Some(state) = lock(&self.topics).get_mut(&topic) {
                    debug!(peer_id = %peer_id, topic = %topic.short(), "Relay member left");
                    state.members.remove(&peer_id);
                    // Dropping the delivery sender ends the virtual connection
                    state.peers.remove(&peer_id);
                }
            }
            RelayFrame::Deliver { topic, from, payload } => {
                let Some(topic) = Topic::from_hex(&topic) else { return };
                let target = {
                    let mut topics = lock(&self.topics);
                    topics.get_mut(&topic).and_then(|state| {
                        // A payload can beat the join notice; treat the sender as a member
                        if state.members.insert(from.clone()) {
                            self.open_virtual(topic, state, &from, out);
                        }
                        state.peers.get(&from).cloned()
                    })
                };
                let Some(target) = target else {
                    debug!(from = %from, "Dropping payload for unjoined topic");
                    return;
                };
                // Every peer shares this reader: wait a bounded time for a
                // full link, then close it instead of stalling the rest
                let delivered = match target.try_send(payload) {
                    Ok(()) => true,
                    Err(TrySendError::Full(payload)) => {
                        matches!(tokio::time::timeout(self.timeout, target.send(payload)).await, Ok(Ok(())))
                    }
                    Err(TrySendError::Closed(_)) => false,
                };
                if !delivered {
                    warn!(peer_id = %from, topic = %topic.short(), "Relayed link stopped reading, closing it");
                    self.drop_link(&topic, &from);
                }
            }
            other => warn!(frame = ?other, "Unexpected frame from relay"),
        }
    }

    /// Forget the link to `peer_id`; its next payload opens a fresh one
    fn drop_link(&self, topic: &Topic, peer_id: &str) {
        if let Some(state) = lock(&self.topics).get_mut(topic) {
            state.peers.remove(peer_id);
            state.members.remove(peer_id);
        }
    }

    fn reset(&self) {
        for state in lock(&self.topics).values_mut() {
            state.members.clear();
            state.peers.clear();
            state.joined = false;
        }
    }
}

struct RelayLink {
    out: mpsc::Sender<RelayFrame>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for RelayLink {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Backend that reaches peers through a relay service
pub struct RelayTransport {
    relay_address: String,
    router: Arc<Router>,
    link: tokio::sync::Mutex<Option<RelayLink>>,
}

impl RelayTransport {
    pub fn new(peer_id: &str, relay_address: String, config: &SyncConfig) -> Self {
        RelayTransport {
            relay_address,
            router: Arc::new(Router {
                peer_id: peer_id.to_string(),
                encryption: config.encryption_enabled,
                timeout: config.timeout(),
                topics: Mutex::new(HashMap::new()),
            }),
            link: tokio::sync::Mutex::new(None),
        }
    }

    /// Outbox of the relay link, dialing it on first use
    async fn outbox(&self) -> TransportResult<mpsc::Sender<RelayFrame>> {
        let mut link = self.link.lock().await;
        if let Some(existing) = link.as_ref() {
            if !existing.out.is_closed() {
                return Ok(existing.out.clone());
            }
        }

        let stream = tokio::time::timeout(self.router.timeout, TcpStream::connect(&self.relay_address))
            .await
            .map_err(|_| TransportError::Unavailable(format!("relay {} did not answer", self.relay_address)))?
            .map_err(|e| TransportError::Unavailable(format!("relay {}: {}", self.relay_address, e)))?;
        let (mut reader, mut writer) = stream.into_split();
        let (out_tx, mut out_rx) = mpsc::channel::<RelayFrame>(OUTBOX_BUFFER);

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = write_json(&mut writer, &frame).await {
                    debug!(error = %e, "Relay write failed");
                    break;
                }
            }
        });

        let router = self.router.clone();
        let router_out = out_tx.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match read_json::<_, RelayFrame>(&mut reader).await {
                    Ok(frame) => router.route(frame, &router_out).await,
                    Err(e) => {
                        warn!(error = %e, "Relay link lost");
                        break;
                    }
                }
            }
            router.reset();
        });

        info!(relay = %self.relay_address, peer_id = %self.router.peer_id, "Connected to relay");
        let out = out_tx.clone();
        *link = Some(RelayLink { out: out_tx, tasks: vec![writer_task, reader_task] });
        Ok(out)
    }

    async fn join(&self, topic: &Topic) -> TransportResult<()> {
        let out = self.outbox().await?;
        let already = {
            let mut topics = lock(&self.router.topics);
            let state = topics.entry(*topic).or_default();
            std::mem::replace(&mut state.joined, true)
        };
        if !already {
            let frame = RelayFrame::Join { topic: topic.to_hex(), peer_id: self.router.peer_id.clone() };
            out.send(frame)
                .await
                .map_err(|_| TransportError::Connection("relay link closed".to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for RelayTransport {
    fn name(&self) -> &'static str {
        "relay"
    }

    async fn announce(&self, topic: &Topic) -> TransportResult<()> {
        self.join(topic).await
    }

    async fn lookup(&self, topic: &Topic) -> TransportResult<Vec<PeerInfo>> {
        Ok(lock(&self.router.topics)
            .get(topic)
            .map(|state| state.members.iter().map(|id| PeerInfo::new(id.clone(), None)).collect())
            .unwrap_or_default())
    }

    async fn connect(&self, topic: &Topic) -> TransportResult<mpsc::Receiver<Connection>> {
        let out = self.outbox().await?;
        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
        {
            let mut topics = lock(&self.router.topics);
            let state = topics.entry(*topic).or_default();
            state.peers.clear();
            state.incoming = Some(tx);
            // Members reported before anyone listened get their links now
            let members: Vec<String> = state.members.iter().cloned().collect();
            for member in members {
                self.router.open_virtual(*topic, state, &member, &out);
            }
        }
        self.join(topic).await?;
        Ok(rx)
    }

    async fn leave(&self, topic: &Topic) -> TransportResult<()> {
        let removed = lock(&self.router.topics).remove(topic);
        if removed.map_or(false, |state| state.joined) {
            if let Some(link) = self.link.lock().await.as_ref() {
                let _ = link.out.send(RelayFrame::Leave { topic: topic.to_hex() }).await;
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.link.lock().await.take();
        lock(&self.router.topics).clear();
        info!(peer_id = %self.router.peer_id, "Relay transport disconnected");
        Ok(())
    }
}
