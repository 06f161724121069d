/*
    mesh.rs - Per-connection replication protocol

    Each established Connection gets one task running `run_connection`:

        Connecting ──► Connected ──► Closed
                      │            │
                      │            └─ PeerDisconnected, peer removed
                      └─ PeerConnected, SyncRequest sent

    While connected the task multiplexes three inputs:
    - inbound bytes: Put/Delete are merged into the store, SyncRequest is
      answered with the full record set (tombstones included)
    - change events: forwarded to the peer unless the change came from it
    - shutdown signal from the owning session

    Outbound messages go through a per-link outbox drained by its own writer
    task. The link task never waits on the peer, so both ends keep reading
    while a full-state reply larger than the connection buffer is in flight.

    Merging an inbound change publishes an event, which every other
    connection task forwards. That is the gossip path; the `came_from` check
    on the event source keeps a change from bouncing back to its sender or
    its author.
*/

use crate::core_store::node_store::NodeStore;
use crate::core_store::store::StoreError;
use crate::core_sync::errors::{SyncError, SyncResult};
use crate::core_sync::message::MeshMessage;
use crate::core_sync::transport::Connection;
use crate::events::{ChangeEvent, EventBroadcaster, EventSource, RecvError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Messages a link may have queued before the peer counts as stalled
const MAX_BACKLOG: usize = 1 << 20;

/// Lifecycle of one peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    Closed,
}

/// Outbound queue of one link
struct Outbox {
    peer_id: String,
    queue: mpsc::UnboundedSender<Vec<u8>>,
    backlog: Arc<AtomicUsize>,
    writer: JoinHandle<()>,
}

impl Outbox {
    fn new(conn: &Connection) -> Self {
        let link = conn.sender();
        let (queue, mut pending) = mpsc::unbounded_channel::<Vec<u8>>();
        let backlog = Arc::new(AtomicUsize::new(0));

        let drained = backlog.clone();
        let writer = tokio::spawn(async move {
            while let Some(bytes) = pending.recv().await {
                drained.fetch_sub(1, Ordering::Relaxed);
                if link.send(bytes).await.is_err() {
                    break;
                }
            }
        });

        Outbox { peer_id: conn.peer_id().to_string(), queue, backlog, writer }
    }

    fn push(&self, message: &MeshMessage) -> SyncResult<()> {
        let bytes = message.encode()?;
        if self.backlog.fetch_add(1, Ordering::Relaxed) >= MAX_BACKLOG {
            return Err(SyncError::Connection(format!("{} is not draining its link", self.peer_id)));
        }
        self.queue
            .send(bytes)
            .map_err(|_| SyncError::Connection(format!("link to {} is closed", self.peer_id)))?;
        metrics::counter!("meshstore_mesh_messages_sent_total", "kind" => message.kind()).increment(1);
        Ok(())
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

/// Replication protocol shared by every connection of one sync session.
///
/// Cloning yields another handle to the same peer set.
#[derive(Clone)]
pub struct MeshProtocol {
    local_peer: String,
    store: Arc<NodeStore>,
    broadcaster: EventBroadcaster,
    // peer id -> open connections to it
    peers: Arc<Mutex<HashMap<String, usize>>>,
}

impl MeshProtocol {
    pub fn new(local_peer: impl Into<String>, store: Arc<NodeStore>, broadcaster: EventBroadcaster) -> Self {
        MeshProtocol {
            local_peer: local_peer.into(),
            store,
            broadcaster,
            peers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn local_peer(&self) -> &str {
        &self.local_peer
    }

    /// Ids of peers with at least one open connection, sorted
    pub fn connected_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.peers().keys().cloned().collect();
        peers.sort();
        peers
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add_peer(&self, peer_id: &str) {
        *self.peers().entry(peer_id.to_string()).or_insert(0) += 1;
    }

    fn remove_peer(&self, peer_id: &str) {
        let mut peers = self.peers();
        if let Some(count) = peers.get_mut(peer_id) {
            *count -= 1;
            if *count == 0 {
                peers.remove(peer_id);
            }
        }
    }

    /// Drive one connection until it closes or `shutdown` fires
    pub async fn run_connection(&self, mut conn: Connection, mut shutdown: watch::Receiver<bool>) {
        let peer_id = conn.peer_id().to_string();
        debug!(peer_id = %peer_id, state = ?LinkState::Connecting, "Mesh link");

        // Subscribe first so nothing written from here on is missed
        let mut changes = self.broadcaster.subscribe();
        let outbox = Outbox::new(&conn);

        self.add_peer(&peer_id);
        self.broadcaster.emit(ChangeEvent::PeerConnected { peer_id: peer_id.clone() });
        info!(peer_id = %peer_id, state = ?LinkState::Connected, direction = ?conn.direction(), "Mesh link");

        let mut result = outbox.push(&MeshMessage::SyncRequest { origin_id: Some(self.local_peer.clone()) });

        while result.is_ok() {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                inbound = conn.receive() => match inbound {
                    Some(bytes) => result = self.handle_inbound(&outbox, &bytes),
                    None => {
                        debug!(peer_id = %peer_id, "Peer closed the link");
                        break;
                    }
                },
                change = changes.recv() => match change {
                    Ok(event) => result = self.forward(&outbox, &event),
                    Err(RecvError::Lagged(dropped)) => {
                        warn!(peer_id = %peer_id, dropped, "Mesh link lagged, resending full state");
                        result = self.send_full_state(&outbox);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        if let Err(e) = result {
            warn!(peer_id = %peer_id, error = %e, "Mesh link failed");
        }

        drop(outbox);
        conn.disconnect();
        self.remove_peer(&peer_id);
        self.broadcaster.emit(ChangeEvent::PeerDisconnected { peer_id: peer_id.clone() });
        info!(peer_id = %peer_id, state = ?LinkState::Closed, "Mesh link");
    }

    /// Forward a change unless the peer is where it came from
    fn forward(&self, outbox: &Outbox, event: &ChangeEvent) -> SyncResult<()> {
        if event.source().map_or(false, |source| source.came_from(&outbox.peer_id)) {
            return Ok(());
        }
        match MeshMessage::from_event(event, &self.local_peer) {
            Some(message) => outbox.push(&message),
            None => Ok(()),
        }
    }

    /// Queue every stored version, tombstones as deletes
    fn send_full_state(&self, outbox: &Outbox) -> SyncResult<()> {
        let records = self.store.snapshot_all()?;
        debug!(peer_id = %outbox.peer_id, records = records.len(), "Sending full state");
        for record in records {
            outbox.push(&MeshMessage::for_record(Some(self.local_peer.clone()), record))?;
        }
        Ok(())
    }

    fn handle_inbound(&self, outbox: &Outbox, bytes: &[u8]) -> SyncResult<()> {
        let message = match MeshMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                metrics::counter!("meshstore_mesh_parse_errors_total").increment(1);
                warn!(peer_id = %outbox.peer_id, error = %e, len = bytes.len(), "Dropping malformed mesh message");
                return Ok(());
            }
        };
        metrics::counter!("meshstore_mesh_messages_received_total", "kind" => message.kind()).increment(1);

        let applied = match message {
            MeshMessage::Put { origin_id, node } => {
                let source = EventSource::remote(outbox.peer_id.as_str(), origin_id);
                self.store.apply_remote(node, source).map(|_| ())
            }
            MeshMessage::Delete { origin_id, id, timestamp, vector_clock } => {
                let source = EventSource::remote(outbox.peer_id.as_str(), origin_id);
                self.store
                    .apply_remote_delete(&id, timestamp, vector_clock, source)
                    .map(|_| ())
            }
            MeshMessage::SyncRequest { .. } => return self.send_full_state(outbox),
        };

        match applied {
            Ok(()) => Ok(()),
            // The store is gone; nothing more this link can do
            Err(e @ StoreError::NotReady(_)) => Err(SyncError::Store(e)),
            Err(e) => {
                warn!(peer_id = %outbox.peer_id, error = %e, "Rejected inbound change");
                Ok(())
            }
        }
    }
}
