/*
    relay_server.rs - Forwarding service for the relay transport

    Tracks which client joined which topic under which peer id and forwards
    `send` frames to the addressed member as `deliver`. Payloads are opaque.
    Membership changes are pushed to the other members of the topic.

    Each client has a bounded outbox. A client that stops reading long
    enough to fill it is disconnected, and the members it shared topics
    with see it leave.
*/

use crate::core_sync::transport::framing::{read_json, write_json};
use crate::core_sync::transport::RelayFrame;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type ClientId = u64;

/// Frames queued for one client before it counts as stalled
const CLIENT_OUTBOX: usize = 512;

struct Client {
    outbox: mpsc::Sender<RelayFrame>,
    // Woken when the outbox overflows
    kick: Arc<Notify>,
    // topic -> peer id this client joined it as
    joined: HashMap<String, String>,
}

#[derive(Default)]
struct Rooms {
    next_id: ClientId,
    clients: HashMap<ClientId, Client>,
    // topic -> peer id -> client
    topics: HashMap<String, HashMap<String, ClientId>>,
}

impl Rooms {
    fn push(&self, client: ClientId, frame: RelayFrame) {
        let Some(entry) = self.clients.get(&client) else { return };
        match entry.outbox.try_send(frame) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => {
                warn!(client, "Relay client is not keeping up, disconnecting");
                entry.kick.notify_one();
            }
        }
    }

    fn join(&mut self, client: ClientId, topic: String, peer_id: String) {
        let members = self.topics.entry(topic.clone()).or_default();
        if members.contains_key(&peer_id) {
            debug!(peer_id = %peer_id, "Peer id already joined, replacing");
        }
        let existing: Vec<(String, ClientId)> = members
            .iter()
            .filter(|(id, _)| **id != peer_id)
            .map(|(id, cid)| (id.clone(), *cid))
            .collect();
        members.insert(peer_id.clone(), client);

        // Existing members hear about the newcomer before it hears about them
        for (_, other) in &existing {
            self.push(*other, RelayFrame::PeerJoined { topic: topic.clone(), peer_id: peer_id.clone() });
        }
        for (other_id, _) in existing {
            self.push(client, RelayFrame::PeerJoined { topic: topic.clone(), peer_id: other_id });
        }

        if let Some(entry) = self.clients.get_mut(&client) {
            entry.joined.insert(topic, peer_id);
        }
    }

    fn leave(&mut self, client: ClientId, topic: &str) {
        let Some(peer_id) = self.clients.get_mut(&client).and_then(|c| c.joined.remove(topic)) else {
            return;
        };
        let Some(members) = self.topics.get_mut(topic) else { return };
        if members.get(&peer_id) == Some(&client) {
            members.remove(&peer_id);
        }
        let others: Vec<ClientId> = members.values().copied().collect();
        if members.is_empty() {
            self.topics.remove(topic);
        }
        for other in others {
            self.push(other, RelayFrame::PeerLeft { topic: topic.to_string(), peer_id: peer_id.clone() });
        }
    }

    fn forward(&self, client: ClientId, topic: String, to: String, payload: Vec<u8>) {
        let Some(from) = self.clients.get(&client).and_then(|c| c.joined.get(&topic)).cloned() else {
            debug!(client, "Send on a topic the client never joined");
            return;
        };
        match self.topics.get(&topic).and_then(|members| members.get(&to)) {
            Some(target) => {
                self.push(*target, RelayFrame::Deliver { topic, from, payload });
                metrics::counter!("meshstore_relay_frames_forwarded_total").increment(1);
            }
            None => debug!(to = %to, "Send to unknown member dropped"),
        }
    }

    fn remove(&mut self, client: ClientId) {
        let topics: Vec<String> = self
            .clients
            .get(&client)
            .map(|c| c.joined.keys().cloned().collect())
            .unwrap_or_default();
        for topic in topics {
            self.leave(client, &topic);
        }
        self.clients.remove(&client);
    }
}

/// Relay service bound to a TCP listener
pub struct RelayServer {
    listener: TcpListener,
    rooms: Arc<Mutex<Rooms>>,
}

fn lock(rooms: &Mutex<Rooms>) -> MutexGuard<'_, Rooms> {
    rooms.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RelayServer {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(RelayServer { listener, rooms: Arc::new(Mutex::new(Rooms::default())) })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept clients until the task is cancelled
    pub async fn run(self) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "Relay listening");
        loop {
            let (stream, remote) = self.listener.accept().await?;
            let rooms = self.rooms.clone();
            tokio::spawn(serve_client(rooms, stream, remote));
        }
    }

    /// Run on a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                warn!(error = %e, "Relay stopped");
            }
        })
    }
}

async fn serve_client(rooms: Arc<Mutex<Rooms>>, stream: TcpStream, remote: SocketAddr) {
    let (mut reader, mut writer) = stream.into_split();
    let (outbox, mut outbox_rx) = mpsc::channel::<RelayFrame>(CLIENT_OUTBOX);
    let kick = Arc::new(Notify::new());

    let client = {
        let mut rooms = lock(&rooms);
        let id = rooms.next_id;
        rooms.next_id += 1;
        rooms.clients.insert(id, Client { outbox, kick: kick.clone(), joined: HashMap::new() });
        id
    };
    debug!(client, %remote, "Relay client connected");

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbox_rx.recv().await {
            if write_json(&mut writer, &frame).await.is_err() {
                break;
            }
        }
    });

    loop {
        let frame = tokio::select! {
            _ = kick.notified() => break,
            read = read_json::<_, RelayFrame>(&mut reader) => match read {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(client, error = %e, "Relay client gone");
                    break;
                }
            },
        };

        let mut guard = lock(&rooms);
        match frame {
            RelayFrame::Join { topic, peer_id } => guard.join(client, topic, peer_id),
            RelayFrame::Leave { topic } => guard.leave(client, &topic),
            RelayFrame::Send { topic, to, payload } => guard.forward(client, topic, to, payload),
            other => warn!(client, frame = ?other, "Client sent a relay-only frame"),
        }
    }

    lock(&rooms).remove(client);
    writer_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn client(addr: SocketAddr) -> TcpStream {
        TcpStream::connect(addr).await.unwrap()
    }

    async fn next(stream: &mut TcpStream) -> RelayFrame {
        tokio::time::timeout(Duration::from_secs(2), read_json(stream)).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_membership_and_forwarding() {
        let server = RelayServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.spawn();

        let mut a = client(addr).await;
        let mut b = client(addr).await;
        write_json(&mut a, &RelayFrame::Join { topic: "t".into(), peer_id: "a".into() }).await.unwrap();
        // Let the first join land before the second
        tokio::time::sleep(Duration::from_millis(50)).await;
        write_json(&mut b, &RelayFrame::Join { topic: "t".into(), peer_id: "b".into() }).await.unwrap();

        assert_eq!(next(&mut a).await, RelayFrame::PeerJoined { topic: "t".into(), peer_id: "b".into() });
        assert_eq!(next(&mut b).await, RelayFrame::PeerJoined { topic: "t".into(), peer_id: "a".into() });

        write_json(&mut b, &RelayFrame::Send { topic: "t".into(), to: "a".into(), payload: vec![1, 2] })
            .await
            .unwrap();
        assert_eq!(
            next(&mut a).await,
            RelayFrame::Deliver { topic: "t".into(), from: "b".into(), payload: vec![1, 2] }
        );

        drop(b);
        assert_eq!(next(&mut a).await, RelayFrame::PeerLeft { topic: "t".into(), peer_id: "b".into() });

        handle.abort();
    }

    #[tokio::test]
    async fn test_send_without_join_is_dropped() {
        let server = RelayServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.spawn();

        let mut a = client(addr).await;
        let mut b = client(addr).await;
        write_json(&mut a, &RelayFrame::Join { topic: "t".into(), peer_id: "a".into() }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        write_json(&mut b, &RelayFrame::Send { topic: "t".into(), to: "a".into(), payload: vec![9] })
            .await
            .unwrap();

        let got = tokio::time::timeout(Duration::from_millis(200), read_json::<_, RelayFrame>(&mut a)).await;
        assert!(got.is_err());
        handle.abort();
    }
    #[tokio::test]
    async fn test_stalled_client_is_disconnected() {
        let server = RelayServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.spawn();

        // `idle` joins and then never reads again
        let mut idle = client(addr).await;
        write_json(&mut idle, &RelayFrame::Join { topic: "t".into(), peer_id: "idle".into() }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (mut reader, mut writer) = client(addr).await.into_split();
        write_json(&mut writer, &RelayFrame::Join { topic: "t".into(), peer_id: "busy".into() }).await.unwrap();
        let flood = tokio::spawn(async move {
            for _ in 0..20_000 {
                let frame = RelayFrame::Send { topic: "t".into(), to: "idle".into(), payload: vec![0xAB; 16 * 1024] };
                if write_json(&mut writer, &frame).await.is_err() {
                    break;
                }
            }
        });

        let left = tokio::time::timeout(Duration::from_secs(20), async {
            loop {
                match read_json::<_, RelayFrame>(&mut reader).await.unwrap() {
                    RelayFrame::PeerLeft { peer_id, .. } => return peer_id,
                    _ => continue,
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(left, "idle");

        flood.abort();
        drop(idle);
        handle.abort();
    }
}
