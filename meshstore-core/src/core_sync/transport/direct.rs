/*
    direct.rs - Point-to-point TCP backend

    Every peer runs a listener, and the listeners double as a Kademlia DHT.
    Announcing a topic stores a provider record on the peers closest to the
    topic's key. Looking a topic up walks toward the key from the bootstrap
    addresses and the routing table, and collects the providers met on the
    way. Providers found this way are dialed directly.

    Control exchange on a fresh TCP stream, one JSON frame each way:
      FindNode     -> Nodes                closest contacts to a key
      GetProviders -> Providers            providers plus closer contacts
      Provide      -> Ack                  store a provider record
      Hello        -> Hello | Reject       link setup, then the stream carries data

    Every request carries the sender's listen port, so asking a peer also
    puts the asker in its routing table.

    Only the peer with the smaller id dials, so two peers never race to open
    two links to each other. With encryption on, the dialer initiates the
    Noise handshake.
*/

use super::connection::{CloseHook, Connection, Direction};
use super::dht::{
    Contact, DhtKey, ProviderStore, RoutingTable, Shortlist, ALPHA, BUCKET_SIZE, MAX_LOOKUP_ROUNDS,
};
use super::framing::{read_json, write_json};
use super::secure::secure;
use super::{PeerInfo, Transport, TransportError, TransportResult};
use crate::config::SyncConfig;
use crate::core_sync::topic::Topic;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Connections waiting for the mesh to pick them up
const INCOMING_BUFFER: usize = 16;

/// Provider records stored for other peers live this long
const PROVIDER_TTL: Duration = Duration::from_secs(5 * 60);

/// Announced topics are published again this often
const REPUBLISH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ControlFrame {
    Hello {
        peer_id: String,
        topic: String,
        listen_port: Option<u16>,
        encrypted: bool,
    },
    FindNode {
        peer_id: String,
        listen_port: Option<u16>,
        target: String,
    },
    GetProviders {
        peer_id: String,
        listen_port: Option<u16>,
        topic: String,
    },
    Provide {
        peer_id: String,
        listen_port: Option<u16>,
        topic: String,
    },
    Nodes {
        peer_id: String,
        nodes: Vec<PeerInfo>,
    },
    Providers {
        peer_id: String,
        providers: Vec<PeerInfo>,
        closer: Vec<PeerInfo>,
    },
    Ack {
        peer_id: String,
    },
    Reject {
        reason: String,
    },
}

/// What a search asks each node it visits
#[derive(Clone, Copy)]
enum Query {
    Nodes(DhtKey),
    Providers(Topic),
}

impl Query {
    fn target(&self) -> DhtKey {
        match self {
            Query::Nodes(key) => *key,
            Query::Providers(topic) => DhtKey::for_topic(topic),
        }
    }
}

/// One node's answer to a query
struct Reply {
    peer_id: String,
    closer: Vec<PeerInfo>,
    providers: Vec<PeerInfo>,
}

#[derive(Default)]
struct SearchOutcome {
    closest: Vec<Contact>,
    providers: HashMap<String, Contact>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn with_timeout<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = TransportResult<T>>,
) -> TransportResult<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TransportError::Timeout(what.to_string()))?
}

fn parse_topic(hex: &str) -> TransportResult<Topic> {
    Topic::from_hex(hex).ok_or_else(|| TransportError::Connection(format!("malformed topic '{}'", hex)))
}

/// A link being set up or in use. `generation` tells a stale close hook
/// apart from the one owning the current entry.
struct Link {
    generation: u64,
    aborts: Vec<AbortHandle>,
}

impl Link {
    fn abort(&self) {
        for handle in &self.aborts {
            handle.abort();
        }
    }
}

#[derive(Default)]
struct TopicState {
    announced: bool,
    last_published: Option<Instant>,
    incoming: Option<mpsc::Sender<Connection>>,
    links: HashMap<String, Link>,
    refresh: Option<AbortHandle>,
}

impl TopicState {
    fn close(&mut self) {
        for link in self.links.values() {
            link.abort();
        }
        self.links.clear();
        if let Some(refresh) = self.refresh.take() {
            refresh.abort();
        }
        self.incoming = None;
    }
}

/// State shared between the transport handle and its background tasks
struct Shared {
    peer_id: String,
    encryption: bool,
    timeout: Duration,
    listen_port: Mutex<Option<u16>>,
    topics: Mutex<HashMap<Topic, TopicState>>,
    table: Mutex<RoutingTable>,
    providers: Mutex<ProviderStore>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    generation: AtomicU64,
}

impl Shared {
    fn spawn(&self, fut: impl Future<Output = ()> + Send + 'static) -> AbortHandle {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|task| !task.is_finished());
        let task = tokio::spawn(fut);
        let handle = task.abort_handle();
        tasks.push(task);
        handle
    }

    fn abort_all(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        for (_, mut state) in lock(&self.topics).drain() {
            state.close();
        }
        *lock(&self.listen_port) = None;
    }

    fn listen_port(&self) -> Option<u16> {
        *lock(&self.listen_port)
    }

    fn is_joined(&self, topic: &Topic) -> bool {
        lock(&self.topics)
            .get(topic)
            .map_or(false, |state| state.incoming.is_some())
    }

    fn is_announced(&self, topic: &Topic) -> bool {
        lock(&self.topics).get(topic).map_or(false, |state| state.announced)
    }

    fn has_link(&self, topic: &Topic, peer_id: &str) -> bool {
        lock(&self.topics)
            .get(topic)
            .map_or(false, |state| state.links.contains_key(peer_id))
    }

    /// Whether an announced topic is due for another publish
    fn publish_due(&self, topic: &Topic) -> bool {
        lock(&self.topics).get(topic).map_or(false, |state| {
            state.announced
                && state
                    .last_published
                    .map_or(true, |at| at.elapsed() >= REPUBLISH_INTERVAL)
        })
    }

    /// Put a peer that reached us into the routing table
    fn observe(&self, peer_id: &str, remote: SocketAddr, listen_port: Option<u16>) -> Option<Contact> {
        let port = listen_port?;
        if peer_id == self.peer_id {
            return None;
        }
        let contact = Contact::new(peer_id, SocketAddr::new(remote.ip(), port));
        lock(&self.table).insert(contact.clone());
        Some(contact)
    }

    /// Closest contacts to `target`, leaving out the asker
    fn closest_for(&self, target: &DhtKey, asker: &str) -> Vec<PeerInfo> {
        lock(&self.table)
            .closest(target, BUCKET_SIZE + 1)
            .into_iter()
            .filter(|contact| contact.peer_id != asker)
            .take(BUCKET_SIZE)
            .map(|contact| contact.to_peer_info())
            .collect()
    }

    /// Providers of `topic` to report to `asker`, including ourselves when announced
    fn providers_for(&self, topic: &Topic, local: Option<SocketAddr>, asker: &str) -> Vec<PeerInfo> {
        let mut providers: Vec<PeerInfo> = lock(&self.providers)
            .providers(&DhtKey::for_topic(topic))
            .into_iter()
            .filter(|contact| contact.peer_id != asker)
            .map(|contact| contact.to_peer_info())
            .collect();
        if self.is_announced(topic) {
            if let Some(local) = local {
                providers.push(PeerInfo::new(self.peer_id.clone(), Some(local)));
            }
        }
        providers
    }

    /// Claim the link slot for `peer_id`; `None` if taken or the topic is not joined
    fn reserve_link(&self, topic: &Topic, peer_id: &str) -> Option<u64> {
        let mut topics = lock(&self.topics);
        let state = topics.get_mut(topic)?;
        if state.incoming.is_none() || state.links.contains_key(peer_id) {
            return None;
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        state.links.insert(
            peer_id.to_string(),
            Link { generation, aborts: Vec::new() },
        );
        Some(generation)
    }

    fn release_link(&self, topic: &Topic, peer_id: &str, generation: u64) {
        if let Some(state) = lock(&self.topics).get_mut(topic) {
            if state.links.get(peer_id).map(|link| link.generation) == Some(generation) {
                state.links.remove(peer_id);
            }
        }
    }

    fn hello(&self, topic: &Topic) -> ControlFrame {
        ControlFrame::Hello {
            peer_id: self.peer_id.clone(),
            topic: topic.to_hex(),
            listen_port: self.listen_port(),
            encrypted: self.encryption,
        }
    }

    fn request(&self, query: Query) -> ControlFrame {
        match query {
            Query::Nodes(target) => ControlFrame::FindNode {
                peer_id: self.peer_id.clone(),
                listen_port: self.listen_port(),
                target: target.to_hex(),
            },
            Query::Providers(topic) => ControlFrame::GetProviders {
                peer_id: self.peer_id.clone(),
                listen_port: self.listen_port(),
                topic: topic.to_hex(),
            },
        }
    }

    /// Turn a stream that finished the Hello exchange into a Connection
    async fn establish(
        self: &Arc<Self>,
        stream: TcpStream,
        topic: Topic,
        peer: PeerInfo,
        direction: Direction,
        generation: u64,
    ) -> TransportResult<()> {
        let peer_id = peer.peer_id.clone();

        let weak: Weak<Shared> = Arc::downgrade(self);
        let hook_peer = peer_id.clone();
        let hook = CloseHook::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.release_link(&topic, &hook_peer, generation);
            }
            debug!(peer_id = %hook_peer, "Direct link closed");
        });

        let mut conn = Connection::from_stream(stream, peer, direction, Some(hook));
        if self.encryption {
            conn = secure(conn, direction == Direction::Outbound, self.timeout).await?;
        }

        let aborts = conn.abort_handles();
        let incoming = {
            let mut topics = lock(&self.topics);
            topics.get_mut(&topic).and_then(|state| {
                let tx = state.incoming.clone()?;
                let link = state.links.get_mut(&peer_id)?;
                if link.generation != generation {
                    return None;
                }
                link.aborts = aborts;
                Some(tx)
            })
        };

        let incoming = incoming
            .ok_or_else(|| TransportError::Connection(format!("topic {} left during setup", topic.short())))?;

        info!(peer_id = %peer_id, ?direction, encrypted = self.encryption, "Direct link established");
        incoming
            .send(conn)
            .await
            .map_err(|_| TransportError::Connection("connection stream closed".to_string()))
    }

    async fn handle_inbound(self: Arc<Self>, mut stream: TcpStream, remote: SocketAddr) -> TransportResult<()> {
        let frame: ControlFrame = with_timeout(self.timeout, "control frame", read_json(&mut stream)).await?;

        match frame {
            ControlFrame::FindNode { peer_id, listen_port, target } => {
                self.observe(&peer_id, remote, listen_port);
                let target = DhtKey::from_hex(&target)
                    .ok_or_else(|| TransportError::Connection(format!("malformed key '{}'", target)))?;
                let nodes = self.closest_for(&target, &peer_id);
                write_json(&mut stream, &ControlFrame::Nodes { peer_id: self.peer_id.clone(), nodes }).await
            }
            ControlFrame::GetProviders { peer_id, listen_port, topic } => {
                self.observe(&peer_id, remote, listen_port);
                let topic = parse_topic(&topic)?;
                let reply = ControlFrame::Providers {
                    peer_id: self.peer_id.clone(),
                    providers: self.providers_for(&topic, stream.local_addr().ok(), &peer_id),
                    closer: self.closest_for(&DhtKey::for_topic(&topic), &peer_id),
                };
                write_json(&mut stream, &reply).await
            }
            ControlFrame::Provide { peer_id, listen_port, topic } => {
                let topic = parse_topic(&topic)?;
                let reply = match self.observe(&peer_id, remote, listen_port) {
                    Some(contact) => {
                        debug!(peer_id = %peer_id, topic = %topic.short(), "Stored provider record");
                        lock(&self.providers).add(DhtKey::for_topic(&topic), contact);
                        ControlFrame::Ack { peer_id: self.peer_id.clone() }
                    }
                    None => ControlFrame::Reject { reason: "provider has no listener".to_string() },
                };
                write_json(&mut stream, &reply).await
            }
            ControlFrame::Hello { peer_id, topic, listen_port, encrypted } => {
                let topic = parse_topic(&topic)?;
                let contact = self.observe(&peer_id, remote, listen_port);
                if let Some(contact) = &contact {
                    lock(&self.providers).add(DhtKey::for_topic(&topic), contact.clone());
                }

                let rejection = if encrypted != self.encryption {
                    Some("encryption setting mismatch")
                } else if peer_id == self.peer_id {
                    Some("connected to self")
                } else {
                    None
                };
                let generation = match rejection {
                    Some(reason) => Err(reason),
                    None => self
                        .reserve_link(&topic, &peer_id)
                        .ok_or("topic not joined or link already open"),
                };
                let generation = match generation {
                    Ok(generation) => generation,
                    Err(reason) => {
                        debug!(peer_id = %peer_id, reason, "Rejecting inbound link");
                        let reject = ControlFrame::Reject { reason: reason.to_string() };
                        return write_json(&mut stream, &reject).await;
                    }
                };

                if let Err(e) = write_json(&mut stream, &self.hello(&topic)).await {
                    self.release_link(&topic, &peer_id, generation);
                    return Err(e);
                }
                let peer = PeerInfo::new(peer_id, contact.map(|contact| contact.addr));
                self.establish(stream, topic, peer, Direction::Inbound, generation).await
            }
            other => Err(TransportError::Connection(format!(
                "unexpected control frame from {}: {:?}",
                remote, other
            ))),
        }
    }

    async fn dial(self: Arc<Self>, topic: Topic, peer_id: String, addr: SocketAddr) -> TransportResult<()> {
        let Some(generation) = self.reserve_link(&topic, &peer_id) else {
            return Ok(());
        };

        let opened = with_timeout(self.timeout, "dial", async {
            let mut stream = TcpStream::connect(addr).await?;
            write_json(&mut stream, &self.hello(&topic)).await?;
            match read_json::<_, ControlFrame>(&mut stream).await? {
                ControlFrame::Hello { peer_id: remote_id, encrypted, .. }
                    if remote_id == peer_id && encrypted == self.encryption =>
                {
                    Ok(stream)
                }
                ControlFrame::Hello { peer_id: remote_id, .. } => Err(TransportError::Handshake(format!(
                    "expected {} at {}, found {}",
                    peer_id, addr, remote_id
                ))),
                ControlFrame::Reject { reason } => Err(TransportError::Connection(format!(
                    "rejected by {}: {}",
                    peer_id, reason
                ))),
                other => Err(TransportError::Connection(format!("unexpected reply {:?}", other))),
            }
        })
        .await;

        match opened {
            Ok(stream) => {
                let peer = PeerInfo::new(peer_id, Some(addr));
                self.establish(stream, topic, peer, Direction::Outbound, generation).await
            }
            Err(e) => {
                self.release_link(&topic, &peer_id, generation);
                Err(e)
            }
        }
    }

    /// Send one DHT query to `addr`
    async fn ask(&self, addr: SocketAddr, query: Query) -> TransportResult<Reply> {
        with_timeout(self.timeout, "dht query", async {
            let mut stream = TcpStream::connect(addr).await?;
            write_json(&mut stream, &self.request(query)).await?;
            match read_json::<_, ControlFrame>(&mut stream).await? {
                ControlFrame::Nodes { peer_id, nodes } => {
                    Ok(Reply { peer_id, closer: nodes, providers: Vec::new() })
                }
                ControlFrame::Providers { peer_id, providers, closer } => {
                    Ok(Reply { peer_id, closer, providers })
                }
                ControlFrame::Reject { reason } => Err(TransportError::Connection(reason)),
                other => Err(TransportError::Connection(format!("unexpected reply {:?}", other))),
            }
        })
        .await
    }

    /// Fold a reply into a running search
    fn absorb(&self, reply: Reply, shortlist: &mut Shortlist, outcome: &mut SearchOutcome) {
        let closer = reply
            .closer
            .iter()
            .filter(|peer| peer.peer_id != self.peer_id)
            .filter_map(Contact::from_peer);
        shortlist.add(closer);

        for provider in reply.providers.iter().filter_map(Contact::from_peer) {
            if provider.peer_id != self.peer_id {
                outcome.providers.insert(provider.peer_id.clone(), provider);
            }
        }
    }

    /// Iterative lookup toward `query`'s key. Bootstrap addresses are asked
    /// first since their peer ids are not known up front.
    async fn search(self: &Arc<Self>, query: Query, bootstrap: &[SocketAddr]) -> SearchOutcome {
        let target = query.target();
        let seeds = lock(&self.table).closest(&target, BUCKET_SIZE);
        let mut shortlist = Shortlist::new(target, BUCKET_SIZE, seeds);
        let mut outcome = SearchOutcome::default();

        let mut asks = JoinSet::new();
        for &addr in bootstrap {
            let shared = self.clone();
            asks.spawn(async move { (addr, shared.ask(addr, query).await) });
        }
        while let Some(joined) = asks.join_next().await {
            match joined {
                Ok((addr, Ok(reply))) => {
                    if reply.peer_id != self.peer_id {
                        let contact = Contact::new(reply.peer_id.clone(), addr);
                        lock(&self.table).insert(contact.clone());
                        shortlist.add_answered(contact);
                    }
                    self.absorb(reply, &mut shortlist, &mut outcome);
                }
                Ok((addr, Err(e))) => debug!(%addr, error = %e, "Bootstrap peer did not answer"),
                Err(e) => debug!(error = %e, "DHT query task failed"),
            }
        }

        for _ in 0..MAX_LOOKUP_ROUNDS {
            let batch = shortlist.next_batch(ALPHA);
            if batch.is_empty() {
                break;
            }
            let mut round = JoinSet::new();
            for contact in batch {
                let shared = self.clone();
                round.spawn(async move {
                    let answer = shared.ask(contact.addr, query).await;
                    (contact, answer)
                });
            }
            while let Some(joined) = round.join_next().await {
                match joined {
                    Ok((contact, Ok(reply))) => {
                        lock(&self.table).insert(contact);
                        self.absorb(reply, &mut shortlist, &mut outcome);
                    }
                    Ok((contact, Err(e))) => {
                        debug!(peer_id = %contact.peer_id, addr = %contact.addr, error = %e, "Contact did not answer");
                        shortlist.fail(&contact);
                        lock(&self.table).remove(&contact.peer_id);
                    }
                    Err(e) => debug!(error = %e, "DHT query task failed"),
                }
            }
            if shortlist.is_finished() {
                break;
            }
        }

        outcome.closest = shortlist.closest();
        outcome
    }

    /// Store our provider record on the nodes closest to `topic`
    async fn publish(self: Arc<Self>, topic: Topic, bootstrap: Vec<SocketAddr>) {
        let key = DhtKey::for_topic(&topic);
        let closest = self.search(Query::Nodes(key), &bootstrap).await.closest;

        let mut stores = JoinSet::new();
        for contact in closest {
            let shared = self.clone();
            stores.spawn(async move {
                with_timeout(shared.timeout, "provide", async {
                    let mut stream = TcpStream::connect(contact.addr).await?;
                    let provide = ControlFrame::Provide {
                        peer_id: shared.peer_id.clone(),
                        listen_port: shared.listen_port(),
                        topic: topic.to_hex(),
                    };
                    write_json(&mut stream, &provide).await?;
                    match read_json::<_, ControlFrame>(&mut stream).await? {
                        ControlFrame::Ack { .. } => Ok(()),
                        ControlFrame::Reject { reason } => Err(TransportError::Connection(reason)),
                        other => Err(TransportError::Connection(format!("unexpected reply {:?}", other))),
                    }
                })
                .await
            });
        }

        let mut stored = 0usize;
        while let Some(joined) = stores.join_next().await {
            if let Ok(Ok(())) = joined {
                stored += 1;
            }
        }
        if let Some(state) = lock(&self.topics).get_mut(&topic) {
            state.last_published = Some(Instant::now());
        }
        debug!(topic = %topic.short(), stored, "Published provider record");
    }

    /// Providers of `topic` found through the DHT and in our own store
    async fn discover(self: &Arc<Self>, topic: Topic, bootstrap: &[SocketAddr]) -> Vec<PeerInfo> {
        let mut found = self.search(Query::Providers(topic), bootstrap).await.providers;
        for contact in lock(&self.providers).providers(&DhtKey::for_topic(&topic)) {
            if contact.peer_id != self.peer_id {
                found.entry(contact.peer_id.clone()).or_insert(contact);
            }
        }
        found.values().map(Contact::to_peer_info).collect()
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                let handler = shared.clone();
                shared.spawn(async move {
                    if let Err(e) = handler.handle_inbound(stream, remote).await {
                        debug!(%remote, error = %e, "Inbound control exchange failed");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn refresh_loop(shared: Arc<Shared>, topic: Topic, bootstrap: Vec<SocketAddr>, interval: Duration) {
    while shared.is_joined(&topic) {
        if shared.publish_due(&topic) {
            shared.clone().publish(topic, bootstrap.clone()).await;
        }

        for peer in shared.discover(topic, &bootstrap).await {
            let Some(addr) = peer.addr else { continue };
            if shared.peer_id.as_str() >= peer.peer_id.as_str() || shared.has_link(&topic, &peer.peer_id) {
                continue;
            }
            let dialer = shared.clone();
            shared.spawn(async move {
                if let Err(e) = dialer.dial(topic, peer.peer_id.clone(), addr).await {
                    debug!(peer_id = %peer.peer_id, %addr, error = %e, "Dial failed");
                }
            });
        }

        let jitter = rand::rng().random_range(0..=interval.as_millis() as u64 / 4);
        tokio::time::sleep(interval + Duration::from_millis(jitter)).await;
    }
}

/// TCP backend with DHT discovery
pub struct DirectTransport {
    shared: Arc<Shared>,
    listen_address: SocketAddr,
    bootstrap: Vec<SocketAddr>,
    refresh_interval: Duration,
    bound: tokio::sync::Mutex<Option<SocketAddr>>,
}

impl DirectTransport {
    pub fn new(peer_id: &str, config: &SyncConfig) -> Self {
        DirectTransport {
            shared: Arc::new(Shared {
                peer_id: peer_id.to_string(),
                encryption: config.encryption_enabled,
                timeout: config.timeout(),
                listen_port: Mutex::new(None),
                topics: Mutex::new(HashMap::new()),
                table: Mutex::new(RoutingTable::new(peer_id, BUCKET_SIZE)),
                providers: Mutex::new(ProviderStore::new(PROVIDER_TTL)),
                tasks: Mutex::new(Vec::new()),
                generation: AtomicU64::new(0),
            }),
            listen_address: config.listen_address,
            bootstrap: config.bootstrap_peers.clone(),
            refresh_interval: config.refresh_interval,
            bound: tokio::sync::Mutex::new(None),
        }
    }

    async fn ensure_listening(&self) -> TransportResult<SocketAddr> {
        let mut bound = self.bound.lock().await;
        if let Some(addr) = *bound {
            return Ok(addr);
        }

        let listener = TcpListener::bind(self.listen_address).await.map_err(|e| {
            TransportError::Unavailable(format!("cannot listen on {}: {}", self.listen_address, e))
        })?;
        let addr = listener.local_addr()?;
        *lock(&self.shared.listen_port) = Some(addr.port());
        self.shared.spawn(accept_loop(self.shared.clone(), listener));

        info!(%addr, peer_id = %self.shared.peer_id, "Listening for peers");
        *bound = Some(addr);
        Ok(addr)
    }
}

impl Drop for DirectTransport {
    fn drop(&mut self) {
        self.shared.abort_all();
    }
}

#[async_trait]
impl Transport for DirectTransport {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn announce(&self, topic: &Topic) -> TransportResult<()> {
        self.ensure_listening().await?;
        {
            let mut topics = lock(&self.shared.topics);
            let state = topics.entry(*topic).or_default();
            state.announced = true;
            state.last_published = Some(Instant::now());
        }
        // Unreachable bootstrap peers must not fail the announce
        self.shared.spawn(self.shared.clone().publish(*topic, self.bootstrap.clone()));
        debug!(topic = %topic.short(), "Announced");
        Ok(())
    }

    async fn lookup(&self, topic: &Topic) -> TransportResult<Vec<PeerInfo>> {
        Ok(self.shared.discover(*topic, &self.bootstrap).await)
    }

    async fn connect(&self, topic: &Topic) -> TransportResult<mpsc::Receiver<Connection>> {
        self.ensure_listening().await?;

        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
        {
            let mut topics = lock(&self.shared.topics);
            let state = topics.entry(*topic).or_default();
            state.close();
            state.incoming = Some(tx);
        }

        let refresh = self.shared.spawn(refresh_loop(
            self.shared.clone(),
            *topic,
            self.bootstrap.clone(),
            self.refresh_interval,
        ));
        if let Some(state) = lock(&self.shared.topics).get_mut(topic) {
            state.refresh = Some(refresh);
        }
        Ok(rx)
    }

    async fn leave(&self, topic: &Topic) -> TransportResult<()> {
        if let Some(mut state) = lock(&self.shared.topics).remove(topic) {
            state.close();
        }
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        let mut bound = self.bound.lock().await;
        self.shared.abort_all();
        *bound = None;
        info!(peer_id = %self.shared.peer_id, "Direct transport disconnected");
        Ok(())
    }

    async fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock().await
    }
}
