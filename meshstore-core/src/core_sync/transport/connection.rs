/*
    connection.rs - One established link to one peer

    A Connection is a pair of channels: bytes to send and bytes received.
    The backend owns the I/O tasks that move those bytes over its medium
    (a TCP stream, a relay link, a Noise session). Dropping or
    disconnecting the connection stops those tasks.
*/

use super::framing::{read_frame, write_frame};
use super::{PeerInfo, TransportError, TransportResult};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

/// Buffered messages per direction
pub const CONNECTION_BUFFER: usize = 256;

/// Who opened the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Aborts the I/O tasks of a connection when the last handle goes away
#[derive(Default)]
pub(crate) struct IoGuard {
    tasks: Vec<JoinHandle<()>>,
}

impl IoGuard {
    pub(crate) fn new(tasks: Vec<JoinHandle<()>>) -> Self {
        IoGuard { tasks }
    }

    fn abort_handles(&self) -> Vec<AbortHandle> {
        self.tasks.iter().map(|task| task.abort_handle()).collect()
    }
}

impl Drop for IoGuard {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Runs a callback when dropped; lets a backend observe a link going away
pub struct CloseHook(Option<Box<dyn FnOnce() + Send>>);

impl CloseHook {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        CloseHook(Some(Box::new(f)))
    }
}

impl Drop for CloseHook {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// Established link to one peer
pub struct Connection {
    peer: PeerInfo,
    direction: Direction,
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    guard: Arc<IoGuard>,
}

impl Connection {
    pub(crate) fn new(
        peer: PeerInfo,
        direction: Direction,
        tx: mpsc::Sender<Vec<u8>>,
        rx: mpsc::Receiver<Vec<u8>>,
        guard: Arc<IoGuard>,
    ) -> Self {
        Connection { peer, direction, tx, rx, guard }
    }

    /// Wrap a TCP stream whose handshake is done: one task reads frames, one writes them
    pub fn from_stream(
        stream: TcpStream,
        peer: PeerInfo,
        direction: Direction,
        hook: Option<CloseHook>,
    ) -> Self {
        let (mut reader, mut writer) = stream.into_split();
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(CONNECTION_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>(CONNECTION_BUFFER);

        let peer_id = peer.peer_id.clone();
        let read_task = tokio::spawn(async move {
            let _hook = hook;
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(frame)) => {
                        if in_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(peer_id = %peer_id, error = %e, "Stream read failed");
                        break;
                    }
                }
            }
        });

        let write_task = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if write_frame(&mut writer, &frame).await.is_err() {
                    break;
                }
            }
        });

        let guard = Arc::new(IoGuard::new(vec![read_task, write_task]));
        Connection::new(peer, direction, out_tx, in_rx, guard)
    }

    /// Two connected in-memory ends, for tests and loopback use
    pub fn pair(a: PeerInfo, b: PeerInfo) -> (Connection, Connection) {
        let (a_tx, b_rx) = mpsc::channel(CONNECTION_BUFFER);
        let (b_tx, a_rx) = mpsc::channel(CONNECTION_BUFFER);
        // Each end is labelled with the peer on the other side
        let a_end = Connection::new(b, Direction::Outbound, a_tx, a_rx, Arc::default());
        let b_end = Connection::new(a, Direction::Inbound, b_tx, b_rx, Arc::default());
        (a_end, b_end)
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub fn peer_id(&self) -> &str {
        &self.peer.peer_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Queue bytes for the peer
    pub async fn send(&self, bytes: Vec<u8>) -> TransportResult<()> {
        self.tx
            .send(bytes)
            .await
            .map_err(|_| TransportError::Connection(format!("link to {} is closed", self.peer.peer_id)))
    }

    /// Next message from the peer; `None` once the link is closed
    pub async fn receive(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Close the link
    pub fn disconnect(self) {
        debug!(peer_id = %self.peer.peer_id, "Disconnecting");
        drop(self);
    }

    /// Another handle on the outbound side, for a dedicated writer task
    pub(crate) fn sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.tx.clone()
    }

    /// Handles that stop this connection's I/O from outside
    pub(crate) fn abort_handles(&self) -> Vec<AbortHandle> {
        self.guard.abort_handles()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (PeerInfo, Direction, mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>, Arc<IoGuard>) {
        (self.peer, self.direction, self.tx, self.rx, self.guard)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("direction", &self.direction)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_pair_exchanges_bytes() {
        let (mut a, mut b) = Connection::pair(PeerInfo::new("a", None), PeerInfo::new("b", None));
        assert_eq!(a.peer_id(), "b");
        assert_eq!(b.peer_id(), "a");

        a.send(b"ping".to_vec()).await.unwrap();
        assert_eq!(b.receive().await.unwrap(), b"ping");

        b.send(b"pong".to_vec()).await.unwrap();
        assert_eq!(a.receive().await.unwrap(), b"pong");

        a.disconnect();
        assert!(b.receive().await.is_none());
        assert!(b.send(vec![1]).await.is_err());
    }

    #[tokio::test]
    async fn test_stream_connection_and_close_hook() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server_stream, _) = listener.accept().await.unwrap();
        let client_stream = client.await.unwrap();

        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();
        let mut server = Connection::from_stream(
            server_stream,
            PeerInfo::new("client", None),
            Direction::Inbound,
            Some(CloseHook::new(move || flag.store(true, Ordering::SeqCst))),
        );
        let mut client = Connection::from_stream(
            client_stream,
            PeerInfo::new("server", Some(addr)),
            Direction::Outbound,
            None,
        );

        client.send(b"over tcp".to_vec()).await.unwrap();
        assert_eq!(server.receive().await.unwrap(), b"over tcp");

        server.send(vec![7; 100_000]).await.unwrap();
        assert_eq!(client.receive().await.unwrap().len(), 100_000);

        client.disconnect();
        assert!(server.receive().await.is_none());

        // The reader task dropped its hook when the stream ended
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(closed.load(Ordering::SeqCst));
    }
}
