//! One enabled sync: a transport joined to a topic plus the mesh tasks
//! driving its connections.
//!
//! `stop` signals every connection task, waits for them to publish their
//! disconnects, then tears the transport down. Nothing started by the
//! session outlives it.

use crate::core_sync::errors::SyncResult;
use crate::core_sync::mesh::MeshProtocol;
use crate::core_sync::topic::Topic;
use crate::core_sync::transport::{Connection, Transport, TransportError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

pub struct SyncSession {
    topic: Topic,
    transport: Arc<dyn Transport>,
    mesh: MeshProtocol,
    shutdown: watch::Sender<bool>,
    accept: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl SyncSession {
    /// Join `topic` on `transport` and start accepting connections.
    ///
    /// Fails without leaving anything running: on error the transport is
    /// disconnected before returning.
    pub async fn start(
        transport: Arc<dyn Transport>,
        topic: Topic,
        mesh: MeshProtocol,
        timeout: Duration,
    ) -> SyncResult<Self> {
        let joined = async {
            let incoming = with_timeout(timeout, "connect", transport.connect(&topic)).await?;
            with_timeout(timeout, "announce", transport.announce(&topic)).await?;
            Ok::<_, TransportError>(incoming)
        }
        .await;

        let incoming = match joined {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!(topic = %topic.short(), transport = transport.name(), error = %e, "Failed to join topic");
                if let Err(cleanup) = transport.disconnect().await {
                    debug!(error = %cleanup, "Transport cleanup after failed join");
                }
                return Err(e.into());
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept = tokio::spawn(accept_loop(incoming, mesh.clone(), shutdown_rx));

        info!(topic = %topic.short(), transport = transport.name(), "Sync session started");
        Ok(SyncSession { topic, transport, mesh, shutdown, accept: Some(accept), timeout })
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub fn connected_peers(&self) -> Vec<String> {
        self.mesh.connected_peers()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr().await
    }

    /// Close every connection and release the topic
    pub async fn stop(mut self) -> SyncResult<()> {
        let _ = self.shutdown.send(true);

        if let Some(mut accept) = self.accept.take() {
            if tokio::time::timeout(self.timeout, &mut accept).await.is_err() {
                warn!(topic = %self.topic.short(), "Connection tasks did not stop in time, aborting");
                accept.abort();
            }
        }

        self.transport.leave(&self.topic).await?;
        self.transport.disconnect().await?;
        info!(topic = %self.topic.short(), "Sync session stopped");
        Ok(())
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(accept) = self.accept.take() {
            accept.abort();
        }
    }
}

async fn with_timeout<T>(
    limit: Duration,
    what: &str,
    fut: impl std::future::Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TransportError::Timeout(format!("{} did not finish within {:?}", what, limit)))?
}

/// Spawn a mesh task per connection; on shutdown, wait for all of them
async fn accept_loop(
    mut incoming: mpsc::Receiver<Connection>,
    mesh: MeshProtocol,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut links = JoinSet::new();
    let mut accepting = true;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            conn = incoming.recv(), if accepting => match conn {
                Some(conn) => {
                    debug!(peer_id = %conn.peer_id(), "New connection");
                    let mesh = mesh.clone();
                    let shutdown = shutdown.clone();
                    links.spawn(async move { mesh.run_connection(conn, shutdown).await });
                }
                None => {
                    debug!("Connection stream ended");
                    accepting = false;
                }
            },
            Some(joined) = links.join_next(), if !links.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "Connection task failed");
                }
            }
        }
    }

    while let Some(joined) = links.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Connection task failed");
        }
    }
}
