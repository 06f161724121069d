//! Local-only backend
//!
//! Finds no peers and opens no links. Enabling sync with it succeeds, so a
//! database can run the same code path with networking switched off.

use super::{Connection, PeerInfo, Transport, TransportResult};
use crate::core_sync::topic::Topic;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
pub struct DisabledTransport {
    // Held so connection streams stay open until leave/disconnect
    streams: Mutex<HashMap<Topic, mpsc::Sender<Connection>>>,
}

impl DisabledTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn streams(&self) -> std::sync::MutexGuard<'_, HashMap<Topic, mpsc::Sender<Connection>>> {
        self.streams.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for DisabledTransport {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn announce(&self, topic: &Topic) -> TransportResult<()> {
        debug!(topic = %topic.short(), "Announce ignored, transport disabled");
        Ok(())
    }

    async fn lookup(&self, _topic: &Topic) -> TransportResult<Vec<PeerInfo>> {
        Ok(Vec::new())
    }

    async fn connect(&self, topic: &Topic) -> TransportResult<mpsc::Receiver<Connection>> {
        let (tx, rx) = mpsc::channel(1);
        self.streams().insert(*topic, tx);
        Ok(rx)
    }

    async fn leave(&self, topic: &Topic) -> TransportResult<()> {
        self.streams().remove(topic);
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.streams().clear();
        Ok(())
    }
}
