//! Event Broadcasting System
//!
//! Fans [`ChangeEvent`]s out to any number of subscribers. Each subscriber
//! has its own bounded queue; a slow subscriber loses its oldest unread
//! events instead of stalling the publisher.

use crate::events::ChangeEvent;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::warn;

/// Error returned by [`Subscription::recv`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecvError {
    /// The subscriber fell behind and this many events were discarded
    #[error("subscriber lagged, {0} events dropped")]
    Lagged(u64),

    /// The broadcaster was closed and every queued event has been read
    #[error("broadcaster closed")]
    Closed,
}

/// Event broadcaster for database changes
///
/// Cloning yields another handle to the same channel.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: Arc<RwLock<Option<broadcast::Sender<ChangeEvent>>>>,
    capacity: usize,
}

impl EventBroadcaster {
    /// Create a new event broadcaster
    ///
    /// # Arguments
    /// * `capacity` - Per-subscriber queue bound (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx: Arc::new(RwLock::new(Some(tx))), capacity }
    }

    /// Emit an event to all subscribers
    ///
    /// # Returns
    /// Number of active subscribers that received the event
    pub fn emit(&self, event: ChangeEvent) -> usize {
        let guard = match self.tx.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Subscribe to events published from now on
    ///
    /// Subscribing after [`close`](Self::close) yields an already closed
    /// subscription.
    pub fn subscribe(&self) -> Subscription {
        let guard = match self.tx.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Subscription { rx: guard.as_ref().map(|tx| tx.subscribe()) }
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        match self.tx.read() {
            Ok(guard) => guard.as_ref().map(|tx| tx.receiver_count()).unwrap_or(0),
            Err(poisoned) => poisoned.into_inner().as_ref().map(|tx| tx.receiver_count()).unwrap_or(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Close the channel; subscribers drain what is queued, then see `Closed`
    pub fn close(&self) {
        let mut guard = match self.tx.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take();
    }

    pub fn is_closed(&self) -> bool {
        match self.tx.read() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// One subscriber's queue
pub struct Subscription {
    rx: Option<broadcast::Receiver<ChangeEvent>>,
}

impl Subscription {
    /// Receive the next event
    pub async fn recv(&mut self) -> Result<ChangeEvent, RecvError> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(RecvError::Closed);
        };
        match rx.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(n)) => Err(RecvError::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => {
                self.rx = None;
                Err(RecvError::Closed)
            }
        }
    }

    /// Receive the next event, skipping over lag; `None` once closed
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => {
                    warn!(dropped = n, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when nothing is queued
    pub fn try_recv(&mut self) -> Option<Result<ChangeEvent, RecvError>> {
        let rx = self.rx.as_mut()?;
        match rx.try_recv() {
            Ok(event) => Some(Ok(event)),
            Err(broadcast::error::TryRecvError::Empty) => None,
            Err(broadcast::error::TryRecvError::Lagged(n)) => Some(Err(RecvError::Lagged(n))),
            Err(broadcast::error::TryRecvError::Closed) => {
                self.rx = None;
                Some(Err(RecvError::Closed))
            }
        }
    }
}
