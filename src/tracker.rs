//! Tracking of live server-side connections.
//!
//! The tracker holds non-owning handles: the socket itself stays with the
//! serving task, which polls the handle's outbound channel for broadcast
//! deliveries and its cancellation token for shutdown.

use crate::message::Message;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capacity of each connection's outbound broadcast queue.
const OUTBOUND_QUEUE: usize = 32;

/// Non-owning handle to one live connection.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    id: u64,
    peer: SocketAddr,
    outbound: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

impl ConnHandle {
    /// Build a handle plus the receiving end of its outbound queue.
    pub fn new(
        id: u64,
        peer: SocketAddr,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        (
            ConnHandle {
                id,
                peer,
                outbound: tx,
                cancel,
            },
            rx,
        )
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Signal the serving task to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Concurrent set of live connections.
///
/// Mutated by the accept loop (track) and every serving task (untrack);
/// read by broadcast. An `RwLock` keeps the set consistent under that
/// concurrency; the length counter is kept separately so `len` never
/// contends with a broadcast in progress.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    connections: RwLock<HashMap<u64, ConnHandle>>,
    count: AtomicUsize,
    next_id: AtomicU64,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        ConnectionTracker::default()
    }

    /// Allocate a fresh connection id.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Add a connection to the live set.
    pub async fn track(&self, handle: ConnHandle) {
        let mut connections = self.connections.write().await;
        if connections.insert(handle.id, handle).is_none() {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove a connection from the live set. Returns whether it was present
    /// (a connection cancelled by shutdown may already be gone).
    pub async fn untrack(&self, id: u64) -> bool {
        let mut connections = self.connections.write().await;
        if connections.remove(&id).is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Number of currently tracked connections.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a connection id is currently tracked.
    pub async fn contains(&self, id: u64) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    /// Enqueue a message to every tracked connection's outbound queue.
    ///
    /// Returns the number of successful deliveries. A full queue drops the
    /// message for that peer with a warning; a closed queue means the
    /// serving task is gone, so the stale handle is untracked. Neither
    /// aborts delivery to the remaining connections.
    pub async fn broadcast(&self, message: &Message) -> usize {
        let handles: Vec<ConnHandle> = {
            let connections = self.connections.read().await;
            connections.values().cloned().collect()
        };

        let mut delivered = 0;
        let mut stale = Vec::new();
        for handle in handles {
            match handle.outbound.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(id = handle.id, peer = %handle.peer, "outbound queue full, dropping broadcast");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(id = handle.id, peer = %handle.peer, "stale handle, untracking");
                    stale.push(handle.id);
                }
            }
        }
        for id in stale {
            self.untrack(id).await;
        }
        delivered
    }

    /// Cancel every tracked connection (used by shutdown).
    pub async fn close_all(&self) {
        let connections = self.connections.read().await;
        for handle in connections.values() {
            handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[tokio::test]
    async fn test_track_untrack() {
        let tracker = ConnectionTracker::new();
        let cancel = CancellationToken::new();
        let (handle, _rx) = ConnHandle::new(tracker.next_id(), addr(4000), cancel);
        let id = handle.id();

        tracker.track(handle).await;
        assert_eq!(tracker.len(), 1);
        assert!(tracker.contains(id).await);

        assert!(tracker.untrack(id).await);
        assert_eq!(tracker.len(), 0);
        assert!(!tracker.untrack(id).await);
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_all() {
        let tracker = ConnectionTracker::new();
        let (h1, mut rx1) = ConnHandle::new(tracker.next_id(), addr(4001), CancellationToken::new());
        let (h2, mut rx2) = ConnHandle::new(tracker.next_id(), addr(4002), CancellationToken::new());
        tracker.track(h1).await;
        tracker.track(h2).await;

        let delivered = tracker.broadcast(&Message::from("notice")).await;
        assert_eq!(delivered, 2);
        assert_eq!(rx1.recv().await.unwrap(), "notice");
        assert_eq!(rx2.recv().await.unwrap(), "notice");
    }

    #[tokio::test]
    async fn test_broadcast_skips_dead_receiver() {
        let tracker = ConnectionTracker::new();
        let (h1, rx1) = ConnHandle::new(tracker.next_id(), addr(4003), CancellationToken::new());
        let (h2, mut rx2) = ConnHandle::new(tracker.next_id(), addr(4004), CancellationToken::new());
        tracker.track(h1).await;
        tracker.track(h2).await;

        drop(rx1); // serving task gone without untracking

        let delivered = tracker.broadcast(&Message::from("notice")).await;
        assert_eq!(delivered, 1);
        assert_eq!(rx2.recv().await.unwrap(), "notice");
        // The stale handle was pruned.
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn test_close_all_cancels_every_handle() {
        let tracker = ConnectionTracker::new();
        let c1 = CancellationToken::new();
        let c2 = CancellationToken::new();
        let (h1, _rx1) = ConnHandle::new(tracker.next_id(), addr(4005), c1.clone());
        let (h2, _rx2) = ConnHandle::new(tracker.next_id(), addr(4006), c2.clone());
        tracker.track(h1).await;
        tracker.track(h2).await;

        tracker.close_all().await;
        assert!(c1.is_cancelled());
        assert!(c2.is_cancelled());
    }
}
