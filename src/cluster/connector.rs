//! Outbound links to peer nodes.
//!
//! # Responsibilities
//! - Attempt one transport-level link per configured peer
//! - Never block or fail startup: every attempt runs in its own task
//! - Remember the links that came up so they can be reported and closed
//! - Cancel attempts still in flight on disconnect so no link appears after teardown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::TcpStream;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time;

use crate::cluster::peer::PeerNode;
use crate::config::ClusterConfig;
use crate::observability::metrics;

#[derive(Debug, Clone)]
pub struct ClusterConnector {
    nodes: Vec<String>,
    connect_timeout: Duration,
    links: Arc<DashMap<String, TcpStream>>,
    pending: Arc<Mutex<Vec<AbortHandle>>>,
    closed: Arc<AtomicBool>,
}

impl ClusterConnector {
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            nodes: config.nodes.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            links: Arc::new(DashMap::new()),
            pending: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Start one connection attempt per peer and return immediately.
    ///
    /// The handles are only useful to tests; dropping them detaches the attempts.
    /// `disconnect_all` cancels whatever is still running.
    pub fn connect_all(&self) -> Vec<JoinHandle<()>> {
        if self.nodes.is_empty() {
            tracing::debug!("No cluster peers configured");
            return Vec::new();
        }
        tracing::info!(peers = self.nodes.len(), "Connecting to cluster peers");
        self.closed.store(false, Ordering::SeqCst);

        let attempts: Vec<JoinHandle<()>> = self
            .nodes
            .iter()
            .map(|raw| {
                let raw = raw.clone();
                let links = self.links.clone();
                let closed = self.closed.clone();
                let timeout = self.connect_timeout;
                tokio::spawn(async move { connect_one(raw, links, closed, timeout).await })
            })
            .collect();

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|attempt| !attempt.is_finished());
        pending.extend(attempts.iter().map(JoinHandle::abort_handle));
        attempts
    }

    /// Peers with an open link, sorted.
    pub fn connected_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.links.iter().map(|e| e.key().clone()).collect();
        peers.sort();
        peers
    }

    /// Cancel pending attempts and drop every open link.
    pub fn disconnect_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut cancelled = 0;
        for attempt in self.pending.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
            if !attempt.is_finished() {
                attempt.abort();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            tracing::info!(cancelled, "Cancelled pending cluster connection attempts");
        }

        let count = self.links.len();
        self.links.clear();
        if count > 0 {
            tracing::info!(count, "Cluster links closed");
        }
    }
}

async fn connect_one(
    raw: String,
    links: Arc<DashMap<String, TcpStream>>,
    closed: Arc<AtomicBool>,
    timeout: Duration,
) {
    let peer = match PeerNode::parse(&raw) {
        Ok(peer) => peer,
        Err(reason) => {
            tracing::warn!(peer = %raw, reason = %reason, "Ignoring malformed cluster peer");
            metrics::record_peer_connect("invalid");
            return;
        }
    };

    match time::timeout(timeout, TcpStream::connect(peer.address())).await {
        Ok(Ok(stream)) => {
            tracing::info!(peer = %peer, "Connected to cluster peer");
            metrics::record_peer_connect("ok");
            let key = peer.to_string();
            links.insert(key.clone(), stream);
            // Insert before checking, so a concurrent disconnect_all either sees the link or we see the flag.
            if closed.load(Ordering::SeqCst) {
                links.remove(&key);
                tracing::debug!(peer = %peer, "Cluster link dropped, connector already closed");
            }
        }
        Ok(Err(e)) => {
            tracing::warn!(peer = %peer, error = %e, "Cluster peer connection failed");
            metrics::record_peer_connect("error");
        }
        Err(_) => {
            tracing::warn!(peer = %peer, timeout = ?timeout, "Cluster peer connection timed out");
            metrics::record_peer_connect("timeout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn connector(nodes: Vec<String>) -> ClusterConnector {
        ClusterConnector::new(&ClusterConfig {
            nodes,
            connect_timeout_ms: 500,
        })
    }

    #[tokio::test]
    async fn no_peers_is_a_no_op() {
        let connector = connector(Vec::new());
        assert!(connector.connect_all().is_empty());
        assert!(connector.connected_peers().is_empty());
    }

    #[tokio::test]
    async fn reachable_peer_is_linked_and_failures_are_tolerated() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = format!("node2@{}", listener.local_addr().unwrap());

        // Bind then drop to get a port nobody listens on.
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = closed.local_addr().unwrap().to_string();
        drop(closed);

        let connector = connector(vec![live.clone(), dead, "not a peer".to_string()]);
        let attempts = connector.connect_all();
        assert_eq!(attempts.len(), 3);
        for attempt in attempts {
            attempt.await.unwrap();
        }

        assert_eq!(connector.connected_peers(), [live]);
        connector.disconnect_all();
        assert!(connector.connected_peers().is_empty());
    }

    #[tokio::test]
    async fn disconnect_cancels_attempts_in_flight() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = format!("node2@{}", listener.local_addr().unwrap());
        let connector = connector(vec![live]);

        // Current-thread runtime: the attempt has not been polled yet.
        let attempts = connector.connect_all();
        connector.disconnect_all();

        for attempt in attempts {
            assert!(attempt.await.unwrap_err().is_cancelled());
        }
        assert!(connector.connected_peers().is_empty());
    }

    #[tokio::test]
    async fn attempt_finishing_after_close_leaves_no_link() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = format!("node2@{}", listener.local_addr().unwrap());
        let links = Arc::new(DashMap::new());

        connect_one(live, links.clone(), Arc::new(AtomicBool::new(true)), Duration::from_millis(500)).await;
        assert!(links.is_empty());
    }

    #[tokio::test]
    async fn reconnect_after_disconnect_links_again() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = format!("node2@{}", listener.local_addr().unwrap());
        let connector = connector(vec![live.clone()]);

        connector.disconnect_all();
        for attempt in connector.connect_all() {
            attempt.await.unwrap();
        }
        assert_eq!(connector.connected_peers(), [live]);
    }
}
