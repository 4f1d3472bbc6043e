//! Addressable peers over TCP
//!
//! The accept loop gives every connection a `PeerId`, spawns one reader and
//! one writer task for it, and fans every inbound frame into a single bounded
//! channel tagged with the sender's identity. Replies are routed back by
//! identity through the `PeerRegistry`.

use crate::net::frame::{read_frame, write_frame};
use crate::log_main;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::Level;

/// Identity the transport assigns to a connected peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// One frame received from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub peer: PeerId,
    pub payload: String,
}

/// Outbound queues of every connected peer
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, mpsc::UnboundedSender<String>>>,
    next_id: AtomicU64,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn register(&self, outbound: mpsc::UnboundedSender<String>) -> PeerId {
        let id = PeerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.peers.write().insert(id, outbound);
        id
    }

    /// Queue a payload for a peer. `false` if the peer is gone.
    pub fn send(&self, peer: PeerId, payload: String) -> bool {
        match self.peers.read().get(&peer) {
            Some(outbound) => outbound.send(payload).is_ok(),
            None => false,
        }
    }

    /// Forget a peer; its writer task ends once the queue drains
    pub fn remove(&self, peer: PeerId) -> bool {
        self.peers.write().remove(&peer).is_some()
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.peers.read().contains_key(&peer)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Accept connections until shutdown
///
/// `target` names the component in logs.
pub async fn serve_peers(
    listener: TcpListener,
    registry: Arc<PeerRegistry>,
    inbound: mpsc::Sender<Inbound>,
    mut shutdown: watch::Receiver<bool>,
    target: &'static str,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let peer = spawn_peer(stream, &registry, inbound.clone(), shutdown.clone());
                    tracing::info!(component = target, peer = %peer, addr = %addr, "Peer connected");
                }
                Err(e) => {
                    log_main!(Level::WARN, component = target, error = %e, "Accept failed");
                }
            },
        }
    }
    tracing::info!(component = target, "Accept loop stopped");
}

fn spawn_peer(
    stream: TcpStream,
    registry: &Arc<PeerRegistry>,
    inbound: mpsc::Sender<Inbound>,
    mut shutdown: watch::Receiver<bool>,
) -> PeerId {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let peer = registry.register(outbound_tx);

    tokio::spawn(async move {
        while let Some(payload) = outbound_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &payload).await {
                tracing::debug!(peer = %peer, error = %e, "Write failed");
                break;
            }
        }
    });

    let registry = Arc::clone(registry);
    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                _ = shutdown.changed() => break,
                frame = read_frame(&mut reader) => frame,
            };
            match frame {
                Ok(Some(payload)) => {
                    if inbound.send(Inbound { peer, payload }).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::info!(peer = %peer, "Peer disconnected");
                    break;
                }
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "Dropping peer after read error");
                    break;
                }
            }
        }
        registry.remove(peer);
    });

    peer
}
