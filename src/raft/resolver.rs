use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::lookup_host;
use tokio_util::sync::CancellationToken;

use super::{NodeId, PeerDirectory};

const UNRESOLVED_RETRY: Duration = Duration::from_secs(1);
const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Resolved socket address per peer id. Lookups happen on a background task
/// so a slow or failing resolver never blocks the dispatch loop; sends to a
/// peer that has not resolved yet are dropped like any lost datagram.
#[derive(Clone)]
pub struct PeerAddressBook {
    peers: Arc<PeerDirectory>,
    resolved: Arc<RwLock<Vec<Option<SocketAddr>>>>,
}

impl PeerAddressBook {
    /// Literal `ip:port` entries are usable immediately.
    pub fn new(peers: Arc<PeerDirectory>) -> Self {
        let resolved = (0..peers.len())
            .map(|id| {
                peers
                    .address(id)
                    .ok()
                    .and_then(|address| address.parse::<SocketAddr>().ok())
            })
            .collect();
        Self {
            peers,
            resolved: Arc::new(RwLock::new(resolved)),
        }
    }

    pub fn get(&self, id: NodeId) -> Option<SocketAddr> {
        self.resolved
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
            .flatten()
    }

    /// Re-resolves every remote peer and returns how many are still
    /// unresolved. A failed lookup keeps the previous address.
    pub async fn refresh(&self) -> usize {
        let mut unresolved = 0;
        for peer in self.peers.others() {
            match lookup_host(peer.address.as_str()).await {
                Ok(mut addrs) => match addrs.next() {
                    Some(addr) => self.store(peer.id, addr),
                    None => unresolved += usize::from(self.get(peer.id).is_none()),
                },
                Err(e) => {
                    debug!("Cannot resolve peer {} ({}): {e}", peer.id, peer.address);
                    unresolved += usize::from(self.get(peer.id).is_none());
                }
            }
        }
        unresolved
    }

    fn store(&self, id: NodeId, addr: SocketAddr) {
        let mut resolved = self.resolved.write().unwrap_or_else(PoisonError::into_inner);
        if resolved[id] != Some(addr) {
            info!("Peer {} resolved to {}", id, addr);
            resolved[id] = Some(addr);
        }
    }

    /// Keeps the table fresh until `shutdown` fires: retries quickly while a
    /// peer is missing, slowly once all are known.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            let unresolved = self.refresh().await;
            let wait = if unresolved > 0 {
                warn!("{unresolved} peer(s) not resolvable yet");
                UNRESOLVED_RETRY
            } else {
                REFRESH_INTERVAL
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
