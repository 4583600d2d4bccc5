use super::{NodeId, RaftError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: NodeId,
    pub address: String,
}

/// Static mapping from dense node id to `host:port`, fixed for the process
/// lifetime. The local node's own address is the entry at its id.
#[derive(Debug, Clone)]
pub struct PeerDirectory {
    local_id: NodeId,
    peers: Vec<Peer>,
}

impl PeerDirectory {
    pub fn new(local_id: NodeId, addresses: Vec<String>) -> Result<Self, RaftError> {
        if addresses.is_empty() {
            return Err(RaftError::Config("peer list is empty".to_string()));
        }
        if local_id >= addresses.len() {
            return Err(RaftError::Config(format!(
                "node id {} is outside the peer list of {} entries",
                local_id,
                addresses.len()
            )));
        }

        let mut peers = Vec::with_capacity(addresses.len());
        for (id, address) in addresses.into_iter().enumerate() {
            validate_address(&address)?;
            peers.push(Peer { id, address });
        }

        Ok(Self { local_id, peers })
    }

    /// Parses the `host:port;host:port` form. Commas are accepted as well.
    pub fn parse(local_id: NodeId, peers: &str) -> Result<Self, RaftError> {
        Self::new(local_id, split_peer_list(peers))
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn local_address(&self) -> &str {
        &self.peers[self.local_id].address
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id < self.peers.len()
    }

    pub fn address(&self, id: NodeId) -> Result<&str, RaftError> {
        self.peers
            .get(id)
            .map(|p| p.address.as_str())
            .ok_or(RaftError::UnknownPeer(id))
    }

    /// Every peer except the local node.
    pub fn others(&self) -> impl Iterator<Item = &Peer> {
        let local = self.local_id;
        self.peers.iter().filter(move |p| p.id != local)
    }

    /// Strict majority of the cluster.
    pub fn quorum(&self) -> usize {
        self.peers.len() / 2 + 1
    }

    /// Port of the local entry, used to pick the bind address.
    pub fn local_port(&self) -> Result<u16, RaftError> {
        port_of(self.local_address())
    }
}

/// Splits `host:port;host:port` (or comma-separated) into entries.
pub fn split_peer_list(peers: &str) -> Vec<String> {
    peers
        .split([';', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn port_of(address: &str) -> Result<u16, RaftError> {
    let (_, port) = address
        .rsplit_once(':')
        .ok_or_else(|| RaftError::Config(format!("peer address '{address}' is not host:port")))?;
    port.parse::<u16>()
        .map_err(|_| RaftError::Config(format!("peer address '{address}' has an invalid port")))
}

fn validate_address(address: &str) -> Result<(), RaftError> {
    let (host, _) = address
        .rsplit_once(':')
        .ok_or_else(|| RaftError::Config(format!("peer address '{address}' is not host:port")))?;
    if host.is_empty() {
        return Err(RaftError::Config(format!("peer address '{address}' has no host")));
    }
    port_of(address).map(|_| ())
}
