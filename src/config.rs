use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::raft::{NodeId, PeerDirectory, RaftConfig, RaftError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node_id: NodeId,
    /// `host:port` per node, indexed by node id.
    pub peers: Vec<String>,
    pub raft: RaftConfig,
    pub duties: DutyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DutyConfig {
    pub poll_interval_ms: u64,
    /// How long the queue drain waits on an empty queue before polling again.
    pub idle_wait_ms: u64,
    pub fetch_interval_ms: u64,
    pub ingest_addr: Option<SocketAddr>,
    pub sink_path: Option<PathBuf>,
    pub fetch_path: Option<PathBuf>,
}

impl Default for DutyConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            idle_wait_ms: 5000,
            fetch_interval_ms: 30_000,
            ingest_addr: None,
            sink_path: None,
            fetch_path: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: 0,
            peers: vec![
                "manager_node_1:5005".to_string(),
                "manager_node_2:5006".to_string(),
            ],
            raft: RaftConfig::default(),
            duties: DutyConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    pub fn peer_directory(&self) -> Result<PeerDirectory, RaftError> {
        PeerDirectory::new(self.node_id, self.peers.clone())
    }

    pub fn validate(&self) -> Result<(), RaftError> {
        self.raft.validate()?;
        self.peer_directory()?;
        if self.duties.poll_interval_ms == 0
            || self.duties.idle_wait_ms == 0
            || self.duties.fetch_interval_ms == 0
        {
            return Err(RaftError::Config("duty intervals must be non-zero".to_string()));
        }
        Ok(())
    }
}
