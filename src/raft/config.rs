use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use super::RaftError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// How long a Candidate waits for quorum before reverting to Follower.
    pub election_window_ms: u64,
    /// Overrides `0.0.0.0:<own port>`.
    pub bind_addr: Option<SocketAddr>,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: 5000,
            election_timeout_max_ms: 10000,
            heartbeat_interval_ms: 1000,
            election_window_ms: 5000,
            bind_addr: None,
        }
    }
}

impl RaftConfig {
    /// Short timings for loopback clusters.
    pub fn fast() -> Self {
        Self {
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
            election_window_ms: 150,
            bind_addr: None,
        }
    }

    pub fn validate(&self) -> Result<(), RaftError> {
        if self.election_timeout_min_ms == 0
            || self.heartbeat_interval_ms == 0
            || self.election_window_ms == 0
        {
            return Err(RaftError::Config("timings must be non-zero".to_string()));
        }
        if self.election_timeout_min_ms > self.election_timeout_max_ms {
            return Err(RaftError::Config(format!(
                "election timeout min {}ms exceeds max {}ms",
                self.election_timeout_min_ms, self.election_timeout_max_ms
            )));
        }
        if self.heartbeat_interval_ms >= self.election_timeout_min_ms {
            return Err(RaftError::Config(format!(
                "heartbeat interval {}ms must be shorter than the minimum election timeout {}ms",
                self.heartbeat_interval_ms, self.election_timeout_min_ms
            )));
        }
        Ok(())
    }
}
