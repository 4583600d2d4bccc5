use std::fmt;

use serde::{Deserialize, Serialize};

use super::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeRole::Follower => "Follower",
            NodeRole::Candidate => "Candidate",
            NodeRole::Leader => "Leader",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub current_term: u64,
    pub role: NodeRole,
    pub voted_for: Option<NodeId>,
    /// Only meaningful while Candidate.
    pub votes_received: usize,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            current_term: 0,
            role: NodeRole::Follower,
            voted_for: None,
            votes_received: 0,
        }
    }
}

/// Point-in-time view handed to the duty scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSnapshot {
    pub role: NodeRole,
    pub term: u64,
}

impl RoleSnapshot {
    pub fn is_leader(&self) -> bool {
        self.role == NodeRole::Leader
    }
}
