use std::sync::{Arc, Mutex, PoisonError};

use super::{RaftNode, RoleSnapshot};

/// Read-only view of the local node's role for the duty scheduler.
#[derive(Clone)]
pub struct RoleObserver {
    node: Arc<Mutex<RaftNode>>,
}

impl RoleObserver {
    pub fn new(node: Arc<Mutex<RaftNode>>) -> Self {
        Self { node }
    }

    pub fn snapshot(&self) -> RoleSnapshot {
        self.node
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    pub fn is_leader(&self) -> bool {
        self.snapshot().is_leader()
    }
}
