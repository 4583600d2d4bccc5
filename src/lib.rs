// Election core
pub mod raft;

// Leader-only work and its collaborators
pub mod duty;

pub mod config;
pub mod logging;
pub mod shutdown;

// Public exports
pub use config::{Config, DutyConfig};
pub use duty::{Duty, DutyScheduler};
pub use raft::{NodeRole, Raft, RaftConfig, RaftHandle, RoleObserver, RoleSnapshot};
