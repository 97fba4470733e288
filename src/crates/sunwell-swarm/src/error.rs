//! Error types for multi-worker coordination

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SwarmError>;

/// Errors from the coordinator, workers, locks, and repository
#[derive(Debug, Error)]
pub enum SwarmError {
    /// Working tree has uncommitted changes; coordination cannot start
    #[error("working tree is not clean; commit or stash before running workers")]
    DirtyWorkingTree,

    /// A file lock could not be acquired within its timeout
    #[error("lock on '{path}' timed out after {seconds} s")]
    LockTimeout { path: String, seconds: u64 },

    /// A git operation failed
    #[error("git {operation} failed: {detail}")]
    Git { operation: String, detail: String },

    /// Worker branches with rebase conflicts were quarantined
    #[error("{count} branch(es) left unmerged with conflicts")]
    MergeConflicts { count: usize },

    /// A worker crashed or stopped heartbeating
    #[error("worker '{worker_id}' failed: {detail}")]
    Worker { worker_id: String, detail: String },

    #[error(transparent)]
    Core(#[from] sunwell_core::CoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
