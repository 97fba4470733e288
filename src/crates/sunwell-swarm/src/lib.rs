//! # sunwell-swarm
//!
//! Single-host, filesystem-mediated multi-worker coordination:
//!
//! - [`backlog`]: shared goal list with flock-serialized claims
//! - [`locks`]: per-file advisory locks with sorted acquisition and
//!   stale-lock reclamation
//! - [`governor`]: cross-process LLM concurrency as a file-locked counter
//! - [`repo`]: the version-control capability (git subprocess + trait)
//! - [`worker`]: the claim → lock → execute → commit → release loop
//! - [`merge`]: deterministic branch merging with conflict quarantine
//! - [`coordinator`]: setup, worker supervision, and the merge pass

pub mod backlog;
pub mod coordinator;
pub mod error;
pub mod governor;
pub mod locks;
pub mod merge;
pub mod repo;
pub mod worker;

pub use backlog::{Backlog, Goal, GoalScope, GoalStatus};
pub use coordinator::{stuck_workers, Coordinator, CoordinatorResult};
pub use error::{Result, SwarmError};
pub use governor::{LlmPermit, ResourceGovernor};
pub use locks::{FileLockManager, HeldLock};
pub use merge::{merge_order, merge_worker_branches, MergeReport};
pub use repo::{commit_message, GitRepository, RebaseOutcome, Repository};
pub use worker::{GoalRunner, Worker, WorkerState, WorkerStatus, WorkerSummary};
