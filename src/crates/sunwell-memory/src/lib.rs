//! # sunwell-memory
//!
//! Persistent session memory with two clearly separated layers:
//!
//! - [`learning`]: append-only JSONL stores for learnings, decisions, and
//!   dead ends, deduplicated by content hash and queryable by token overlap
//! - [`briefing`]: the single-file, overwritten, size-bounded handoff
//!   artifact that orients the next session
//! - [`prefetch`]: best-effort warm start driven by the briefing

pub mod briefing;
pub mod error;
pub mod learning;
pub mod prefetch;

pub use briefing::{Briefing, BriefingStatus, BriefingStore, SessionSummary};
pub use error::{MemoryError, Result};
pub use learning::{DeadEnd, Learning, LearningSource, LearningStore, TASK_COMPLETION};
pub use prefetch::{PrefetchPlan, PrefetchedContext};
