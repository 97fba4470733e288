//! Persisted state layout under `<project>/.sunwell/`
//!
//! One place knows the directory tree; every subsystem asks this type
//! instead of joining path fragments ad hoc. All JSON files under the tree
//! use UTF-8, sorted keys, and atomic write-then-rename.

use crate::error::Result;
use std::path::{Path, PathBuf};

/// Root directory name for persisted state
pub const STATE_DIR: &str = ".sunwell";

/// Resolved state paths for one project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(project_root: &Path) -> Self {
        Self {
            root: project_root.join(STATE_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backlog_dir(&self) -> PathBuf {
        self.root.join("backlog")
    }

    pub fn backlog_file(&self) -> PathBuf {
        self.backlog_dir().join("current.json")
    }

    pub fn claims_file(&self) -> PathBuf {
        self.backlog_dir().join("claims.json")
    }

    pub fn backlog_lock(&self) -> PathBuf {
        self.backlog_dir().join("backlog.lock")
    }

    pub fn file_locks_dir(&self) -> PathBuf {
        self.root.join("locks").join("files")
    }

    pub fn goal_locks_dir(&self) -> PathBuf {
        self.root.join("locks").join("goals")
    }

    pub fn workers_dir(&self) -> PathBuf {
        self.root.join("workers")
    }

    pub fn worker_status_file(&self, worker_id: &str) -> PathBuf {
        self.workers_dir().join(format!("{}.json", worker_id))
    }

    pub fn resources_dir(&self) -> PathBuf {
        self.root.join("resources")
    }

    pub fn llm_semaphore(&self) -> PathBuf {
        self.resources_dir().join("llm_semaphore")
    }

    pub fn llm_semaphore_lock(&self) -> PathBuf {
        self.resources_dir().join("llm_semaphore.lock")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.root.join("memory")
    }

    pub fn learnings_file(&self) -> PathBuf {
        self.memory_dir().join("learnings.jsonl")
    }

    pub fn decisions_file(&self) -> PathBuf {
        self.memory_dir().join("decisions.jsonl")
    }

    pub fn dead_ends_file(&self) -> PathBuf {
        self.memory_dir().join("dead_ends.jsonl")
    }

    pub fn briefing_file(&self) -> PathBuf {
        self.memory_dir().join("briefing.json")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    pub fn checkpoint_file(&self, gate_id: &str) -> PathBuf {
        self.checkpoints_dir().join(format!("gate-{}.json", gate_id))
    }

    pub fn events_dir(&self) -> PathBuf {
        self.root.join("events")
    }

    pub fn session_events_file(&self, session_id: &str) -> PathBuf {
        self.events_dir().join(format!("session-{}.ndjson", session_id))
    }

    /// Create the full directory tree, including the optional concept-graph
    /// and chunk directories so the on-disk layout is complete even when
    /// those features are unused.
    pub fn ensure_created(&self) -> Result<()> {
        for dir in [
            self.backlog_dir(),
            self.file_locks_dir(),
            self.goal_locks_dir(),
            self.workers_dir(),
            self.resources_dir(),
            self.memory_dir(),
            self.memory_dir().join("chunks").join("hot"),
            self.memory_dir().join("chunks").join("warm"),
            self.memory_dir().join("chunks").join("cold"),
            self.checkpoints_dir(),
            self.events_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Write JSON atomically: serialize with sorted keys, write to a temp file
/// in the same directory, then rename over the target.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    // serde_json with a BTreeMap-based Value keeps keys sorted; for derived
    // structs field order is declaration order, which is stable across runs.
    let body = serde_json::to_string_pretty(value)?;
    write_atomic(path, body.as_bytes())
}

/// Write bytes atomically via tmp-file + rename in the target directory
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "state".to_string()),
        std::process::id()
    ));
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read and deserialize a JSON file, `None` when absent
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = StateLayout::new(Path::new("/p"));
        assert_eq!(layout.backlog_file(), PathBuf::from("/p/.sunwell/backlog/current.json"));
        assert_eq!(
            layout.checkpoint_file("g1"),
            PathBuf::from("/p/.sunwell/checkpoints/gate-g1.json")
        );
        assert_eq!(
            layout.session_events_file("s1"),
            PathBuf::from("/p/.sunwell/events/session-s1.ndjson")
        );
        assert_eq!(
            layout.worker_status_file("worker-0"),
            PathBuf::from("/p/.sunwell/workers/worker-0.json")
        );
    }
}
