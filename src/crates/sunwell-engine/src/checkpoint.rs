//! Gate checkpoint persistence
//!
//! Each passed gate's [`GateResult`] is snapshotted under
//! `.sunwell/checkpoints/gate-{id}.json`. Resume loads the snapshots, marks
//! the corresponding gates passed, and never re-executes their feeders.

use crate::error::Result;
use std::collections::BTreeMap;
use sunwell_core::gate::{GateId, GateResult};
use sunwell_core::paths::{read_json, write_json_atomic};
use sunwell_core::StateLayout;
use tracing::debug;

/// Filesystem-backed checkpoint store
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    layout: StateLayout,
}

impl CheckpointStore {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    /// Persist one gate result atomically
    pub fn save(&self, result: &GateResult) -> Result<()> {
        let path = self.layout.checkpoint_file(&result.gate_id);
        write_json_atomic(&path, result)?;
        debug!(gate_id = %result.gate_id, path = %path.display(), "checkpoint saved");
        Ok(())
    }

    /// Load one gate's checkpoint, `None` when absent
    pub fn load(&self, gate_id: &str) -> Result<Option<GateResult>> {
        Ok(read_json(&self.layout.checkpoint_file(gate_id))?)
    }

    /// Load every persisted checkpoint keyed by gate id
    pub fn load_all(&self) -> Result<BTreeMap<GateId, GateResult>> {
        let dir = self.layout.checkpoints_dir();
        let mut results = BTreeMap::new();
        if !dir.exists() {
            return Ok(results);
        }
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(gate_id) = name
                .strip_prefix("gate-")
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            if let Some(result) = read_json::<GateResult>(&entry.path())? {
                results.insert(gate_id.to_string(), result);
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sunwell_core::Artifact;

    #[test]
    fn test_checkpoint_roundtrip() {
        // load(save(result)) is structurally identical.
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        let store = CheckpointStore::new(layout);

        let artifacts = vec![Artifact::new("src/a.py", "x = 1\n", "t1", "python")];
        let result = GateResult::passed("g-import", &artifacts, 120);
        store.save(&result).unwrap();

        let loaded = store.load("g-import").unwrap().unwrap();
        assert_eq!(loaded, result);
        assert!(store.load("missing").unwrap().is_none());
    }

    #[test]
    fn test_load_all_keyed_by_gate() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        let store = CheckpointStore::new(layout);

        for gate_id in ["g1", "g2"] {
            let result = GateResult::passed(gate_id, &[], 1);
            store.save(&result).unwrap();
        }

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains_key("g1"));
        assert!(all.contains_key("g2"));
    }
}
