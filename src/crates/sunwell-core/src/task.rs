//! Task specifications
//!
//! A task is the artifact-producing unit of work emitted by the planner.
//! Tasks are immutable value types; execution state lives on the session,
//! not on the spec.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Task identifier, unique within a graph
pub type TaskId = String;

/// What kind of artifact a task produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Source module (protocol, interface, library code)
    Module,
    /// Data model / schema definition
    Schema,
    /// Route or endpoint handler
    Endpoint,
    /// Application entry point or factory
    EntryPoint,
    /// Test file
    Test,
    /// Configuration or manifest
    Config,
    /// Documentation or prose
    Doc,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Module => "module",
            ArtifactKind::Schema => "schema",
            ArtifactKind::Endpoint => "endpoint",
            ArtifactKind::EntryPoint => "entry_point",
            ArtifactKind::Test => "test",
            ArtifactKind::Config => "config",
            ArtifactKind::Doc => "doc",
        }
    }
}

/// Planner-emitted specification of one artifact-producing task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique id within the graph
    pub id: TaskId,

    /// Natural-language description handed to the execution strategy
    pub description: String,

    /// Kind of artifact the task is expected to produce
    pub artifact_kind: ArtifactKind,

    /// Module path the task produces, when known up front
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produces_module: Option<String>,

    /// Best-effort estimate of paths the task will touch; feeds conflict
    /// detection in multi-worker mode
    #[serde(default)]
    pub affected_paths: BTreeSet<String>,

    /// Planner confidence that the description is sufficient, in [0, 1]
    pub confidence: f64,

    /// Ids of tasks whose artifacts this task needs (data dependencies)
    #[serde(default)]
    pub requires: BTreeSet<TaskId>,
}

impl TaskSpec {
    pub fn new(id: impl Into<TaskId>, description: impl Into<String>, kind: ArtifactKind) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            artifact_kind: kind,
            produces_module: None,
            affected_paths: BTreeSet::new(),
            confidence: 0.9,
            requires: BTreeSet::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_requires<I, S>(mut self, requires: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.requires = requires.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_affected_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affected_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_produces_module(mut self, module: impl Into<String>) -> Self {
        self.produces_module = Some(module.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let t = TaskSpec::new("t1", "create user model", ArtifactKind::Schema)
            .with_confidence(0.7)
            .with_requires(["t0"])
            .with_affected_paths(["models/user.py"]);
        assert_eq!(t.id, "t1");
        assert_eq!(t.confidence, 0.7);
        assert!(t.requires.contains("t0"));
        assert!(t.affected_paths.contains("models/user.py"));
    }

    #[test]
    fn test_confidence_clamped() {
        let t = TaskSpec::new("t", "x", ArtifactKind::Module).with_confidence(1.4);
        assert_eq!(t.confidence, 1.0);
    }
}
