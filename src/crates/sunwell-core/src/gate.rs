//! Validation gates and their results
//!
//! Gates are hard barriers inserted into the task graph by the planner. A
//! gate runs the validation cascade over the artifacts of its feeder tasks;
//! dependents listed in `blocks` are not dispatched until the gate passes.
//! Passing produces a checkpoint that uniquely identifies the artifact set,
//! enabling resume.

use crate::artifact::{hex_encode, Artifact};
use crate::strategy::StrategyKind;
use crate::task::TaskId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Gate identifier, unique within a graph
pub type GateId = String;

/// What a gate checks
///
/// Kinds are layered: the `layer` ordering (Syntax ≤ Lint ≤ Type ≤ Import ≤
/// Schema ≤ Endpoint ≤ Integration) constrains gate insertion so that no gate
/// depends on a higher-ordered gate of the same layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    Syntax,
    Lint,
    Type,
    Import,
    Instantiate,
    Schema,
    Serve,
    Endpoint,
    Integration,
    Test,
}

impl GateKind {
    /// Position in the validation ordering; lower layers run earlier.
    pub fn layer(&self) -> u8 {
        match self {
            GateKind::Syntax => 0,
            GateKind::Lint => 1,
            GateKind::Type => 2,
            GateKind::Import | GateKind::Instantiate => 3,
            GateKind::Schema => 4,
            GateKind::Serve | GateKind::Endpoint => 5,
            GateKind::Integration | GateKind::Test => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GateKind::Syntax => "syntax",
            GateKind::Lint => "lint",
            GateKind::Type => "type",
            GateKind::Import => "import",
            GateKind::Instantiate => "instantiate",
            GateKind::Schema => "schema",
            GateKind::Serve => "serve",
            GateKind::Endpoint => "endpoint",
            GateKind::Integration => "integration",
            GateKind::Test => "test",
        }
    }
}

impl std::fmt::Display for GateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Gate-specific validation descriptor
///
/// Carries what the gate-specific cascade layer needs beyond the toolchain
/// commands: probes for endpoint gates, a build/migrate command for schema
/// gates, a test command for integration gates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationDescriptor {
    /// Command to run for Schema/Integration/Test gates (program + args)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    /// Entry-point artifact path for Serve/Endpoint gates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,

    /// HTTP probes issued against the spawned server
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub probes: Vec<EndpointProbe>,
}

/// One HTTP probe for an Endpoint gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointProbe {
    /// Request path, e.g. "/health"
    pub path: String,

    /// Expected status code
    pub expect_status: u16,

    /// Substring expected in the body, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_body: Option<String>,
}

/// A validation checkpoint inserted into the task graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub id: GateId,
    pub kind: GateKind,

    /// Feeder tasks whose artifacts the gate validates
    pub depends_on: BTreeSet<TaskId>,

    /// Tasks that may not be dispatched until the gate passes
    pub blocks: BTreeSet<TaskId>,

    #[serde(default)]
    pub validation: ValidationDescriptor,
}

impl Gate {
    pub fn new(id: impl Into<GateId>, kind: GateKind) -> Self {
        Self {
            id: id.into(),
            kind,
            depends_on: BTreeSet::new(),
            blocks: BTreeSet::new(),
            validation: ValidationDescriptor::default(),
        }
    }

    pub fn with_depends_on<I, S>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.depends_on = tasks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_blocks<I, S>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.blocks = tasks.into_iter().map(Into::into).collect();
        self
    }

    /// Feeders and blocked sets must be disjoint.
    pub fn is_well_formed(&self) -> bool {
        self.depends_on.is_disjoint(&self.blocks)
    }
}

/// Kind of a validation failure; determines the fix strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    Syntax,
    Lint,
    Type,
    Import,
    Runtime,
    Test,
    /// Gate exceeded its total timeout
    Timeout,
}

/// Severity of a reported validation issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A located validation failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,

    /// File the error was reported in, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// 1-based inclusive line range seeding hotspot localization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_range: Option<(u32, u32)>,

    pub message: String,
    pub severity: Severity,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            file: None,
            line_range: None,
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line_range = Some((line, line));
        self
    }

    pub fn with_lines(mut self, file: impl Into<String>, start: u32, end: u32) -> Self {
        self.file = Some(file.into());
        self.line_range = Some((start, end));
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.file, self.line_range) {
            (Some(file), Some((start, _))) => {
                write!(f, "{:?} at {}:{}: {}", self.kind, file, start, self.message)
            }
            (Some(file), None) => write!(f, "{:?} at {}: {}", self.kind, file, self.message),
            _ => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

/// One iteration of the auto-fixer against a specific error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixAttempt {
    pub error: ValidationError,
    pub strategy: StrategyKind,

    /// Whether the attempt produced a patch (not whether the gate now passes)
    pub patched: bool,

    /// Region edited, as (file, start_line, end_line)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<(String, u32, u32)>,

    /// 1-based attempt index for this error within the gate
    pub attempt: u32,
}

/// Outcome of one gate attempt, retained for resume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub gate_id: GateId,
    pub passed: bool,
    pub duration_ms: u64,

    /// Captured stdout + stderr of the failing layer (empty on pass)
    #[serde(default)]
    pub validation_output: String,

    /// Deterministic hash of the artifact set as of this gate (pass only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_hash: Option<String>,

    /// path → content hash snapshot of the validated artifacts
    #[serde(default)]
    pub artifact_snapshot: BTreeMap<String, String>,

    /// Toolchain commands the cascade ran, for observability
    #[serde(default)]
    pub commands_run: Vec<String>,

    /// Errors from the first failing layer (empty on pass)
    #[serde(default)]
    pub errors: Vec<ValidationError>,
}

impl GateResult {
    /// Build the passing result for a gate over a set of artifacts.
    ///
    /// The checkpoint hash is `H(sorted((path, content_hash)))`, so two runs
    /// producing identical artifact sets checkpoint identically.
    pub fn passed(gate_id: impl Into<GateId>, artifacts: &[Artifact], duration_ms: u64) -> Self {
        let snapshot: BTreeMap<String, String> = artifacts
            .iter()
            .map(|a| (a.path.clone(), a.content_hash()))
            .collect();
        let checkpoint_hash = Some(checkpoint_hash(&snapshot));
        Self {
            gate_id: gate_id.into(),
            passed: true,
            duration_ms,
            validation_output: String::new(),
            checkpoint_hash,
            artifact_snapshot: snapshot,
            commands_run: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Build a failing result carrying the first failure's errors and output
    pub fn failed(
        gate_id: impl Into<GateId>,
        errors: Vec<ValidationError>,
        output: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            gate_id: gate_id.into(),
            passed: false,
            duration_ms,
            validation_output: output.into(),
            checkpoint_hash: None,
            artifact_snapshot: BTreeMap::new(),
            commands_run: Vec::new(),
            errors,
        }
    }

    pub fn first_error(&self) -> Option<&ValidationError> {
        self.errors.first()
    }
}

/// Deterministic checkpoint hash over a path → content-hash snapshot.
///
/// BTreeMap iteration order makes the digest independent of insertion order.
pub fn checkpoint_hash(snapshot: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (path, hash) in snapshot {
        hasher.update(path.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    hex_encode(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_kind_layer_order() {
        assert!(GateKind::Syntax.layer() < GateKind::Lint.layer());
        assert!(GateKind::Lint.layer() < GateKind::Type.layer());
        assert!(GateKind::Type.layer() < GateKind::Import.layer());
        assert!(GateKind::Import.layer() < GateKind::Schema.layer());
        assert!(GateKind::Schema.layer() < GateKind::Endpoint.layer());
        assert!(GateKind::Endpoint.layer() < GateKind::Integration.layer());
        // Siblings share a layer.
        assert_eq!(GateKind::Import.layer(), GateKind::Instantiate.layer());
        assert_eq!(GateKind::Serve.layer(), GateKind::Endpoint.layer());
    }

    #[test]
    fn test_gate_well_formed() {
        let ok = Gate::new("g1", GateKind::Import)
            .with_depends_on(["t1", "t2"])
            .with_blocks(["t3"]);
        assert!(ok.is_well_formed());

        let bad = Gate::new("g2", GateKind::Import)
            .with_depends_on(["t1"])
            .with_blocks(["t1"]);
        assert!(!bad.is_well_formed());
    }

    #[test]
    fn test_checkpoint_hash_deterministic() {
        let a = vec![
            Artifact::new("b.py", "bbb", "t1", "python"),
            Artifact::new("a.py", "aaa", "t2", "python"),
        ];
        let b = vec![
            Artifact::new("a.py", "aaa", "t2", "python"),
            Artifact::new("b.py", "bbb", "t1", "python"),
        ];
        let ra = GateResult::passed("g", &a, 5);
        let rb = GateResult::passed("g", &b, 9);
        // Order-independent, duration-independent.
        assert_eq!(ra.checkpoint_hash, rb.checkpoint_hash);
    }

    #[test]
    fn test_checkpoint_hash_content_sensitive() {
        let a = vec![Artifact::new("a.py", "aaa", "t", "python")];
        let b = vec![Artifact::new("a.py", "aab", "t", "python")];
        assert_ne!(
            GateResult::passed("g", &a, 0).checkpoint_hash,
            GateResult::passed("g", &b, 0).checkpoint_hash
        );
    }

    #[test]
    fn test_gate_result_roundtrip() {
        // load(save(GateResult)) == GateResult, structurally.
        let artifacts = vec![Artifact::new("a.py", "x = 1\n", "t1", "python")];
        let r = GateResult::passed("gate-1", &artifacts, 42);
        let json = serde_json::to_string(&r).unwrap();
        let back: GateResult = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }

    #[test]
    fn test_validation_error_display() {
        let e = ValidationError::new(ValidationErrorKind::Runtime, "boom").at("routes/posts.py", 14);
        let s = e.to_string();
        assert!(s.contains("routes/posts.py:14"));
        assert!(s.contains("boom"));
    }
}
