//! Agent event stream
//!
//! Events are the only channel through which control flow returns upward:
//! every component reports progress by emitting [`AgentEvent`] records, and
//! consumers (CLI renderer, NDJSON persistence, tests) subscribe via
//! [`EventSink`]s.
//!
//! Wire shape, per record:
//!
//! ```text
//! { "type": <EventType>, "data": <object>, "timestamp": <seconds-since-epoch, float> }
//! ```
//!
//! Persisted streams are newline-delimited JSON. Consumers MUST accept
//! unknown fields; the enumeration only ever grows. Outbound events are
//! validated against a per-type JSON schema before emission; an event that
//! fails validation is not emitted and surfaces as an internal error.
//!
//! Events within one worker are emitted in wall-clock order and carry a
//! per-session monotonic sequence number. When multiple workers emit
//! concurrently, each record carries its worker tag and consumers multiplex
//! on it.

use crate::error::{CoreError, Result};
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Stable event type enumeration; additions are additive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SignalExtracting,
    Signal,
    PlanStart,
    PlanCandidate,
    PlanWinner,
    PlanAbort,
    TaskStart,
    TaskProgress,
    TaskComplete,
    TaskFailed,
    GateStart,
    GateStep,
    GatePass,
    GateFail,
    GateTimeout,
    ValidateStart,
    ValidateLevel,
    ValidatePass,
    ValidateError,
    FixStart,
    FixProgress,
    FixComplete,
    FixFailed,
    MemoryLoad,
    MemoryLoaded,
    MemoryNew,
    MemoryLearning,
    MemoryDeadEnd,
    MemoryCheckpoint,
    MemorySaved,
    BriefingLoaded,
    BriefingSaved,
    PrefetchStart,
    PrefetchComplete,
    PrefetchTimeout,
    LensSuggested,
    WorkerStart,
    WorkerClaim,
    WorkerComplete,
    WorkerFailed,
    Escalate,
    Complete,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        // serde already owns the canonical snake_case names; this mirrors
        // them for log formatting without a serialization round-trip.
        match self {
            EventType::SignalExtracting => "signal_extracting",
            EventType::Signal => "signal",
            EventType::PlanStart => "plan_start",
            EventType::PlanCandidate => "plan_candidate",
            EventType::PlanWinner => "plan_winner",
            EventType::PlanAbort => "plan_abort",
            EventType::TaskStart => "task_start",
            EventType::TaskProgress => "task_progress",
            EventType::TaskComplete => "task_complete",
            EventType::TaskFailed => "task_failed",
            EventType::GateStart => "gate_start",
            EventType::GateStep => "gate_step",
            EventType::GatePass => "gate_pass",
            EventType::GateFail => "gate_fail",
            EventType::GateTimeout => "gate_timeout",
            EventType::ValidateStart => "validate_start",
            EventType::ValidateLevel => "validate_level",
            EventType::ValidatePass => "validate_pass",
            EventType::ValidateError => "validate_error",
            EventType::FixStart => "fix_start",
            EventType::FixProgress => "fix_progress",
            EventType::FixComplete => "fix_complete",
            EventType::FixFailed => "fix_failed",
            EventType::MemoryLoad => "memory_load",
            EventType::MemoryLoaded => "memory_loaded",
            EventType::MemoryNew => "memory_new",
            EventType::MemoryLearning => "memory_learning",
            EventType::MemoryDeadEnd => "memory_dead_end",
            EventType::MemoryCheckpoint => "memory_checkpoint",
            EventType::MemorySaved => "memory_saved",
            EventType::BriefingLoaded => "briefing_loaded",
            EventType::BriefingSaved => "briefing_saved",
            EventType::PrefetchStart => "prefetch_start",
            EventType::PrefetchComplete => "prefetch_complete",
            EventType::PrefetchTimeout => "prefetch_timeout",
            EventType::LensSuggested => "lens_suggested",
            EventType::WorkerStart => "worker_start",
            EventType::WorkerClaim => "worker_claim",
            EventType::WorkerComplete => "worker_complete",
            EventType::WorkerFailed => "worker_failed",
            EventType::Escalate => "escalate",
            EventType::Complete => "complete",
            EventType::Error => "error",
        }
    }

    fn all() -> &'static [EventType] {
        use EventType::*;
        &[
            SignalExtracting,
            Signal,
            PlanStart,
            PlanCandidate,
            PlanWinner,
            PlanAbort,
            TaskStart,
            TaskProgress,
            TaskComplete,
            TaskFailed,
            GateStart,
            GateStep,
            GatePass,
            GateFail,
            GateTimeout,
            ValidateStart,
            ValidateLevel,
            ValidatePass,
            ValidateError,
            FixStart,
            FixProgress,
            FixComplete,
            FixFailed,
            MemoryLoad,
            MemoryLoaded,
            MemoryNew,
            MemoryLearning,
            MemoryDeadEnd,
            MemoryCheckpoint,
            MemorySaved,
            BriefingLoaded,
            BriefingSaved,
            PrefetchStart,
            PrefetchComplete,
            PrefetchTimeout,
            LensSuggested,
            WorkerStart,
            WorkerClaim,
            WorkerComplete,
            WorkerFailed,
            Escalate,
            Complete,
            Error,
        ]
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One emitted event record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Payload, schema-validated per type before emission
    pub data: Value,

    /// Seconds since the Unix epoch
    pub timestamp: f64,

    /// Per-session monotonic sequence number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,

    /// Emitting worker, present in multi-worker runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

impl AgentEvent {
    /// Encode as one NDJSON line (no trailing newline)
    pub fn to_ndjson(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Per-type data schemas for outbound validation
///
/// The companion schema is intentionally permissive about extra fields
/// (additive evolution) but strict about the required core of each payload.
pub struct EventSchemas {
    compiled: BTreeMap<EventType, JSONSchema>,
}

impl std::fmt::Debug for EventSchemas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSchemas")
            .field("types", &self.compiled.len())
            .finish()
    }
}

fn object_schema(required: &[&str], properties: Value) -> Value {
    json!({
        "type": "object",
        "required": required,
        "properties": properties,
        "additionalProperties": true,
    })
}

fn data_schema(event_type: EventType) -> Value {
    use EventType::*;
    match event_type {
        SignalExtracting => object_schema(&["goal"], json!({"goal": {"type": "string"}})),
        Signal => object_schema(
            &["complexity", "confidence"],
            json!({
                "complexity": {"enum": ["NO", "MAYBE", "YES"]},
                "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
            }),
        ),
        PlanStart => object_schema(
            &["goal", "strategy"],
            json!({"goal": {"type": "string"}, "strategy": {"type": "string"}}),
        ),
        PlanCandidate => object_schema(
            &["index", "score"],
            json!({"index": {"type": "integer"}, "score": {"type": "number"}}),
        ),
        PlanWinner => object_schema(
            &["index", "agreement", "task_count"],
            json!({
                "index": {"type": "integer"},
                "agreement": {"type": "number"},
                "task_count": {"type": "integer"},
            }),
        ),
        PlanAbort => object_schema(&["reason"], json!({"reason": {"type": "string"}})),
        TaskStart => object_schema(
            &["task_id", "strategy"],
            json!({"task_id": {"type": "string"}, "strategy": {"type": "string"}}),
        ),
        TaskProgress => object_schema(
            &["task_id", "message"],
            json!({"task_id": {"type": "string"}, "message": {"type": "string"}}),
        ),
        TaskComplete => object_schema(
            &["task_id", "duration_ms"],
            json!({"task_id": {"type": "string"}, "duration_ms": {"type": "integer"}}),
        ),
        TaskFailed => object_schema(
            &["task_id", "error"],
            json!({"task_id": {"type": "string"}, "error": {"type": "string"}}),
        ),
        GateStart => object_schema(
            &["gate_id", "kind"],
            json!({"gate_id": {"type": "string"}, "kind": {"type": "string"}}),
        ),
        GateStep => object_schema(
            &["gate_id", "step"],
            json!({"gate_id": {"type": "string"}, "step": {"type": "string"}}),
        ),
        GatePass => object_schema(
            &["gate_id", "checkpoint_hash"],
            json!({"gate_id": {"type": "string"}, "checkpoint_hash": {"type": "string"}}),
        ),
        GateFail => object_schema(
            &["gate_id", "errors"],
            json!({"gate_id": {"type": "string"}, "errors": {"type": "array"}}),
        ),
        GateTimeout => object_schema(
            &["gate_id", "timeout_secs"],
            json!({"gate_id": {"type": "string"}, "timeout_secs": {"type": "number"}}),
        ),
        ValidateStart => object_schema(&["gate_id"], json!({"gate_id": {"type": "string"}})),
        ValidateLevel => object_schema(
            &["gate_id", "level"],
            json!({"gate_id": {"type": "string"}, "level": {"type": "string"}}),
        ),
        ValidatePass => object_schema(&["gate_id"], json!({"gate_id": {"type": "string"}})),
        ValidateError => object_schema(
            &["gate_id", "kind", "message"],
            json!({
                "gate_id": {"type": "string"},
                "kind": {"type": "string"},
                "message": {"type": "string"},
            }),
        ),
        FixStart => object_schema(
            &["gate_id", "strategy", "attempt"],
            json!({
                "gate_id": {"type": "string"},
                "strategy": {"type": "string"},
                "attempt": {"type": "integer", "minimum": 1},
            }),
        ),
        FixProgress => object_schema(
            &["gate_id", "message"],
            json!({"gate_id": {"type": "string"}, "message": {"type": "string"}}),
        ),
        FixComplete => object_schema(
            &["gate_id", "attempts"],
            json!({"gate_id": {"type": "string"}, "attempts": {"type": "integer"}}),
        ),
        FixFailed => object_schema(
            &["gate_id", "error"],
            json!({"gate_id": {"type": "string"}, "error": {"type": "string"}}),
        ),
        MemoryLoad => object_schema(&[], json!({})),
        MemoryLoaded => object_schema(&["learnings"], json!({"learnings": {"type": "integer"}})),
        MemoryNew => object_schema(&["fact"], json!({"fact": {"type": "string"}})),
        MemoryLearning => object_schema(
            &["id", "category"],
            json!({"id": {"type": "string"}, "category": {"type": "string"}}),
        ),
        MemoryDeadEnd => object_schema(&["approach"], json!({"approach": {"type": "string"}})),
        MemoryCheckpoint => object_schema(&["gate_id"], json!({"gate_id": {"type": "string"}})),
        MemorySaved => object_schema(&["path"], json!({"path": {"type": "string"}})),
        BriefingLoaded => object_schema(&["status"], json!({"status": {"type": "string"}})),
        BriefingSaved => object_schema(&["bytes"], json!({"bytes": {"type": "integer"}})),
        PrefetchStart => object_schema(&[], json!({})),
        PrefetchComplete => object_schema(&["files"], json!({"files": {"type": "integer"}})),
        PrefetchTimeout => object_schema(&["timeout_ms"], json!({"timeout_ms": {"type": "integer"}})),
        LensSuggested => object_schema(&["lens"], json!({"lens": {"type": "string"}})),
        WorkerStart => object_schema(
            &["worker_id", "branch"],
            json!({"worker_id": {"type": "string"}, "branch": {"type": "string"}}),
        ),
        WorkerClaim => object_schema(
            &["worker_id", "goal_id"],
            json!({"worker_id": {"type": "string"}, "goal_id": {"type": "string"}}),
        ),
        WorkerComplete => object_schema(
            &["worker_id", "goal_id"],
            json!({"worker_id": {"type": "string"}, "goal_id": {"type": "string"}}),
        ),
        WorkerFailed => object_schema(
            &["worker_id", "error"],
            json!({"worker_id": {"type": "string"}, "error": {"type": "string"}}),
        ),
        Escalate => object_schema(&["reason"], json!({"reason": {"type": "string"}})),
        Complete => object_schema(&[], json!({})),
        Error => object_schema(&["message"], json!({"message": {"type": "string"}})),
    }
}

impl EventSchemas {
    pub fn new() -> Result<Self> {
        let mut compiled = BTreeMap::new();
        for &event_type in EventType::all() {
            let schema = data_schema(event_type);
            let compiled_schema = JSONSchema::compile(&schema).map_err(|e| {
                CoreError::EventSchema {
                    event_type: event_type.as_str().to_string(),
                    message: format!("schema failed to compile: {}", e),
                }
            })?;
            compiled.insert(event_type, compiled_schema);
        }
        Ok(Self { compiled })
    }

    /// Validate a payload against its event type's schema
    pub fn validate(&self, event_type: EventType, data: &Value) -> Result<()> {
        let schema = self
            .compiled
            .get(&event_type)
            .ok_or_else(|| CoreError::EventSchema {
                event_type: event_type.as_str().to_string(),
                message: "no schema registered".to_string(),
            })?;
        if let Err(errors) = schema.validate(data) {
            let message = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(CoreError::EventSchema {
                event_type: event_type.as_str().to_string(),
                message,
            });
        }
        Ok(())
    }
}

/// Consumer of the event stream
pub trait EventSink: Send + Sync {
    fn accept(&self, event: &AgentEvent) -> Result<()>;
}

/// Validating, sequencing event emitter
///
/// One per session (or per worker in multi-worker runs). Emission is
/// synchronous to the producer; backpressure is not required.
pub struct EventEmitter {
    schemas: Arc<EventSchemas>,
    sinks: Vec<Arc<dyn EventSink>>,
    seq: AtomicU64,
    worker: Option<String>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sinks", &self.sinks.len())
            .field("seq", &self.seq.load(Ordering::Relaxed))
            .field("worker", &self.worker)
            .finish()
    }
}

impl EventEmitter {
    pub fn new(schemas: Arc<EventSchemas>) -> Self {
        Self {
            schemas,
            sinks: Vec::new(),
            seq: AtomicU64::new(0),
            worker: None,
        }
    }

    /// Tag every emitted event with a worker id
    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Validate and emit one event.
    ///
    /// On schema violation the event is NOT emitted; the violation is
    /// logged and returned as an error for the caller to record internally.
    pub fn emit(&self, event_type: EventType, data: Value) -> Result<AgentEvent> {
        if let Err(e) = self.schemas.validate(event_type, &data) {
            tracing::error!(
                event_type = %event_type,
                error = %e,
                "outbound event rejected by schema validation"
            );
            return Err(e);
        }

        let event = AgentEvent {
            event_type,
            data,
            timestamp: chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0,
            seq: Some(self.seq.fetch_add(1, Ordering::SeqCst)),
            worker: self.worker.clone(),
        };

        for sink in &self.sinks {
            if let Err(e) = sink.accept(&event) {
                tracing::warn!(error = %e, "event sink rejected event");
            }
        }
        Ok(event)
    }
}

/// Collects events in memory; test and summary consumer
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<AgentEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().expect("sink poisoned").clone()
    }
}

impl EventSink for MemorySink {
    fn accept(&self, event: &AgentEvent) -> Result<()> {
        self.events.lock().expect("sink poisoned").push(event.clone());
        Ok(())
    }
}

/// Forwards events over an unbounded channel to an async consumer
pub struct ChannelSink {
    sender: tokio::sync::mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelSink {
    pub fn new(sender: tokio::sync::mpsc::UnboundedSender<AgentEvent>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelSink {
    fn accept(&self, event: &AgentEvent) -> Result<()> {
        self.sender
            .send(event.clone())
            .map_err(|_| CoreError::Config("event channel closed".to_string()))
    }
}

/// Appends events to an NDJSON file (one record per line)
pub struct NdjsonSink {
    file: Mutex<std::fs::File>,
}

impl NdjsonSink {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl EventSink for NdjsonSink {
    fn accept(&self, event: &AgentEvent) -> Result<()> {
        let line = event.to_ndjson()?;
        let mut file = self.file.lock().expect("sink poisoned");
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitter_with_memory() -> (EventEmitter, Arc<MemorySink>) {
        let schemas = Arc::new(EventSchemas::new().unwrap());
        let sink = Arc::new(MemorySink::new());
        let mut emitter = EventEmitter::new(schemas);
        emitter.add_sink(sink.clone());
        (emitter, sink)
    }

    #[test]
    fn test_all_schemas_compile() {
        EventSchemas::new().unwrap();
    }

    #[test]
    fn test_event_type_names_match_serde() {
        for &t in EventType::all() {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
    }

    #[test]
    fn test_emit_valid_event() {
        let (emitter, sink) = emitter_with_memory();
        let event = emitter
            .emit(
                EventType::GatePass,
                json!({"gate_id": "g1", "checkpoint_hash": "abc"}),
            )
            .unwrap();
        assert_eq!(event.seq, Some(0));
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_schema_violation_not_emitted() {
        // An invalid payload never reaches a sink.
        let (emitter, sink) = emitter_with_memory();
        let err = emitter
            .emit(EventType::GatePass, json!({"gate_id": "g1"}))
            .unwrap_err();
        assert!(matches!(err, CoreError::EventSchema { .. }));
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_sequence_monotonic() {
        let (emitter, sink) = emitter_with_memory();
        for _ in 0..5 {
            emitter.emit(EventType::Complete, json!({})).unwrap();
        }
        let seqs: Vec<u64> = sink.events().iter().map(|e| e.seq.unwrap()).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_ndjson_roundtrip() {
        let (emitter, _) = emitter_with_memory();
        let event = emitter
            .emit(EventType::Escalate, json!({"reason": "fix attempts exhausted"}))
            .unwrap();
        let line = event.to_ndjson().unwrap();
        assert!(!line.contains('\n'));
        let back: AgentEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_unknown_fields_accepted_on_decode() {
        // Forward-compatibility: decoding tolerates extra fields.
        let line = r#"{"type":"complete","data":{},"timestamp":1.5,"future_field":true}"#;
        let event: AgentEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.event_type, EventType::Complete);
    }

    #[test]
    fn test_worker_tag() {
        let schemas = Arc::new(EventSchemas::new().unwrap());
        let emitter = EventEmitter::new(schemas).with_worker("worker-2");
        let event = emitter.emit(EventType::Complete, json!({})).unwrap();
        assert_eq!(event.worker.as_deref(), Some("worker-2"));
    }
}
