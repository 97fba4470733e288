//! # sunwell-core
//!
//! Core data model for the sunwell agent execution core. This crate is a
//! leaf: it owns the value types and structural algorithms every other
//! crate builds on, and performs no I/O beyond event schema validation.
//!
//! - [`signal`]: the fixed-shape classifier output driving routing
//! - [`strategy`]: the cost-tiered strategy catalog and downgrade ladder
//! - [`budget`]: session token budget with a held-back fix reserve
//! - [`task`], [`gate`], [`graph`]: the gated task DAG
//! - [`artifact`]: produced files
//! - [`events`]: the schema-validated agent event stream
//! - [`config`]: closed per-component configuration types
//! - [`paths`]: the `.sunwell/` persisted-state layout
//! - [`model`]: the external LLM provider capability

pub mod artifact;
pub mod budget;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod graph;
pub mod model;
pub mod paths;
pub mod signal;
pub mod strategy;
pub mod task;

pub use artifact::Artifact;
pub use budget::Budget;
pub use config::SunwellConfig;
pub use error::{CoreError, Result};
pub use events::{AgentEvent, EventEmitter, EventSchemas, EventSink, EventType};
pub use gate::{
    Gate, GateId, GateKind, GateResult, Severity, ValidationError, ValidationErrorKind,
};
pub use graph::TaskGraph;
pub use model::{ChatMessage, Completion, CompletionRequest, Model, Role, TokenUsage};
pub use paths::StateLayout;
pub use signal::{SignalVector, Tri};
pub use strategy::{CostTable, Strategy, StrategyKind};
pub use task::{ArtifactKind, TaskId, TaskSpec};
