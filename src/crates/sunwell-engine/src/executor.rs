//! Task graph executor
//!
//! Drives a gated [`TaskGraph`] to completion. Ready tasks (dependencies
//! complete, no unpassed gate blocking them) dispatch in stable topo order,
//! in parallel up to `max_concurrent_tasks` within a feeder group. When all
//! feeders of a gate complete, the validation cascade runs; failures go to
//! the auto-fixer for up to `MAX_FIX_ATTEMPTS` rounds, each re-running the
//! cascade. Exhaustion escalates and pauses the stream. Passed gates
//! checkpoint their artifact snapshot for resume.
//!
//! Cancellation is cooperative: the session flag is read between task
//! dispatches and at gate boundaries; in-flight model calls run to their
//! own timeout.

use crate::checkpoint::CheckpointStore;
use crate::error::{EngineError, Result};
use crate::fixer::{ArtifactHistory, AutoFixer};
use crate::router::Router;
use crate::session::Session;
use crate::validate::Validator;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sunwell_core::events::EventType;
use sunwell_core::gate::{FixAttempt, GateId};
use sunwell_core::model::{ChatMessage, CompletionRequest, Model};
use sunwell_core::signal::SignalVector;
use sunwell_core::strategy::StrategyKind;
use sunwell_core::task::{TaskId, TaskSpec};
use sunwell_core::{Artifact, TaskGraph};
use sunwell_memory::{DeadEnd, Learning, LearningSource, LearningStore};
use tracing::{debug, info, warn};

/// Terminal disposition of one execution run
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Every gate passed and every task completed
    Complete,

    /// Fix attempts exhausted; the stream is paused awaiting user input
    Escalated { gate_id: String, reason: String },

    /// Budget cannot cover even the floor strategy
    BudgetExhausted,

    /// Cooperative cancellation was observed
    Cancelled,
}

/// Summary of one execution run
#[derive(Debug)]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    pub completed_tasks: BTreeSet<TaskId>,
    pub gates_passed: BTreeSet<GateId>,
    pub artifacts: Vec<Artifact>,
    pub fix_attempts: Vec<FixAttempt>,

    /// Tasks still pending when the run ended early
    pub pending_tasks: BTreeSet<TaskId>,
}

#[derive(Debug, Deserialize)]
struct FilesWire {
    #[serde(default)]
    files: Vec<FileWire>,
}

#[derive(Debug, Deserialize)]
struct FileWire {
    path: String,
    content: String,
    #[serde(default)]
    language: Option<String>,
}

/// The graph-driving engine
pub struct TaskGraphExecutor {
    model: Arc<dyn Model>,
    router: Router,
    validator: Validator,
    fixer: AutoFixer,
    checkpoints: CheckpointStore,
}

impl TaskGraphExecutor {
    pub fn new(
        model: Arc<dyn Model>,
        router: Router,
        validator: Validator,
        fixer: AutoFixer,
        checkpoints: CheckpointStore,
    ) -> Self {
        Self {
            model,
            router,
            validator,
            fixer,
            checkpoints,
        }
    }

    /// Execute a validated graph from scratch
    pub async fn execute(
        &self,
        graph: &TaskGraph,
        session: &mut Session,
        signals: &SignalVector,
        store: &mut LearningStore,
    ) -> Result<ExecutionReport> {
        self.run(graph, session, signals, store, BTreeSet::new(), BTreeSet::new())
            .await
    }

    /// Resume a graph from its persisted checkpoints.
    ///
    /// Gates with a passed checkpoint (and their feeder tasks) are replayed
    /// as already done and never re-executed. When `from_gate_id` is given,
    /// that gate is re-run even if checkpointed.
    pub async fn resume(
        &self,
        graph: &TaskGraph,
        from_gate_id: Option<&str>,
        session: &mut Session,
        signals: &SignalVector,
        store: &mut LearningStore,
    ) -> Result<ExecutionReport> {
        let mut gate_passed = BTreeSet::new();
        let mut completed = BTreeSet::new();
        for (gate_id, result) in self.checkpoints.load_all()? {
            if !result.passed || Some(gate_id.as_str()) == from_gate_id {
                continue;
            }
            let Some(gate) = graph.gate(&gate_id) else {
                continue;
            };
            gate_passed.insert(gate_id.clone());
            for task_id in &gate.depends_on {
                completed.insert(task_id.clone());
            }
        }
        info!(
            gates = gate_passed.len(),
            tasks = completed.len(),
            "resuming from checkpoints"
        );
        self.run(graph, session, signals, store, completed, gate_passed)
            .await
    }

    async fn run(
        &self,
        graph: &TaskGraph,
        session: &mut Session,
        signals: &SignalVector,
        store: &mut LearningStore,
        mut completed: BTreeSet<TaskId>,
        mut gate_passed: BTreeSet<GateId>,
    ) -> Result<ExecutionReport> {
        graph.validate()?;

        let mut artifacts: BTreeMap<String, Artifact> = BTreeMap::new();
        let mut history = ArtifactHistory::new();
        let mut fix_attempts: Vec<FixAttempt> = Vec::new();

        loop {
            if session.is_cancelled() {
                return Ok(self.report(
                    ExecutionOutcome::Cancelled,
                    graph,
                    completed,
                    gate_passed,
                    artifacts,
                    fix_attempts,
                ));
            }

            let ready = graph.ready_tasks(&completed, &gate_passed);
            if !ready.is_empty() {
                let batch: Vec<TaskId> = ready
                    .into_iter()
                    .take(session.config.executor.max_concurrent_tasks)
                    .collect();

                // Route before dispatch (routing reads the shared budget),
                // then run the batch concurrently.
                let mut dispatch: Vec<(TaskId, StrategyKind)> = Vec::new();
                for task_id in &batch {
                    let task = graph.task(task_id).expect("validated graph");
                    let strategy = self.router.route_task(signals, task, &session.budget);
                    if strategy == StrategyKind::Clarify {
                        let reason = format!(
                            "task '{}' confidence {:.2} is below the clarify threshold",
                            task_id, task.confidence
                        );
                        let _ = session
                            .emitter
                            .emit(EventType::Escalate, json!({ "reason": reason }));
                        return Ok(self.report(
                            ExecutionOutcome::Escalated {
                                gate_id: String::new(),
                                reason,
                            },
                            graph,
                            completed,
                            gate_passed,
                            artifacts,
                            fix_attempts,
                        ));
                    }
                    dispatch.push((task_id.clone(), strategy));
                }

                let session_ref: &Session = session;
                let futures = dispatch.iter().map(|(task_id, strategy)| {
                    let task = graph.task(task_id).expect("validated graph").clone();
                    self.execute_task(task, *strategy, session_ref)
                });
                let results = futures::future::join_all(futures).await;

                for ((task_id, strategy), result) in dispatch.into_iter().zip(results) {
                    match result {
                        Ok((produced, tokens)) => {
                            self.router.account(strategy, tokens, &mut session.budget);
                            for artifact in produced {
                                artifacts.insert(artifact.path.clone(), artifact);
                            }
                            history.record(&collect(&artifacts));
                            completed.insert(task_id);
                        }
                        Err(e) => {
                            // A failed feeder fails its enclosing gate; there
                            // is nothing for the fixer to patch, so escalate.
                            let _ = session.emitter.emit(
                                EventType::TaskFailed,
                                json!({ "task_id": task_id, "error": e.to_string() }),
                            );
                            let gate_id = graph
                                .feeder_gate(&task_id)
                                .map(|g| g.id.clone())
                                .unwrap_or_default();
                            let reason = format!("feeder task '{}' failed: {}", task_id, e);
                            let _ = session
                                .emitter
                                .emit(EventType::Escalate, json!({ "reason": reason }));
                            return Ok(self.report(
                                ExecutionOutcome::Escalated { gate_id, reason },
                                graph,
                                completed,
                                gate_passed,
                                artifacts,
                                fix_attempts,
                            ));
                        }
                    }
                }
                continue;
            }

            let gates_ready = graph.gates_ready_to_run(&completed, &gate_passed);
            if gates_ready.is_empty() {
                break;
            }

            for gate_id in gates_ready {
                if session.is_cancelled() {
                    return Ok(self.report(
                        ExecutionOutcome::Cancelled,
                        graph,
                        completed,
                        gate_passed,
                        artifacts,
                        fix_attempts,
                    ));
                }
                let outcome = self
                    .run_gate(
                        graph,
                        &gate_id,
                        session,
                        store,
                        &mut artifacts,
                        &mut history,
                        &mut fix_attempts,
                    )
                    .await?;
                match outcome {
                    GateOutcome::Passed => {
                        gate_passed.insert(gate_id);
                    }
                    GateOutcome::Escalated(reason) => {
                        return Ok(self.report(
                            ExecutionOutcome::Escalated {
                                gate_id,
                                reason,
                            },
                            graph,
                            completed,
                            gate_passed,
                            artifacts,
                            fix_attempts,
                        ));
                    }
                    GateOutcome::BudgetExhausted => {
                        return Ok(self.report(
                            ExecutionOutcome::BudgetExhausted,
                            graph,
                            completed,
                            gate_passed,
                            artifacts,
                            fix_attempts,
                        ));
                    }
                }
            }
        }

        let outcome = if graph.is_complete(&completed, &gate_passed) {
            let _ = session.emitter.emit(EventType::Complete, json!({}));
            ExecutionOutcome::Complete
        } else {
            let reason = "graph stalled: tasks remain but none are ready".to_string();
            let _ = session
                .emitter
                .emit(EventType::Escalate, json!({ "reason": reason }));
            ExecutionOutcome::Escalated {
                gate_id: String::new(),
                reason,
            }
        };

        Ok(self.report(outcome, graph, completed, gate_passed, artifacts, fix_attempts))
    }

    fn report(
        &self,
        outcome: ExecutionOutcome,
        graph: &TaskGraph,
        completed: BTreeSet<TaskId>,
        gates_passed: BTreeSet<GateId>,
        artifacts: BTreeMap<String, Artifact>,
        fix_attempts: Vec<FixAttempt>,
    ) -> ExecutionReport {
        let pending_tasks: BTreeSet<TaskId> = graph
            .tasks
            .keys()
            .filter(|id| !completed.contains(*id))
            .cloned()
            .collect();
        ExecutionReport {
            outcome,
            completed_tasks: completed,
            gates_passed,
            artifacts: artifacts.into_values().collect(),
            fix_attempts,
            pending_tasks,
        }
    }

    /// Execute one task with bounded retries; fresh seeds per retry.
    async fn execute_task(
        &self,
        task: TaskSpec,
        strategy: StrategyKind,
        session: &Session,
    ) -> Result<(Vec<Artifact>, u64)> {
        let started = Instant::now();
        let _ = session.emitter.emit(
            EventType::TaskStart,
            json!({ "task_id": task.id, "strategy": strategy.name(), "description": task.description }),
        );

        let timeout = Duration::from_secs(session.config.executor.task_timeout_secs);
        let max_attempts = 1 + session.config.executor.max_retries_per_task;
        let mut tokens_total = 0u64;
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            // Fresh seed per retry: shift the sampling temperature.
            let jitter: f32 = rand::random::<f32>() * 0.05;
            let base_temperature = 0.2 + 0.13 * attempt as f32 + jitter;

            match self
                .generate_candidates(&task, strategy, session, base_temperature, timeout)
                .await
            {
                Ok((candidates, tokens)) => {
                    tokens_total += tokens;
                    if let Some(artifacts) = pick_candidate(candidates, &task) {
                        let _ = session.emitter.emit(
                            EventType::TaskComplete,
                            json!({
                                "task_id": task.id,
                                "duration_ms": started.elapsed().as_millis() as u64,
                                "artifact_count": artifacts.len(),
                            }),
                        );
                        return Ok((artifacts, tokens_total));
                    }
                    last_error = "no candidate produced parseable artifacts".to_string();
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
            if attempt + 1 < max_attempts {
                warn!(
                    task_id = %task.id,
                    attempt = attempt + 1,
                    error = %last_error,
                    "task attempt failed, retrying with fresh seed"
                );
            }
        }

        Err(EngineError::Task {
            task_id: task.id.clone(),
            message: last_error,
        })
    }

    /// Generate N candidate artifact sets for a task (N from the strategy)
    async fn generate_candidates(
        &self,
        task: &TaskSpec,
        strategy: StrategyKind,
        session: &Session,
        base_temperature: f32,
        timeout: Duration,
    ) -> Result<(Vec<Vec<Artifact>>, u64)> {
        let sample_count = strategy.candidates().max(1);
        let prompt = task_prompt(task, &session.goal);

        let mut candidates = Vec::new();
        let mut tokens = 0u64;
        for index in 0..sample_count {
            let request = CompletionRequest::new(vec![
                ChatMessage::system(TASK_SYSTEM.to_string()),
                ChatMessage::user(prompt.clone()),
            ])
            .with_json_mode()
            .with_temperature(base_temperature + 0.1 * index as f32);

            match self.model.complete(&request, timeout).await {
                Ok(completion) => {
                    tokens += completion.usage.total();
                    if let Some(artifacts) = parse_artifacts(&completion.content, &task.id) {
                        candidates.push(artifacts);
                    }
                }
                Err(e) => {
                    warn!(task_id = %task.id, index, error = %e, "candidate generation failed");
                }
            }
        }
        if candidates.is_empty() && tokens == 0 {
            return Err(EngineError::Task {
                task_id: task.id.clone(),
                message: "every candidate call failed".to_string(),
            });
        }
        Ok((candidates, tokens))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_gate(
        &self,
        graph: &TaskGraph,
        gate_id: &str,
        session: &mut Session,
        store: &mut LearningStore,
        artifacts: &mut BTreeMap<String, Artifact>,
        history: &mut ArtifactHistory,
        fix_attempts: &mut Vec<FixAttempt>,
    ) -> Result<GateOutcome> {
        let gate = graph.gate(gate_id).expect("validated graph");
        let _ = session.emitter.emit(
            EventType::GateStart,
            json!({ "gate_id": gate.id, "kind": gate.kind.as_str() }),
        );

        // The gate validates the artifacts its feeders produced.
        let feeder_artifacts = |artifacts: &BTreeMap<String, Artifact>| -> Vec<Artifact> {
            artifacts
                .values()
                .filter(|a| gate.depends_on.contains(&a.produced_by))
                .cloned()
                .collect()
        };

        let mut current = feeder_artifacts(artifacts);
        let mut result = self.validator.validate(gate, &current, &session.emitter).await;

        let max_fix_attempts = session.config.executor.max_fix_attempts;
        let mut attempt = 0u32;
        while !result.passed && attempt < max_fix_attempts {
            attempt += 1;
            let Some(error) = result.first_error().cloned() else {
                break;
            };

            if self.router.is_exhausted(&session.budget) {
                let _ = session.emitter.emit(
                    EventType::Error,
                    json!({ "message": "budget exhausted during fix phase" }),
                );
                return Ok(GateOutcome::BudgetExhausted);
            }

            let scale = error
                .line_range
                .map(|(start, end)| (end - start + 1) as usize)
                .unwrap_or(1);
            let strategy = self.router.route_fix(error.kind, scale, &session.budget);
            let _ = session.emitter.emit(
                EventType::FixStart,
                json!({ "gate_id": gate.id, "strategy": strategy.name(), "attempt": attempt }),
            );

            let outcome = self
                .fixer
                .fix(&error, &current, strategy, history, attempt)
                .await?;
            // Fix-phase model usage is charged at the strategy's tier.
            self.router.account(
                strategy,
                self.router.costs().estimated_cost(strategy),
                &mut session.budget,
            );
            fix_attempts.push(outcome.attempt.clone());

            current = outcome.artifacts;
            for artifact in &current {
                artifacts.insert(artifact.path.clone(), artifact.clone());
            }
            history.record(&current);

            result = self.validator.validate(gate, &current, &session.emitter).await;
            if result.passed {
                let _ = session.emitter.emit(
                    EventType::FixComplete,
                    json!({ "gate_id": gate.id, "attempts": attempt }),
                );
                // A strategy that worked against this error kind is worth
                // remembering for future routing prompts.
                let learning = Learning::new(
                    format!(
                        "{:?} errors at gate kind '{}' yielded to {}",
                        error.kind,
                        gate.kind.as_str(),
                        strategy.name()
                    ),
                    "fix",
                    LearningSource::Fix,
                )
                .with_goal_hash(session.goal_hash.clone());
                if store.add(learning) {
                    let _ = session.emitter.emit(
                        EventType::MemoryNew,
                        json!({ "fact": format!("fix strategy {} worked", strategy.name()) }),
                    );
                }
            }
        }

        if result.passed {
            history.mark_baseline(&current);
            self.checkpoints.save(&result)?;
            let _ = session.emitter.emit(
                EventType::MemoryCheckpoint,
                json!({ "gate_id": gate.id }),
            );
            let _ = session.emitter.emit(
                EventType::GatePass,
                json!({
                    "gate_id": gate.id,
                    "checkpoint_hash": result.checkpoint_hash.clone().unwrap_or_default(),
                    "duration_ms": result.duration_ms,
                }),
            );
            debug!(gate_id = %gate.id, "gate passed");
            return Ok(GateOutcome::Passed);
        }

        // Exhausted: record the dead end, emit the failure pair, pause.
        let reason = result
            .first_error()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "validation failed".to_string());
        store.add_dead_end(
            DeadEnd::new(
                format!("auto-fixing gate '{}' ({})", gate.id, gate.kind.as_str()),
                reason.clone(),
            ),
        );
        let _ = session.emitter.emit(
            EventType::MemoryDeadEnd,
            json!({ "approach": format!("auto-fix at gate '{}'", gate.id) }),
        );
        let _ = session.emitter.emit(
            EventType::GateFail,
            json!({
                "gate_id": gate.id,
                "errors": result.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
            }),
        );
        let _ = session.emitter.emit(
            EventType::FixFailed,
            json!({ "gate_id": gate.id, "error": reason }),
        );
        let _ = session.emitter.emit(
            EventType::Escalate,
            json!({ "reason": reason, "paused_until": "user input" }),
        );
        Ok(GateOutcome::Escalated(reason))
    }
}

enum GateOutcome {
    Passed,
    Escalated(String),
    BudgetExhausted,
}

fn collect(artifacts: &BTreeMap<String, Artifact>) -> Vec<Artifact> {
    artifacts.values().cloned().collect()
}

const TASK_SYSTEM: &str = "You produce complete file contents for one task. \
    Reply with a JSON object: {\"files\": [{\"path\", \"content\", \"language\"}]}. \
    JSON only.";

fn task_prompt(task: &TaskSpec, goal: &str) -> String {
    let mut prompt = format!(
        "Overall goal: {}\n\nTask: {}\nArtifact kind: {}\n",
        goal,
        task.description,
        task.artifact_kind.as_str()
    );
    if !task.affected_paths.is_empty() {
        prompt.push_str(&format!(
            "Expected paths: {}\n",
            task.affected_paths
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    if let Some(module) = &task.produces_module {
        prompt.push_str(&format!("Produces module: {}\n", module));
    }
    prompt
}

fn parse_artifacts(content: &str, task_id: &str) -> Option<Vec<Artifact>> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    let wire: FilesWire = serde_json::from_str(&content[start..=end]).ok()?;
    if wire.files.is_empty() {
        return None;
    }
    Some(
        wire.files
            .into_iter()
            .map(|file| {
                let language = file
                    .language
                    .unwrap_or_else(|| language_from_path(&file.path));
                Artifact::new(file.path, file.content, task_id, language)
            })
            .collect(),
    )
}

fn language_from_path(path: &str) -> String {
    match path.rsplit('.').next() {
        Some("py") => "python",
        Some("js") | Some("mjs") => "javascript",
        Some("ts") => "typescript",
        Some("rs") => "rust",
        _ => "text",
    }
    .to_string()
}

/// Best-scoring candidate wins; ties go to the lower index.
fn pick_candidate(candidates: Vec<Vec<Artifact>>, task: &TaskSpec) -> Option<Vec<Artifact>> {
    let mut best: Option<(f64, usize)> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        let mut score = 0.0;
        score += candidate.len().min(4) as f64;
        // Matching the planner's path estimate is strong evidence.
        for artifact in candidate {
            if task.affected_paths.contains(&artifact.path) {
                score += 2.0;
            }
            if !artifact.content.trim().is_empty() {
                score += 1.0;
            }
        }
        let better = match best {
            None => true,
            Some((best_score, _)) => score > best_score,
        };
        if better {
            best = Some((score, index));
        }
    }
    best.map(|(_, index)| candidates.into_iter().nth(index).expect("index in range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::{CommandSpec, LanguageToolchain};
    use sunwell_core::config::GateConfig;
    use sunwell_core::events::{EventEmitter, EventSchemas, MemorySink};
    use sunwell_core::gate::{Gate, GateKind};
    use sunwell_core::signal::Tri;
    use sunwell_core::strategy::CostTable;
    use sunwell_core::task::ArtifactKind;
    use sunwell_core::{StateLayout, SunwellConfig};
    use sunwell_llm::MockModel;

    fn true_toolchain() -> LanguageToolchain {
        LanguageToolchain {
            language: "python".to_string(),
            syntax_cmd: Some(CommandSpec::new("true", &["{file}"])),
            lint_cmd: Some(CommandSpec::new("true", &["{file}"])),
            lint_fix_cmd: None,
            type_cmd: Some(CommandSpec::new("true", &["{file}"])),
            format_cmd: None,
            test_cmd: Some(CommandSpec::new("true", &[])),
            import_cmd: Some(CommandSpec::new("true", &["{file}"])),
            run_cmd: None,
        }
    }

    fn failing_import_toolchain() -> LanguageToolchain {
        LanguageToolchain {
            import_cmd: Some(CommandSpec::new("false", &["{file}"])),
            ..true_toolchain()
        }
    }

    struct Fixture {
        executor: TaskGraphExecutor,
        session: Session,
        sink: Arc<MemorySink>,
        store: LearningStore,
        model: Arc<MockModel>,
        _dir: tempfile::TempDir,
    }

    fn fixture(toolchain: LanguageToolchain) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let mut emitter = EventEmitter::new(Arc::new(EventSchemas::new().unwrap()));
        emitter.add_sink(sink.clone());
        let session = Session::new(
            "build something",
            dir.path(),
            SunwellConfig::default(),
            Arc::new(emitter),
        );
        session.layout.ensure_created().unwrap();
        let store = LearningStore::new(&session.layout);
        let model = Arc::new(MockModel::new());

        let router = Router::new(CostTable::default());
        let validator = Validator::new(
            toolchain.clone(),
            GateConfig::default(),
            dir.path().to_path_buf(),
        );
        let fixer = AutoFixer::new(
            model.clone(),
            toolchain,
            dir.path().to_path_buf(),
            Duration::from_secs(5),
        );
        let checkpoints = CheckpointStore::new(StateLayout::new(dir.path()));
        let executor = TaskGraphExecutor::new(model.clone(), router, validator, fixer, checkpoints);

        Fixture {
            executor,
            session,
            sink,
            store,
            model,
            _dir: dir,
        }
    }

    fn signals() -> SignalVector {
        SignalVector {
            complexity: Tri::Yes,
            needs_tools: Tri::Yes,
            is_ambiguous: Tri::No,
            is_dangerous: Tri::No,
            confidence: 0.9,
            domain: None,
            toolchain_hint: Some("python".to_string()),
            degraded: false,
        }
    }

    fn file_response(path: &str, content: &str) -> String {
        serde_json::json!({
            "files": [{"path": path, "content": content, "language": "python"}]
        })
        .to_string()
    }

    fn two_task_gated_graph() -> TaskGraph {
        let mut graph = TaskGraph::new();
        graph.add_task(
            TaskSpec::new("t1", "create interfaces", ArtifactKind::Module)
                .with_confidence(0.9)
                .with_affected_paths(["iface.py"]),
        );
        graph.add_task(
            TaskSpec::new("t2", "create app", ArtifactKind::Module)
                .with_confidence(0.9)
                .with_requires(["t1"])
                .with_affected_paths(["app.py"]),
        );
        graph.add_gate(
            Gate::new("g1", GateKind::Import)
                .with_depends_on(["t1"])
                .with_blocks(["t2"]),
        );
        graph.add_gate(Gate::new("g2", GateKind::Import).with_depends_on(["t2"]));
        graph
    }

    #[tokio::test]
    async fn test_execute_runs_gates_as_barriers() {
        let mut f = fixture(true_toolchain());
        f.model.push_response(file_response("iface.py", "IFACE = 1\n"));
        f.model.push_response(file_response("app.py", "APP = 1\n"));

        let graph = two_task_gated_graph();
        let report = f
            .executor
            .execute(&graph, &mut f.session, &signals(), &mut f.store)
            .await
            .unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::Complete);
        assert_eq!(report.completed_tasks.len(), 2);
        assert_eq!(report.gates_passed.len(), 2);
        assert!(report.pending_tasks.is_empty());

        // The barrier shows in the event order: t2 starts only after g1 passes.
        let events = f.sink.events();
        let g1_pass = events
            .iter()
            .position(|e| {
                e.event_type == EventType::GatePass && e.data["gate_id"] == "g1"
            })
            .unwrap();
        let t2_start = events
            .iter()
            .position(|e| {
                e.event_type == EventType::TaskStart && e.data["task_id"] == "t2"
            })
            .unwrap();
        assert!(g1_pass < t2_start);
        assert!(events.iter().any(|e| e.event_type == EventType::Complete));
        assert!(f.session.budget.spent() > 0);
    }

    #[tokio::test]
    async fn test_fix_loop_bounded_then_escalates() {
        // At most max_fix_attempts fix rounds, then escalation.
        let mut f = fixture(failing_import_toolchain());
        f.model.push_response(file_response("mod.py", "X = 1\n"));
        // Fix candidates (the fixer asks for patches; they never help since
        // the import command always fails).
        for i in 0..32 {
            f.model.push_response(format!("patched_{} = True\n", i));
        }

        let mut graph = TaskGraph::new();
        graph.add_task(
            TaskSpec::new("t1", "make module", ArtifactKind::Module)
                .with_confidence(0.9)
                .with_affected_paths(["mod.py"]),
        );
        graph.add_gate(Gate::new("g1", GateKind::Import).with_depends_on(["t1"]));

        let report = f
            .executor
            .execute(&graph, &mut f.session, &signals(), &mut f.store)
            .await
            .unwrap();

        assert!(matches!(report.outcome, ExecutionOutcome::Escalated { .. }));
        assert!(report.fix_attempts.len() <= 3);

        let events = f.sink.events();
        let fix_starts = events
            .iter()
            .filter(|e| e.event_type == EventType::FixStart)
            .count();
        assert!(fix_starts <= 3);
        assert!(events.iter().any(|e| e.event_type == EventType::Escalate));
        assert!(events.iter().any(|e| e.event_type == EventType::GateFail));
        // The exhausted approach is recorded as a dead end.
        assert!(!f.store.dead_ends().is_empty());
    }

    #[tokio::test]
    async fn test_resume_skips_checkpointed_gates() {
        // Resume never re-executes tasks whose gate already passed.
        let mut f = fixture(true_toolchain());
        f.model.push_response(file_response("iface.py", "IFACE = 1\n"));
        f.model.push_response(file_response("app.py", "APP = 1\n"));

        let graph = two_task_gated_graph();
        let report = f
            .executor
            .execute(&graph, &mut f.session, &signals(), &mut f.store)
            .await
            .unwrap();
        assert_eq!(report.outcome, ExecutionOutcome::Complete);
        let calls_after_first = f.model.call_count();

        // Fresh run over the same checkpoints: no task re-executes.
        let report = f
            .executor
            .resume(&graph, None, &mut f.session, &signals(), &mut f.store)
            .await
            .unwrap();
        assert_eq!(report.outcome, ExecutionOutcome::Complete);
        assert_eq!(f.model.call_count(), calls_after_first);
    }

    #[tokio::test]
    async fn test_cancellation_preserves_partial_state() {
        let mut f = fixture(true_toolchain());
        f.session.cancel();

        let graph = two_task_gated_graph();
        let report = f
            .executor
            .execute(&graph, &mut f.session, &signals(), &mut f.store)
            .await
            .unwrap();
        assert_eq!(report.outcome, ExecutionOutcome::Cancelled);
        assert_eq!(report.pending_tasks.len(), 2);
        // Nothing was dispatched after the flag was observed.
        assert_eq!(f.model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_task_retries_with_fresh_seed_then_fails() {
        let mut f = fixture(true_toolchain());
        // All attempts return garbage: 1 + max_retries_per_task (2) = 3
        // attempts, then escalation via feeder failure.
        for _ in 0..8 {
            f.model.push_response("not json");
        }

        let mut graph = TaskGraph::new();
        graph.add_task(
            TaskSpec::new("t1", "make module", ArtifactKind::Module).with_confidence(0.9),
        );
        graph.add_gate(Gate::new("g1", GateKind::Import).with_depends_on(["t1"]));

        let report = f
            .executor
            .execute(&graph, &mut f.session, &signals(), &mut f.store)
            .await
            .unwrap();
        assert!(matches!(report.outcome, ExecutionOutcome::Escalated { .. }));
        assert_eq!(f.model.call_count(), 3);
        assert!(f
            .sink
            .events()
            .iter()
            .any(|e| e.event_type == EventType::TaskFailed));
    }

    #[test]
    fn test_pick_candidate_prefers_expected_paths() {
        let task = TaskSpec::new("t", "x", ArtifactKind::Module)
            .with_affected_paths(["expected.py"]);
        let candidates = vec![
            vec![Artifact::new("other.py", "content", "t", "python")],
            vec![Artifact::new("expected.py", "content", "t", "python")],
        ];
        let winner = pick_candidate(candidates, &task).unwrap();
        assert_eq!(winner[0].path, "expected.py");
    }

    #[test]
    fn test_pick_candidate_tie_goes_to_lower_index() {
        let task = TaskSpec::new("t", "x", ArtifactKind::Module);
        let candidates = vec![
            vec![Artifact::new("a.py", "alpha", "t", "python")],
            vec![Artifact::new("b.py", "bravo", "t", "python")],
        ];
        let winner = pick_candidate(candidates, &task).unwrap();
        assert_eq!(winner[0].path, "a.py");
    }
}
