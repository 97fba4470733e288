//! Engine wiring
//!
//! Builds the per-session engine stack (extractor → planner → executor) and
//! adapts it to the swarm's [`GoalRunner`] seam for multi-worker runs. The
//! shared LLM semaphore is enforced here by decorating the model: every
//! completion call holds a governor permit for its duration.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sunwell_core::events::EventEmitter;
use sunwell_core::model::{Completion, CompletionRequest, Model};
use sunwell_core::{StateLayout, SunwellConfig};
use sunwell_engine::executor::{ExecutionOutcome, ExecutionReport};
use sunwell_engine::planner::{MemoryContext, PlanOutcome};
use sunwell_engine::{
    AutoFixer, CheckpointStore, Planner, Router, Session, SignalExtractor, TaskGraphExecutor,
    Validator,
};
use sunwell_memory::{BriefingStore, LearningStore, SessionSummary};
use sunwell_swarm::{Goal, GoalRunner, ResourceGovernor, SwarmError};
use tracing::info;

/// Model decorator that holds an LLM-semaphore slot per call
pub struct GovernedModel {
    inner: Arc<dyn Model>,
    governor: ResourceGovernor,
    acquire_timeout: Duration,
}

impl GovernedModel {
    pub fn new(inner: Arc<dyn Model>, governor: ResourceGovernor, acquire_timeout: Duration) -> Self {
        Self {
            inner,
            governor,
            acquire_timeout,
        }
    }
}

#[async_trait]
impl Model for GovernedModel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        timeout: Duration,
    ) -> sunwell_core::Result<Completion> {
        let _permit = self
            .governor
            .acquire(self.acquire_timeout)
            .await
            .map_err(|e| sunwell_core::CoreError::Model(e.to_string()))?;
        self.inner.complete(request, timeout).await
    }
}

/// Build the governed model for a project
pub fn build_model(
    config: &SunwellConfig,
    layout: &StateLayout,
) -> anyhow::Result<Arc<dyn Model>> {
    let base = sunwell_llm::from_config(&config.llm)
        .map_err(|e| anyhow::anyhow!("model configuration: {}", e))?;
    let governor = ResourceGovernor::new(
        layout.llm_semaphore(),
        layout.llm_semaphore_lock(),
        config.coordinator.max_concurrent_llm_calls,
    );
    Ok(Arc::new(GovernedModel::new(
        base,
        governor,
        Duration::from_secs(config.coordinator.lock_timeout_secs),
    )))
}

/// What one goal run produced
pub enum GoalOutcome {
    Report(ExecutionReport),
    Clarify(String),
    Halt(String),
    DryRun { tasks: usize, gates: usize },
}

/// Drive one goal end-to-end: signals → plan → execute → memory handoff.
#[allow(clippy::too_many_arguments)]
pub async fn run_goal(
    goal_text: &str,
    project_root: &Path,
    config: SunwellConfig,
    model: Arc<dyn Model>,
    emitter: Arc<EventEmitter>,
    resume: bool,
    from_gate: Option<&str>,
    no_gates: bool,
    dry_run: bool,
) -> anyhow::Result<GoalOutcome> {
    let mut session = Session::new(goal_text, project_root, config, emitter);
    session.layout.ensure_created()?;

    let mut store = LearningStore::new(&session.layout);
    store.load_from_disk()?;

    let _ = session
        .emitter
        .emit(sunwell_core::EventType::MemoryLoad, serde_json::json!({}));
    let _ = session.emitter.emit(
        sunwell_core::EventType::MemoryLoaded,
        serde_json::json!({ "learnings": store.learnings().len() }),
    );

    let briefing_store = BriefingStore::new(
        &session.layout,
        session.config.memory.briefing_byte_ceiling,
    );
    let briefing = briefing_store.load()?;

    // Warm start is strictly advisory; errors and timeouts are swallowed.
    if let Some(briefing) = &briefing {
        let _ = session.emitter.emit(
            sunwell_core::EventType::BriefingLoaded,
            serde_json::json!({ "status": briefing.status.as_str() }),
        );
        let timeout = Duration::from_millis(session.config.memory.prefetch_timeout_ms);
        let _ = session
            .emitter
            .emit(sunwell_core::EventType::PrefetchStart, serde_json::json!({}));
        let plan = sunwell_memory::prefetch::analyze(model.clone(), briefing, timeout).await;
        match sunwell_memory::prefetch::execute(&plan, project_root, &store, timeout).await {
            Some(context) => {
                let _ = session.emitter.emit(
                    sunwell_core::EventType::PrefetchComplete,
                    serde_json::json!({ "files": context.files.len() }),
                );
                if let Some(lens) = &context.suggested_lens {
                    let _ = session.emitter.emit(
                        sunwell_core::EventType::LensSuggested,
                        serde_json::json!({ "lens": lens }),
                    );
                }
            }
            None => {
                let _ = session.emitter.emit(
                    sunwell_core::EventType::PrefetchTimeout,
                    serde_json::json!({ "timeout_ms": timeout.as_millis() as u64 }),
                );
            }
        }
    }

    let extractor = SignalExtractor::new(
        model.clone(),
        Duration::from_secs(session.config.executor.signal_timeout_secs),
    );
    let context = sunwell_engine::session::gather_context(project_root);
    let signals = extractor
        .extract(goal_text, &context, &session.emitter)
        .await?;

    let router = Router::new(session.config.costs.clone());
    let planner = Planner::new(model.clone(), router.clone());
    let memory = MemoryContext {
        learnings: store
            .query(goal_text, session.config.planner.max_learnings_in_prompt)
            .into_iter()
            .cloned()
            .collect(),
        dead_ends: store.dead_ends().to_vec(),
        briefing_prompt: briefing.as_ref().map(|b| b.to_prompt()),
    };

    let mut graph = match planner.plan(&mut session, &signals, &memory).await? {
        PlanOutcome::Graph(graph) => graph,
        PlanOutcome::Clarify(question) => return Ok(GoalOutcome::Clarify(question)),
        PlanOutcome::Halt(reason) => return Ok(GoalOutcome::Halt(reason)),
    };

    if no_gates {
        graph.gates.clear();
    }
    if dry_run {
        return Ok(GoalOutcome::DryRun {
            tasks: graph.tasks.len(),
            gates: graph.gates.len(),
        });
    }

    let languages: Vec<String> = Vec::new();
    let toolchain = sunwell_engine::toolchain::select(
        project_root,
        &languages,
        signals.toolchain_hint.as_deref(),
    );
    let validator = Validator::new(
        toolchain.clone(),
        session.config.gates.clone(),
        project_root.to_path_buf(),
    );
    let fixer = AutoFixer::new(
        model.clone(),
        toolchain,
        project_root.to_path_buf(),
        Duration::from_secs(session.config.executor.task_timeout_secs),
    );
    let checkpoints = CheckpointStore::new(session.layout.clone());
    let executor = TaskGraphExecutor::new(model, router, validator, fixer, checkpoints);

    let report = if resume || from_gate.is_some() {
        executor
            .resume(&graph, from_gate, &mut session, &signals, &mut store)
            .await?
    } else {
        executor
            .execute(&graph, &mut session, &signals, &mut store)
            .await?
    };

    finish_session(&session, &briefing_store, briefing, &mut store, &report)?;
    Ok(GoalOutcome::Report(report))
}

/// Session end: compress the briefing, bridge completions into the learning
/// store, and flush everything to disk.
fn finish_session(
    session: &Session,
    briefing_store: &BriefingStore,
    old_briefing: Option<sunwell_memory::Briefing>,
    store: &mut LearningStore,
    report: &ExecutionReport,
) -> anyhow::Result<()> {
    use sunwell_memory::BriefingStatus;

    let status = match report.outcome {
        ExecutionOutcome::Complete => BriefingStatus::Complete,
        ExecutionOutcome::Escalated { .. } | ExecutionOutcome::BudgetExhausted => {
            BriefingStatus::Blocked
        }
        ExecutionOutcome::Cancelled => BriefingStatus::InProgress,
    };

    let summary = SessionSummary {
        last_action: match &report.outcome {
            ExecutionOutcome::Complete => format!(
                "Completed {} tasks through {} gates",
                report.completed_tasks.len(),
                report.gates_passed.len()
            ),
            ExecutionOutcome::Escalated { reason, .. } => format!("Escalated: {}", reason),
            ExecutionOutcome::BudgetExhausted => "Stopped: budget exhausted".to_string(),
            ExecutionOutcome::Cancelled => "Cancelled mid-run".to_string(),
        },
        next_action: report
            .pending_tasks
            .iter()
            .next()
            .map(|t| format!("Continue with task '{}'", t)),
        modified_files: report.artifacts.iter().map(|a| a.path.clone()).collect(),
        resolved_hazards: Vec::new(),
        new_hazards: report
            .fix_attempts
            .iter()
            .rev()
            .take(2)
            .map(|f| format!("{:?} error needed {} fix", f.error.kind, f.strategy.name()))
            .collect(),
        blockers: match &report.outcome {
            ExecutionOutcome::Escalated { reason, .. } => vec![reason.clone()],
            _ => Vec::new(),
        },
        new_learnings: Vec::new(),
    };

    let mut briefing = sunwell_memory::Briefing::compress(
        old_briefing.as_ref(),
        &summary,
        status,
        session.id.clone(),
    );
    if briefing.mission.is_empty() {
        briefing.mission = session.goal.clone();
    }
    briefing.goal_hash = Some(session.goal_hash.clone());

    // Dispatch hints come from the router, post-hoc.
    let languages: Vec<String> = report.artifacts.iter().map(|a| a.language.clone()).collect();
    let hints = Router::new(session.config.costs.clone())
        .dispatch_hints(report.pending_tasks.len(), &languages);
    briefing.predicted_skills = hints.predicted_skills;
    briefing.suggested_lens = hints.suggested_lens;
    briefing.complexity_estimate = hints.complexity_estimate;
    briefing.estimated_files_touched = hints.estimated_files_touched;

    if let Some(learning) = briefing.completion_learning() {
        let id = learning.id.clone();
        if store.add(learning) {
            briefing.related_learnings.insert(0, id);
            briefing
                .related_learnings
                .truncate(sunwell_memory::briefing::MAX_RELATED_LEARNINGS);
        }
    }

    let bytes = briefing_store.save(&briefing)?;
    let _ = session.emitter.emit(
        sunwell_core::EventType::BriefingSaved,
        serde_json::json!({ "bytes": bytes }),
    );
    let written = store.save_to_disk()?;
    let _ = session.emitter.emit(
        sunwell_core::EventType::MemorySaved,
        serde_json::json!({ "path": session.layout.memory_dir().display().to_string(), "records": written }),
    );
    info!(bytes, records = written, "session memory persisted");
    Ok(())
}

/// Adapter: run each claimed backlog goal through the engine
pub struct EngineGoalRunner {
    pub project_root: PathBuf,
    pub config: SunwellConfig,
    pub model: Arc<dyn Model>,
    pub emitter_factory: Arc<dyn Fn(&str) -> Arc<EventEmitter> + Send + Sync>,
}

#[async_trait]
impl GoalRunner for EngineGoalRunner {
    async fn run(&self, goal: &Goal, worker_id: &str) -> sunwell_swarm::Result<()> {
        let emitter = (self.emitter_factory)(worker_id);
        let _ = emitter.emit(
            sunwell_core::EventType::WorkerClaim,
            serde_json::json!({ "worker_id": worker_id, "goal_id": goal.id }),
        );
        let goal_text = if goal.description.is_empty() {
            goal.title.clone()
        } else {
            format!("{}: {}", goal.title, goal.description)
        };
        let outcome = run_goal(
            &goal_text,
            &self.project_root,
            self.config.clone(),
            self.model.clone(),
            emitter.clone(),
            false,
            None,
            false,
            false,
        )
        .await
        .map_err(|e| {
            let _ = emitter.emit(
                sunwell_core::EventType::WorkerFailed,
                serde_json::json!({ "worker_id": worker_id, "error": e.to_string() }),
            );
            SwarmError::Worker {
                worker_id: worker_id.to_string(),
                detail: e.to_string(),
            }
        })?;

        match outcome {
            GoalOutcome::Report(report) if report.outcome == ExecutionOutcome::Complete => {
                let _ = emitter.emit(
                    sunwell_core::EventType::WorkerComplete,
                    serde_json::json!({ "worker_id": worker_id, "goal_id": goal.id }),
                );
                Ok(())
            }
            GoalOutcome::Report(report) => Err(SwarmError::Worker {
                worker_id: worker_id.to_string(),
                detail: format!("goal ended with {:?}", report.outcome),
            }),
            GoalOutcome::Clarify(question) => Err(SwarmError::Worker {
                worker_id: worker_id.to_string(),
                detail: format!("needs clarification: {}", question),
            }),
            GoalOutcome::Halt(reason) => Err(SwarmError::Worker {
                worker_id: worker_id.to_string(),
                detail: format!("halted: {}", reason),
            }),
            GoalOutcome::DryRun { .. } => Ok(()),
        }
    }
}
