//! Planner
//!
//! Turns (goal, signals, memory context) into a gated [`TaskGraph`].
//! Planning strategy comes from the router: SINGLE_SHOT for simple goals,
//! HARMONIC_N (N candidates, scored, reconciled) for complex ones, and a
//! DIALECTIC pre-pass when the goal is ambiguous.
//!
//! Gate insertion scans the planned tasks for runnable-milestone patterns:
//! interface work gets an Import gate, schema work a Schema gate, endpoint
//! work an Endpoint gate, entry points an Integration gate, and explicit
//! test tasks each get their own Test gate. A plan with no milestone
//! pattern still gets a Lint gate so nothing ships unvalidated.

use crate::error::{EngineError, Result};
use crate::router::Router;
use crate::session::Session;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use sunwell_core::events::EventType;
use sunwell_core::gate::{Gate, GateKind};
use sunwell_core::model::{ChatMessage, CompletionRequest, Model};
use sunwell_core::signal::SignalVector;
use sunwell_core::strategy::StrategyKind;
use sunwell_core::task::{ArtifactKind, TaskId, TaskSpec};
use sunwell_core::TaskGraph;
use sunwell_memory::{DeadEnd, Learning};
use tracing::{debug, info, warn};

/// Memory injected into the planning prompt
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    pub learnings: Vec<Learning>,
    pub dead_ends: Vec<DeadEnd>,
    pub briefing_prompt: Option<String>,
}

/// Terminal planning outcomes
#[derive(Debug)]
pub enum PlanOutcome {
    /// A validated, gated task graph
    Graph(TaskGraph),

    /// The goal needs a clarifying answer before planning can proceed
    Clarify(String),

    /// The goal is dangerous; explicit confirmation required
    Halt(String),
}

/// One parsed plan candidate with its score
#[derive(Debug, Clone)]
struct Candidate {
    index: usize,
    tasks: Vec<TaskSpec>,
    score: f64,
}

#[derive(Debug, Deserialize)]
struct PlanWire {
    #[serde(default)]
    tasks: Vec<TaskWire>,
}

#[derive(Debug, Deserialize)]
struct TaskWire {
    #[serde(default)]
    id: Option<String>,
    description: String,
    #[serde(default)]
    artifact_kind: Option<String>,
    #[serde(default)]
    produces_module: Option<String>,
    #[serde(default)]
    affected_paths: Vec<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    requires: Vec<String>,
}

/// The planning engine
pub struct Planner {
    model: Arc<dyn Model>,
    router: Router,
}

impl Planner {
    pub fn new(model: Arc<dyn Model>, router: Router) -> Self {
        Self { model, router }
    }

    /// Produce a gated task graph, or a terminal routing outcome.
    pub async fn plan(
        &self,
        session: &mut Session,
        signals: &SignalVector,
        memory: &MemoryContext,
    ) -> Result<PlanOutcome> {
        let strategy = self.router.route_planning(signals, &session.budget);

        let _ = session.emitter.emit(
            EventType::PlanStart,
            json!({ "goal": session.goal, "strategy": strategy.name() }),
        );

        match strategy {
            StrategyKind::Halt => {
                return Ok(PlanOutcome::Halt(
                    "goal classified as dangerous; explicit confirmation required".to_string(),
                ));
            }
            StrategyKind::Clarify => {
                return Ok(PlanOutcome::Clarify(format!(
                    "The goal \"{}\" is under-specified (confidence {:.2}). \
                     What outcome should a successful run produce?",
                    session.goal, signals.confidence
                )));
            }
            _ => {}
        }

        // DIALECTIC: reconcile an ambiguous goal into a concrete one before
        // generating the plan itself.
        let effective_goal = if strategy == StrategyKind::Dialectic {
            self.reconcile_goal(session).await?
        } else {
            session.goal.clone()
        };

        let candidate_count = strategy.candidates().max(1);
        let timeout = Duration::from_secs(session.config.executor.task_timeout_secs);
        let prompt = self.build_prompt(&effective_goal, memory, &session.config);

        let mut candidates: Vec<Candidate> = Vec::new();
        for index in 0..candidate_count {
            let temperature = 0.2 + 0.15 * index as f32;
            let request = CompletionRequest::new(vec![
                ChatMessage::system(PLANNER_SYSTEM),
                ChatMessage::user(prompt.clone()),
            ])
            .with_json_mode()
            .with_temperature(temperature);

            match self.model.complete(&request, timeout).await {
                Ok(completion) => {
                    self.router.account(
                        strategy,
                        completion.usage.total(),
                        &mut session.budget,
                    );
                    match parse_candidate(&completion.content, index) {
                        Some(mut candidate) => {
                            candidate.score = score_candidate(&candidate, &effective_goal);
                            let _ = session.emitter.emit(
                                EventType::PlanCandidate,
                                json!({ "index": index, "score": candidate.score }),
                            );
                            candidates.push(candidate);
                        }
                        None => {
                            warn!(index, "plan candidate failed to parse");
                        }
                    }
                }
                Err(e) => {
                    warn!(index, error = %e, "plan candidate generation failed");
                }
            }
        }

        if candidates.is_empty() {
            let reason = "no plan candidate parsed".to_string();
            let _ = session
                .emitter
                .emit(EventType::PlanAbort, json!({ "reason": reason }));
            return Err(EngineError::PlanAbort {
                reason,
                best_candidate: None,
            });
        }

        let agreement = candidate_agreement(&candidates);
        if candidates.len() > 1
            && agreement < session.config.planner.agreement_clarify_threshold
        {
            return Ok(PlanOutcome::Clarify(format!(
                "Plan candidates disagree (agreement {:.2}). \
                 Which part of \"{}\" matters most?",
                agreement, session.goal
            )));
        }

        // Highest score wins; ties go to the lower index (deterministic).
        let winner = candidates
            .iter()
            .max_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.index.cmp(&a.index))
            })
            .expect("non-empty candidates");

        if candidates.len() > 1
            && agreement < session.config.planner.agreement_pick_threshold
        {
            info!(agreement, winner = winner.index, "low plan agreement, picking best scorer");
        }

        let mut graph = TaskGraph::new();
        for task in &winner.tasks {
            graph.add_task(task.clone());
        }
        insert_gates(&mut graph);
        graph.validate().map_err(|e| EngineError::PlanAbort {
            reason: format!("winning candidate produced an invalid graph: {}", e),
            best_candidate: Some(format!("candidate {}", winner.index)),
        })?;

        let _ = session.emitter.emit(
            EventType::PlanWinner,
            json!({
                "index": winner.index,
                "agreement": agreement,
                "task_count": graph.tasks.len(),
                "gate_count": graph.gates.len(),
            }),
        );
        debug!(
            tasks = graph.tasks.len(),
            gates = graph.gates.len(),
            "plan ready"
        );
        Ok(PlanOutcome::Graph(graph))
    }

    /// DIALECTIC pre-pass: one "what is actually being asked" call whose
    /// answer replaces the raw goal in the planning prompt.
    async fn reconcile_goal(&self, session: &mut Session) -> Result<String> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(
                "Restate the goal below as one unambiguous, testable objective. \
                 Reply with the restated goal only.",
            ),
            ChatMessage::user(session.goal.clone()),
        ])
        .with_temperature(0.0)
        .with_max_tokens(200);

        let timeout = Duration::from_secs(session.config.executor.task_timeout_secs);
        match self.model.complete(&request, timeout).await {
            Ok(completion) => {
                self.router.account(
                    StrategyKind::Dialectic,
                    completion.usage.total(),
                    &mut session.budget,
                );
                let restated = completion.content.trim().to_string();
                if restated.is_empty() {
                    Ok(session.goal.clone())
                } else {
                    Ok(restated)
                }
            }
            Err(e) => {
                warn!(error = %e, "goal reconciliation failed, planning on the raw goal");
                Ok(session.goal.clone())
            }
        }
    }

    fn build_prompt(
        &self,
        goal: &str,
        memory: &MemoryContext,
        config: &sunwell_core::SunwellConfig,
    ) -> String {
        let mut prompt = format!(
            "Decompose this goal into artifact-producing tasks. Reply with a \
             JSON object: {{\"tasks\": [{{\"id\", \"description\", \
             \"artifact_kind\" (module|schema|endpoint|entry_point|test|config|doc), \
             \"produces_module\", \"affected_paths\" (array), \"confidence\" (0..1), \
             \"requires\" (array of task ids)}}]}}.\n\nGoal: {}\n",
            goal
        );

        if let Some(briefing) = &memory.briefing_prompt {
            prompt.push_str(&format!("\nSession briefing:\n{}\n", briefing));
        }
        if !memory.learnings.is_empty() {
            prompt.push_str("\nRelevant learnings:\n");
            for learning in memory
                .learnings
                .iter()
                .take(config.planner.max_learnings_in_prompt)
            {
                prompt.push_str(&format!("- [{}] {}\n", learning.id, learning.fact));
            }
        }
        if !memory.dead_ends.is_empty() {
            prompt.push_str("\nApproaches known to fail (avoid these):\n");
            for dead_end in memory
                .dead_ends
                .iter()
                .take(config.planner.max_dead_ends_in_prompt)
            {
                prompt.push_str(&format!("- {} ({})\n", dead_end.approach, dead_end.reason));
            }
        }
        prompt
    }
}

const PLANNER_SYSTEM: &str =
    "You decompose software goals into dependency-ordered task lists. JSON only.";

fn parse_candidate(content: &str, index: usize) -> Option<Candidate> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    let wire: PlanWire = serde_json::from_str(&content[start..=end]).ok()?;
    if wire.tasks.is_empty() {
        return None;
    }

    let tasks: Vec<TaskSpec> = wire
        .tasks
        .into_iter()
        .enumerate()
        .map(|(i, task)| {
            let mut spec = TaskSpec::new(
                task.id.unwrap_or_else(|| format!("t{}", i + 1)),
                task.description,
                parse_artifact_kind(task.artifact_kind.as_deref()),
            )
            .with_confidence(task.confidence.unwrap_or(0.8))
            .with_requires(task.requires)
            .with_affected_paths(task.affected_paths);
            if let Some(module) = task.produces_module {
                spec = spec.with_produces_module(module);
            }
            spec
        })
        .collect();

    Some(Candidate {
        index,
        tasks,
        score: 0.0,
    })
}

fn parse_artifact_kind(raw: Option<&str>) -> ArtifactKind {
    match raw {
        Some("schema") | Some("model") => ArtifactKind::Schema,
        Some("endpoint") | Some("route") => ArtifactKind::Endpoint,
        Some("entry_point") | Some("main") | Some("factory") => ArtifactKind::EntryPoint,
        Some("test") => ArtifactKind::Test,
        Some("config") => ArtifactKind::Config,
        Some("doc") | Some("docs") => ArtifactKind::Doc,
        _ => ArtifactKind::Module,
    }
}

/// Score a candidate on completeness, clarity, feasibility, and alignment
/// with the goal; each axis contributes equally.
fn score_candidate(candidate: &Candidate, goal: &str) -> f64 {
    let tasks = &candidate.tasks;
    let completeness = (tasks.len() as f64 / 3.0).min(1.0);

    let clarity = tasks
        .iter()
        .map(|t| (t.description.len() as f64 / 40.0).min(1.0))
        .sum::<f64>()
        / tasks.len() as f64;

    let mut probe = TaskGraph::new();
    for task in tasks {
        probe.add_task(task.clone());
    }
    let feasibility = if probe.validate().is_ok() { 1.0 } else { 0.0 };

    let goal_tokens = tokens(goal);
    let task_tokens: BTreeSet<String> = tasks.iter().flat_map(|t| tokens(&t.description)).collect();
    let overlap = goal_tokens.intersection(&task_tokens).count();
    let alignment = if goal_tokens.is_empty() {
        0.5
    } else {
        (overlap as f64 / goal_tokens.len() as f64).min(1.0)
    };

    (completeness + clarity + feasibility + alignment) / 4.0
}

/// Mean pairwise Jaccard similarity over candidate task signatures
fn candidate_agreement(candidates: &[Candidate]) -> f64 {
    if candidates.len() < 2 {
        return 1.0;
    }
    let signatures: Vec<BTreeSet<String>> = candidates
        .iter()
        .map(|c| {
            c.tasks
                .iter()
                .flat_map(|t| {
                    t.affected_paths
                        .iter()
                        .cloned()
                        .chain(tokens(&t.description))
                })
                .collect()
        })
        .collect();

    let mut total = 0.0;
    let mut pairs = 0;
    for i in 0..signatures.len() {
        for j in (i + 1)..signatures.len() {
            let intersection = signatures[i].intersection(&signatures[j]).count() as f64;
            let union = signatures[i].union(&signatures[j]).count() as f64;
            total += if union == 0.0 { 1.0 } else { intersection / union };
            pairs += 1;
        }
    }
    total / pairs as f64
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect()
}

/// All transitive dependents of `roots` via reversed `requires` edges
fn transitive_dependents(graph: &TaskGraph, roots: &BTreeSet<TaskId>) -> BTreeSet<TaskId> {
    let mut dependents_of: BTreeMap<&TaskId, Vec<&TaskId>> = BTreeMap::new();
    for (id, task) in &graph.tasks {
        for dep in &task.requires {
            dependents_of.entry(dep).or_default().push(id);
        }
    }
    let mut result = BTreeSet::new();
    let mut frontier: Vec<&TaskId> = roots.iter().collect();
    while let Some(id) = frontier.pop() {
        for &dependent in dependents_of.get(id).into_iter().flatten() {
            if result.insert(dependent.clone()) {
                frontier.push(dependent);
            }
        }
    }
    result
}

/// Insert gates at runnable milestones. Gate insertion never introduces
/// cycles: gates are barriers over the existing DAG, not nodes in it.
pub fn insert_gates(graph: &mut TaskGraph) {
    let mut by_kind: BTreeMap<ArtifactKind, BTreeSet<TaskId>> = BTreeMap::new();
    for (id, task) in &graph.tasks {
        by_kind
            .entry(task.artifact_kind)
            .or_default()
            .insert(id.clone());
    }
    let empty = BTreeSet::new();
    let group = |kind: ArtifactKind| by_kind.get(&kind).unwrap_or(&empty).clone();

    let mut gates: Vec<Gate> = Vec::new();
    let milestones = [
        (ArtifactKind::Module, GateKind::Import, "gate-import"),
        (ArtifactKind::Schema, GateKind::Schema, "gate-schema"),
        (ArtifactKind::Endpoint, GateKind::Endpoint, "gate-endpoint"),
        (
            ArtifactKind::EntryPoint,
            GateKind::Integration,
            "gate-integration",
        ),
    ];
    for (artifact_kind, gate_kind, gate_id) in milestones {
        let feeders = group(artifact_kind);
        if feeders.is_empty() {
            continue;
        }
        let mut blocks = transitive_dependents(graph, &feeders);
        for feeder in &feeders {
            blocks.remove(feeder);
        }
        gates.push(
            Gate::new(gate_id, gate_kind)
                .with_depends_on(feeders)
                .with_blocks(blocks),
        );
    }

    // Explicit test tasks each gate themselves.
    for id in group(ArtifactKind::Test) {
        gates.push(Gate::new(format!("gate-test-{}", id), GateKind::Test).with_depends_on([id]));
    }

    // No milestone pattern at all: a single Lint gate over everything keeps
    // even trivial plans validated.
    if gates.is_empty() {
        let all: BTreeSet<TaskId> = graph.tasks.keys().cloned().collect();
        gates.push(Gate::new("gate-lint", GateKind::Lint).with_depends_on(all));
    }

    for gate in gates {
        graph.add_gate(gate);
    }
}
