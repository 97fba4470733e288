//! The `run` command
//!
//! Single-worker runs drive the engine directly; `--workers 2+` activates
//! the swarm coordinator with the goal pushed onto the shared backlog.
//! Terminal outcomes map onto the documented exit codes.

use crate::render::{
    HumanSink, JsonStdoutSink, EXIT_BUDGET, EXIT_CONFIG, EXIT_ESCALATION, EXIT_MERGE_CONFLICTS,
    EXIT_OK, EXIT_PLAN_ABORT,
};
use crate::runner::{build_model, run_goal, EngineGoalRunner, GoalOutcome};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sunwell_core::events::{EventEmitter, EventSchemas, NdjsonSink};
use sunwell_core::{StateLayout, SunwellConfig};
use sunwell_engine::executor::ExecutionOutcome;
use sunwell_engine::EngineError;
use sunwell_swarm::{Backlog, Coordinator, GitRepository, Goal};
use tracing::error;

pub struct RunArgs {
    pub goal: String,
    pub workers: Option<usize>,
    pub budget: Option<u64>,
    pub quiet: bool,
    pub json: bool,
    pub resume: bool,
    pub session: Option<String>,
    pub from_gate: Option<String>,
    pub no_gates: bool,
    pub dry_run: bool,
    pub verbose: bool,
}

pub async fn execute(args: RunArgs) -> u8 {
    init_logging(args.verbose);

    let project_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut config = match SunwellConfig::load(&project_root.join("sunwell.toml")) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "configuration error:".red(), e);
            return EXIT_CONFIG;
        }
    };
    if let Some(budget) = args.budget {
        config.budget.total_tokens = budget;
    }
    if let Some(workers) = args.workers {
        config.coordinator.workers = workers;
    }

    let layout = StateLayout::new(&project_root);
    if let Err(e) = layout.ensure_created() {
        eprintln!("{} {}", "configuration error:".red(), e);
        return EXIT_CONFIG;
    }

    let schemas = match EventSchemas::new() {
        Ok(schemas) => Arc::new(schemas),
        Err(e) => {
            eprintln!("{} {}", "configuration error:".red(), e);
            return EXIT_CONFIG;
        }
    };
    let session_id = args
        .session
        .clone()
        .unwrap_or_else(|| uuid_like_session_id());
    let emitter = match build_emitter(&schemas, &layout, &session_id, &args, None) {
        Ok(emitter) => emitter,
        Err(code) => return code,
    };

    let model = match build_model(&config, &layout) {
        Ok(model) => model,
        Err(e) => {
            eprintln!("{} {}", "configuration error:".red(), e);
            return EXIT_CONFIG;
        }
    };

    if config.coordinator.workers >= 2 && !args.dry_run {
        return run_with_workers(&args, &project_root, config, model, schemas, layout).await;
    }

    let outcome = run_goal(
        &args.goal,
        &project_root,
        config,
        model,
        emitter,
        args.resume,
        args.from_gate.as_deref(),
        args.no_gates,
        args.dry_run,
    )
    .await;

    match outcome {
        Ok(GoalOutcome::Report(report)) => {
            let code = match report.outcome {
                ExecutionOutcome::Complete => EXIT_OK,
                ExecutionOutcome::Escalated { .. } => EXIT_ESCALATION,
                ExecutionOutcome::BudgetExhausted => EXIT_BUDGET,
                ExecutionOutcome::Cancelled => EXIT_ESCALATION,
            };
            if args.quiet {
                println!(
                    "{}",
                    serde_json::json!({
                        "outcome": format!("{:?}", report.outcome),
                        "completed_tasks": report.completed_tasks.len(),
                        "gates_passed": report.gates_passed.len(),
                        "artifacts": report.artifacts.len(),
                        "fix_attempts": report.fix_attempts.len(),
                    })
                );
            }
            code
        }
        Ok(GoalOutcome::Clarify(question)) => {
            println!("{} {}", "clarification needed:".yellow(), question);
            EXIT_ESCALATION
        }
        Ok(GoalOutcome::Halt(reason)) => {
            println!("{} {}", "halted:".red(), reason);
            EXIT_ESCALATION
        }
        Ok(GoalOutcome::DryRun { tasks, gates }) => {
            println!("plan: {} tasks, {} gates (dry run)", tasks, gates);
            EXIT_OK
        }
        Err(e) => map_error(e),
    }
}

async fn run_with_workers(
    args: &RunArgs,
    project_root: &Path,
    config: SunwellConfig,
    model: Arc<dyn sunwell_core::Model>,
    schemas: Arc<EventSchemas>,
    layout: StateLayout,
) -> u8 {
    let backlog = Backlog::new(layout.clone());
    if let Err(e) = backlog.push(vec![Goal::new(
        format!("goal-{}", &uuid_like_session_id()[..8]),
        args.goal.clone(),
        String::new(),
    )]) {
        eprintln!("{} {}", "backlog error:".red(), e);
        return EXIT_CONFIG;
    }

    let repo = Arc::new(GitRepository::new(project_root.to_path_buf()));
    let coordinator = Coordinator::new(repo, layout.clone(), config.coordinator.clone());

    let quiet = args.quiet;
    let json = args.json;
    let session_id = uuid_like_session_id();
    let events_layout = layout.clone();
    let runner = Arc::new(EngineGoalRunner {
        project_root: project_root.to_path_buf(),
        config: config.clone(),
        model,
        emitter_factory: Arc::new(move |worker_id: &str| {
            let mut emitter = EventEmitter::new(schemas.clone()).with_worker(worker_id);
            if json {
                emitter.add_sink(Arc::new(JsonStdoutSink));
            } else if !quiet {
                emitter.add_sink(Arc::new(HumanSink));
            }
            if let Ok(sink) = NdjsonSink::create(&events_layout.session_events_file(&session_id)) {
                emitter.add_sink(Arc::new(sink));
            }
            Arc::new(emitter)
        }),
    });

    match coordinator.execute(backlog, runner).await {
        Ok(result) => {
            if !args.quiet {
                println!(
                    "workers done: {} completed, {} failed, {} merged, {} conflicts",
                    result.goals_completed,
                    result.goals_failed,
                    result.merge.merged.len(),
                    result.merge.conflicts.len()
                );
            }
            if let Err(e) = crate::workers_cmd::persist_merge_report(&layout, &result.merge) {
                error!(error = %e, "failed to persist merge report");
            }
            if result.merge.has_conflicts() {
                EXIT_MERGE_CONFLICTS
            } else if result.goals_failed > 0 {
                EXIT_ESCALATION
            } else {
                EXIT_OK
            }
        }
        Err(e) => {
            eprintln!("{} {}", "coordinator error:".red(), e);
            EXIT_CONFIG
        }
    }
}

fn build_emitter(
    schemas: &Arc<EventSchemas>,
    layout: &StateLayout,
    session_id: &str,
    args: &RunArgs,
    worker: Option<&str>,
) -> Result<Arc<EventEmitter>, u8> {
    let mut emitter = EventEmitter::new(schemas.clone());
    if let Some(worker) = worker {
        emitter = emitter.with_worker(worker);
    }
    if args.json {
        emitter.add_sink(Arc::new(JsonStdoutSink));
    } else if !args.quiet {
        emitter.add_sink(Arc::new(HumanSink));
    }
    match NdjsonSink::create(&layout.session_events_file(session_id)) {
        Ok(sink) => emitter.add_sink(Arc::new(sink)),
        Err(e) => {
            eprintln!("{} {}", "configuration error:".red(), e);
            return Err(EXIT_CONFIG);
        }
    }
    Ok(Arc::new(emitter))
}

fn map_error(e: anyhow::Error) -> u8 {
    if let Some(engine) = e.downcast_ref::<EngineError>() {
        return match engine {
            EngineError::PlanAbort { .. } => EXIT_PLAN_ABORT,
            EngineError::Escalation { .. } => EXIT_ESCALATION,
            EngineError::BudgetExhausted(_) => EXIT_BUDGET,
            _ => EXIT_CONFIG,
        };
    }
    eprintln!("{} {}", "error:".red(), e);
    EXIT_CONFIG
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = std::env::var("AGENT_LOG_LEVEL")
        .map(|level| EnvFilter::new(level))
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn uuid_like_session_id() -> String {
    // Timestamp-based ids keep event files sortable by start time.
    format!(
        "{}-{:04x}",
        chrono::Utc::now().format("%Y%m%d-%H%M%S"),
        std::process::id() & 0xffff
    )
}
