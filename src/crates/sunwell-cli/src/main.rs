//! sunwell CLI - adaptive, signal-driven agent runs
//!
//! Main entry point for the sunwell command-line tool.

mod init;
mod render;
mod run;
mod runner;
mod workers_cmd;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "sunwell")]
#[command(about = "Sunwell - adaptive, signal-driven agent execution", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the .sunwell state layout and a default sunwell.toml
    Init,

    /// Run a goal through the execution core
    Run {
        /// The natural-language goal
        goal: String,

        /// Worker count; 2+ activates the coordinator
        #[arg(long)]
        workers: Option<usize>,

        /// Token budget for the session
        #[arg(long)]
        budget: Option<u64>,

        /// Suppress rendering; print only a final NDJSON summary
        #[arg(long)]
        quiet: bool,

        /// Stream raw agent events as NDJSON
        #[arg(long)]
        json: bool,

        /// Resume from persisted gate checkpoints
        #[arg(long)]
        resume: bool,

        /// Session id to resume under
        #[arg(long)]
        session: Option<String>,

        /// Re-run from this gate even if checkpointed (implies --resume)
        #[arg(long)]
        from_gate: Option<String>,

        /// Strip validation gates (plan-shaped execution only)
        #[arg(long)]
        no_gates: bool,

        /// Stop after planning and print the task graph
        #[arg(long)]
        dry_run: bool,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Worker management commands
    #[command(subcommand)]
    Workers(WorkersCommands),
}

#[derive(Subcommand)]
enum WorkersCommands {
    /// Show worker status and stuck-heartbeat warnings
    Status,

    /// Show worker logs
    Logs {
        /// Worker id, e.g. worker-0
        id: Option<String>,

        /// All workers
        #[arg(long)]
        all: bool,
    },

    /// Stop workers by pid (cooperative TERM)
    Stop {
        /// Worker id, e.g. worker-0
        id: Option<String>,

        /// All workers
        #[arg(long)]
        all: bool,
    },

    /// Merge finished worker branches into the base branch
    Merge {
        /// Base branch to merge into (defaults to the current branch)
        #[arg(long)]
        branch: Option<String>,
    },

    /// List branches quarantined with merge conflicts
    Conflicts,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {}", e);
            return ExitCode::from(10);
        }
    };

    let code = runtime.block_on(async {
        match cli.command {
            Commands::Init => init::execute().await,
            Commands::Run {
                goal,
                workers,
                budget,
                quiet,
                json,
                resume,
                session,
                from_gate,
                no_gates,
                dry_run,
                verbose,
            } => {
                run::execute(run::RunArgs {
                    goal,
                    workers,
                    budget,
                    quiet,
                    json,
                    resume,
                    session,
                    from_gate,
                    no_gates,
                    dry_run,
                    verbose,
                })
                .await
            }
            Commands::Workers(command) => match command {
                WorkersCommands::Status => workers_cmd::status().await,
                WorkersCommands::Logs { id, all } => workers_cmd::logs(id, all).await,
                WorkersCommands::Stop { id, all } => workers_cmd::stop(id, all).await,
                WorkersCommands::Merge { branch } => workers_cmd::merge(branch).await,
                WorkersCommands::Conflicts => workers_cmd::conflicts().await,
            },
        }
    });
    ExitCode::from(code)
}
