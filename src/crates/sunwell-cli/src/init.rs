//! The `init` command
//!
//! Creates the `.sunwell/` state layout and a commented default
//! `sunwell.toml` so a first `run` starts from a known-good configuration.

use crate::render::{EXIT_CONFIG, EXIT_OK};
use colored::Colorize;
use std::path::PathBuf;
use sunwell_core::StateLayout;

const DEFAULT_CONFIG: &str = r#"# sunwell configuration
# Environment variables (AGENT_*) overlay anything set here.

[budget]
# Total tokens per session; 20% is held in reserve for the fix phase.
total_tokens = 1000000
reserve_fraction = 0.2

[planner]
# Candidates generated for complex goals (HARMONIC planning).
harmonic_candidates = 5

[executor]
max_concurrent_tasks = 4
max_retries_per_task = 2
max_fix_attempts = 3
task_timeout_secs = 60
signal_timeout_secs = 10

[gates]
timeout_secs = 30

[coordinator]
# 2+ activates multi-worker runs over isolated branches.
workers = 1
branch_prefix = "sunwell"
lock_timeout_secs = 30
stale_lock_secs = 60
max_concurrent_llm_calls = 4

[llm]
# Any OpenAI-compatible endpoint; set AGENT_MODEL_API_KEY in the environment.
provider = "openai"
model = "gpt-4o-mini"
"#;

pub async fn execute() -> u8 {
    let project_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let layout = StateLayout::new(&project_root);

    if let Err(e) = layout.ensure_created() {
        eprintln!("{} {}", "init failed:".red(), e);
        return EXIT_CONFIG;
    }

    let config_path = project_root.join("sunwell.toml");
    if config_path.exists() {
        println!("{} sunwell.toml already exists, leaving it untouched", "·".dimmed());
    } else if let Err(e) = std::fs::write(&config_path, DEFAULT_CONFIG) {
        eprintln!("{} {}", "init failed:".red(), e);
        return EXIT_CONFIG;
    } else {
        println!("{} wrote sunwell.toml", "✓".green());
    }

    println!("{} created {}", "✓".green(), layout.root().display());
    EXIT_OK
}
