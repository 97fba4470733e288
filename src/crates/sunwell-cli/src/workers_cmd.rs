//! The `workers` subcommands
//!
//! Observability and control over worker state files, persisted event
//! streams, and the merge protocol.

use crate::render::{EXIT_MERGE_CONFLICTS, EXIT_OK};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use sunwell_core::paths::{read_json, write_json_atomic};
use sunwell_core::{StateLayout, SunwellConfig};
use sunwell_swarm::{
    merge_worker_branches, stuck_workers, GitRepository, MergeReport, Repository, WorkerState,
    WorkerStatus,
};

const EXIT_FAIL: u8 = 1;

fn layout() -> StateLayout {
    let project_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    StateLayout::new(&project_root)
}

fn load_config() -> SunwellConfig {
    let project_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    SunwellConfig::load(&project_root.join("sunwell.toml")).unwrap_or_default()
}

fn merge_report_path(layout: &StateLayout) -> PathBuf {
    layout.workers_dir().join("merge-report.json")
}

/// Persist the latest merge report for `workers conflicts`
pub fn persist_merge_report(layout: &StateLayout, report: &MergeReport) -> sunwell_core::Result<()> {
    write_json_atomic(&merge_report_path(layout), report)
}

pub async fn status() -> u8 {
    let layout = layout();
    let config = load_config();
    let statuses = match WorkerStatus::load_all(&layout) {
        Ok(statuses) => statuses,
        Err(e) => {
            eprintln!("{} {}", "error:".red(), e);
            return EXIT_FAIL;
        }
    };
    if statuses.is_empty() {
        println!("no workers have run in this project");
        return EXIT_OK;
    }

    let stuck = stuck_workers(&layout, &config.coordinator).unwrap_or_default();
    println!(
        "{:<12} {:<8} {:<12} {:<24} {:>5} {:>5}",
        "WORKER", "PID", "STATE", "GOAL", "DONE", "FAIL"
    );
    for status in &statuses {
        let state = if stuck.contains(&status.worker_id) {
            "stuck".red().to_string()
        } else {
            format!("{:?}", status.state).to_lowercase()
        };
        println!(
            "{:<12} {:<8} {:<12} {:<24} {:>5} {:>5}",
            status.worker_id,
            status.pid,
            state,
            status.current_goal.as_deref().unwrap_or("-"),
            status.goals_completed,
            status.goals_failed,
        );
        if let Some(error) = &status.error {
            println!("  {} {}", "!".red(), error);
        }
    }
    if statuses
        .iter()
        .any(|s| s.state == WorkerState::Failed)
        || !stuck.is_empty()
    {
        EXIT_FAIL
    } else {
        EXIT_OK
    }
}

pub async fn logs(id: Option<String>, all: bool) -> u8 {
    let layout = layout();
    let events_dir = layout.events_dir();
    let Ok(entries) = std::fs::read_dir(&events_dir) else {
        println!("no persisted event streams");
        return EXIT_OK;
    };

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().map(|e| e == "ndjson").unwrap_or(false))
        .collect();
    paths.sort();

    for path in paths {
        let Ok(raw) = std::fs::read_to_string(&path) else {
            continue;
        };
        for line in raw.lines() {
            // Filter by the worker tag unless --all / no id given.
            if !all {
                if let Some(id) = &id {
                    let tagged = serde_json::from_str::<serde_json::Value>(line)
                        .ok()
                        .and_then(|v| v.get("worker").and_then(|w| w.as_str().map(String::from)));
                    if tagged.as_deref() != Some(id.as_str()) {
                        continue;
                    }
                }
            }
            println!("{}", line);
        }
    }
    EXIT_OK
}

pub async fn stop(id: Option<String>, all: bool) -> u8 {
    let layout = layout();
    let statuses = match WorkerStatus::load_all(&layout) {
        Ok(statuses) => statuses,
        Err(e) => {
            eprintln!("{} {}", "error:".red(), e);
            return EXIT_FAIL;
        }
    };

    let targets: Vec<&WorkerStatus> = statuses
        .iter()
        .filter(|s| {
            !matches!(s.state, WorkerState::Stopped | WorkerState::Failed)
                && (all || id.as_deref() == Some(s.worker_id.as_str()))
        })
        .collect();
    if targets.is_empty() {
        println!("no matching running workers");
        return EXIT_OK;
    }

    let mut failures = 0;
    for status in targets {
        // Cooperative stop: TERM, letting the worker release locks on exit.
        let result = std::process::Command::new("kill")
            .args(["-TERM", &status.pid.to_string()])
            .status();
        match result {
            Ok(code) if code.success() => {
                println!("{} stopped {} (pid {})", "✓".green(), status.worker_id, status.pid);
            }
            _ => {
                eprintln!("{} could not signal {} (pid {})", "✗".red(), status.worker_id, status.pid);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        EXIT_FAIL
    } else {
        EXIT_OK
    }
}

pub async fn merge(base: Option<String>) -> u8 {
    let project_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let layout = StateLayout::new(&project_root);
    let config = load_config();
    let repo = Arc::new(GitRepository::new(project_root));

    let base_branch = match base {
        Some(branch) => branch,
        None => match repo.current_branch().await {
            Ok(branch) => branch,
            Err(e) => {
                eprintln!("{} {}", "error:".red(), e);
                return EXIT_FAIL;
            }
        },
    };
    let prefix = format!("{}/", config.coordinator.branch_prefix);
    let branches = match repo.list_branches(&prefix).await {
        Ok(branches) => branches,
        Err(e) => {
            eprintln!("{} {}", "error:".red(), e);
            return EXIT_FAIL;
        }
    };
    if branches.is_empty() {
        println!("no worker branches to merge");
        return EXIT_OK;
    }

    match merge_worker_branches(
        repo.as_ref(),
        &base_branch,
        &branches,
        config.coordinator.delete_merged_branches,
    )
    .await
    {
        Ok(report) => {
            println!(
                "merged {} branch(es); {} conflict(s)",
                report.merged.len(),
                report.conflicts.len()
            );
            let _ = persist_merge_report(&layout, &report);
            if report.has_conflicts() {
                EXIT_MERGE_CONFLICTS
            } else {
                EXIT_OK
            }
        }
        Err(e) => {
            eprintln!("{} {}", "merge error:".red(), e);
            EXIT_FAIL
        }
    }
}

pub async fn conflicts() -> u8 {
    let layout = layout();
    let report: Option<MergeReport> = match read_json(&merge_report_path(&layout)) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{} {}", "error:".red(), e);
            return EXIT_FAIL;
        }
    };
    match report {
        Some(report) if report.has_conflicts() => {
            println!("branches awaiting human review:");
            for branch in &report.conflicts {
                println!("  {} {}", "⚠".yellow(), branch);
            }
            EXIT_OK
        }
        _ => {
            println!("no quarantined branches");
            EXIT_OK
        }
    }
}
