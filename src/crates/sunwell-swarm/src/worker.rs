//! Worker loop and status heartbeats
//!
//! A worker repeatedly: checks out its branch, claims a goal under the
//! backlog flock, takes file locks on the goal's estimated paths in sorted
//! order, runs the goal, commits to its branch with a structured message,
//! releases the locks, and marks the goal complete. It stops when no
//! claimable goal remains.
//!
//! Status is written to `workers/worker-{i}.json` via tmp+rename by the
//! owning worker only; a heartbeat older than the stuck threshold marks the
//! worker as stuck for observers.

use crate::backlog::{Backlog, Goal};
use crate::error::Result;
use crate::locks::FileLockManager;
use crate::repo::{commit_message, Repository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use sunwell_core::config::CoordinatorConfig;
use sunwell_core::paths::{read_json, write_json_atomic};
use sunwell_core::StateLayout;
use tracing::{info, warn};

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Claiming,
    Running,
    Committing,
    Stopped,
    Failed,
}

/// One worker's status file contents; overwritten atomically each update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub pid: u32,
    pub state: WorkerState,
    pub branch: String,

    #[serde(default)]
    pub current_goal: Option<String>,

    #[serde(default)]
    pub goals_completed: u32,

    #[serde(default)]
    pub goals_failed: u32,

    pub heartbeat: DateTime<Utc>,

    #[serde(default)]
    pub error: Option<String>,
}

impl WorkerStatus {
    pub fn new(worker_id: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            pid: std::process::id(),
            state: WorkerState::Idle,
            branch: branch.into(),
            current_goal: None,
            goals_completed: 0,
            goals_failed: 0,
            heartbeat: Utc::now(),
            error: None,
        }
    }

    /// Heartbeat age exceeds the stuck threshold
    pub fn is_stuck(&self, threshold: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.heartbeat);
        age.num_seconds() >= threshold.as_secs() as i64
    }

    pub fn write(&self, layout: &StateLayout) -> Result<()> {
        write_json_atomic(&layout.worker_status_file(&self.worker_id), self)?;
        Ok(())
    }

    pub fn load(layout: &StateLayout, worker_id: &str) -> Result<Option<WorkerStatus>> {
        Ok(read_json(&layout.worker_status_file(worker_id))?)
    }

    /// Load every status file under `workers/`
    pub fn load_all(layout: &StateLayout) -> Result<Vec<WorkerStatus>> {
        let dir = layout.workers_dir();
        let mut statuses = Vec::new();
        if !dir.exists() {
            return Ok(statuses);
        }
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Some(status) = read_json::<WorkerStatus>(&path)? {
                    statuses.push(status);
                }
            }
        }
        statuses.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        Ok(statuses)
    }
}

/// What a worker does with a claimed goal; the CLI wires the engine in here
#[async_trait]
pub trait GoalRunner: Send + Sync {
    async fn run(&self, goal: &Goal, worker_id: &str) -> Result<()>;
}

/// Per-worker summary returned to the coordinator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub worker_id: String,
    pub branch: String,
    pub goals_completed: u32,
    pub goals_failed: u32,
    pub error: Option<String>,
}

/// One worker's execution context
pub struct Worker {
    pub id: String,
    pub branch: String,
    layout: StateLayout,
    config: CoordinatorConfig,
    backlog: Backlog,
    locks: FileLockManager,
    repo: Arc<dyn Repository>,
    /// Serializes checkout/commit windows between in-process workers
    git_gate: Arc<tokio::sync::Mutex<()>>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        branch: impl Into<String>,
        layout: StateLayout,
        config: CoordinatorConfig,
        backlog: Backlog,
        repo: Arc<dyn Repository>,
        git_gate: Arc<tokio::sync::Mutex<()>>,
    ) -> Self {
        let locks = FileLockManager::new(
            layout.file_locks_dir(),
            Duration::from_secs(config.stale_lock_secs),
        );
        Self {
            id: id.into(),
            branch: branch.into(),
            layout,
            config,
            backlog,
            locks,
            repo,
            git_gate,
        }
    }

    /// Claim-and-run until the backlog is drained
    pub async fn run_loop(&self, runner: Arc<dyn GoalRunner>) -> Result<WorkerSummary> {
        let shared = Arc::new(std::sync::Mutex::new(WorkerStatus::new(&self.id, &self.branch)));
        shared.lock().expect("status poisoned").write(&self.layout)?;

        // Heartbeat refresher: rewrites the status file every interval so
        // observers can tell a long-running goal from a stuck worker.
        let refresher = {
            let shared = shared.clone();
            let layout = self.layout.clone();
            let interval = Duration::from_secs(self.config.heartbeat_interval_secs.max(1));
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    let snapshot = {
                        let mut status = shared.lock().expect("status poisoned");
                        status.heartbeat = Utc::now();
                        status.clone()
                    };
                    if snapshot.write(&layout).is_err() {
                        break;
                    }
                }
            })
        };

        let result = self.drain(&runner, &shared).await;
        refresher.abort();

        let mut status = shared.lock().expect("status poisoned").clone();
        status.state = if result.is_ok() {
            WorkerState::Stopped
        } else {
            WorkerState::Failed
        };
        status.heartbeat = Utc::now();
        status.write(&self.layout)?;
        result?;

        Ok(WorkerSummary {
            worker_id: self.id.clone(),
            branch: self.branch.clone(),
            goals_completed: status.goals_completed,
            goals_failed: status.goals_failed,
            error: status.error,
        })
    }

    async fn drain(
        &self,
        runner: &Arc<dyn GoalRunner>,
        shared: &Arc<std::sync::Mutex<WorkerStatus>>,
    ) -> Result<()> {
        loop {
            self.update_status(shared, |status| {
                status.state = WorkerState::Claiming;
                status.current_goal = None;
            })?;

            let locks = &self.locks;
            let claimed = self
                .backlog
                .claim(&self.id, |path| locks.is_locked(path))?;
            let Some(goal) = claimed else {
                if self.backlog.is_drained()? {
                    break;
                }
                // Unclaimable but not drained: requires or locks in the way.
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            };

            match self.run_goal(&goal, runner, shared).await {
                Ok(()) => {
                    self.backlog.mark_complete(&goal.id, &self.id)?;
                    self.update_status(shared, |status| status.goals_completed += 1)?;
                    info!(worker_id = %self.id, goal_id = %goal.id, "goal completed");
                }
                Err(e) => {
                    warn!(worker_id = %self.id, goal_id = %goal.id, error = %e, "goal failed");
                    self.backlog.mark_failed(&goal.id, &self.id)?;
                    let detail = e.to_string();
                    self.update_status(shared, |status| {
                        status.goals_failed += 1;
                        status.error = Some(detail.clone());
                    })?;
                }
            }
        }
        Ok(())
    }

    fn update_status(
        &self,
        shared: &Arc<std::sync::Mutex<WorkerStatus>>,
        mutate: impl FnOnce(&mut WorkerStatus),
    ) -> Result<()> {
        let snapshot = {
            let mut status = shared.lock().expect("status poisoned");
            mutate(&mut status);
            status.heartbeat = Utc::now();
            status.clone()
        };
        snapshot.write(&self.layout)
    }

    async fn run_goal(
        &self,
        goal: &Goal,
        runner: &Arc<dyn GoalRunner>,
        shared: &Arc<std::sync::Mutex<WorkerStatus>>,
    ) -> Result<()> {
        self.backlog.mark_running(&goal.id, &self.id)?;
        self.update_status(shared, |status| {
            status.state = WorkerState::Running;
            status.current_goal = Some(goal.id.clone());
        })?;

        {
            let _gate = self.git_gate.lock().await;
            self.repo.checkout(&self.branch).await?;
        }

        // Sorted-order acquisition on the goal's estimated footprint.
        let paths: Vec<String> = goal.estimated_paths().into_iter().collect();
        let held = self
            .locks
            .acquire_all(&paths, Duration::from_secs(self.config.lock_timeout_secs))
            .await?;

        let run_result = runner.run(goal, &self.id).await;

        if run_result.is_ok() {
            self.update_status(shared, |status| status.state = WorkerState::Committing)?;

            let _gate = self.git_gate.lock().await;
            self.repo.checkout(&self.branch).await?;
            self.repo
                .commit_all(&commit_message(&goal.id, &self.id, goal.category.as_deref()))
                .await?;
        }

        // Locks release before the goal is marked complete.
        drop(held);
        run_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());

        let mut status = WorkerStatus::new("worker-0", "sunwell/worker-0");
        status.write(&layout).unwrap();
        status.state = WorkerState::Running;
        status.goals_completed = 2;
        status.write(&layout).unwrap();

        let loaded = WorkerStatus::load(&layout, "worker-0").unwrap().unwrap();
        assert_eq!(loaded.state, WorkerState::Running);
        assert_eq!(loaded.goals_completed, 2);
    }

    #[test]
    fn test_stuck_detection() {
        let mut status = WorkerStatus::new("w", "b");
        assert!(!status.is_stuck(Duration::from_secs(60)));
        status.heartbeat = Utc::now() - chrono::Duration::seconds(120);
        assert!(status.is_stuck(Duration::from_secs(60)));
    }

    #[test]
    fn test_load_all_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        WorkerStatus::new("worker-1", "b1").write(&layout).unwrap();
        WorkerStatus::new("worker-0", "b0").write(&layout).unwrap();

        let all = WorkerStatus::load_all(&layout).unwrap();
        let ids: Vec<&str> = all.iter().map(|s| s.worker_id.as_str()).collect();
        assert_eq!(ids, vec!["worker-0", "worker-1"]);
    }
}
