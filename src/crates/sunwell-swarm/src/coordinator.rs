//! Multi-worker coordinator
//!
//! Activated when `workers >= 2`. Setup verifies a clean working tree,
//! records the base branch, creates one isolated branch per worker, and
//! starts the workers over the shared backlog. Coordination never uses
//! shared memory: claims, file locks, status files, and the LLM semaphore
//! are all filesystem-mediated, so the same worker loop runs unchanged
//! whether workers share this process or run as separate ones.
//!
//! After every worker finishes, branches merge deterministically (§ merge)
//! and conflicted branches are quarantined for human review.

use crate::backlog::{Backlog, GoalStatus};
use crate::error::{Result, SwarmError};
use crate::merge::{merge_worker_branches, MergeReport};
use crate::repo::Repository;
use crate::worker::{GoalRunner, Worker, WorkerState, WorkerStatus, WorkerSummary};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use sunwell_core::config::CoordinatorConfig;
use sunwell_core::StateLayout;
use tracing::{info, warn};

/// Outcome of a coordinated run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorResult {
    pub goals_completed: usize,
    pub goals_failed: usize,
    pub workers: Vec<WorkerSummary>,
    pub merge: MergeReport,
}

/// The coordinator itself
pub struct Coordinator {
    repo: Arc<dyn Repository>,
    layout: StateLayout,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(repo: Arc<dyn Repository>, layout: StateLayout, config: CoordinatorConfig) -> Self {
        Self {
            repo,
            layout,
            config,
        }
    }

    /// Run the full protocol: setup, workers, merge.
    pub async fn execute(
        &self,
        backlog: Backlog,
        runner: Arc<dyn GoalRunner>,
    ) -> Result<CoordinatorResult> {
        // Setup: a dirty tree would entangle worker commits with local work.
        if !self.repo.is_clean().await? {
            return Err(SwarmError::DirtyWorkingTree);
        }
        let base_branch = self.repo.current_branch().await?;
        info!(base_branch = %base_branch, workers = self.config.workers, "coordinator starting");

        let mut branches = Vec::with_capacity(self.config.workers);
        for i in 0..self.config.workers {
            let branch = format!("{}/worker-{}", self.config.branch_prefix, i);
            self.repo.create_branch(&branch, "HEAD").await?;
            branches.push(branch);
        }

        // Workers: no shared memory; the git gate only serializes
        // checkout/commit windows between same-process workers.
        let git_gate = Arc::new(tokio::sync::Mutex::new(()));
        let mut handles = Vec::new();
        for (i, branch) in branches.iter().enumerate() {
            let worker = Worker::new(
                format!("worker-{}", i),
                branch.clone(),
                self.layout.clone(),
                self.config.clone(),
                backlog.clone(),
                self.repo.clone(),
                git_gate.clone(),
            );
            let runner = runner.clone();
            let total = Duration::from_secs(self.config.worker_total_secs);
            handles.push(tokio::spawn(async move {
                match tokio::time::timeout(total, worker.run_loop(runner)).await {
                    Ok(result) => result,
                    Err(_) => Err(SwarmError::Worker {
                        worker_id: worker.id.clone(),
                        detail: format!("exceeded total runtime of {:?}", total),
                    }),
                }
            }));
        }

        let mut summaries = Vec::new();
        for (i, handle) in handles.into_iter().enumerate() {
            let worker_id = format!("worker-{}", i);
            match handle.await {
                Ok(Ok(summary)) => summaries.push(summary),
                Ok(Err(e)) => {
                    // Crash semantics: locks clean up via stale detection on
                    // the next acquire; the goal stays claimed for a human.
                    warn!(worker_id = %worker_id, error = %e, "worker failed");
                    self.mark_worker_failed(&worker_id, &e)?;
                    summaries.push(WorkerSummary {
                        worker_id,
                        branch: branches[i].clone(),
                        error: Some(e.to_string()),
                        ..WorkerSummary::default()
                    });
                }
                Err(join_error) => {
                    warn!(worker_id = %worker_id, error = %join_error, "worker panicked");
                    self.mark_worker_failed(
                        &worker_id,
                        &SwarmError::Worker {
                            worker_id: worker_id.clone(),
                            detail: join_error.to_string(),
                        },
                    )?;
                    summaries.push(WorkerSummary {
                        worker_id,
                        branch: branches[i].clone(),
                        error: Some(join_error.to_string()),
                        ..WorkerSummary::default()
                    });
                }
            }
        }

        // Merge: deterministic order, conflict quarantine.
        let merge = merge_worker_branches(
            self.repo.as_ref(),
            &base_branch,
            &branches,
            self.config.delete_merged_branches,
        )
        .await?;

        let goals = backlog.goals()?;
        let result = CoordinatorResult {
            goals_completed: goals
                .iter()
                .filter(|g| g.status == GoalStatus::Completed)
                .count(),
            goals_failed: goals
                .iter()
                .filter(|g| g.status == GoalStatus::Failed)
                .count(),
            workers: summaries,
            merge,
        };
        info!(
            completed = result.goals_completed,
            failed = result.goals_failed,
            merged = result.merge.merged.len(),
            conflicts = result.merge.conflicts.len(),
            "coordinator finished"
        );
        Ok(result)
    }

    fn mark_worker_failed(&self, worker_id: &str, error: &SwarmError) -> Result<()> {
        if let Some(mut status) = WorkerStatus::load(&self.layout, worker_id)? {
            status.state = WorkerState::Failed;
            status.error = Some(error.to_string());
            status.write(&self.layout)?;
        }
        Ok(())
    }
}

/// Workers whose heartbeat exceeds the stuck threshold, for `workers status`
pub fn stuck_workers(layout: &StateLayout, config: &CoordinatorConfig) -> Result<Vec<String>> {
    let threshold = Duration::from_secs(config.worker_stuck_secs);
    Ok(WorkerStatus::load_all(layout)?
        .into_iter()
        .filter(|status| {
            !matches!(status.state, WorkerState::Stopped | WorkerState::Failed)
                && status.is_stuck(threshold)
        })
        .map(|status| status.worker_id)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::Goal;
    use crate::repo::RebaseOutcome;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Fake repository that counts commits per branch as workers commit
    struct FakeRepository {
        current: Mutex<String>,
        commits: Mutex<BTreeMap<String, usize>>,
        clean: bool,
        next_stamp: AtomicUsize,
        stamps: Mutex<BTreeMap<String, DateTime<Utc>>>,
    }

    impl FakeRepository {
        fn new(clean: bool) -> Self {
            Self {
                current: Mutex::new("main".to_string()),
                commits: Mutex::new(BTreeMap::new()),
                clean,
                next_stamp: AtomicUsize::new(0),
                stamps: Mutex::new(BTreeMap::new()),
            }
        }
    }

    #[async_trait]
    impl Repository for FakeRepository {
        async fn is_clean(&self) -> Result<bool> {
            Ok(self.clean)
        }
        async fn current_branch(&self) -> Result<String> {
            Ok(self.current.lock().unwrap().clone())
        }
        async fn create_branch(&self, name: &str, _from: &str) -> Result<()> {
            self.commits.lock().unwrap().insert(name.to_string(), 0);
            Ok(())
        }
        async fn checkout(&self, name: &str) -> Result<()> {
            *self.current.lock().unwrap() = name.to_string();
            Ok(())
        }
        async fn commit_all(&self, _message: &str) -> Result<bool> {
            let branch = self.current.lock().unwrap().clone();
            *self.commits.lock().unwrap().entry(branch.clone()).or_insert(0) += 1;
            let tick = self.next_stamp.fetch_add(1, Ordering::SeqCst) as u32;
            self.stamps
                .lock()
                .unwrap()
                .entry(branch)
                .or_insert_with(|| Utc.with_ymd_and_hms(2025, 6, 1, 12, tick, 0).unwrap());
            Ok(true)
        }
        async fn rebase_onto(&self, _base: &str) -> Result<RebaseOutcome> {
            Ok(RebaseOutcome::Clean)
        }
        async fn merge_ff_only(&self, _branch: &str) -> Result<()> {
            Ok(())
        }
        async fn delete_branch(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn commit_count(&self, _base: &str, branch: &str) -> Result<usize> {
            Ok(self.commits.lock().unwrap().get(branch).copied().unwrap_or(0))
        }
        async fn first_commit_timestamp(
            &self,
            _base: &str,
            branch: &str,
        ) -> Result<Option<DateTime<Utc>>> {
            Ok(self.stamps.lock().unwrap().get(branch).copied())
        }
    }

    /// Runner that records which worker ran which goal
    struct RecordingRunner {
        runs: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl GoalRunner for RecordingRunner {
        async fn run(&self, goal: &Goal, worker_id: &str) -> Result<()> {
            // Simulate some work so workers interleave.
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.runs
                .lock()
                .unwrap()
                .push((worker_id.to_string(), goal.id.clone()));
            Ok(())
        }
    }

    fn config(workers: usize) -> CoordinatorConfig {
        CoordinatorConfig {
            workers,
            ..CoordinatorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_dirty_tree_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Coordinator::new(
            Arc::new(FakeRepository::new(false)),
            StateLayout::new(dir.path()),
            config(2),
        );
        let backlog = Backlog::new(StateLayout::new(dir.path()));
        let runner = Arc::new(RecordingRunner {
            runs: Mutex::new(Vec::new()),
        });
        let err = coordinator.execute(backlog, runner).await;
        assert!(matches!(err, Err(SwarmError::DirtyWorkingTree)));
    }

    #[tokio::test]
    async fn test_two_workers_drain_backlog_and_merge() {
        // Conflicting goals on auth.py serialize via locks; all complete;
        // no merge conflicts (separate branches, sequential merge).
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        layout.ensure_created().unwrap();

        let backlog = Backlog::new(layout.clone());
        backlog
            .push(vec![
                Goal::new("goal-a", "Fix auth.py", "Fix the session bug in auth.py"),
                Goal::new("goal-b", "Refactor auth.py", "Split helpers out of auth.py"),
                Goal::new("goal-c", "Fix models.py", "Adjust models.py defaults"),
            ])
            .unwrap();

        let runner = Arc::new(RecordingRunner {
            runs: Mutex::new(Vec::new()),
        });
        let coordinator = Coordinator::new(
            Arc::new(FakeRepository::new(true)),
            layout.clone(),
            config(2),
        );

        let result = coordinator.execute(backlog.clone(), runner.clone()).await.unwrap();

        assert_eq!(result.goals_completed, 3);
        assert_eq!(result.goals_failed, 0);
        assert!(result.merge.conflicts.is_empty());
        assert_eq!(runner.runs.lock().unwrap().len(), 3);

        // Every goal ended completed with a claimant recorded.
        for goal in backlog.goals().unwrap() {
            assert_eq!(goal.status, GoalStatus::Completed);
            assert!(goal.claimed_by.is_some());
        }

        // Workers wrote their final status files.
        let statuses = WorkerStatus::load_all(&layout).unwrap();
        assert_eq!(statuses.len(), 2);
        assert!(statuses
            .iter()
            .all(|s| s.state == WorkerState::Stopped));
    }

    #[tokio::test]
    async fn test_stuck_worker_detection() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());

        let mut fresh = WorkerStatus::new("worker-0", "b0");
        fresh.state = WorkerState::Running;
        fresh.write(&layout).unwrap();

        let mut stale = WorkerStatus::new("worker-1", "b1");
        stale.state = WorkerState::Running;
        stale.heartbeat = Utc::now() - chrono::Duration::seconds(600);
        stale.write(&layout).unwrap();

        let mut stopped = WorkerStatus::new("worker-2", "b2");
        stopped.state = WorkerState::Stopped;
        stopped.heartbeat = Utc::now() - chrono::Duration::seconds(600);
        stopped.write(&layout).unwrap();

        let stuck = stuck_workers(&layout, &CoordinatorConfig::default()).unwrap();
        assert_eq!(stuck, vec!["worker-1"]);
    }
}
