//! Shared goal backlog
//!
//! Goals live in `backlog/current.json`; a claim journal accumulates in
//! `backlog/claims.json`. Every mutation happens under an exclusive flock
//! on `backlog/backlog.lock`, which serializes claim and completion across
//! worker processes: no two workers ever observe the same goal as
//! claimable.

use crate::error::Result;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use sunwell_core::paths::{read_json, write_json_atomic};
use sunwell_core::StateLayout;
use tracing::{debug, info};

/// Lifecycle of a goal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Pending,
    Claimed,
    Running,
    Completed,
    Failed,
    Blocked,
}

/// Authoritative path scope for a goal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalScope {
    #[serde(default)]
    pub allowed_paths: Vec<String>,
}

/// One backlog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub title: String,
    pub description: String,

    #[serde(default)]
    pub category: Option<String>,

    /// Higher claims earlier among otherwise-equal goals
    #[serde(default)]
    pub priority: i64,

    /// Goal ids that must be completed first
    #[serde(default)]
    pub requires: BTreeSet<String>,

    #[serde(default)]
    pub scope: GoalScope,

    #[serde(default)]
    pub claimed_by: Option<String>,

    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,

    pub status: GoalStatus,
}

impl Goal {
    pub fn new(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            category: None,
            priority: 0,
            requires: BTreeSet::new(),
            scope: GoalScope::default(),
            claimed_by: None,
            claimed_at: None,
            status: GoalStatus::Pending,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_requires<I, S>(mut self, requires: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = requires.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_allowed_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope.allowed_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Estimated paths this goal will touch, for conflict detection.
    ///
    /// Explicit `scope.allowed_paths` are authoritative; otherwise pattern
    /// heuristics fill in: path literals in the text, and test-for-X goals
    /// mapping onto `tests/test_X`.
    pub fn estimated_paths(&self) -> BTreeSet<String> {
        if !self.scope.allowed_paths.is_empty() {
            return self.scope.allowed_paths.iter().cloned().collect();
        }

        let mut paths = BTreeSet::new();
        let text = format!("{} {}", self.title, self.description);

        let path_literal = regex::Regex::new(r"[\w][\w/.-]*\.\w{1,6}").expect("static regex");
        for m in path_literal.find_iter(&text) {
            paths.insert(m.as_str().to_string());
        }

        let test_for = regex::Regex::new(r"(?i)tests?\s+for\s+([\w/]+)").expect("static regex");
        for captures in test_for.captures_iter(&text) {
            let target = captures[1].trim_end_matches(".py");
            paths.insert(format!("tests/test_{}.py", target.replace('/', "_")));
        }
        paths
    }

    /// Two goals may run in parallel iff neither requires the other and
    /// their estimated paths do not intersect.
    pub fn potentially_parallel(&self, other: &Goal) -> bool {
        if self.requires.contains(&other.id) || other.requires.contains(&self.id) {
            return false;
        }
        self.estimated_paths().is_disjoint(&other.estimated_paths())
    }
}

/// One line of the claim journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub goal_id: String,
    pub worker_id: String,
    pub action: String,
    pub at: DateTime<Utc>,
}

/// The shared, flock-serialized backlog
#[derive(Debug, Clone)]
pub struct Backlog {
    layout: StateLayout,
}

impl Backlog {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    /// Run `f` while holding the backlog flock.
    ///
    /// The flock is the single writer gate for `current.json` and
    /// `claims.json`; blocking is fine because critical sections are tiny.
    fn with_lock<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        std::fs::create_dir_all(self.layout.backlog_dir())?;
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(self.layout.backlog_lock())?;
        lock_file.lock_exclusive()?;
        let result = f(self);
        let _ = lock_file.unlock();
        result
    }

    fn read_goals(&self) -> Result<Vec<Goal>> {
        Ok(read_json(&self.layout.backlog_file())?.unwrap_or_default())
    }

    fn write_goals(&self, goals: &[Goal]) -> Result<()> {
        write_json_atomic(&self.layout.backlog_file(), &goals)?;
        Ok(())
    }

    fn append_claim(&self, record: ClaimRecord) -> Result<()> {
        let mut journal: Vec<ClaimRecord> =
            read_json(&self.layout.claims_file())?.unwrap_or_default();
        journal.push(record);
        write_json_atomic(&self.layout.claims_file(), &journal)?;
        Ok(())
    }

    /// Read the current goals (no lock; point-in-time snapshot)
    pub fn goals(&self) -> Result<Vec<Goal>> {
        self.read_goals()
    }

    /// Add goals under the backlog lock
    pub fn push(&self, new_goals: Vec<Goal>) -> Result<()> {
        self.with_lock(|backlog| {
            let mut goals = backlog.read_goals()?;
            goals.extend(new_goals);
            backlog.write_goals(&goals)
        })
    }

    /// Atomically claim the first claimable goal for a worker.
    ///
    /// Claimable: pending and unclaimed, every `requires` completed, and no
    /// estimated path currently locked by another worker (per the probe).
    pub fn claim(
        &self,
        worker_id: &str,
        path_locked: impl Fn(&str) -> bool,
    ) -> Result<Option<Goal>> {
        self.with_lock(|backlog| {
            let mut goals = backlog.read_goals()?;
            let completed: BTreeSet<String> = goals
                .iter()
                .filter(|g| g.status == GoalStatus::Completed)
                .map(|g| g.id.clone())
                .collect();

            // Highest priority first, then stable by id.
            let mut order: Vec<usize> = (0..goals.len()).collect();
            order.sort_by(|&a, &b| {
                goals[b]
                    .priority
                    .cmp(&goals[a].priority)
                    .then(goals[a].id.cmp(&goals[b].id))
            });

            let chosen = order.into_iter().find(|&i| {
                let goal = &goals[i];
                goal.status == GoalStatus::Pending
                    && goal.claimed_by.is_none()
                    && goal.requires.iter().all(|r| completed.contains(r))
                    && !goal.estimated_paths().iter().any(|p| path_locked(p))
            });

            let Some(index) = chosen else {
                return Ok(None);
            };
            goals[index].claimed_by = Some(worker_id.to_string());
            goals[index].claimed_at = Some(Utc::now());
            goals[index].status = GoalStatus::Claimed;
            let claimed = goals[index].clone();

            backlog.write_goals(&goals)?;
            backlog.append_claim(ClaimRecord {
                goal_id: claimed.id.clone(),
                worker_id: worker_id.to_string(),
                action: "claim".to_string(),
                at: Utc::now(),
            })?;
            info!(goal_id = %claimed.id, worker_id, "goal claimed");
            Ok(Some(claimed))
        })
    }

    /// Transition a claimed goal to running (holder only)
    pub fn mark_running(&self, goal_id: &str, worker_id: &str) -> Result<()> {
        self.set_status(goal_id, worker_id, GoalStatus::Running, "running")
    }

    /// Mark a goal completed under the backlog lock
    pub fn mark_complete(&self, goal_id: &str, worker_id: &str) -> Result<()> {
        self.set_status(goal_id, worker_id, GoalStatus::Completed, "complete")
    }

    /// Mark a goal failed under the backlog lock
    pub fn mark_failed(&self, goal_id: &str, worker_id: &str) -> Result<()> {
        self.set_status(goal_id, worker_id, GoalStatus::Failed, "failed")
    }

    fn set_status(
        &self,
        goal_id: &str,
        worker_id: &str,
        status: GoalStatus,
        action: &str,
    ) -> Result<()> {
        self.with_lock(|backlog| {
            let mut goals = backlog.read_goals()?;
            for goal in goals.iter_mut() {
                if goal.id == goal_id && goal.claimed_by.as_deref() == Some(worker_id) {
                    goal.status = status;
                    if matches!(status, GoalStatus::Completed | GoalStatus::Failed) {
                        debug!(goal_id, ?status, "goal finished");
                    }
                }
            }
            backlog.write_goals(&goals)?;
            backlog.append_claim(ClaimRecord {
                goal_id: goal_id.to_string(),
                worker_id: worker_id.to_string(),
                action: action.to_string(),
                at: Utc::now(),
            })
        })
    }

    /// True when no pending, claimable goal remains
    pub fn is_drained(&self) -> Result<bool> {
        let goals = self.read_goals()?;
        Ok(!goals.iter().any(|g| g.status == GoalStatus::Pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backlog(dir: &std::path::Path) -> Backlog {
        Backlog::new(StateLayout::new(dir))
    }

    #[test]
    fn test_estimated_paths_scope_authoritative() {
        let goal = Goal::new("g1", "Fix auth", "Fix the bug in auth.py and db.py")
            .with_allowed_paths(["src/auth.py"]);
        assert_eq!(
            goal.estimated_paths(),
            BTreeSet::from(["src/auth.py".to_string()])
        );
    }

    #[test]
    fn test_estimated_paths_heuristics() {
        let goal = Goal::new("g1", "Fix auth.py", "Also update models/user.py accordingly");
        let paths = goal.estimated_paths();
        assert!(paths.contains("auth.py"));
        assert!(paths.contains("models/user.py"));

        let goal = Goal::new("g2", "Write tests for auth", "");
        assert!(goal.estimated_paths().contains("tests/test_auth.py"));
    }

    #[test]
    fn test_potentially_parallel() {
        let a = Goal::new("a", "Fix auth.py", "");
        let b = Goal::new("b", "Refactor auth.py", "");
        let c = Goal::new("c", "Fix models.py", "");
        // Same estimated path: soft conflict.
        assert!(!a.potentially_parallel(&b));
        assert!(a.potentially_parallel(&c));

        let d = Goal::new("d", "Ship feature in web.py", "").with_requires(["a"]);
        assert!(!a.potentially_parallel(&d));
    }

    #[test]
    fn test_claim_sets_claimant_exclusively() {
        // A claimed goal is never claimable again.
        let dir = tempfile::tempdir().unwrap();
        let backlog = backlog(dir.path());
        backlog
            .push(vec![Goal::new("g1", "Fix auth.py", "")])
            .unwrap();

        let first = backlog.claim("worker-0", |_| false).unwrap();
        assert_eq!(first.unwrap().claimed_by.as_deref(), Some("worker-0"));

        let second = backlog.claim("worker-1", |_| false).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn test_claim_respects_requires_and_locks() {
        let dir = tempfile::tempdir().unwrap();
        let backlog = backlog(dir.path());
        backlog
            .push(vec![
                Goal::new("g1", "Fix auth.py", ""),
                Goal::new("g2", "Polish auth flow in auth.py", "").with_requires(["g1"]),
            ])
            .unwrap();

        // auth.py locked by another worker: nothing claimable.
        let none = backlog.claim("worker-0", |p| p == "auth.py").unwrap();
        assert!(none.is_none());

        // Lock released: g1 claimable, g2 still blocked on requires.
        let got = backlog.claim("worker-0", |_| false).unwrap().unwrap();
        assert_eq!(got.id, "g1");
        assert!(backlog.claim("worker-1", |_| false).unwrap().is_none());

        backlog.mark_complete("g1", "worker-0").unwrap();
        let got = backlog.claim("worker-1", |_| false).unwrap().unwrap();
        assert_eq!(got.id, "g2");
    }

    #[test]
    fn test_priority_order_then_id() {
        let dir = tempfile::tempdir().unwrap();
        let backlog = backlog(dir.path());
        backlog
            .push(vec![
                Goal::new("b-low", "One in one.py", ""),
                Goal::new("a-high", "Two in two.py", "").with_priority(5),
            ])
            .unwrap();

        let got = backlog.claim("w", |_| false).unwrap().unwrap();
        assert_eq!(got.id, "a-high");
    }

    #[test]
    fn test_claim_journal_appended() {
        let dir = tempfile::tempdir().unwrap();
        let backlog = backlog(dir.path());
        backlog.push(vec![Goal::new("g1", "Do it in x.py", "")]).unwrap();
        backlog.claim("w0", |_| false).unwrap().unwrap();
        backlog.mark_complete("g1", "w0").unwrap();

        let journal: Vec<ClaimRecord> =
            read_json(&StateLayout::new(dir.path()).claims_file())
                .unwrap()
                .unwrap();
        let actions: Vec<&str> = journal.iter().map(|r| r.action.as_str()).collect();
        assert_eq!(actions, vec!["claim", "complete"]);
    }

    #[test]
    fn test_drained() {
        let dir = tempfile::tempdir().unwrap();
        let backlog = backlog(dir.path());
        assert!(backlog.is_drained().unwrap());
        backlog.push(vec![Goal::new("g1", "Task in a.py", "")]).unwrap();
        assert!(!backlog.is_drained().unwrap());
        backlog.claim("w", |_| false).unwrap();
        assert!(backlog.is_drained().unwrap());
    }
}
