//! Repository capability
//!
//! The version-control backend is an external collaborator; workers and the
//! merge protocol consume it through this trait. The production
//! implementation shells out to `git`; tests use an in-memory fake.

use crate::error::{Result, SwarmError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::Stdio;
use tracing::debug;

/// Outcome of a rebase attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseOutcome {
    Clean,
    /// Conflicted; the implementation has already aborted the rebase
    Conflict,
}

/// Version-control operations the coordinator needs
#[async_trait]
pub trait Repository: Send + Sync {
    async fn is_clean(&self) -> Result<bool>;

    async fn current_branch(&self) -> Result<String>;

    async fn create_branch(&self, name: &str, from: &str) -> Result<()>;

    async fn checkout(&self, name: &str) -> Result<()>;

    /// Stage everything and commit; `false` when there was nothing to commit
    async fn commit_all(&self, message: &str) -> Result<bool>;

    /// Rebase the current branch onto `base`; aborts itself on conflict
    async fn rebase_onto(&self, base: &str) -> Result<RebaseOutcome>;

    /// Fast-forward-only merge of `branch` into the current branch
    async fn merge_ff_only(&self, branch: &str) -> Result<()>;

    async fn delete_branch(&self, name: &str) -> Result<()>;

    /// Local branches whose names start with `prefix`
    async fn list_branches(&self, prefix: &str) -> Result<Vec<String>> {
        let _ = prefix;
        Ok(Vec::new())
    }

    /// Commits on `branch` that `base` does not have
    async fn commit_count(&self, base: &str, branch: &str) -> Result<usize>;

    /// Committer timestamp of the FIRST commit unique to `branch`
    async fn first_commit_timestamp(
        &self,
        base: &str,
        branch: &str,
    ) -> Result<Option<DateTime<Utc>>>;
}

/// `git`-subprocess-backed implementation
#[derive(Debug, Clone)]
pub struct GitRepository {
    root: PathBuf,
}

impl GitRepository {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        debug!(?args, "git");
        let output = tokio::process::Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| SwarmError::Git {
                operation: args.first().unwrap_or(&"?").to_string(),
                detail: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(SwarmError::Git {
                operation: args.join(" "),
                detail: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Repository for GitRepository {
    async fn is_clean(&self) -> Result<bool> {
        let status = self.git(&["status", "--porcelain"]).await?;
        Ok(status.trim().is_empty())
    }

    async fn current_branch(&self) -> Result<String> {
        Ok(self
            .git(&["rev-parse", "--abbrev-ref", "HEAD"])
            .await?
            .trim()
            .to_string())
    }

    async fn create_branch(&self, name: &str, from: &str) -> Result<()> {
        self.git(&["branch", name, from]).await?;
        Ok(())
    }

    async fn checkout(&self, name: &str) -> Result<()> {
        self.git(&["checkout", name]).await?;
        Ok(())
    }

    async fn commit_all(&self, message: &str) -> Result<bool> {
        self.git(&["add", "-A"]).await?;
        let staged = self.git(&["diff", "--cached", "--name-only"]).await?;
        if staged.trim().is_empty() {
            return Ok(false);
        }
        self.git(&["commit", "-m", message]).await?;
        Ok(true)
    }

    async fn rebase_onto(&self, base: &str) -> Result<RebaseOutcome> {
        match self.git(&["rebase", base]).await {
            Ok(_) => Ok(RebaseOutcome::Clean),
            Err(_) => {
                let _ = self.git(&["rebase", "--abort"]).await;
                Ok(RebaseOutcome::Conflict)
            }
        }
    }

    async fn merge_ff_only(&self, branch: &str) -> Result<()> {
        self.git(&["merge", "--ff-only", branch]).await?;
        Ok(())
    }

    async fn delete_branch(&self, name: &str) -> Result<()> {
        self.git(&["branch", "-D", name]).await?;
        Ok(())
    }

    async fn list_branches(&self, prefix: &str) -> Result<Vec<String>> {
        let output = self
            .git(&["branch", "--list", "--format=%(refname:short)", &format!("{}*", prefix)])
            .await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn commit_count(&self, base: &str, branch: &str) -> Result<usize> {
        let output = self
            .git(&["rev-list", "--count", &format!("{}..{}", base, branch)])
            .await?;
        Ok(output.trim().parse().unwrap_or(0))
    }

    async fn first_commit_timestamp(
        &self,
        base: &str,
        branch: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let output = self
            .git(&[
                "log",
                "--format=%cI",
                "--reverse",
                &format!("{}..{}", base, branch),
            ])
            .await?;
        let Some(first) = output.lines().next().map(str::trim).filter(|l| !l.is_empty()) else {
            return Ok(None);
        };
        let parsed = DateTime::parse_from_rfc3339(first).map_err(|e| SwarmError::Git {
            operation: "log".to_string(),
            detail: format!("unparseable timestamp '{}': {}", first, e),
        })?;
        Ok(Some(parsed.with_timezone(&Utc)))
    }
}

/// Structured worker commit message: goal id, worker id, category
pub fn commit_message(goal_id: &str, worker_id: &str, category: Option<&str>) -> String {
    match category {
        Some(category) => format!("[{}] {} ({})", worker_id, goal_id, category),
        None => format!("[{}] {}", worker_id, goal_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_message_shape() {
        assert_eq!(
            commit_message("goal-7", "worker-1", Some("refactor")),
            "[worker-1] goal-7 (refactor)"
        );
        assert_eq!(commit_message("goal-7", "worker-1", None), "[worker-1] goal-7");
    }
}
