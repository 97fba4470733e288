//! Deterministic branch merging with conflict quarantine
//!
//! Worker branches merge back into the base branch in an order that is a
//! pure function of their first-commit timestamps (branch name breaks
//! ties), independent of wall-clock at merge time. Each branch is
//! rebased onto the base and fast-forward merged; a rebase conflict
//! quarantines the branch for human review and the protocol continues with
//! the next one.

use crate::error::Result;
use crate::repo::{RebaseOutcome, Repository};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Outcome of the merge protocol
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Branches merged, in merge order
    pub merged: Vec<String>,

    /// Branches quarantined with rebase conflicts (never deleted)
    pub conflicts: Vec<String>,

    /// Branches skipped because they had no commits
    pub empty: Vec<String>,
}

impl MergeReport {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Compute the merge order: ascending first-commit timestamp, then branch
/// name. Pure, so it is testable without a repository.
pub fn merge_order(mut stamped: Vec<(String, DateTime<Utc>)>) -> Vec<String> {
    stamped.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
    stamped.into_iter().map(|(branch, _)| branch).collect()
}

/// Run the merge protocol over a set of worker branches
pub async fn merge_worker_branches(
    repo: &dyn Repository,
    base_branch: &str,
    branches: &[String],
    delete_merged: bool,
) -> Result<MergeReport> {
    let mut report = MergeReport::default();

    // Stamp each branch by its first unique commit; empty branches are
    // noted and skipped.
    let mut stamped: Vec<(String, DateTime<Utc>)> = Vec::new();
    for branch in branches {
        if repo.commit_count(base_branch, branch).await? == 0 {
            report.empty.push(branch.clone());
            continue;
        }
        match repo.first_commit_timestamp(base_branch, branch).await? {
            Some(timestamp) => stamped.push((branch.clone(), timestamp)),
            None => report.empty.push(branch.clone()),
        }
    }

    for branch in merge_order(stamped) {
        repo.checkout(&branch).await?;
        match repo.rebase_onto(base_branch).await? {
            RebaseOutcome::Clean => {
                repo.checkout(base_branch).await?;
                repo.merge_ff_only(&branch).await?;
                info!(branch = %branch, "branch merged");
                if delete_merged {
                    repo.delete_branch(&branch).await?;
                }
                report.merged.push(branch);
            }
            RebaseOutcome::Conflict => {
                // Quarantine: back to base, keep the branch for review.
                repo.checkout(base_branch).await?;
                warn!(branch = %branch, "rebase conflict, branch quarantined");
                report.conflicts.push(branch);
            }
        }
    }

    Ok(report)
}
