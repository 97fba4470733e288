//! Session context
//!
//! A session owns the run-scoped state: the goal, the budget, the event
//! emitter, the cancellation flag, and the project paths. Everything is
//! instantiated per run and passed explicitly; there is no process-global state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use sunwell_core::budget::Budget;
use sunwell_core::events::EventEmitter;
use sunwell_core::{StateLayout, SunwellConfig};

/// Run-scoped context threaded through planning and execution
pub struct Session {
    pub id: String,
    pub goal: String,

    /// SHA-256 of the goal text; links learnings and briefings to the goal
    pub goal_hash: String,

    pub project_root: PathBuf,
    pub layout: StateLayout,
    pub config: SunwellConfig,
    pub budget: Budget,
    pub emitter: Arc<EventEmitter>,

    cancel: Arc<AtomicBool>,
}

impl Session {
    pub fn new(
        goal: impl Into<String>,
        project_root: impl Into<PathBuf>,
        config: SunwellConfig,
        emitter: Arc<EventEmitter>,
    ) -> Self {
        let goal = goal.into();
        let project_root = project_root.into();
        let budget = Budget::with_reserve_fraction(
            config.budget.total_tokens,
            config.budget.reserve_fraction,
        );
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            goal_hash: goal_hash(&goal),
            goal,
            layout: StateLayout::new(&project_root),
            project_root,
            config,
            budget,
            emitter,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle that other tasks use to request cooperative cancellation
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Checked between task dispatches and at gate boundaries
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

/// Short stable hash of a goal's text.
///
/// A 64-bit content hash is enough for goal identity in memory records;
/// artifact hashing uses SHA-256 in core.
pub fn goal_hash(goal: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let normalized = goal.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = DefaultHasher::new();
    normalized.to_lowercase().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Build a session path for persisted event streams
pub fn session_events_path(session: &Session) -> PathBuf {
    session.layout.session_events_file(&session.id)
}

/// Collect lightweight context items for signal extraction
pub fn gather_context(project_root: &Path) -> Vec<crate::extractor::ContextItem> {
    use crate::extractor::ContextItem;
    let mut items = Vec::new();

    for readme in ["README.md", "README.rst", "README.txt"] {
        let path = project_root.join(readme);
        if let Ok(content) = std::fs::read_to_string(&path) {
            let excerpt: String = content.chars().take(600).collect();
            items.push(ContextItem::new("readme", excerpt));
            break;
        }
    }

    if let Ok(entries) = std::fs::read_dir(project_root) {
        let mut names: Vec<String> = entries
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| !n.starts_with('.'))
            .collect();
        names.sort();
        names.truncate(30);
        if !names.is_empty() {
            items.push(ContextItem::new("top-level files", names.join(", ")));
        }
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use sunwell_core::events::EventSchemas;

    fn session() -> Session {
        let emitter = Arc::new(EventEmitter::new(Arc::new(EventSchemas::new().unwrap())));
        Session::new("build a forum", "/tmp/project", SunwellConfig::default(), emitter)
    }

    #[test]
    fn test_goal_hash_stable() {
        assert_eq!(goal_hash("Fix auth.py"), goal_hash("fix  auth.py"));
        assert_ne!(goal_hash("Fix auth.py"), goal_hash("Refactor auth.py"));
    }

    #[test]
    fn test_cancellation_flag() {
        let s = session();
        assert!(!s.is_cancelled());
        let handle = s.cancel_handle();
        handle.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(s.is_cancelled());
    }

    #[test]
    fn test_budget_from_config() {
        let s = session();
        assert_eq!(s.budget.total, 1_000_000);
        assert_eq!(s.budget.reserve, 200_000);
    }

    #[test]
    fn test_gather_context_reads_readme() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "# My project\ndetails").unwrap();
        std::fs::write(dir.path().join("app.py"), "x = 1").unwrap();
        let items = gather_context(dir.path());
        assert!(items.iter().any(|i| i.label == "readme"));
        assert!(items
            .iter()
            .any(|i| i.label == "top-level files" && i.content.contains("app.py")));
    }
}
