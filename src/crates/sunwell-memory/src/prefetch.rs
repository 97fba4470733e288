//! Prefetch dispatcher
//!
//! Best-effort warm start: a cheap model call turns the briefing into a
//! prefetch plan (files to read, learnings to reload, skills to prime), and
//! execution loads everything in parallel under a hard timeout. Prefetch is
//! strictly advisory: a missing [`PrefetchedContext`] changes latency,
//! never correctness.

use crate::briefing::Briefing;
use crate::learning::{Learning, LearningStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use sunwell_core::model::{ChatMessage, CompletionRequest, Model};
use tracing::{debug, warn};

/// What to load before the first model call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrefetchPlan {
    #[serde(default)]
    pub files_to_read: Vec<String>,

    #[serde(default)]
    pub learnings_to_load: Vec<String>,

    #[serde(default)]
    pub skills_needed: Vec<String>,

    #[serde(default)]
    pub dag_nodes_to_fetch: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_lens: Option<String>,
}

/// Pre-loaded context delivered to an executor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrefetchedContext {
    /// path → content for files that existed and were readable
    pub files: BTreeMap<String, String>,

    pub learnings: Vec<Learning>,

    pub skills: Vec<String>,

    pub suggested_lens: Option<String>,
}

/// Analyze the briefing into a prefetch plan via one cheap model call.
///
/// Parse failures fall back to a plan derived directly from the briefing
/// (hot files + related learnings); analysis is never fatal.
pub async fn analyze(
    model: Arc<dyn Model>,
    briefing: &Briefing,
    timeout: Duration,
) -> PrefetchPlan {
    let prompt = format!(
        "Given this session briefing, reply with a JSON object with keys \
         files_to_read (array of paths), learnings_to_load (array of ids), \
         skills_needed (array of strings), dag_nodes_to_fetch (array of \
         strings), suggested_lens (string or null).\n\n{}",
        briefing.to_prompt()
    );
    let request = CompletionRequest::new(vec![
        ChatMessage::system("You prepare context for a coding agent. Reply with JSON only."),
        ChatMessage::user(prompt),
    ])
    .with_json_mode()
    .with_max_tokens(512);

    match model.complete(&request, timeout).await {
        Ok(completion) => match serde_json::from_str::<PrefetchPlan>(&completion.content) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "prefetch plan parse failed, deriving from briefing");
                fallback_plan(briefing)
            }
        },
        Err(e) => {
            warn!(error = %e, "prefetch analysis call failed, deriving from briefing");
            fallback_plan(briefing)
        }
    }
}

fn fallback_plan(briefing: &Briefing) -> PrefetchPlan {
    PrefetchPlan {
        files_to_read: briefing.hot_files.clone(),
        learnings_to_load: briefing.related_learnings.clone(),
        skills_needed: briefing.predicted_skills.clone(),
        dag_nodes_to_fetch: Vec::new(),
        suggested_lens: briefing.suggested_lens.clone(),
    }
}

/// Execute a prefetch plan: parallel file reads plus learning lookups.
///
/// Returns `None` when the deadline passes: callers proceed cold.
pub async fn execute(
    plan: &PrefetchPlan,
    project_root: &Path,
    store: &LearningStore,
    timeout: Duration,
) -> Option<PrefetchedContext> {
    let learnings: Vec<Learning> = store
        .get_by_ids(&plan.learnings_to_load)
        .into_iter()
        .cloned()
        .collect();

    let reads = plan.files_to_read.iter().map(|rel| {
        let path = project_root.join(rel);
        let rel = rel.clone();
        async move {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => Some((rel, content)),
                Err(_) => None,
            }
        }
    });

    let gathered = tokio::time::timeout(timeout, futures::future::join_all(reads)).await;
    match gathered {
        Ok(results) => {
            let files: BTreeMap<String, String> = results.into_iter().flatten().collect();
            debug!(
                files = files.len(),
                learnings = learnings.len(),
                "prefetch complete"
            );
            Some(PrefetchedContext {
                files,
                learnings,
                skills: plan.skills_needed.clone(),
                suggested_lens: plan.suggested_lens.clone(),
            })
        }
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "prefetch timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::LearningSource;
    use sunwell_core::StateLayout;
    use sunwell_llm::MockModel;

    #[tokio::test]
    async fn test_analyze_parses_model_plan() {
        let model = MockModel::new();
        model.push_response(
            r#"{"files_to_read": ["src/app.py"], "learnings_to_load": [], "skills_needed": ["http"], "dag_nodes_to_fetch": [], "suggested_lens": "backend"}"#,
        );
        let briefing = Briefing::initial("mission", "s1");
        let plan = analyze(Arc::new(model), &briefing, Duration::from_secs(2)).await;
        assert_eq!(plan.files_to_read, vec!["src/app.py"]);
        assert_eq!(plan.suggested_lens.as_deref(), Some("backend"));
    }

    #[tokio::test]
    async fn test_analyze_falls_back_on_garbage() {
        let model = MockModel::new();
        model.push_response("not json at all");
        let mut briefing = Briefing::initial("mission", "s1");
        briefing.hot_files = vec!["x.py".to_string()];
        let plan = analyze(Arc::new(model), &briefing, Duration::from_secs(2)).await;
        assert_eq!(plan.files_to_read, vec!["x.py"]);
    }

    #[tokio::test]
    async fn test_execute_reads_existing_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("present.py"), "x = 1\n").unwrap();

        let layout = StateLayout::new(dir.path());
        let mut store = LearningStore::new(&layout);
        let learning = Learning::new("fact", "general", LearningSource::Extracted);
        let id = learning.id.clone();
        store.add(learning);

        let plan = PrefetchPlan {
            files_to_read: vec!["present.py".to_string(), "missing.py".to_string()],
            learnings_to_load: vec![id],
            ..Default::default()
        };

        let context = execute(&plan, dir.path(), &store, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(context.files.len(), 1);
        assert!(context.files.contains_key("present.py"));
        assert_eq!(context.learnings.len(), 1);
    }
}
