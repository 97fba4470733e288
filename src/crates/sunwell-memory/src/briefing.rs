//! Rolling compressed briefing
//!
//! The briefing is a single-file, size-bounded handoff artifact: overwritten
//! (never appended) at session end, it both orients the next run and drives
//! prefetch. The byte ceiling keeps it cheap to inject into a prompt,
//! roughly 2 KB / ~300 tokens by default.

use crate::error::{MemoryError, Result};
use crate::learning::{Learning, LearningSource, TASK_COMPLETION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sunwell_core::paths::{read_json, write_atomic};
use sunwell_core::StateLayout;
use tracing::debug;

/// Hard cap on retained hazards
pub const MAX_HAZARDS: usize = 3;
/// Hard cap on retained hot files
pub const MAX_HOT_FILES: usize = 5;
/// Hard cap on retained related learnings
pub const MAX_RELATED_LEARNINGS: usize = 5;

const MISSION_CAP: usize = 160;
const ACTION_CAP: usize = 160;
const PROGRESS_CAP: usize = 200;
const ITEM_CAP: usize = 100;

/// Session status carried across runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BriefingStatus {
    NotStarted,
    InProgress,
    Blocked,
    Complete,
}

impl BriefingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BriefingStatus::NotStarted => "Not Started",
            BriefingStatus::InProgress => "In Progress",
            BriefingStatus::Blocked => "Blocked",
            BriefingStatus::Complete => "Complete",
        }
    }
}

/// The compressed handoff artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Briefing {
    pub mission: String,
    pub status: BriefingStatus,
    pub progress: String,
    pub last_action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,

    /// Known risks, most recent first, at most [`MAX_HAZARDS`]
    #[serde(default)]
    pub hazards: Vec<String>,

    #[serde(default)]
    pub blockers: Vec<String>,

    /// Files to focus on next session, at most [`MAX_HOT_FILES`]
    #[serde(default)]
    pub hot_files: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_hash: Option<String>,

    /// Learning ids worth reloading, at most [`MAX_RELATED_LEARNINGS`]
    #[serde(default)]
    pub related_learnings: Vec<String>,

    // Dispatch hints, set by the router post-hoc from next_action and
    // remaining work; consumed by the prefetch dispatcher.
    #[serde(default)]
    pub predicted_skills: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_lens: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity_estimate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_files_touched: Option<u32>,

    pub updated_at: DateTime<Utc>,
    pub session_id: String,
}

/// What a finishing session reports into compression
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub last_action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,

    /// Files modified this session, most recent first
    #[serde(default)]
    pub modified_files: Vec<String>,

    /// Hazards no longer relevant
    #[serde(default)]
    pub resolved_hazards: Vec<String>,

    /// Newly discovered hazards, most recent first
    #[serde(default)]
    pub new_hazards: Vec<String>,

    #[serde(default)]
    pub blockers: Vec<String>,

    /// Ids of learnings recorded this session
    #[serde(default)]
    pub new_learnings: Vec<String>,
}

impl Briefing {
    /// Fresh briefing for a mission that has not run yet
    pub fn initial(mission: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            mission: mission.into(),
            status: BriefingStatus::NotStarted,
            progress: String::new(),
            last_action: String::new(),
            next_action: None,
            hazards: Vec::new(),
            blockers: Vec::new(),
            hot_files: Vec::new(),
            goal_hash: None,
            related_learnings: Vec::new(),
            predicted_skills: Vec::new(),
            suggested_lens: None,
            complexity_estimate: None,
            estimated_files_touched: None,
            updated_at: Utc::now(),
            session_id: session_id.into(),
        }
    }

    /// Compress the old briefing and a session summary into the next one.
    ///
    /// Mission, goal hash, and dispatch hints are inherited; hazards carry
    /// over minus the resolved ones with new hazards first; hot files and
    /// related learnings merge newest-first under their caps.
    pub fn compress(
        old: Option<&Briefing>,
        summary: &SessionSummary,
        new_status: BriefingStatus,
        session_id: impl Into<String>,
    ) -> Self {
        let mut next = match old {
            Some(old) => old.clone(),
            None => Briefing::initial("", "unset"),
        };
        next.session_id = session_id.into();
        next.status = new_status;
        next.updated_at = Utc::now();

        // hazards = (new ∪ (old \ resolved)), new first, capped.
        let mut hazards: Vec<String> = summary.new_hazards.clone();
        for hazard in old.map(|o| o.hazards.as_slice()).unwrap_or(&[]) {
            if summary.resolved_hazards.contains(hazard) || hazards.contains(hazard) {
                continue;
            }
            hazards.push(hazard.clone());
        }
        hazards.truncate(MAX_HAZARDS);
        next.hazards = hazards;

        // hot files: this session's modifications first, then carry-over.
        let mut hot_files: Vec<String> = Vec::new();
        for file in summary
            .modified_files
            .iter()
            .chain(old.map(|o| o.hot_files.as_slice()).unwrap_or(&[]).iter())
        {
            if !hot_files.contains(file) {
                hot_files.push(file.clone());
            }
        }
        hot_files.truncate(MAX_HOT_FILES);
        next.hot_files = hot_files;

        // related learnings: newest first under the cap.
        let mut learnings: Vec<String> = summary.new_learnings.clone();
        for id in old.map(|o| o.related_learnings.as_slice()).unwrap_or(&[]) {
            if !learnings.contains(id) {
                learnings.push(id.clone());
            }
        }
        learnings.truncate(MAX_RELATED_LEARNINGS);
        next.related_learnings = learnings;

        next.last_action = summary.last_action.clone();
        next.next_action = summary.next_action.clone();
        next.blockers = summary.blockers.clone();
        next.progress = match new_status {
            BriefingStatus::Complete => format!("Complete. {}", summary.last_action),
            BriefingStatus::Blocked => format!("Blocked. {}", summary.last_action),
            _ => summary.last_action.clone(),
        };

        next
    }

    /// Canonical orientation text, sections in a fixed order. Absent
    /// sections are omitted.
    pub fn to_prompt(&self) -> String {
        let mut out = String::new();
        if !self.mission.is_empty() {
            out.push_str(&format!("Mission: {}\n", self.mission));
        }
        out.push_str(&format!("Status: {}\n", self.status.as_str()));
        if !self.progress.is_empty() {
            out.push_str(&format!("Progress: {}\n", self.progress));
        }
        if !self.last_action.is_empty() {
            out.push_str(&format!("Last Action: {}\n", self.last_action));
        }
        if let Some(next) = &self.next_action {
            out.push_str(&format!("Next Action: {}\n", next));
        }
        if !self.hazards.is_empty() {
            out.push_str("Hazards:\n");
            for hazard in &self.hazards {
                out.push_str(&format!("  ⚠ {}\n", hazard));
            }
        }
        if !self.blockers.is_empty() {
            out.push_str("Blockers:\n");
            for blocker in &self.blockers {
                out.push_str(&format!("  🚫 {}\n", blocker));
            }
        }
        if !self.hot_files.is_empty() {
            out.push_str(&format!("Focus Files: {}\n", self.hot_files.join(", ")));
        }
        out
    }

    /// The completion bridge: when a mission finishes, a TASK_COMPLETION
    /// learning with confidence 1.0 links the goal hash into the store.
    pub fn completion_learning(&self) -> Option<Learning> {
        if self.status != BriefingStatus::Complete {
            return None;
        }
        let mut learning = Learning::new(
            format!("Completed: {}", if self.last_action.is_empty() {
                &self.mission
            } else {
                &self.last_action
            }),
            TASK_COMPLETION,
            LearningSource::Completion,
        )
        .with_confidence(1.0);
        learning.goal_hash = self.goal_hash.clone();
        Some(learning)
    }

    /// Enforce the list caps and per-field text caps in place
    fn apply_caps(&mut self) {
        truncate_field(&mut self.mission, MISSION_CAP);
        truncate_field(&mut self.progress, PROGRESS_CAP);
        truncate_field(&mut self.last_action, ACTION_CAP);
        if let Some(next) = &mut self.next_action {
            truncate_field(next, ACTION_CAP);
        }
        self.hazards.truncate(MAX_HAZARDS);
        self.hot_files.truncate(MAX_HOT_FILES);
        self.related_learnings.truncate(MAX_RELATED_LEARNINGS);
        for item in self
            .hazards
            .iter_mut()
            .chain(self.blockers.iter_mut())
            .chain(self.hot_files.iter_mut())
        {
            truncate_field(item, ITEM_CAP);
        }
    }
}

fn truncate_field(text: &mut String, cap: usize) {
    if text.chars().count() <= cap {
        return;
    }
    let truncated: String = text.chars().take(cap.saturating_sub(1)).collect();
    *text = format!("{}…", truncated);
}

/// Briefing persistence: single file, atomic replace
#[derive(Debug, Clone)]
pub struct BriefingStore {
    path: std::path::PathBuf,
    byte_ceiling: usize,
}

impl BriefingStore {
    pub fn new(layout: &StateLayout, byte_ceiling: usize) -> Self {
        Self {
            path: layout.briefing_file(),
            byte_ceiling,
        }
    }

    /// Load the project briefing, `None` when no session has run
    pub fn load(&self) -> Result<Option<Briefing>> {
        Ok(read_json(&self.path)?)
    }

    /// Enforce bounds and atomically replace the briefing file.
    ///
    /// Returns the serialized size in bytes.
    pub fn save(&self, briefing: &Briefing) -> Result<usize> {
        let mut bounded = briefing.clone();
        bounded.apply_caps();

        let mut body = serde_json::to_string(&bounded)?;
        // Degrade progressively until under the ceiling: drop list entries
        // first, then shrink the text fields. The caps alone keep normal
        // briefings well below it.
        let mut text_cap = PROGRESS_CAP;
        while body.len() > self.byte_ceiling {
            if bounded.related_learnings.pop().is_some()
                || bounded.hazards.pop().is_some()
                || bounded.blockers.pop().is_some()
                || bounded.hot_files.pop().is_some()
            {
                body = serde_json::to_string(&bounded)?;
                continue;
            }
            if text_cap == 0 {
                return Err(MemoryError::BriefingOverflow {
                    size: body.len(),
                    ceiling: self.byte_ceiling,
                });
            }
            text_cap /= 4;
            truncate_field(&mut bounded.progress, text_cap);
            truncate_field(&mut bounded.mission, text_cap);
            truncate_field(&mut bounded.last_action, text_cap);
            if let Some(next) = &mut bounded.next_action {
                truncate_field(next, text_cap);
            }
            body = serde_json::to_string(&bounded)?;
        }

        write_atomic(&self.path, body.as_bytes())?;
        debug!(bytes = body.len(), path = %self.path.display(), "briefing saved");
        Ok(body.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn summary() -> SessionSummary {
        SessionSummary {
            last_action: "Wired the comments endpoint".to_string(),
            next_action: Some("Add pagination".to_string()),
            modified_files: vec!["y.py".to_string(), "z.py".to_string()],
            resolved_hazards: vec!["A".to_string()],
            new_hazards: vec![],
            blockers: vec![],
            new_learnings: vec![],
        }
    }

    #[test]
    fn test_compress_hazard_carry_over() {
        // Scenario: hazards=["A","B"], session resolves "A".
        let mut old = Briefing::initial("build the forum", "s1");
        old.status = BriefingStatus::InProgress;
        old.hazards = vec!["A".to_string(), "B".to_string()];
        old.hot_files = vec!["x.py".to_string()];

        let next = Briefing::compress(Some(&old), &summary(), BriefingStatus::Complete, "s2");

        assert_eq!(next.hazards, vec!["B".to_string()]);
        assert_eq!(
            next.hot_files,
            vec!["y.py".to_string(), "z.py".to_string(), "x.py".to_string()]
        );
        assert_eq!(next.status, BriefingStatus::Complete);
        assert!(next.progress.starts_with("Complete. "));
        assert_eq!(next.session_id, "s2");
        assert_eq!(next.mission, "build the forum");
    }

    #[test]
    fn test_completion_bridge() {
        let mut briefing = Briefing::initial("ship it", "s1");
        briefing.status = BriefingStatus::Complete;
        briefing.goal_hash = Some("abc123".to_string());
        briefing.last_action = "Merged the final branch".to_string();

        let learning = briefing.completion_learning().unwrap();
        assert_eq!(learning.category, TASK_COMPLETION);
        assert_eq!(learning.confidence, 1.0);
        assert_eq!(learning.goal_hash.as_deref(), Some("abc123"));

        briefing.status = BriefingStatus::InProgress;
        assert!(briefing.completion_learning().is_none());
    }

    #[test]
    fn test_prompt_section_order() {
        let mut b = Briefing::initial("build the forum", "s1");
        b.status = BriefingStatus::InProgress;
        b.progress = "3 of 5 gates passed".to_string();
        b.last_action = "Fixed the schema gate".to_string();
        b.next_action = Some("Start the endpoint gate".to_string());
        b.hazards = vec!["sqlite locks under parallel writes".to_string()];
        b.blockers = vec!["waiting on API key".to_string()];
        b.hot_files = vec!["models.py".to_string(), "routes.py".to_string()];

        let prompt = b.to_prompt();
        let mission_pos = prompt.find("Mission:").unwrap();
        let status_pos = prompt.find("Status:").unwrap();
        let hazards_pos = prompt.find("Hazards:").unwrap();
        let blockers_pos = prompt.find("Blockers:").unwrap();
        let files_pos = prompt.find("Focus Files:").unwrap();
        assert!(mission_pos < status_pos);
        assert!(status_pos < hazards_pos);
        assert!(hazards_pos < blockers_pos);
        assert!(blockers_pos < files_pos);
        assert!(prompt.contains("⚠ sqlite"));
        assert!(prompt.contains("🚫 waiting"));
    }

    #[test]
    fn test_prompt_omits_absent_sections() {
        let b = Briefing::initial("x", "s1");
        let prompt = b.to_prompt();
        assert!(!prompt.contains("Hazards:"));
        assert!(!prompt.contains("Blockers:"));
        assert!(!prompt.contains("Focus Files:"));
        assert!(!prompt.contains("Next Action:"));
    }

    #[test]
    fn test_save_roundtrip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        let store = BriefingStore::new(&layout, 2_048);

        assert!(store.load().unwrap().is_none());

        let mut b = Briefing::initial("mission", "s1");
        store.save(&b).unwrap();
        b.session_id = "s2".to_string();
        store.save(&b).unwrap();

        let loaded = store.load().unwrap().unwrap();
        // Overwritten, not appended: latest session wins.
        assert_eq!(loaded.session_id, "s2");
    }

    proptest! {
        // Any saved briefing fits the ceiling with bounded lists.
        #[test]
        fn prop_briefing_bounds(
            mission in ".{0,400}",
            hazards in proptest::collection::vec(".{0,200}", 0..10),
            hot_files in proptest::collection::vec("[a-z./]{1,120}", 0..12),
            learnings in proptest::collection::vec("[a-f0-9]{8}", 0..12),
        ) {
            let dir = tempfile::tempdir().unwrap();
            let layout = StateLayout::new(dir.path());
            let store = BriefingStore::new(&layout, 2_048);

            let mut b = Briefing::initial(mission, "s1");
            b.hazards = hazards;
            b.hot_files = hot_files;
            b.related_learnings = learnings;

            let size = store.save(&b).unwrap();
            prop_assert!(size <= 2_048);

            let loaded = store.load().unwrap().unwrap();
            prop_assert!(loaded.hazards.len() <= MAX_HAZARDS);
            prop_assert!(loaded.hot_files.len() <= MAX_HOT_FILES);
            prop_assert!(loaded.related_learnings.len() <= MAX_RELATED_LEARNINGS);
        }
    }
}
