//! Append-only learning store
//!
//! Durable facts derived from execution (learnings, decisions) and
//! approaches known to fail (dead ends). Storage is one JSONL file per
//! category under `<project>/.sunwell/memory/`; records are single lines,
//! appended and never rewritten. Duplicates are suppressed by content hash
//! within a category.
//!
//! The store is instantiated per session and passed explicitly; there is no
//! process-global registry. Cross-process sharing happens only through the
//! files (writers open in append mode; records are independent lines).

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::PathBuf;
use sunwell_core::StateLayout;
use tracing::debug;

/// Category of a TASK_COMPLETION bridge learning
pub const TASK_COMPLETION: &str = "TASK_COMPLETION";

/// How a learning came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningSource {
    /// Extracted from session output by the model
    Extracted,
    /// Recorded when a fix strategy succeeded against an error kind
    Fix,
    /// Recorded when a goal completed
    Completion,
}

/// A durable fact derived from execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learning {
    /// Opaque string handle; lookups go through the store
    pub id: String,

    pub fact: String,
    pub category: String,
    pub source: LearningSource,

    /// Weight used when ranking recalled learnings, in [0, 1]
    pub confidence: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,

    pub created_at: DateTime<Utc>,
}

impl Learning {
    pub fn new(fact: impl Into<String>, category: impl Into<String>, source: LearningSource) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            fact: fact.into(),
            category: category.into(),
            source,
            confidence: 0.8,
            goal_hash: None,
            metadata: Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_goal_hash(mut self, goal_hash: impl Into<String>) -> Self {
        self.goal_hash = Some(goal_hash.into());
        self
    }

    /// Dedup key: hash of the normalized fact text
    pub fn fact_hash(&self) -> String {
        content_hash(&self.fact)
    }
}

/// A previously-tried approach known to have failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadEnd {
    pub approach: String,
    pub reason: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_hash: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl DeadEnd {
    pub fn new(approach: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            approach: approach.into(),
            reason: reason.into(),
            context: None,
            goal_hash: None,
            created_at: Utc::now(),
        }
    }

    /// Lookup key: hash of the approach text
    pub fn approach_hash(&self) -> String {
        content_hash(&self.approach)
    }
}

fn content_hash(text: &str) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.to_lowercase().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for b in &digest[..8] {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// File-backed category of learnings
#[derive(Debug)]
struct Category {
    path: PathBuf,
    records: Vec<Learning>,
    seen: BTreeSet<String>,
    /// Records already on disk; save appends only past this index
    persisted: usize,
}

impl Category {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            records: Vec::new(),
            seen: BTreeSet::new(),
            persisted: 0,
        }
    }

    fn add(&mut self, learning: Learning) -> bool {
        let hash = learning.fact_hash();
        if !self.seen.insert(hash) {
            return false;
        }
        self.records.push(learning);
        true
    }

    fn load(&mut self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<Learning>(line) {
                Ok(learning) => {
                    self.add(learning);
                }
                Err(e) => {
                    // A torn tail line (crash mid-append) is skipped, not fatal.
                    debug!(path = %self.path.display(), error = %e, "skipping malformed learning line");
                }
            }
        }
        self.persisted = self.records.len();
        Ok(())
    }

    fn save(&mut self) -> Result<usize> {
        if self.persisted >= self.records.len() {
            return Ok(0);
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut written = 0;
        for record in &self.records[self.persisted..] {
            writeln!(file, "{}", serde_json::to_string(record)?)?;
            written += 1;
        }
        self.persisted = self.records.len();
        Ok(written)
    }
}

/// Append-only store over the three memory categories
#[derive(Debug)]
pub struct LearningStore {
    learnings: Category,
    decisions: Category,
    dead_ends_path: PathBuf,
    dead_ends: Vec<DeadEnd>,
    dead_end_hashes: BTreeSet<String>,
    dead_ends_persisted: usize,
}

impl LearningStore {
    pub fn new(layout: &StateLayout) -> Self {
        Self {
            learnings: Category::new(layout.learnings_file()),
            decisions: Category::new(layout.decisions_file()),
            dead_ends_path: layout.dead_ends_file(),
            dead_ends: Vec::new(),
            dead_end_hashes: BTreeSet::new(),
            dead_ends_persisted: 0,
        }
    }

    /// Load all categories from disk
    pub fn load_from_disk(&mut self) -> Result<()> {
        self.learnings.load()?;
        self.decisions.load()?;
        if self.dead_ends_path.exists() {
            let raw = std::fs::read_to_string(&self.dead_ends_path)?;
            for line in raw.lines().filter(|l| !l.trim().is_empty()) {
                if let Ok(dead_end) = serde_json::from_str::<DeadEnd>(line) {
                    if self.dead_end_hashes.insert(dead_end.approach_hash()) {
                        self.dead_ends.push(dead_end);
                    }
                }
            }
            self.dead_ends_persisted = self.dead_ends.len();
        }
        debug!(
            learnings = self.learnings.records.len(),
            decisions = self.decisions.records.len(),
            dead_ends = self.dead_ends.len(),
            "memory loaded"
        );
        Ok(())
    }

    /// Append unsaved records to their category files
    pub fn save_to_disk(&mut self) -> Result<usize> {
        let mut written = self.learnings.save()?;
        written += self.decisions.save()?;
        if self.dead_ends_persisted < self.dead_ends.len() {
            if let Some(parent) = self.dead_ends_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.dead_ends_path)?;
            for record in &self.dead_ends[self.dead_ends_persisted..] {
                writeln!(file, "{}", serde_json::to_string(record)?)?;
                written += 1;
            }
            self.dead_ends_persisted = self.dead_ends.len();
        }
        Ok(written)
    }

    /// Add a learning; returns false when suppressed as a duplicate
    pub fn add(&mut self, learning: Learning) -> bool {
        self.learnings.add(learning)
    }

    /// Add a decision-category learning
    pub fn add_decision(&mut self, learning: Learning) -> bool {
        self.decisions.add(learning)
    }

    /// Record a dead end; returns false when the approach was already known
    pub fn add_dead_end(&mut self, dead_end: DeadEnd) -> bool {
        if !self.dead_end_hashes.insert(dead_end.approach_hash()) {
            return false;
        }
        self.dead_ends.push(dead_end);
        true
    }

    pub fn get_by_ids(&self, ids: &[String]) -> Vec<&Learning> {
        self.learnings
            .records
            .iter()
            .chain(self.decisions.records.iter())
            .filter(|l| ids.contains(&l.id))
            .collect()
    }

    pub fn learnings(&self) -> &[Learning] {
        &self.learnings.records
    }

    pub fn dead_ends(&self) -> &[DeadEnd] {
        &self.dead_ends
    }

    /// Has this approach already failed?
    pub fn is_dead_end(&self, approach: &str) -> bool {
        self.dead_end_hashes.contains(&content_hash(approach))
    }

    /// Rank learnings against a query by confidence-weighted token overlap.
    ///
    /// No embedder here: scoring is TF-IDF-style: rare tokens discriminate,
    /// ubiquitous tokens count for little.
    pub fn query(&self, text: &str, limit: usize) -> Vec<&Learning> {
        let corpus: Vec<&Learning> = self
            .learnings
            .records
            .iter()
            .chain(self.decisions.records.iter())
            .collect();
        if corpus.is_empty() {
            return Vec::new();
        }

        // Document frequency per token across all facts.
        let mut doc_freq: BTreeMap<String, usize> = BTreeMap::new();
        let tokenized: Vec<BTreeSet<String>> = corpus
            .iter()
            .map(|l| tokenize(&l.fact))
            .collect();
        for tokens in &tokenized {
            for token in tokens {
                *doc_freq.entry(token.clone()).or_insert(0) += 1;
            }
        }

        let query_tokens = tokenize(text);
        let n = corpus.len() as f64;
        let mut scored: Vec<(f64, usize)> = tokenized
            .iter()
            .enumerate()
            .map(|(i, tokens)| {
                let overlap: f64 = query_tokens
                    .iter()
                    .filter(|t| tokens.contains(*t))
                    .map(|t| {
                        let df = doc_freq.get(t).copied().unwrap_or(1) as f64;
                        (n / df).ln() + 1.0
                    })
                    .sum();
                (overlap * corpus[i].confidence, i)
            })
            .filter(|(score, _)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, i)| corpus[i])
            .collect()
    }
}

fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.to_string())
        .collect()
}
