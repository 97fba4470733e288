//! Auto-fixer
//!
//! Turns a validation error plus the current artifacts into patched
//! artifacts at bounded cost. Runtime failures are localized to hotspots,
//! small regions ranked by a fusion of the spatial edge-of-change signal
//! (what changed since the last passed gate) and the temporal churn signal
//! (what keeps being edited). Only the hotspot region travels to the
//! model, never the whole file.
//!
//! Region edits preserve line numbers outside the edited region: a splice
//! reports its line shift but never renumbers unrelated lines.

use crate::error::{EngineError, Result};
use crate::toolchain::{run_command, LanguageToolchain};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use sunwell_core::gate::{FixAttempt, ValidationError, ValidationErrorKind};
use sunwell_core::model::{ChatMessage, CompletionRequest, Model};
use sunwell_core::strategy::StrategyKind;
use sunwell_core::Artifact;
use tracing::{debug, warn};

/// Regions returned by hotspot localization
pub const DEFAULT_TOP_K: usize = 3;

/// Fallback hotspot radius around the error line when no history exists
const FALLBACK_RADIUS: u32 = 6;

const SPATIAL_WEIGHT: f64 = 0.6;
const TEMPORAL_WEIGHT: f64 = 0.4;

/// One candidate fix region
#[derive(Debug, Clone, PartialEq)]
pub struct Hotspot {
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    pub score: f64,
}

/// Per-path content history within a session; the last snapshot taken at a
/// passed gate is the spatial baseline, the full version list feeds churn.
#[derive(Debug, Default)]
pub struct ArtifactHistory {
    versions: BTreeMap<String, Vec<String>>,
    baseline: BTreeMap<String, String>,
}

impl ArtifactHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current content of every artifact
    pub fn record(&mut self, artifacts: &[Artifact]) {
        for artifact in artifacts {
            let versions = self.versions.entry(artifact.path.clone()).or_default();
            if versions.last().map(String::as_str) != Some(artifact.content.as_str()) {
                versions.push(artifact.content.clone());
            }
        }
    }

    /// Snapshot the artifact set as of a passed gate
    pub fn mark_baseline(&mut self, artifacts: &[Artifact]) {
        for artifact in artifacts {
            self.baseline
                .insert(artifact.path.clone(), artifact.content.clone());
        }
    }

    fn baseline_of(&self, path: &str) -> Option<&str> {
        self.baseline.get(path).map(String::as_str)
    }

    /// Number of versions in which each line index differed from its
    /// predecessor version (simple churn measure)
    fn churn(&self, path: &str) -> Vec<u32> {
        let Some(versions) = self.versions.get(path) else {
            return Vec::new();
        };
        let line_count = versions
            .last()
            .map(|v| v.lines().count())
            .unwrap_or(0);
        let mut churn = vec![0u32; line_count];
        for pair in versions.windows(2) {
            let old: Vec<&str> = pair[0].lines().collect();
            let new: Vec<&str> = pair[1].lines().collect();
            for (i, line) in new.iter().enumerate() {
                if old.get(i) != Some(line) && i < churn.len() {
                    churn[i] += 1;
                }
            }
        }
        churn
    }
}

/// Locate the top-K fix regions for an error.
///
/// `lateral_only` drops the temporal signal (the LATERAL_ONLY downgrade).
pub fn locate_hotspots(
    error: &ValidationError,
    artifacts: &[Artifact],
    history: &ArtifactHistory,
    lateral_only: bool,
) -> Vec<Hotspot> {
    let Some(file) = error.file.clone() else {
        return Vec::new();
    };
    let Some(artifact) = artifacts.iter().find(|a| a.path == file) else {
        return Vec::new();
    };
    let line_count = artifact.content.lines().count().max(1) as u32;
    let error_line = error.line_range.map(|(start, _)| start).unwrap_or(1);

    // Spatial: contiguous regions that differ from the last-passed baseline.
    let changed = match history.baseline_of(&file) {
        Some(baseline) => changed_lines(baseline, &artifact.content),
        None => Vec::new(),
    };
    let mut regions = contiguous_regions(&changed);

    if regions.is_empty() {
        // No baseline or no diff: the error's neighborhood is the region.
        let start = error_line.saturating_sub(FALLBACK_RADIUS).max(1);
        let end = (error_line + FALLBACK_RADIUS).min(line_count);
        regions.push((start, end));
    }

    let churn = history.churn(&file);
    let mut hotspots: Vec<Hotspot> = regions
        .into_iter()
        .map(|(start, end)| {
            // Spatial score decays with distance from the error line.
            let distance = if error_line < start {
                start - error_line
            } else if error_line > end {
                error_line - end
            } else {
                0
            };
            let spatial = 1.0 / (1.0 + distance as f64);

            let temporal = if churn.is_empty() {
                0.0
            } else {
                let slice: u32 = churn
                    .iter()
                    .skip(start.saturating_sub(1) as usize)
                    .take((end - start + 1) as usize)
                    .sum();
                let max: u32 = *churn.iter().max().unwrap_or(&1);
                slice as f64 / ((end - start + 1) as f64 * max.max(1) as f64)
            };

            let score = if lateral_only {
                spatial
            } else {
                SPATIAL_WEIGHT * spatial + TEMPORAL_WEIGHT * temporal
            };
            Hotspot {
                file: file.clone(),
                start_line: start,
                end_line: end,
                score,
            }
        })
        .collect();

    hotspots.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.start_line.cmp(&b.start_line))
    });
    hotspots.truncate(DEFAULT_TOP_K);
    hotspots
}

/// 1-based indices of lines that differ between two versions
fn changed_lines(old: &str, new: &str) -> Vec<u32> {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let mut changed = Vec::new();
    for (i, line) in new_lines.iter().enumerate() {
        if old_lines.get(i) != Some(line) {
            changed.push(i as u32 + 1);
        }
    }
    changed
}

/// Merge sorted line indices into contiguous (start, end) regions,
/// bridging gaps of up to 2 lines
fn contiguous_regions(lines: &[u32]) -> Vec<(u32, u32)> {
    let mut regions: Vec<(u32, u32)> = Vec::new();
    for &line in lines {
        match regions.last_mut() {
            Some((_, end)) if line <= *end + 3 => *end = line,
            _ => regions.push((line, line)),
        }
    }
    regions
}

/// Replace lines `[start, end]` (1-based, inclusive) with new content.
///
/// Lines outside the region are untouched; the returned shift is the signed
/// line-count delta introduced by the splice.
pub fn splice_region(content: &str, start: u32, end: u32, replacement: &str) -> (String, i64) {
    let lines: Vec<&str> = content.lines().collect();
    let start_idx = (start.max(1) - 1) as usize;
    let end_idx = (end as usize).min(lines.len());

    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    out.extend(&lines[..start_idx.min(lines.len())]);
    let replacement_lines: Vec<&str> = replacement.lines().collect();
    out.extend(&replacement_lines);
    if end_idx < lines.len() {
        out.extend(&lines[end_idx..]);
    }

    let removed = end_idx.saturating_sub(start_idx) as i64;
    let shift = replacement_lines.len() as i64 - removed;
    let mut joined = out.join("\n");
    if content.ends_with('\n') {
        joined.push('\n');
    }
    (joined, shift)
}

/// Numbered region excerpt handed to the model
fn region_excerpt(content: &str, start: u32, end: u32) -> String {
    content
        .lines()
        .enumerate()
        .skip((start.max(1) - 1) as usize)
        .take((end.saturating_sub(start) + 1) as usize)
        .map(|(i, line)| format!("{:>4} | {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Result of one fixer invocation
#[derive(Debug)]
pub struct FixOutcome {
    pub artifacts: Vec<Artifact>,
    pub attempt: FixAttempt,
}

/// The bounded-cost fixer
pub struct AutoFixer {
    model: Arc<dyn Model>,
    toolchain: LanguageToolchain,
    workspace: PathBuf,
    timeout: Duration,
}

impl AutoFixer {
    pub fn new(
        model: Arc<dyn Model>,
        toolchain: LanguageToolchain,
        workspace: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            model,
            toolchain,
            workspace,
            timeout,
        }
    }

    /// Apply one fix strategy to one error.
    ///
    /// Returns the (possibly) patched artifact set and the attempt record;
    /// attempt bookkeeping against `MAX_FIX_ATTEMPTS` belongs to the caller.
    pub async fn fix(
        &self,
        error: &ValidationError,
        artifacts: &[Artifact],
        strategy: StrategyKind,
        history: &ArtifactHistory,
        attempt_number: u32,
    ) -> Result<FixOutcome> {
        debug!(
            strategy = strategy.name(),
            kind = ?error.kind,
            attempt = attempt_number,
            "applying fix strategy"
        );
        let mut attempt = FixAttempt {
            error: error.clone(),
            strategy,
            patched: false,
            region: None,
            attempt: attempt_number,
        };

        let artifacts = match strategy {
            StrategyKind::ToolchainAutofix => {
                let patched = self.toolchain_autofix(error, artifacts).await?;
                attempt.patched = patched.is_some();
                patched.unwrap_or_else(|| artifacts.to_vec())
            }
            StrategyKind::DependencyResolve => {
                // Imports live at the top of the file; resolve over the head.
                let region = (1u32, 30u32);
                let patched = self
                    .model_region_fix(error, artifacts, region, DEPENDENCY_PROMPT, 1)
                    .await?;
                attempt.patched = patched.is_some();
                attempt.region = error
                    .file
                    .clone()
                    .map(|file| (file, region.0, region.1));
                patched.unwrap_or_else(|| artifacts.to_vec())
            }
            StrategyKind::Dialectic => {
                let patched = self.dialectic_fix(error, artifacts, history).await?;
                attempt.patched = patched.is_some();
                attempt.region = self.primary_region(error, artifacts, history, false);
                patched.unwrap_or_else(|| artifacts.to_vec())
            }
            StrategyKind::HotspotScan | StrategyKind::LateralOnly | StrategyKind::Vortex => {
                let lateral_only = strategy == StrategyKind::LateralOnly;
                let hotspots = locate_hotspots(error, artifacts, history, lateral_only);
                match hotspots.first() {
                    Some(hotspot) => {
                        // LATERAL_ONLY already gave up the expensive scan;
                        // it patches with a single candidate.
                        let candidates = if lateral_only { 1 } else { 6 };
                        let patched = self
                            .model_region_fix(
                                error,
                                artifacts,
                                (hotspot.start_line, hotspot.end_line),
                                DIRECT_FIX_PROMPT,
                                candidates,
                            )
                            .await?;
                        attempt.patched = patched.is_some();
                        attempt.region =
                            Some((hotspot.file.clone(), hotspot.start_line, hotspot.end_line));
                        patched.unwrap_or_else(|| artifacts.to_vec())
                    }
                    None => artifacts.to_vec(),
                }
            }
            // DIRECT_FIX and everything else: single targeted region edit.
            _ => {
                match self.primary_region(error, artifacts, history, true) {
                    Some((file, start, end)) => {
                        let patched = self
                            .model_region_fix(error, artifacts, (start, end), DIRECT_FIX_PROMPT, 1)
                            .await?;
                        attempt.patched = patched.is_some();
                        attempt.region = Some((file, start, end));
                        patched.unwrap_or_else(|| artifacts.to_vec())
                    }
                    None => artifacts.to_vec(),
                }
            }
        };

        Ok(FixOutcome {
            artifacts,
            attempt,
        })
    }

    fn primary_region(
        &self,
        error: &ValidationError,
        artifacts: &[Artifact],
        history: &ArtifactHistory,
        lateral_only: bool,
    ) -> Option<(String, u32, u32)> {
        locate_hotspots(error, artifacts, history, lateral_only)
            .first()
            .map(|h| (h.file.clone(), h.start_line, h.end_line))
    }

    /// Run the deterministic formatter/fixer over the implicated file and
    /// read the result back; no model call.
    async fn toolchain_autofix(
        &self,
        error: &ValidationError,
        artifacts: &[Artifact],
    ) -> Result<Option<Vec<Artifact>>> {
        let Some(file) = &error.file else {
            return Ok(None);
        };
        for spec in [&self.toolchain.lint_fix_cmd, &self.toolchain.format_cmd]
            .into_iter()
            .flatten()
        {
            if let Err(e) = run_command(spec, file, &self.workspace, self.timeout).await {
                warn!(error = %e, "autofix command unavailable");
            }
        }

        let path = self.workspace.join(file);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Ok(None);
        };
        let mut patched = artifacts.to_vec();
        let mut changed = false;
        for artifact in &mut patched {
            if &artifact.path == file && artifact.content != content {
                artifact.content = content.clone();
                changed = true;
            }
        }
        Ok(changed.then_some(patched))
    }

    /// Send only the hotspot region and the error to the model; splice the
    /// replacement back. With `candidates > 1`, generate that many patches
    /// and keep the best-scoring one (minimal diff wins, ties to the lower
    /// index).
    async fn model_region_fix(
        &self,
        error: &ValidationError,
        artifacts: &[Artifact],
        region: (u32, u32),
        system: &str,
        candidates: usize,
    ) -> Result<Option<Vec<Artifact>>> {
        let Some(file) = &error.file else {
            return Ok(None);
        };
        let Some(artifact) = artifacts.iter().find(|a| &a.path == file) else {
            return Ok(None);
        };
        let line_count = artifact.content.lines().count() as u32;
        let (start, end) = (region.0.max(1), region.1.min(line_count.max(1)));
        let excerpt = region_excerpt(&artifact.content, start, end);

        let prompt = format!(
            "File: {} (lines {}-{} of {})\nError: {}\n\nRegion:\n{}\n\n\
             Reply with the replacement for exactly lines {}-{}. Code only, \
             no fences, no commentary.",
            file, start, end, line_count, error.message, excerpt, start, end
        );

        let mut best: Option<(usize, String)> = None;
        for index in 0..candidates.max(1) {
            let request = CompletionRequest::new(vec![
                ChatMessage::system(system.to_string()),
                ChatMessage::user(prompt.clone()),
            ])
            .with_temperature(0.1 + 0.15 * index as f32);

            let completion = match self.model.complete(&request, self.timeout).await {
                Ok(completion) => completion,
                Err(e) => {
                    warn!(index, error = %e, "fix candidate generation failed");
                    continue;
                }
            };
            let replacement = strip_fences(&completion.content);
            if replacement.trim().is_empty() {
                continue;
            }
            let original = region_lines(&artifact.content, start, end);
            if replacement.trim() == original.trim() {
                // Identity patch fixes nothing.
                continue;
            }
            let diff_size = line_diff_count(&original, &replacement);
            let better = match &best {
                None => true,
                Some((best_diff, _)) => diff_size < *best_diff,
            };
            if better {
                best = Some((diff_size, replacement));
            }
        }

        let Some((_, replacement)) = best else {
            return Ok(None);
        };

        let (patched_content, shift) = splice_region(&artifact.content, start, end, &replacement);
        debug!(file = %file, start, end, shift, "region spliced");

        let mut patched = artifacts.to_vec();
        for candidate in &mut patched {
            if &candidate.path == file {
                candidate.content = patched_content.clone();
            }
        }
        // Keep the workspace copy in sync for the re-validation pass.
        let path = self.workspace.join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(EngineError::Io)?;
        }
        std::fs::write(&path, &patched_content).map_err(EngineError::Io)?;
        Ok(Some(patched))
    }

    /// DIALECTIC: one "why it failed" pass, one "how to fix" pass, then a
    /// reconciliation call that produces the actual region patch.
    async fn dialectic_fix(
        &self,
        error: &ValidationError,
        artifacts: &[Artifact],
        history: &ArtifactHistory,
    ) -> Result<Option<Vec<Artifact>>> {
        let Some((_, start, end)) = self.primary_region(error, artifacts, history, false) else {
            return Ok(None);
        };
        let Some(file) = &error.file else {
            return Ok(None);
        };
        let Some(artifact) = artifacts.iter().find(|a| &a.path == file) else {
            return Ok(None);
        };
        let excerpt = region_excerpt(&artifact.content, start, end);

        let why = self
            .side_call(
                "Explain in two sentences WHY this failure happens. Analysis only, no code.",
                &format!("Error: {}\n\nRegion:\n{}", error.message, excerpt),
            )
            .await
            .unwrap_or_default();
        let how = self
            .side_call(
                "Describe in two sentences HOW to fix this failure. Plan only, no code.",
                &format!("Error: {}\n\nRegion:\n{}", error.message, excerpt),
            )
            .await
            .unwrap_or_default();

        let reconcile = format!(
            "Why it failed: {}\nHow to fix: {}\n\nApply that fix.",
            why.trim(),
            how.trim()
        );
        let augmented = ValidationError {
            message: format!("{}\n{}", error.message, reconcile),
            ..error.clone()
        };
        self.model_region_fix(&augmented, artifacts, (start, end), DIRECT_FIX_PROMPT, 1)
            .await
    }

    async fn side_call(&self, system: &str, prompt: &str) -> Option<String> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(system.to_string()),
            ChatMessage::user(prompt.to_string()),
        ])
        .with_temperature(0.2)
        .with_max_tokens(200);
        self.model
            .complete(&request, self.timeout)
            .await
            .ok()
            .map(|c| c.content)
    }
}

const DIRECT_FIX_PROMPT: &str =
    "You repair code. Reply with replacement lines for the given region only.";
const DEPENDENCY_PROMPT: &str =
    "You repair imports and dependencies. Reply with replacement lines for the given region only.";

fn strip_fences(content: &str) -> String {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let inner = inner
        .split_once('\n')
        .map(|(_, rest)| rest)
        .unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim().to_string()
}

fn region_lines(content: &str, start: u32, end: u32) -> String {
    content
        .lines()
        .skip((start.max(1) - 1) as usize)
        .take((end.saturating_sub(start) + 1) as usize)
        .collect::<Vec<_>>()
        .join("\n")
}

fn line_diff_count(old: &str, new: &str) -> usize {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let shared = old_lines.len().min(new_lines.len());
    let mut diff = old_lines.len().abs_diff(new_lines.len());
    for i in 0..shared {
        if old_lines[i] != new_lines[i] {
            diff += 1;
        }
    }
    diff
}
