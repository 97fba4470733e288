//! Language toolchain detection and command cascade
//!
//! A toolchain is the per-language bundle of commands the validation cascade
//! runs: syntax check, lint (with deterministic auto-fix), type check,
//! format, test. Detection looks at project marker files; when a graph's
//! artifacts disagree with the project markers, the majority language of the
//! artifacts wins.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tracing::debug;

/// One toolchain command; `{file}` expands to the target path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Resolve `{file}` placeholders against a concrete path
    pub fn resolve(&self, file: &str) -> (String, Vec<String>) {
        let args = self
            .args
            .iter()
            .map(|a| a.replace("{file}", file))
            .collect();
        (self.program.clone(), args)
    }

    /// Human-readable rendering for `GateResult.commands_run`
    pub fn render(&self, file: &str) -> String {
        let (program, args) = self.resolve(file);
        format!("{} {}", program, args.join(" "))
    }
}

/// Captured subprocess outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// Run one toolchain command in a working directory with a deadline
pub async fn run_command(
    spec: &CommandSpec,
    file: &str,
    cwd: &Path,
    timeout: Duration,
) -> Result<CommandOutput> {
    let (program, args) = spec.resolve(file);
    debug!(program = %program, ?args, "running toolchain command");

    let child = tokio::process::Command::new(&program)
        .args(&args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| EngineError::Toolchain(format!("{}: {}", program, e)))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| EngineError::Toolchain(format!("{} timed out after {:?}", program, timeout)))?
        .map_err(EngineError::Io)?;

    Ok(CommandOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Per-language command bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageToolchain {
    pub language: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syntax_cmd: Option<CommandSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint_cmd: Option<CommandSpec>,

    /// Deterministic in-place fixer run before lint reporting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint_fix_cmd: Option<CommandSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_cmd: Option<CommandSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_cmd: Option<CommandSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_cmd: Option<CommandSpec>,

    /// Command that loads a module in an isolated context (Import gates)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_cmd: Option<CommandSpec>,

    /// Interpreter used to start entry points (Serve/Endpoint gates)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_cmd: Option<CommandSpec>,
}

impl LanguageToolchain {
    pub fn python() -> Self {
        Self {
            language: "python".to_string(),
            syntax_cmd: Some(CommandSpec::new("python3", &["-m", "py_compile", "{file}"])),
            lint_cmd: Some(CommandSpec::new(
                "ruff",
                &["check", "--output-format", "json", "{file}"],
            )),
            lint_fix_cmd: Some(CommandSpec::new("ruff", &["check", "--fix", "{file}"])),
            type_cmd: Some(CommandSpec::new(
                "mypy",
                &["--no-error-summary", "{file}"],
            )),
            format_cmd: Some(CommandSpec::new("ruff", &["format", "{file}"])),
            test_cmd: Some(CommandSpec::new("python3", &["-m", "pytest", "-x", "-q"])),
            import_cmd: Some(CommandSpec::new("python3", &["-c", "import runpy; runpy.run_path('{file}')"])),
            run_cmd: Some(CommandSpec::new("python3", &["{file}"])),
        }
    }

    pub fn javascript() -> Self {
        Self {
            language: "javascript".to_string(),
            syntax_cmd: Some(CommandSpec::new("node", &["--check", "{file}"])),
            lint_cmd: Some(CommandSpec::new("npx", &["eslint", "--format", "json", "{file}"])),
            lint_fix_cmd: Some(CommandSpec::new("npx", &["eslint", "--fix", "{file}"])),
            type_cmd: None,
            format_cmd: Some(CommandSpec::new("npx", &["prettier", "--write", "{file}"])),
            test_cmd: Some(CommandSpec::new("npx", &["jest", "--bail"])),
            import_cmd: Some(CommandSpec::new("node", &["-e", "require('./{file}')"])),
            run_cmd: Some(CommandSpec::new("node", &["{file}"])),
        }
    }

    pub fn rust() -> Self {
        Self {
            language: "rust".to_string(),
            syntax_cmd: Some(CommandSpec::new("cargo", &["check", "--quiet"])),
            lint_cmd: Some(CommandSpec::new(
                "cargo",
                &["clippy", "--quiet", "--message-format", "json"],
            )),
            lint_fix_cmd: Some(CommandSpec::new("cargo", &["fix", "--allow-dirty", "--quiet"])),
            type_cmd: None, // cargo check covers it
            format_cmd: Some(CommandSpec::new("cargo", &["fmt"])),
            test_cmd: Some(CommandSpec::new("cargo", &["test", "--quiet"])),
            import_cmd: None,
            run_cmd: Some(CommandSpec::new("cargo", &["run", "--quiet"])),
        }
    }

    pub fn for_language(language: &str) -> Option<Self> {
        match language {
            "python" => Some(Self::python()),
            "javascript" | "typescript" => Some(Self::javascript()),
            "rust" => Some(Self::rust()),
            _ => None,
        }
    }
}

/// Detect the project language from marker files
pub fn detect(project_root: &Path) -> Option<LanguageToolchain> {
    const MARKERS: &[(&str, &str)] = &[
        ("pyproject.toml", "python"),
        ("setup.py", "python"),
        ("requirements.txt", "python"),
        ("package.json", "javascript"),
        ("Cargo.toml", "rust"),
    ];
    for (marker, language) in MARKERS {
        if project_root.join(marker).exists() {
            debug!(marker = marker, language = language, "toolchain detected");
            return LanguageToolchain::for_language(language);
        }
    }
    None
}

/// Pick the toolchain for a set of artifacts: majority artifact language,
/// falling back to project markers, then a hint, then python.
pub fn select(
    project_root: &Path,
    artifact_languages: &[String],
    hint: Option<&str>,
) -> LanguageToolchain {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for language in artifact_languages {
        *counts.entry(language.as_str()).or_insert(0) += 1;
    }
    let majority = counts
        .iter()
        .max_by_key(|(language, count)| (**count, std::cmp::Reverse(*language)))
        .map(|(language, _)| *language);

    majority
        .and_then(LanguageToolchain::for_language)
        .or_else(|| detect(project_root))
        .or_else(|| hint.and_then(LanguageToolchain::for_language))
        .unwrap_or_else(LanguageToolchain::python)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_resolve_placeholder() {
        let spec = CommandSpec::new("python3", &["-m", "py_compile", "{file}"]);
        let (program, args) = spec.resolve("src/app.py");
        assert_eq!(program, "python3");
        assert_eq!(args, vec!["-m", "py_compile", "src/app.py"]);
    }

    #[test]
    fn test_detect_by_marker() {
        let dir = tempfile::tempdir().unwrap();
        assert!(detect(dir.path()).is_none());
        std::fs::write(dir.path().join("pyproject.toml"), "[project]\n").unwrap();
        let toolchain = detect(dir.path()).unwrap();
        assert_eq!(toolchain.language, "python");
    }

    #[test]
    fn test_select_majority_wins_over_marker() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        let languages = vec![
            "python".to_string(),
            "python".to_string(),
            "javascript".to_string(),
        ];
        let toolchain = select(dir.path(), &languages, None);
        assert_eq!(toolchain.language, "python");
    }

    #[test]
    fn test_select_falls_back_to_marker_then_hint() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        let toolchain = select(dir.path(), &[], None);
        assert_eq!(toolchain.language, "javascript");

        let empty = tempfile::tempdir().unwrap();
        let toolchain = select(empty.path(), &[], Some("rust"));
        assert_eq!(toolchain.language, "rust");
    }

    #[tokio::test]
    async fn test_run_command_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("echo", &["hello", "{file}"]);
        let output = run_command(&spec, "world", dir.path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.success());
        assert!(output.stdout.contains("hello world"));
    }

    #[tokio::test]
    async fn test_run_command_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("definitely-not-a-binary-xyz", &[]);
        let err = run_command(&spec, "x", dir.path(), Duration::from_secs(1)).await;
        assert!(err.is_err());
    }
}
