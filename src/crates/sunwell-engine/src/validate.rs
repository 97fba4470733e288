//! Validation cascade
//!
//! Layered check run at each gate: syntax → lint (deterministic auto-fix
//! first) → type → gate-specific (import / schema / endpoint / integration).
//! The cascade exits on the first failing layer and reports that failure
//! precisely; later layers never run. A gate that exceeds its total timeout
//! fails with kind `Timeout`.
//!
//! Toolchain binaries that cannot be spawned skip their layer with a
//! warning rather than failing the gate: an absent linter must not block
//! an otherwise valid artifact set.

use crate::error::EngineError;
use crate::toolchain::{run_command, CommandSpec, LanguageToolchain};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use sunwell_core::config::GateConfig;
use sunwell_core::events::{EventEmitter, EventType};
use sunwell_core::gate::{
    Gate, GateKind, GateResult, Severity, ValidationError, ValidationErrorKind,
};
use sunwell_core::Artifact;
use tracing::{debug, warn};

/// Outcome of one cascade layer
enum LayerOutcome {
    Clean,
    Skipped,
    Failed {
        errors: Vec<ValidationError>,
        output: String,
    },
}

/// Gate validator bound to one toolchain and workspace
pub struct Validator {
    toolchain: LanguageToolchain,
    config: GateConfig,
    workspace: PathBuf,
}

impl Validator {
    pub fn new(toolchain: LanguageToolchain, config: GateConfig, workspace: PathBuf) -> Self {
        Self {
            toolchain,
            config,
            workspace,
        }
    }

    pub fn toolchain(&self) -> &LanguageToolchain {
        &self.toolchain
    }

    /// Run the cascade for a gate over its artifacts.
    ///
    /// Always returns a [`GateResult`]; infrastructure failures surface as
    /// failed results, never panics or errors.
    pub async fn validate(
        &self,
        gate: &Gate,
        artifacts: &[Artifact],
        emitter: &EventEmitter,
    ) -> GateResult {
        let started = Instant::now();
        let _ = emitter.emit(EventType::ValidateStart, json!({ "gate_id": gate.id }));

        let deadline = Duration::from_secs(self.config.timeout_secs);
        let outcome = tokio::time::timeout(deadline, self.cascade(gate, artifacts, emitter)).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(result) => {
                let mut result = result;
                result.duration_ms = duration_ms;
                if result.passed {
                    let _ = emitter.emit(EventType::ValidatePass, json!({ "gate_id": gate.id }));
                }
                result
            }
            Err(_) => {
                let _ = emitter.emit(
                    EventType::GateTimeout,
                    json!({ "gate_id": gate.id, "timeout_secs": self.config.timeout_secs }),
                );
                let error = ValidationError {
                    kind: ValidationErrorKind::Timeout,
                    file: None,
                    line_range: None,
                    message: format!("gate exceeded {} s", self.config.timeout_secs),
                    severity: Severity::Error,
                };
                GateResult::failed(gate.id.clone(), vec![error], "", duration_ms)
            }
        }
    }

    async fn cascade(
        &self,
        gate: &Gate,
        artifacts: &[Artifact],
        emitter: &EventEmitter,
    ) -> GateResult {
        let mut commands_run: Vec<String> = Vec::new();

        if let Err(e) = self.write_artifacts(artifacts) {
            let error = ValidationError::new(
                ValidationErrorKind::Runtime,
                format!("artifact write failed: {}", e),
            );
            return GateResult::failed(gate.id.clone(), vec![error], "", 0);
        }

        // Layers in order; first failure wins.
        let layers: [(&str, ValidationErrorKind); 3] = [
            ("syntax", ValidationErrorKind::Syntax),
            ("lint", ValidationErrorKind::Lint),
            ("type", ValidationErrorKind::Type),
        ];
        for (level, kind) in layers {
            let _ = emitter.emit(
                EventType::ValidateLevel,
                json!({ "gate_id": gate.id, "level": level }),
            );
            let outcome = match kind {
                ValidationErrorKind::Syntax => self.layer_syntax(artifacts, &mut commands_run).await,
                ValidationErrorKind::Lint => self.layer_lint(artifacts, &mut commands_run).await,
                _ => self.layer_type(artifacts, &mut commands_run).await,
            };
            if let Some(result) = self.settle(gate, outcome, emitter, &commands_run) {
                return result;
            }
        }

        // Gate-specific layer.
        let _ = emitter.emit(
            EventType::ValidateLevel,
            json!({ "gate_id": gate.id, "level": gate.kind.as_str() }),
        );
        let outcome = match gate.kind {
            GateKind::Import | GateKind::Instantiate => {
                self.layer_import(artifacts, &mut commands_run).await
            }
            GateKind::Schema => self.layer_schema(gate, artifacts, &mut commands_run).await,
            GateKind::Serve | GateKind::Endpoint => {
                self.layer_endpoint(gate, artifacts, emitter, &mut commands_run).await
            }
            GateKind::Integration | GateKind::Test => {
                self.layer_test(gate, &mut commands_run).await
            }
            // Syntax/Lint/Type gates are fully covered by the shared layers.
            _ => LayerOutcome::Clean,
        };
        if let Some(result) = self.settle(gate, outcome, emitter, &commands_run) {
            return result;
        }

        let mut result = GateResult::passed(gate.id.clone(), artifacts, 0);
        result.commands_run = commands_run;
        result
    }

    /// Convert a failing layer outcome into the gate's failed result
    fn settle(
        &self,
        gate: &Gate,
        outcome: LayerOutcome,
        emitter: &EventEmitter,
        commands_run: &[String],
    ) -> Option<GateResult> {
        match outcome {
            LayerOutcome::Clean | LayerOutcome::Skipped => None,
            LayerOutcome::Failed { errors, output } => {
                if let Some(first) = errors.first() {
                    let _ = emitter.emit(
                        EventType::ValidateError,
                        json!({
                            "gate_id": gate.id,
                            "kind": format!("{:?}", first.kind).to_lowercase(),
                            "message": first.message,
                            "file": first.file,
                        }),
                    );
                }
                let mut result = GateResult::failed(gate.id.clone(), errors, output, 0);
                result.commands_run = commands_run.to_vec();
                Some(result)
            }
        }
    }

    fn write_artifacts(&self, artifacts: &[Artifact]) -> std::io::Result<()> {
        for artifact in artifacts {
            let path = self.workspace.join(&artifact.path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &artifact.content)?;
        }
        Ok(())
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    async fn run_layer_command(
        &self,
        spec: &CommandSpec,
        file: &str,
        commands_run: &mut Vec<String>,
    ) -> Option<crate::toolchain::CommandOutput> {
        commands_run.push(spec.render(file));
        match run_command(spec, file, &self.workspace, self.command_timeout()).await {
            Ok(output) => Some(output),
            Err(EngineError::Toolchain(message)) => {
                warn!(message, "toolchain command unavailable, skipping layer");
                None
            }
            Err(e) => {
                warn!(error = %e, "toolchain command failed to run");
                None
            }
        }
    }

    async fn layer_syntax(
        &self,
        artifacts: &[Artifact],
        commands_run: &mut Vec<String>,
    ) -> LayerOutcome {
        let Some(spec) = self.toolchain.syntax_cmd.clone() else {
            return LayerOutcome::Skipped;
        };
        for artifact in artifacts {
            let Some(output) = self.run_layer_command(&spec, &artifact.path, commands_run).await
            else {
                return LayerOutcome::Skipped;
            };
            if !output.success() {
                let combined = output.combined();
                let errors =
                    parse_located_errors(&combined, ValidationErrorKind::Syntax, &artifact.path);
                return LayerOutcome::Failed {
                    errors,
                    output: combined,
                };
            }
        }
        LayerOutcome::Clean
    }

    /// Deterministic auto-fix first, then report residual lint errors
    async fn layer_lint(
        &self,
        artifacts: &[Artifact],
        commands_run: &mut Vec<String>,
    ) -> LayerOutcome {
        if let Some(fix) = self.toolchain.lint_fix_cmd.clone() {
            for artifact in artifacts {
                // Mechanical fixes are absorbed silently; failures here fall
                // through to the reporting pass.
                let _ = self.run_layer_command(&fix, &artifact.path, commands_run).await;
            }
        }
        let Some(spec) = self.toolchain.lint_cmd.clone() else {
            return LayerOutcome::Skipped;
        };
        for artifact in artifacts {
            let Some(output) = self.run_layer_command(&spec, &artifact.path, commands_run).await
            else {
                return LayerOutcome::Skipped;
            };
            if !output.success() {
                let combined = output.combined();
                let mut errors = parse_lint_json(&output.stdout, &artifact.path);
                if errors.is_empty() {
                    errors = parse_located_errors(
                        &combined,
                        ValidationErrorKind::Lint,
                        &artifact.path,
                    );
                }
                let errors: Vec<ValidationError> = errors
                    .into_iter()
                    .filter(|e| e.severity >= Severity::Error)
                    .collect();
                if !errors.is_empty() {
                    return LayerOutcome::Failed {
                        errors,
                        output: combined,
                    };
                }
            }
        }
        LayerOutcome::Clean
    }

    async fn layer_type(
        &self,
        artifacts: &[Artifact],
        commands_run: &mut Vec<String>,
    ) -> LayerOutcome {
        let Some(spec) = self.toolchain.type_cmd.clone() else {
            return LayerOutcome::Skipped;
        };
        for artifact in artifacts {
            let Some(output) = self.run_layer_command(&spec, &artifact.path, commands_run).await
            else {
                return LayerOutcome::Skipped;
            };
            if !output.success() {
                let combined = output.combined();
                let errors =
                    parse_located_errors(&combined, ValidationErrorKind::Type, &artifact.path);
                return LayerOutcome::Failed {
                    errors,
                    output: combined,
                };
            }
        }
        LayerOutcome::Clean
    }

    /// Import/Instantiate gates: load each artifact in an isolated context
    async fn layer_import(
        &self,
        artifacts: &[Artifact],
        commands_run: &mut Vec<String>,
    ) -> LayerOutcome {
        let Some(spec) = self.toolchain.import_cmd.clone() else {
            return LayerOutcome::Skipped;
        };
        for artifact in artifacts {
            let Some(output) = self.run_layer_command(&spec, &artifact.path, commands_run).await
            else {
                return LayerOutcome::Skipped;
            };
            if !output.success() {
                let combined = output.combined();
                let errors =
                    parse_located_errors(&combined, ValidationErrorKind::Import, &artifact.path);
                return LayerOutcome::Failed {
                    errors,
                    output: combined,
                };
            }
        }
        LayerOutcome::Clean
    }

    /// Schema gates: run the declared migration/build step
    async fn layer_schema(
        &self,
        gate: &Gate,
        artifacts: &[Artifact],
        commands_run: &mut Vec<String>,
    ) -> LayerOutcome {
        let spec = match &gate.validation.command {
            Some(command) if !command.is_empty() => CommandSpec {
                program: command[0].clone(),
                args: command[1..].to_vec(),
            },
            // No declared step: constructing the schema modules is the check.
            _ => return self.layer_import(artifacts, commands_run).await,
        };
        let Some(output) = self.run_layer_command(&spec, "", commands_run).await else {
            return LayerOutcome::Skipped;
        };
        if output.success() {
            LayerOutcome::Clean
        } else {
            let combined = output.combined();
            let errors = parse_located_errors(&combined, ValidationErrorKind::Runtime, "");
            LayerOutcome::Failed {
                errors,
                output: combined,
            }
        }
    }

    /// Integration/Test gates: run the declared or toolchain test command
    async fn layer_test(&self, gate: &Gate, commands_run: &mut Vec<String>) -> LayerOutcome {
        let spec = match &gate.validation.command {
            Some(command) if !command.is_empty() => CommandSpec {
                program: command[0].clone(),
                args: command[1..].to_vec(),
            },
            _ => match self.toolchain.test_cmd.clone() {
                Some(spec) => spec,
                None => return LayerOutcome::Skipped,
            },
        };
        let Some(output) = self.run_layer_command(&spec, "", commands_run).await else {
            return LayerOutcome::Skipped;
        };
        if output.success() {
            LayerOutcome::Clean
        } else {
            let combined = output.combined();
            let errors = parse_located_errors(&combined, ValidationErrorKind::Test, "");
            LayerOutcome::Failed {
                errors,
                output: combined,
            }
        }
    }

    /// Serve/Endpoint gates: start the entry point on an ephemeral port,
    /// poll readiness with exponential backoff, then issue the declared
    /// probes. The server is torn down on exit regardless of outcome.
    async fn layer_endpoint(
        &self,
        gate: &Gate,
        artifacts: &[Artifact],
        emitter: &EventEmitter,
        commands_run: &mut Vec<String>,
    ) -> LayerOutcome {
        let entry_point = gate
            .validation
            .entry_point
            .clone()
            .or_else(|| artifacts.first().map(|a| a.path.clone()));
        let Some(entry_point) = entry_point else {
            return LayerOutcome::Skipped;
        };
        let Some(run_spec) = self.toolchain.run_cmd.clone() else {
            return LayerOutcome::Skipped;
        };

        // OS-assigned ephemeral port, released before the server starts.
        let port = match free_port() {
            Ok(port) => port,
            Err(e) => {
                warn!(error = %e, "no free port available");
                return LayerOutcome::Skipped;
            }
        };

        let (program, args) = run_spec.resolve(&entry_point);
        commands_run.push(format!("{} {} (PORT={})", program, args.join(" "), port));
        let child = tokio::process::Command::new(&program)
            .args(&args)
            .current_dir(&self.workspace)
            .env("PORT", port.to_string())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %program, error = %e, "entry point failed to spawn");
                return LayerOutcome::Skipped;
            }
        };

        let ready = self.wait_ready(port, &mut child).await;
        let outcome = match ready {
            Err(detail) => LayerOutcome::Failed {
                errors: vec![ValidationError::new(
                    ValidationErrorKind::Runtime,
                    format!("server never became ready on port {}: {}", port, detail),
                )
                .at(entry_point.clone(), 1)],
                output: detail,
            },
            Ok(()) => {
                let _ = emitter.emit(
                    EventType::GateStep,
                    json!({ "gate_id": gate.id, "step": "probing" }),
                );
                self.run_probes(gate, port, &entry_point).await
            }
        };

        teardown(&mut child, Duration::from_secs(self.config.grace_period_secs)).await;
        outcome
    }

    /// Poll the server port with exponential backoff (50 ms doubling to a
    /// 1 s cap); total time is bounded by the enclosing gate timeout.
    async fn wait_ready(&self, port: u16, child: &mut tokio::process::Child) -> std::result::Result<(), String> {
        let mut delay = Duration::from_millis(self.config.readiness_initial_ms);
        let cap = Duration::from_millis(self.config.readiness_max_ms);
        loop {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(format!("server exited during startup: {}", status));
            }
            match tokio::net::TcpStream::connect(("127.0.0.1", port)).await {
                Ok(_) => return Ok(()),
                Err(_) => {
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(cap);
                }
            }
        }
    }

    async fn run_probes(&self, gate: &Gate, port: u16, entry_point: &str) -> LayerOutcome {
        if gate.validation.probes.is_empty() {
            // Reachability was the whole check.
            return LayerOutcome::Clean;
        }
        let client = reqwest::Client::new();
        for probe in &gate.validation.probes {
            let url = format!("http://127.0.0.1:{}{}", port, probe.path);
            let response = match client.get(&url).send().await {
                Ok(response) => response,
                Err(e) => {
                    return LayerOutcome::Failed {
                        errors: vec![ValidationError::new(
                            ValidationErrorKind::Runtime,
                            format!("probe {} failed: {}", probe.path, e),
                        )
                        .at(entry_point.to_string(), 1)],
                        output: e.to_string(),
                    };
                }
            };
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            if status != probe.expect_status {
                return LayerOutcome::Failed {
                    errors: vec![ValidationError::new(
                        ValidationErrorKind::Runtime,
                        format!(
                            "probe {} returned {} (expected {})",
                            probe.path, status, probe.expect_status
                        ),
                    )
                    .at(entry_point.to_string(), 1)],
                    output: body,
                };
            }
            if let Some(expected) = &probe.expect_body {
                if !body.contains(expected) {
                    return LayerOutcome::Failed {
                        errors: vec![ValidationError::new(
                            ValidationErrorKind::Runtime,
                            format!("probe {} body missing {:?}", probe.path, expected),
                        )
                        .at(entry_point.to_string(), 1)],
                        output: body,
                    };
                }
            }
        }
        LayerOutcome::Clean
    }
}

/// Bind to port 0 and let the OS pick; the listener drops before use
fn free_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Terminate a probed subprocess: SIGTERM-equivalent kill, bounded wait
async fn teardown(child: &mut tokio::process::Child, grace: Duration) {
    if child.try_wait().ok().flatten().is_some() {
        return;
    }
    let _ = child.start_kill();
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        debug!("subprocess outlived grace period after kill");
    }
}

/// Parse `file:line[:col]: message` and python-traceback locations out of
/// tool output; falls back to one unlocated error when nothing matches.
pub fn parse_located_errors(
    output: &str,
    kind: ValidationErrorKind,
    default_file: &str,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let line_pattern = regex::Regex::new(r"(?m)^\s*([\w./\\-]+\.\w+):(\d+)(?::\d+)?[:\s]+(.+)$")
        .expect("static regex");
    for captures in line_pattern.captures_iter(output) {
        let line: u32 = captures[2].parse().unwrap_or(1);
        errors.push(
            ValidationError::new(kind, captures[3].trim().to_string())
                .at(captures[1].to_string(), line),
        );
    }

    let traceback_pattern =
        regex::Regex::new(r#"File "([^"]+)", line (\d+)"#).expect("static regex");
    if errors.is_empty() {
        if let Some(captures) = traceback_pattern.captures_iter(output).last() {
            let line: u32 = captures[2].parse().unwrap_or(1);
            let message = output
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("failure")
                .trim()
                .to_string();
            errors.push(ValidationError::new(kind, message).at(captures[1].to_string(), line));
        }
    }

    if errors.is_empty() {
        let message = output
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("validation failed")
            .trim()
            .to_string();
        let mut error = ValidationError::new(kind, message);
        if !default_file.is_empty() {
            error = error.at(default_file.to_string(), 1);
        }
        errors.push(error);
    }
    errors
}

/// Parse ruff-style `--output-format json` lint reports
fn parse_lint_json(stdout: &str, default_file: &str) -> Vec<ValidationError> {
    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(stdout) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let message = item.get("message")?.as_str()?.to_string();
            let file = item
                .get("filename")
                .and_then(Value::as_str)
                .unwrap_or(default_file)
                .to_string();
            let line = item
                .get("location")
                .and_then(|l| l.get("row"))
                .and_then(Value::as_u64)
                .unwrap_or(1) as u32;
            Some(ValidationError::new(ValidationErrorKind::Lint, message).at(file, line))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use sunwell_core::events::{EventSchemas, MemorySink};
    use sunwell_core::gate::EndpointProbe;

    fn emitter() -> (EventEmitter, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let mut emitter = EventEmitter::new(Arc::new(EventSchemas::new().unwrap()));
        emitter.add_sink(sink.clone());
        (emitter, sink)
    }

    /// Toolchain whose every command is a shell no-op, for hermetic tests
    fn true_toolchain() -> LanguageToolchain {
        LanguageToolchain {
            language: "python".to_string(),
            syntax_cmd: Some(CommandSpec::new("true", &["{file}"])),
            lint_cmd: Some(CommandSpec::new("true", &["{file}"])),
            lint_fix_cmd: None,
            type_cmd: Some(CommandSpec::new("true", &["{file}"])),
            format_cmd: None,
            test_cmd: Some(CommandSpec::new("true", &[])),
            import_cmd: Some(CommandSpec::new("true", &["{file}"])),
            run_cmd: None,
        }
    }

    fn failing_toolchain() -> LanguageToolchain {
        LanguageToolchain {
            syntax_cmd: Some(CommandSpec::new("false", &["{file}"])),
            ..true_toolchain()
        }
    }

    #[tokio::test]
    async fn test_clean_cascade_passes_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let validator = Validator::new(
            true_toolchain(),
            GateConfig::default(),
            dir.path().to_path_buf(),
        );
        let gate = Gate::new("g1", GateKind::Import).with_depends_on(["t1"]);
        let artifacts = vec![Artifact::new("src/mod.py", "x = 1\n", "t1", "python")];
        let (emitter, sink) = emitter();

        let result = validator.validate(&gate, &artifacts, &emitter).await;
        assert!(result.passed);
        assert!(result.checkpoint_hash.is_some());
        assert!(dir.path().join("src/mod.py").exists());
        assert!(sink
            .events()
            .iter()
            .any(|e| e.event_type == EventType::ValidatePass));
    }

    #[tokio::test]
    async fn test_first_failure_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let validator = Validator::new(
            failing_toolchain(),
            GateConfig::default(),
            dir.path().to_path_buf(),
        );
        let gate = Gate::new("g1", GateKind::Import).with_depends_on(["t1"]);
        let artifacts = vec![Artifact::new("a.py", "x = 1\n", "t1", "python")];
        let (emitter, _) = emitter();

        let result = validator.validate(&gate, &artifacts, &emitter).await;
        assert!(!result.passed);
        assert_eq!(result.errors[0].kind, ValidationErrorKind::Syntax);
        // Only the syntax command ran; lint/type never started.
        assert_eq!(result.commands_run.len(), 1);
    }

    #[tokio::test]
    async fn test_gate_timeout_reports_timeout_kind() {
        let dir = tempfile::tempdir().unwrap();
        let slow = LanguageToolchain {
            syntax_cmd: Some(CommandSpec::new("sleep", &["5"])),
            ..true_toolchain()
        };
        let config = GateConfig {
            timeout_secs: 1,
            ..GateConfig::default()
        };
        let validator = Validator::new(slow, config, dir.path().to_path_buf());
        let gate = Gate::new("g1", GateKind::Syntax).with_depends_on(["t1"]);
        let artifacts = vec![Artifact::new("a.py", "x\n", "t1", "python")];
        let (emitter, sink) = emitter();

        let result = validator.validate(&gate, &artifacts, &emitter).await;
        assert!(!result.passed);
        assert_eq!(result.errors[0].kind, ValidationErrorKind::Timeout);
        assert!(sink
            .events()
            .iter()
            .any(|e| e.event_type == EventType::GateTimeout));
    }

    #[test]
    fn test_parse_located_errors_colon_format() {
        let output = "routes/posts.py:14: error: sqlite3.ProgrammingError\n";
        let errors = parse_located_errors(output, ValidationErrorKind::Runtime, "");
        assert_eq!(errors[0].file.as_deref(), Some("routes/posts.py"));
        assert_eq!(errors[0].line_range, Some((14, 14)));
    }

    #[test]
    fn test_parse_located_errors_traceback() {
        let output = "Traceback (most recent call last):\n  File \"routes/posts.py\", line 14, in create\nsqlite3.ProgrammingError: parameters\n";
        let errors = parse_located_errors(output, ValidationErrorKind::Runtime, "");
        assert_eq!(errors[0].file.as_deref(), Some("routes/posts.py"));
        assert_eq!(errors[0].line_range, Some((14, 14)));
        assert!(errors[0].message.contains("ProgrammingError"));
    }

    #[test]
    fn test_parse_lint_json() {
        let stdout = r#"[{"filename": "a.py", "location": {"row": 3, "column": 1}, "message": "unused import"}]"#;
        let errors = parse_lint_json(stdout, "a.py");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line_range, Some((3, 3)));
    }

    #[test]
    fn test_free_port_is_bindable() {
        let port = free_port().unwrap();
        assert!(port > 0);
        // Port is released: binding again succeeds.
        std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
    }

    #[tokio::test]
    async fn test_endpoint_gate_skipped_without_run_cmd() {
        let dir = tempfile::tempdir().unwrap();
        let validator = Validator::new(
            true_toolchain(), // run_cmd: None
            GateConfig::default(),
            dir.path().to_path_buf(),
        );
        let mut gate = Gate::new("g1", GateKind::Endpoint).with_depends_on(["t1"]);
        gate.validation.probes = vec![EndpointProbe {
            path: "/health".to_string(),
            expect_status: 200,
            expect_body: None,
        }];
        let artifacts = vec![Artifact::new("app.py", "print('hi')\n", "t1", "python")];
        let (emitter, _) = emitter();

        // Skipped layer does not fail the gate.
        let result = validator.validate(&gate, &artifacts, &emitter).await;
        assert!(result.passed);
    }
}
