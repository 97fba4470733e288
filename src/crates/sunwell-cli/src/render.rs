//! Event rendering and exit-code mapping
//!
//! Three consumer modes: human (colored line per event), `--json` (raw
//! NDJSON event stream on stdout), `--quiet` (nothing until the final
//! NDJSON summary).

use colored::Colorize;
use sunwell_core::events::{AgentEvent, EventSink, EventType};

pub const EXIT_OK: u8 = 0;
pub const EXIT_PLAN_ABORT: u8 = 1;
pub const EXIT_ESCALATION: u8 = 2;
pub const EXIT_MERGE_CONFLICTS: u8 = 3;
pub const EXIT_BUDGET: u8 = 4;
pub const EXIT_CONFIG: u8 = 10;

/// Colored, single-line-per-event renderer
pub struct HumanSink;

impl EventSink for HumanSink {
    fn accept(&self, event: &AgentEvent) -> sunwell_core::Result<()> {
        let line = describe(event);
        if !line.is_empty() {
            println!("{}", line);
        }
        Ok(())
    }
}

fn field<'a>(event: &'a AgentEvent, key: &str) -> &'a str {
    event.data.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

fn describe(event: &AgentEvent) -> String {
    match event.event_type {
        EventType::SignalExtracting => format!("{} extracting signals", "→".dimmed()),
        EventType::Signal => format!(
            "{} signals: complexity={} confidence={}",
            "✓".green(),
            field(event, "complexity"),
            event.data.get("confidence").cloned().unwrap_or_default()
        ),
        EventType::PlanStart => format!(
            "{} planning with {}",
            "→".dimmed(),
            field(event, "strategy").cyan()
        ),
        EventType::PlanWinner => format!(
            "{} plan ready: {} tasks",
            "✓".green(),
            event.data.get("task_count").cloned().unwrap_or_default()
        ),
        EventType::PlanAbort => format!("{} plan aborted: {}", "✗".red(), field(event, "reason")),
        EventType::TaskStart => format!(
            "{} task {} [{}]",
            "→".dimmed(),
            field(event, "task_id").bold(),
            field(event, "strategy").cyan()
        ),
        EventType::TaskComplete => format!("{} task {} done", "✓".green(), field(event, "task_id")),
        EventType::TaskFailed => format!(
            "{} task {} failed: {}",
            "✗".red(),
            field(event, "task_id"),
            field(event, "error")
        ),
        EventType::GateStart => format!(
            "{} gate {} [{}]",
            "▸".yellow(),
            field(event, "gate_id").bold(),
            field(event, "kind")
        ),
        EventType::GatePass => format!("{} gate {} passed", "✓".green(), field(event, "gate_id")),
        EventType::GateFail => format!("{} gate {} failed", "✗".red(), field(event, "gate_id")),
        EventType::GateTimeout => {
            format!("{} gate {} timed out", "✗".red(), field(event, "gate_id"))
        }
        EventType::ValidateError => format!(
            "  {} {}: {}",
            "!".red(),
            field(event, "kind"),
            field(event, "message")
        ),
        EventType::FixStart => format!(
            "{} fixing {} with {} (attempt {})",
            "⚙".yellow(),
            field(event, "gate_id"),
            field(event, "strategy").cyan(),
            event.data.get("attempt").cloned().unwrap_or_default()
        ),
        EventType::FixComplete => format!("{} fix landed", "✓".green()),
        EventType::FixFailed => format!("{} fix failed: {}", "✗".red(), field(event, "error")),
        EventType::Escalate => format!(
            "{} escalation: {}",
            "‼".red().bold(),
            field(event, "reason")
        ),
        EventType::BriefingSaved => format!(
            "{} briefing saved ({} bytes)",
            "✓".dimmed(),
            event.data.get("bytes").cloned().unwrap_or_default()
        ),
        EventType::WorkerStart => format!(
            "{} {} on {}",
            "⇉".cyan(),
            field(event, "worker_id"),
            field(event, "branch")
        ),
        EventType::WorkerClaim => format!(
            "{} {} claimed {}",
            "⇉".cyan(),
            field(event, "worker_id"),
            field(event, "goal_id")
        ),
        EventType::Complete => format!("{} complete", "✓".green().bold()),
        EventType::Error => format!("{} {}", "✗".red(), field(event, "message")),
        // Low-signal events stay quiet in human mode.
        _ => String::new(),
    }
}

/// Raw NDJSON stream on stdout for machine consumers
pub struct JsonStdoutSink;

impl EventSink for JsonStdoutSink {
    fn accept(&self, event: &AgentEvent) -> sunwell_core::Result<()> {
        println!("{}", event.to_ndjson()?);
        Ok(())
    }
}
