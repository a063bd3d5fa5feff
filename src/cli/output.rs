//! CLI output formatting

use crate::core::state::Build;
use crate::execution::ExecutionEvent;

// Re-export style
pub use console::style;
use console::Emoji;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Format a tri-state verdict for display
pub fn format_verdict(build: &Build) -> String {
    match (build.success, build.crashed) {
        (_, true) => style("CRASHED").red().bold().to_string(),
        (Some(true), _) => style("SUCCEEDED").green().to_string(),
        (Some(false), _) => style("FAILED").red().to_string(),
        (None, _) if build.started.is_some() => style("RUNNING").yellow().to_string(),
        (None, _) => style("QUEUED").dim().to_string(),
    }
}

/// Format a build record for display
pub fn format_build(build: &Build) -> String {
    let icon = match (build.success, build.crashed) {
        (_, true) | (Some(false), _) => CROSS,
        (Some(true), _) => CHECK,
        (None, _) => SPINNER,
    };

    let mut lines = vec![format!(
        "{} {} {} - {}",
        icon,
        style(build.id.as_deref().unwrap_or("-")).dim(),
        style(build.pipeline_name()).bold(),
        format_verdict(build)
    )];

    let mut field = |name: &str, value: Option<String>| {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            lines.push(format!("  {:<8} {}", style(name).dim(), value));
        }
    };
    field("env", Some(build.env_name().to_string()));
    field("version", build.version.clone());
    field("agent", build.agent.clone());
    field("status", build.status.clone());
    field("started", build.started.map(|t| t.to_rfc3339()));
    field("ended", build.ended.map(|t| t.to_rfc3339()));

    lines.join("\n")
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::StepStarted { key, index } => {
            format!("{} {} {}", SPINNER, style(index).dim(), style(key).cyan())
        }
        ExecutionEvent::StepCompleted { key, success: true } => {
            format!("{} {}", CHECK, style(key).green())
        }
        ExecutionEvent::StepCompleted { key, success: false } => {
            format!("{} {}", CROSS, style(key).red())
        }
        ExecutionEvent::PipelineCompleted { success: true } => {
            format!("{} Pipeline {}", ROCKET, style("succeeded").green())
        }
        ExecutionEvent::PipelineCompleted { success: false } => {
            format!("{} Pipeline {}", WARN, style("failed").red())
        }
    }
}
