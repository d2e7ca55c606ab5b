//! Workflow subcommands: run, validate, convert.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use owlflow_core::repository::StepRepository;
use owlflow_core::workflow::definition::{
    load_workflow_file, to_json, to_yaml, validate_definition,
};
use owlflow_types::event::ExecutionEvent;
use owlflow_types::execution::{ExecutionStatus, StepStatus, WorkflowExecution, WorkflowExecutionStep};
use owlflow_types::workflow::{StepType, Workflow, WorkflowDefinition};

use super::OutputFormat;
use crate::state::AppState;

/// How long the progress watcher may lag behind the finished run.
const WATCHER_GRACE: Duration = Duration::from_secs(1);

/// Output switches shared by every subcommand.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Execute `file` and wait for a terminal status.
///
/// Returns `false` when the run ended FAILED or CANCELED.
pub async fn handle_run(
    state: &AppState,
    file: &Path,
    input: Option<&str>,
    trigger: &str,
    user: &str,
    watch: bool,
    out: Output,
) -> Result<bool> {
    let definition = load_definition(file)?;
    let input = parse_input(input)?;

    let has_ai_steps = definition
        .steps
        .iter()
        .any(|s| s.step_type() == StepType::AiDecision);
    if has_ai_steps && !state.ai_decision.is_available().await {
        tracing::warn!(
            base_url = %state.config.ollama.base_url,
            "text generation backend is not reachable; ai_decision steps will fail"
        );
    }

    let workflow = Workflow::new(user, definition);
    // Subscribe before starting so no event is missed.
    let events = state.engine.event_bus().subscribe();
    let accepted = state
        .engine
        .execute_workflow(&workflow, input, trigger)
        .await
        .with_context(|| format!("Failed to start workflow '{}'", workflow.name))?;

    if !out.json && !out.quiet {
        println!();
        println!(
            "  {} Started '{}' as {}",
            style("*").green().bold(),
            style(&workflow.name).cyan(),
            style(short_id(accepted.id)).dim()
        );
    }

    let watcher = (watch && !out.json && !out.quiet)
        .then(|| tokio::spawn(print_events(events, accepted.id)));

    let finished = tokio::select! {
        result = state.engine.wait_for_completion(accepted.id) => result,
        _ = interrupted() => {
            if state.engine.cancel_execution(accepted.id) && !out.json {
                eprintln!("  {} Cancelling...", style("!").yellow().bold());
            }
            state.engine.wait_for_completion(accepted.id).await
        }
    };
    let finished = finished
        .context("Failed to read execution status")?
        .ok_or_else(|| anyhow!("execution {} vanished from the store", accepted.id))?;

    if let Some(handle) = watcher {
        // The finish event is already queued; don't hang if it was dropped.
        join_watcher(handle, accepted.id).await;
    }

    let steps = state
        .steps
        .find_by_execution_id(&finished.id)
        .await
        .context("Failed to read step records")?;

    if out.json {
        let report = serde_json::json!({ "execution": finished, "steps": steps });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !out.quiet {
        print_execution(&workflow.name, &finished);
        print_steps(&steps);
    }

    Ok(!matches!(
        finished.status,
        ExecutionStatus::Failed | ExecutionStatus::Canceled
    ))
}

/// Resolves on Ctrl-C. Never resolves if the handler can't be installed.
async fn interrupted() {
    interrupted_by(tokio::signal::ctrl_c()).await
}

async fn interrupted_by(signal: impl Future<Output = std::io::Result<()>>) {
    if let Err(err) = signal.await {
        tracing::warn!(error = %err, "cannot listen for Ctrl-C; cancellation disabled");
        std::future::pending::<()>().await;
    }
}

/// Give the watcher a short grace period. Returns `false` if it was abandoned.
async fn join_watcher(handle: tokio::task::JoinHandle<()>, execution_id: Uuid) -> bool {
    if tokio::time::timeout(WATCHER_GRACE, handle).await.is_err() {
        tracing::debug!(execution_id = %execution_id, "event watcher did not finish in time");
        return false;
    }
    true
}

/// Parse `--input` into an object map. Absent input is an empty map.
fn parse_input(raw: Option<&str>) -> Result<HashMap<String, Value>> {
    let Some(raw) = raw else {
        return Ok(HashMap::new());
    };
    let value: Value = serde_json::from_str(raw).context("--input is not valid JSON")?;
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => bail!("--input must be a JSON object, got {other}"),
    }
}

async fn print_events(mut events: broadcast::Receiver<ExecutionEvent>, execution_id: Uuid) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                println!("  {} {n} progress events dropped", style("!").yellow());
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        if event.execution_id() != execution_id {
            continue;
        }
        match event {
            ExecutionEvent::RunStarted { .. } => {}
            ExecutionEvent::StepStarted {
                step_id, step_type, ..
            } => println!("  {} {} ({})", style("->").dim(), style(&step_id).cyan(), step_type),
            ExecutionEvent::StepRetrying {
                step_id,
                attempt,
                delay_ms,
                error,
                ..
            } => println!(
                "  {} {} retry {attempt} in {delay_ms}ms: {}",
                style("~").yellow(),
                step_id,
                style(error).dim()
            ),
            ExecutionEvent::StepCompleted {
                step_id,
                duration_ms,
                ..
            } => println!("  {} {} ({duration_ms}ms)", style("ok").green(), step_id),
            ExecutionEvent::StepSkipped { step_id, reason, .. } => {
                println!("  {} {} {}", style("--").dim(), step_id, style(reason).dim())
            }
            ExecutionEvent::StepFailed { step_id, error, .. } => {
                println!("  {} {} {}", style("x").red(), step_id, style(error).red())
            }
            ExecutionEvent::RunFinished { .. } => return,
        }
    }
}

fn print_execution(name: &str, execution: &WorkflowExecution) {
    println!();
    println!(
        "  {} Run {}",
        style("Workflow:").bold(),
        style(short_id(execution.id)).cyan()
    );
    println!("  Workflow: {}", style(name).cyan());
    println!("  Status: {}", status_style(execution.status));
    println!("  Trigger: {}", execution.trigger_type);
    println!("  Started: {}", execution.started_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(completed) = execution.completed_at {
        let elapsed = completed - execution.started_at;
        println!(
            "  Completed: {} ({}ms)",
            completed.format("%Y-%m-%d %H:%M:%S"),
            elapsed.num_milliseconds()
        );
    }
    if let Some(output) = &execution.output {
        println!("  Output: {}", compact(output));
    }
    if let Some(err) = &execution.error {
        println!("  Error: {}", style(err).red());
    }
    println!();
}

fn print_steps(steps: &[WorkflowExecutionStep]) {
    if steps.is_empty() {
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Status"),
            Cell::new("Retries"),
            Cell::new("Duration"),
            Cell::new("Result"),
        ]);

    for s in steps {
        let duration = s
            .completed_at
            .map(|done| format!("{}ms", (done - s.started_at).num_milliseconds()))
            .unwrap_or_else(|| "-".to_string());
        let result = match (&s.error, &s.output) {
            (Some(err), _) => err.message.clone(),
            (None, Some(output)) => compact(output),
            (None, None) => String::new(),
        };
        let status_color = match s.status {
            StepStatus::Completed => Color::Green,
            StepStatus::Failed => Color::Red,
            StepStatus::Canceled => Color::Yellow,
            _ => Color::Grey,
        };

        table.add_row(vec![
            Cell::new(&s.step_id),
            Cell::new(s.step_type),
            Cell::new(s.status).fg(status_color),
            Cell::new(s.retry_count),
            Cell::new(duration),
            Cell::new(result),
        ]);
    }

    println!("{table}");
    println!();
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub fn handle_validate(file: &Path, out: Output) -> Result<()> {
    let definition = load_definition(file)?;

    if out.json {
        let steps: Vec<_> = definition
            .steps
            .iter()
            .map(|s| serde_json::json!({ "id": s.id, "type": s.step_type() }))
            .collect();
        let report = serde_json::json!({
            "valid": true,
            "name": definition.name,
            "trigger": definition.trigger.kind(),
            "steps": steps,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    if out.quiet {
        return Ok(());
    }

    println!();
    println!(
        "  {} '{}' is valid",
        style("*").green().bold(),
        style(&definition.name).cyan()
    );
    println!("  Trigger: {}", definition.trigger.kind());
    println!("  Steps: {}", definition.steps.len());
    if let Some(description) = &definition.description {
        println!("  {}", style(description).dim());
    }

    if !definition.steps.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("#"),
                Cell::new("Step").fg(Color::Cyan),
                Cell::new("Type"),
                Cell::new("Name"),
                Cell::new("Condition"),
            ]);
        for (i, s) in definition.steps.iter().enumerate() {
            table.add_row(vec![
                Cell::new(i + 1),
                Cell::new(&s.id),
                Cell::new(s.step_type()),
                Cell::new(s.display_name()),
                Cell::new(s.condition.as_deref().unwrap_or("-")),
            ]);
        }
        println!();
        println!("{table}");
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Convert
// ---------------------------------------------------------------------------

pub fn handle_convert(file: &Path, to: OutputFormat) -> Result<()> {
    let definition = load_workflow_file(file)
        .with_context(|| format!("Failed to load workflow from '{}'", file.display()))?;
    let rendered = match to {
        OutputFormat::Json => to_json(&definition)?,
        OutputFormat::Yaml => to_yaml(&definition)?,
    };
    print!("{rendered}");
    if !rendered.ends_with('\n') {
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Load and validate a definition file.
fn load_definition(file: &Path) -> Result<WorkflowDefinition> {
    let definition = load_workflow_file(file)
        .with_context(|| format!("Failed to load workflow from '{}'", file.display()))?;
    validate_definition(&definition)
        .with_context(|| format!("Workflow '{}' is invalid", file.display()))?;
    Ok(definition)
}

fn short_id(id: Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

fn compact(value: &Value) -> String {
    const MAX: usize = 80;
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > MAX {
        let cut: String = text.chars().take(MAX).collect();
        format!("{cut}...")
    } else {
        text
    }
}

fn status_style(status: ExecutionStatus) -> console::StyledObject<ExecutionStatus> {
    match status {
        ExecutionStatus::Completed => style(status).green().bold(),
        ExecutionStatus::Failed => style(status).red().bold(),
        ExecutionStatus::Canceled => style(status).yellow().bold(),
        _ => style(status),
    }
}
