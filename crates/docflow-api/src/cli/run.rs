//! Run submission and inspection commands.

use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use docflow_types::error::ErrorKind;
use docflow_types::workflow::{
    AttemptOutcome, Entity, RunStatusReport, TaskReport, TaskStatus, WorkflowRunStatus,
};

use crate::state::AppState;

/// Store a PDF and submit a run for it, optionally driving it to the end.
pub async fn submit(state: &AppState, file: &Path, wait: bool, json: bool) -> Result<()> {
    let pdf = tokio::fs::read(file)
        .await
        .with_context(|| format!("read {}", file.display()))?;
    if pdf.is_empty() {
        bail!("{} is empty", file.display());
    }

    let (input_ref, run_id) = state.submit_document(pdf).await?;

    if !wait {
        if json {
            let out = serde_json::json!({
                "run_id": run_id,
                "input_ref": input_ref,
                "status": WorkflowRunStatus::Running,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        } else {
            println!();
            println!(
                "  {} Submitted {} as run {}",
                style("✓").green().bold(),
                style(file.display()).cyan(),
                style(run_id).bold()
            );
            println!(
                "  {}",
                style("A `docflow serve` or `docflow worker` process will drive it.").dim()
            );
            println!();
        }
        return Ok(());
    }

    if !json {
        println!(
            "  {} Waiting for run {}...",
            style("⏳").bold(),
            style(run_id).bold()
        );
    }
    state.engine.drive(run_id).await?;
    status(state, run_id, json).await
}

/// Show the status of one run.
pub async fn status(state: &AppState, run_id: Uuid, json: bool) -> Result<()> {
    let report = state.engine.get_status(run_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_report(&report);
    Ok(())
}

fn print_report(report: &RunStatusReport) {
    println!();
    println!(
        "  {} Run {}",
        style("📄").bold(),
        style(report.run_id).cyan()
    );
    println!();
    println!("  Status:    {}", styled_run_status(report.status));
    println!(
        "  Created:   {}",
        style(report.created_at.format("%Y-%m-%d %H:%M:%S UTC")).dim()
    );
    if let Some(completed_at) = report.completed_at {
        println!(
            "  Finished:  {}",
            style(completed_at.format("%Y-%m-%d %H:%M:%S UTC")).dim()
        );
    }

    if let Some(step) = &report.failed_step {
        println!();
        println!("  {}", style("── Failure ──").dim());
        println!("  Step:      {}", style(step).yellow());
        if let Some(kind) = report.error_kind {
            println!("  Kind:      {}", style(kind).red());
        }
        if let Some(error) = &report.error {
            println!("  Error:     {error}");
        }
    }

    if let Some(result) = &report.result {
        println!();
        println!("  {}", style("── Result ──").dim());
        println!("  Images:    {}", style(result.total_images).bold());
        println!("  Entities:  {}", format_entities(&result.ner_text));
        for (index, (ocr_ref, entities)) in result
            .ocr_results
            .iter()
            .zip(&result.ner_ocr_results)
            .enumerate()
        {
            println!(
                "  Image {index}:   {} {}",
                format_entities(entities),
                style(ocr_ref).dim()
            );
        }
    }
    println!();
}

/// List the tasks of a run with their attempt history.
pub async fn tasks(state: &AppState, run_id: Uuid, json: bool) -> Result<()> {
    let reports = state.engine.list_tasks(run_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    if reports.is_empty() {
        println!();
        println!("  No tasks scheduled for run {run_id}.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Step").fg(Color::White),
        Cell::new("Activity").fg(Color::White),
        Cell::new("Queue").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Attempts").fg(Color::White),
        Cell::new("Last error").fg(Color::White),
    ]);

    for report in &reports {
        let task = &report.task;
        table.add_row(vec![
            Cell::new(&task.step_id).fg(Color::Cyan),
            Cell::new(task.activity_type),
            Cell::new(&task.queue).fg(Color::DarkGrey),
            task_status_cell(task.status),
            Cell::new(task.attempt_count),
            Cell::new(last_error(report)).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

/// Re-evaluate every running run once.
pub async fn recover(state: &AppState, json: bool) -> Result<()> {
    let running = state.engine.resume_active().await?;

    if json {
        let out = serde_json::json!({ "running": running });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    if running.is_empty() {
        println!("  {} No runs left running.", style("✓").green().bold());
    } else {
        println!(
            "  {} {} run(s) still running:",
            style("↻").cyan().bold(),
            running.len()
        );
        for run_id in &running {
            println!("    {run_id}");
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

fn styled_run_status(status: WorkflowRunStatus) -> String {
    match status {
        WorkflowRunStatus::Running => style("● running").yellow().to_string(),
        WorkflowRunStatus::Completed => style("✓ completed").green().to_string(),
        WorkflowRunStatus::Failed => style("✗ failed").red().to_string(),
        WorkflowRunStatus::TimedOut => style("⏱ timed_out").red().to_string(),
    }
}

fn task_status_cell(status: TaskStatus) -> Cell {
    match status {
        TaskStatus::Scheduled => Cell::new("○ scheduled").fg(Color::DarkGrey),
        TaskStatus::Leased => Cell::new("● leased").fg(Color::Yellow),
        TaskStatus::Succeeded => Cell::new("✓ succeeded").fg(Color::Green),
        TaskStatus::Failed => Cell::new("✗ failed").fg(Color::Red),
    }
}

/// Message of the most recent failed attempt, if any.
fn last_error(report: &TaskReport) -> String {
    report
        .attempts
        .iter()
        .rev()
        .find_map(|attempt| match &attempt.outcome {
            AttemptOutcome::Failed { kind, message } => Some(format_failure(*kind, message)),
            AttemptOutcome::Succeeded => None,
        })
        .unwrap_or_default()
}

fn format_failure(kind: ErrorKind, message: &str) -> String {
    const MAX: usize = 60;
    let mut text = format!("{kind}: {message}");
    if text.chars().count() > MAX {
        text = text.chars().take(MAX - 1).collect::<String>() + "…";
    }
    text
}

fn format_entities(entities: &[Entity]) -> String {
    if entities.is_empty() {
        return style("(none)").dim().to_string();
    }
    entities
        .iter()
        .map(|e| format!("{} [{}]", e.span_text, e.entity_label))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docflow_types::workflow::{ActivityInput, ActivityTask, AttemptRecord, BlobRef, StepId, TaskSpec};

    fn report_with(outcomes: Vec<AttemptOutcome>) -> TaskReport {
        let now = Utc::now();
        let spec = TaskSpec {
            run_id: Uuid::now_v7(),
            step_id: StepId::extract(),
            input: ActivityInput::Extract {
                blob_ref: BlobRef::new("inputs/a.pdf"),
            },
        };
        let attempts = outcomes
            .into_iter()
            .enumerate()
            .map(|(i, outcome)| AttemptRecord {
                attempt: i as u32 + 1,
                worker_id: "w".to_string(),
                outcome,
                started_at: now,
                finished_at: now,
            })
            .collect();
        TaskReport {
            task: ActivityTask::scheduled(spec, "pdf-extraction", now),
            attempts,
        }
    }

    #[test]
    fn last_error_picks_most_recent_failure() {
        let report = report_with(vec![
            AttemptOutcome::Failed {
                kind: ErrorKind::Timeout,
                message: "first".to_string(),
            },
            AttemptOutcome::Failed {
                kind: ErrorKind::UpstreamService,
                message: "second".to_string(),
            },
            AttemptOutcome::Succeeded,
        ]);
        assert!(last_error(&report).ends_with("second"));
        assert_eq!(last_error(&report_with(vec![])), "");
    }

    #[test]
    fn long_failures_are_truncated() {
        let text = format_failure(ErrorKind::Parse, &"x".repeat(200));
        assert_eq!(text.chars().count(), 60);
        assert!(text.ends_with('…'));
    }

    #[test]
    fn entities_are_listed_with_labels() {
        let entities = vec![Entity {
            span_text: "ACME".to_string(),
            entity_label: "first_word".to_string(),
        }];
        assert_eq!(format_entities(&entities), "ACME [first_word]");
    }

    #[tokio::test]
    async fn submit_rejects_missing_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let state = AppState::init(tmp.path().join("data")).await.unwrap();
        let err = submit(&state, &tmp.path().join("missing.pdf"), false, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing.pdf"));
    }
}
