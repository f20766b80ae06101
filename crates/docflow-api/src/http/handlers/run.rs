//! Workflow run handlers for the REST API.
//!
//! Endpoints for submitting documents, and inspecting run status with
//! task-level attempt history. Every accepted submission is driven to a
//! terminal state by this process.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use docflow_types::workflow::{BlobRef, RunStatusReport, TaskReport, WorkflowRunStatus};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/runs`.
#[derive(Debug, Deserialize)]
pub struct SubmitRunRequest {
    /// Object store key of a PDF that is already stored.
    pub blob_ref: String,
}

/// Returned for every accepted submission.
#[derive(Debug, Serialize)]
pub struct SubmittedRun {
    pub run_id: Uuid,
    pub input_ref: BlobRef,
    pub status: WorkflowRunStatus,
}

fn run_link(run_id: Uuid) -> String {
    format!("/api/v1/runs/{run_id}")
}

fn accepted(
    state: &AppState,
    run_id: Uuid,
    input_ref: BlobRef,
    start: Instant,
) -> Json<ApiResponse<SubmittedRun>> {
    state.drivers.ensure(run_id);

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(
        SubmittedRun {
            run_id,
            input_ref,
            status: WorkflowRunStatus::Running,
        },
        Uuid::now_v7().to_string(),
        elapsed,
    )
    .with_link("self", &run_link(run_id))
    .with_link("tasks", &format!("{}/tasks", run_link(run_id)));
    Json(resp)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/runs - Start a run for a stored document.
pub async fn submit_run(
    State(state): State<AppState>,
    Json(body): Json<SubmitRunRequest>,
) -> Result<Json<ApiResponse<SubmittedRun>>, AppError> {
    let start = Instant::now();

    let blob_ref = body.blob_ref.trim();
    if blob_ref.is_empty() {
        return Err(AppError::Validation("blob_ref must not be empty".to_string()));
    }

    let input_ref = BlobRef::new(blob_ref);
    let run_id = state.engine.submit(input_ref.clone()).await?;
    Ok(accepted(&state, run_id, input_ref, start))
}

/// POST /api/v1/documents - Store a raw PDF body and start a run for it.
pub async fn upload_document(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ApiResponse<SubmittedRun>>, AppError> {
    let start = Instant::now();

    if body.is_empty() {
        return Err(AppError::Validation("document body is empty".to_string()));
    }

    let (input_ref, run_id) = state.submit_document(body.to_vec()).await?;
    Ok(accepted(&state, run_id, input_ref, start))
}

/// GET /api/v1/runs/{run_id} - Status, result or failure of a run.
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ApiResponse<RunStatusReport>>, AppError> {
    let start = Instant::now();

    let report = state.engine.get_status(run_id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(report, Uuid::now_v7().to_string(), elapsed)
        .with_link("self", &run_link(run_id));
    Ok(Json(resp))
}

/// GET /api/v1/runs/{run_id}/tasks - Every task of a run with its attempts.
pub async fn list_run_tasks(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<TaskReport>>>, AppError> {
    let start = Instant::now();

    let tasks = state.engine.list_tasks(run_id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(tasks, Uuid::now_v7().to_string(), elapsed)
        .with_link("run", &run_link(run_id));
    Ok(Json(resp))
}
