//! Run control handlers.

use super::{RunsQuery, StartRunRequest, StartRunResponse};
use crate::api::AppState;
use crate::error::{ApiError, Error};
use crate::registry::CancelOutcome;
use crate::types::{RunTrigger, SingleDownload};
use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// GET /status - Live (or last finished) run
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.archiver.status())
}

/// POST /runs - Start a manual run
///
/// The body is optional; `{"sources": ["PL1", "PL2"]}` restricts and orders
/// the sources, `{"single_url": "..."}` downloads one URL into the
/// single-download directory instead. Returns 202 with the run ID, or 409
/// with the active run's ID.
pub async fn start_run(State(state): State<AppState>, body: Bytes) -> Response {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        StartRunRequest::default()
    } else {
        match serde_json::from_slice::<StartRunRequest>(&body) {
            Ok(request) => request,
            Err(e) => return ApiError::validation(format!("invalid request body: {e}")).into_response(),
        }
    };

    let started = match request.single_url {
        Some(_) if request.sources.is_some() => {
            return ApiError::validation("single_url cannot be combined with sources")
                .into_response();
        }
        Some(url) => state.archiver.start_single(&SingleDownload {
            url,
            destination: request.destination,
            final_format: request.final_format_override,
            music_mode: request.music_mode,
        }),
        None if request.destination.is_some() || request.final_format_override.is_some() => {
            return ApiError::validation(
                "destination and final_format_override require single_url",
            )
            .into_response();
        }
        None => state
            .archiver
            .start_run(RunTrigger::Manual, request.sources.as_deref()),
    };

    match started {
        Ok(run_id) => {
            tracing::info!(run_id = %run_id, "Manual run started via API");
            (StatusCode::ACCEPTED, Json(StartRunResponse { run_id })).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// POST /runs/cancel - Request cancellation of the active run
///
/// 202 when a run was signalled, 200 with `cancelled: false` when idle.
pub async fn cancel_run(State(state): State<AppState>) -> impl IntoResponse {
    match state.archiver.cancel() {
        CancelOutcome::Accepted(run_id) => (
            StatusCode::ACCEPTED,
            Json(json!({ "cancelled": true, "run_id": run_id })),
        ),
        CancelOutcome::NoOp => (StatusCode::OK, Json(json!({ "cancelled": false }))),
    }
}

/// GET /runs - Recent runs, most recent first
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> Result<impl IntoResponse, Error> {
    let limit = query.limit.unwrap_or(20).clamp(1, 500) as usize;
    let runs = state.archiver.runs(limit).await?;
    Ok(Json(runs))
}
