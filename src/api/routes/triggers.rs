//! Watcher and interval schedule handlers.

use crate::api::AppState;
use crate::config::{ScheduleConfig, ScheduleUpdate};
use crate::error::Error;
use crate::Archiver;
use axum::{Json, extract::State, response::IntoResponse};
use serde_json::{Value, json};

/// GET /watcher - Watcher status plus per-source watch state
pub async fn get_watcher(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.archiver.watcher_status();
    let sources = state.archiver.watch_states().await;
    Json(json!({
        "status": status,
        "sources": sources
    }))
}

/// GET /schedule - Interval schedule with last and next run
pub async fn get_schedule(State(state): State<AppState>) -> Result<impl IntoResponse, Error> {
    let schedule = state.archiver.get_config().schedule;
    Ok(Json(schedule_body(&state.archiver, &schedule).await?))
}

/// PUT /schedule - Change the interval schedule
///
/// Fields left out of the body keep their current value. The change applies
/// immediately and is written back to the config file when one is watched.
pub async fn update_schedule(
    State(state): State<AppState>,
    Json(update): Json<ScheduleUpdate>,
) -> Result<impl IntoResponse, Error> {
    let schedule = state.archiver.update_schedule(&update).await?;
    Ok(Json(schedule_body(&state.archiver, &schedule).await?))
}

async fn schedule_body(archiver: &Archiver, schedule: &ScheduleConfig) -> Result<Value, Error> {
    let times = archiver.schedule_times().await?;
    Ok(json!({
        "enabled": schedule.enabled,
        "interval_hours": schedule.interval_hours,
        "run_on_startup": schedule.run_on_startup,
        "last_run": times.last_run,
        "next_run": times.next_run
    }))
}
