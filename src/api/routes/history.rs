//! History handlers.

use super::HistoryQuery;
use crate::api::AppState;
use crate::db::HistoryFilter;
use crate::error::{ApiError, Error};
use axum::{
    Json,
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use serde_json::json;

/// GET /history - Item history with pagination and filters
pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, Error> {
    if let (Some(since), Some(until)) = (query.since, query.until)
        && since >= until
    {
        return Ok(ApiError::validation("'since' must be before 'until'").into_response());
    }

    let limit = query.limit.unwrap_or(50).clamp(1, 1000) as usize;
    let offset = query.offset.unwrap_or(0).max(0) as usize;
    let filter = HistoryFilter {
        source_id: query.source,
        since: query.since,
        until: query.until,
        success: query.success,
    };

    let items = state.archiver.history(&filter, limit, offset).await?;
    let total = state.archiver.history_count(&filter).await?;

    Ok(Json(json!({
        "items": items,
        "total": total,
        "limit": limit,
        "offset": offset
    }))
    .into_response())
}
