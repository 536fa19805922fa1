use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

use super::types::*;
use super::AppState;
use crate::store::{EventStore, DEFAULT_LIMIT, MAX_LIMIT};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn api_error(status: StatusCode, msg: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse { error: msg.into() }),
    )
}

pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    let total_events = state
        .store
        .count()
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        total_events,
    }))
}

pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventParams>,
) -> ApiResult<EventsResponse> {
    let limit = resolve_limit(params.limit)
        .map_err(|msg| api_error(StatusCode::BAD_REQUEST, msg))?;
    let last_id = resolve_last_id(params.last_id)
        .map_err(|msg| api_error(StatusCode::BAD_REQUEST, msg))?;
    let currency = params.currency.as_deref().unwrap_or("");

    let events = state
        .store
        .get_all(last_id, limit, currency)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let last_id = events.last().map(|e| e.id).unwrap_or(last_id);

    Ok(Json(EventsResponse { events, last_id }))
}

/// Default 10, hard cap 100; zero or negative is the caller's error.
fn resolve_limit(requested: Option<i64>) -> Result<i64, String> {
    match requested {
        None => Ok(DEFAULT_LIMIT),
        Some(limit) if limit <= 0 => Err("Invalid limit parameter".to_string()),
        Some(limit) => Ok(limit.min(MAX_LIMIT)),
    }
}

fn resolve_last_id(requested: Option<i64>) -> Result<i64, String> {
    match requested {
        None => Ok(0),
        Some(id) if id < 0 => Err("Invalid last_id parameter".to_string()),
        Some(id) => Ok(id),
    }
}
