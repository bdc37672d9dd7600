//! The illustrative sync endpoints (spec §6.1).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::kernel::errors::CoreError;
use crate::kernel::orchestrator::{Dispatch, SyncOptions};
use crate::kernel::phase::{Phase, PHASE_TABLE};
use crate::server::app::AppState;

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sync/:job", post(run_single_job))
        .route("/sync/run", post(run_sequence))
        .route("/sync/run-phase", post(run_phase))
        .route("/sync/queue/:id", delete(cancel_queue_item))
        .route("/sync/running", delete(cancel_running))
        .route("/sync/status", get(status))
        .route("/sync/phases", get(phases))
        .route("/sync/years", get(years))
}

#[derive(Debug, Deserialize, Default)]
pub struct RunSingleQuery {
    pub year: Option<i32>,
}

async fn run_single_job(
    State(state): State<AppState>,
    Path(job): Path<String>,
    Query(query): Query<RunSingleQuery>,
) -> Result<Response, CoreError> {
    if let Some(year) = query.year {
        validate_year(year)?;
    }
    match state.orchestrator.dispatch_single(job, query.year)? {
        Dispatch::Started => Ok((StatusCode::OK, Json(json!({"status": "started"}))).into_response()),
        Dispatch::Queued(id) => Ok((StatusCode::ACCEPTED, Json(json!({"status": "queued", "id": id}))).into_response()),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RunSequenceQuery {
    pub year: Option<i32>,
    pub service: Option<String>,
    pub include_custom_values: Option<bool>,
}

async fn run_sequence(
    State(state): State<AppState>,
    Query(query): Query<RunSequenceQuery>,
) -> Result<Response, CoreError> {
    if let Some(year) = query.year {
        validate_year(year)?;
    }

    let opts = SyncOptions {
        year: query.year,
        services: query.service.map(|s| s.split(',').map(str::to_string).collect()),
        include_custom_values: query.include_custom_values.unwrap_or(false),
    };

    match state.orchestrator.dispatch_sequence(opts)? {
        Dispatch::Started => Ok((StatusCode::OK, Json(json!({"status": "started"}))).into_response()),
        Dispatch::Queued(id) => Ok((StatusCode::ACCEPTED, Json(json!({"status": "queued", "id": id}))).into_response()),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RunPhaseQuery {
    pub year: Option<i32>,
    pub phase: String,
}

async fn run_phase(
    State(state): State<AppState>,
    Query(query): Query<RunPhaseQuery>,
) -> Result<Response, CoreError> {
    if let Some(year) = query.year {
        validate_year(year)?;
    }
    let phase = Phase::parse(&query.phase)
        .ok_or_else(|| CoreError::InvalidRequest(format!("unknown phase: {}", query.phase)))?;

    match state.orchestrator.dispatch_phase(phase, query.year)? {
        Dispatch::Started => Ok((StatusCode::OK, Json(json!({"status": "started"}))).into_response()),
        Dispatch::Queued(id) => Ok((StatusCode::ACCEPTED, Json(json!({"status": "queued", "id": id}))).into_response()),
    }
}

async fn cancel_queue_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, CoreError> {
    let id = uuid::Uuid::parse_str(&id).map_err(|_| CoreError::InvalidRequest("malformed queue id".into()))?;
    if state.orchestrator.queue_cancel(id) {
        Ok((StatusCode::OK, Json(json!({"status": "cancelled"}))).into_response())
    } else {
        Err(CoreError::NotFound(format!("queue item {id}")))
    }
}

async fn cancel_running(State(state): State<AppState>) -> Result<Response, CoreError> {
    if state.orchestrator.cancel_running_sync() {
        Ok((StatusCode::OK, Json(json!({"status": "cancelling"}))).into_response())
    } else {
        Err(CoreError::NotFound("no sequence running".into()))
    }
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let jobs: Vec<_> = PHASE_TABLE
        .iter()
        .map(|(name, phase)| {
            json!({
                "name": name,
                "phase": phase.as_str(),
                "running": state.orchestrator.is_running(name),
                "history": state.orchestrator.run_history_for(name).iter().map(|summary| json!({
                    "started_at": summary.started_at,
                    "finished_at": summary.finished_at,
                    "outcome": format!("{:?}", summary.outcome),
                    "stats": summary.stats,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();

    Json(json!({
        "jobs": jobs,
        "daily_running": state.orchestrator.is_daily_sync_running(),
        "weekly_running": state.orchestrator.is_weekly_sync_running(),
        "historical_running": state.orchestrator.is_historical_sync_running(),
        "historical_year": state.orchestrator.historical_year(),
        "custom_values_running": state.orchestrator.is_custom_values_sync_running(),
        "queue": state.orchestrator.queue_snapshot().iter().map(|item| json!({
            "id": item.id,
            "year": item.key.year,
            "service": item.key.service,
        })).collect::<Vec<_>>(),
    }))
}

async fn phases() -> Json<serde_json::Value> {
    Json(json!(Phase::ALL.iter().map(|p| p.as_str()).collect::<Vec<_>>()))
}

async fn years(State(state): State<AppState>) -> Result<Json<serde_json::Value>, CoreError> {
    let years = state.orchestrator.distinct_years().await?;
    Ok(Json(json!(years)))
}

/// Year parameter bounds per spec §6.1: 2017-2050 inclusive.
fn validate_year(year: i32) -> Result<(), CoreError> {
    if !(2017..=2050).contains(&year) {
        return Err(CoreError::InvalidRequest(format!("year out of range: {year}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_year_accepts_boundaries() {
        assert!(validate_year(2017).is_ok());
        assert!(validate_year(2050).is_ok());
    }

    #[test]
    fn validate_year_rejects_outside_boundaries() {
        assert!(validate_year(2016).is_err());
        assert!(validate_year(2051).is_err());
    }
}
