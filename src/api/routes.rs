//! API route definitions.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::state::AppState;
use super::ApiError;
use crate::flows::{ExecutionFilter, ExecutionStatus};
use crate::scheduler::{CancelOutcome, DelayUnit, ScheduleFilter};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/schedules", post(create_schedule).get(list_schedules))
        .route("/schedules/{id}", get(get_schedule).delete(cancel_schedule))
        .route("/flows", post(register_flow))
        .route("/flows/{id}", get(get_flow))
        .route("/executions", get(list_executions))
        .route("/executions/{id}", get(get_execution))
        .route("/executions/{id}/status", put(set_execution_status))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database = match state.pool.get() {
        Ok(conn) => conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok(),
        Err(_) => false,
    };
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "data": {
                "status": if database { "ok" } else { "degraded" },
                "database": database,
                "timers_armed": state.scheduler.timers().len(),
                "version": env!("CARGO_PKG_VERSION")
            },
            "meta": meta()
        })),
    )
}

#[derive(Debug, Deserialize)]
struct CreateSchedule {
    flow_id: Uuid,
    patient_id: Uuid,
    delay_amount: i64,
    delay_unit: String,
}

async fn create_schedule(
    State(state): State<AppState>,
    Json(req): Json<CreateSchedule>,
) -> Result<impl IntoResponse, ApiError> {
    let unit: DelayUnit = req.delay_unit.parse()?;
    let schedule = state
        .scheduler
        .schedule(req.flow_id, req.patient_id, req.delay_amount, unit)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": schedule, "meta": meta() })),
    ))
}

async fn list_schedules(
    State(state): State<AppState>,
    Query(filter): Query<ScheduleFilter>,
) -> Result<Json<Value>, ApiError> {
    let schedules = state.scheduler.list_schedules(&filter).await?;
    Ok(Json(json!({
        "data": schedules,
        "meta": { "total": schedules.len() }
    })))
}

async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let schedule = state.scheduler.get_schedule(id).await?;
    Ok(Json(json!({ "data": schedule, "meta": meta() })))
}

async fn cancel_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.scheduler.cancel(id).await?;
    let (status, error) = match outcome {
        CancelOutcome::Cancelled => (StatusCode::OK, None),
        CancelOutcome::AlreadyExecuted => (StatusCode::CONFLICT, Some("schedule already executed")),
        CancelOutcome::AlreadyCancelled => (StatusCode::CONFLICT, Some("schedule already cancelled")),
    };
    Ok((
        status,
        Json(json!({
            "success": error.is_none(),
            "status": outcome.status(),
            "error": error,
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct RegisterFlow {
    id: Option<Uuid>,
    name: String,
    flow_data: Value,
}

async fn register_flow(
    State(state): State<AppState>,
    Json(req): Json<RegisterFlow>,
) -> Result<impl IntoResponse, ApiError> {
    let id = req.id.unwrap_or_else(Uuid::new_v4);
    let flow = state
        .scheduler
        .register_flow_document(id, &req.name, req.flow_data)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "data": flow,
            "meta": { "entry_node": flow.entry_node().map(|n| n.id.clone()) }
        })),
    ))
}

async fn get_flow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let flow = state.scheduler.get_flow(id).await?;
    Ok(Json(json!({ "data": flow, "meta": meta() })))
}

async fn list_executions(
    State(state): State<AppState>,
    Query(filter): Query<ExecutionFilter>,
) -> Result<Json<Value>, ApiError> {
    let executions = state.scheduler.list_executions(&filter).await?;
    Ok(Json(json!({
        "data": executions,
        "meta": { "total": executions.len() }
    })))
}

async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let execution = state.scheduler.get_execution(id).await?;
    Ok(Json(json!({ "data": execution, "meta": meta() })))
}

#[derive(Debug, Deserialize)]
struct SetStatus {
    status: ExecutionStatus,
}

async fn set_execution_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetStatus>,
) -> Result<Json<Value>, ApiError> {
    let execution = state.scheduler.set_execution_status(id, req.status).await?;
    Ok(Json(json!({ "data": execution, "meta": meta() })))
}
