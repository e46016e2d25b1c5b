//! REST API handlers for the trigger surface
//!
//! Every endpoint answers with the same [`ApiResponse`] envelope. Failures
//! map the unified error category to an HTTP status.

use axum::{
    extract::{rejection::JsonRejection, MatchedPath, Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::time::Instant;

use crate::campaign::{CampaignError, CampaignInput};
use crate::error::{Error, ErrorCategory, HeraldErrorTrait};
use crate::metrics;
use crate::pipeline::orchestrator::TaskQuery;
use crate::pipeline::{OutcomeStatus, StageState, TaskOutcome};
use crate::task::Stage;

use super::AppState;

// ============================================================================
// API Response Types
// ============================================================================

/// Uniform response envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub status: u16,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(code: impl Into<String>, message: impl Into<String>, data: T) -> Self {
        Self::with_status(StatusCode::OK, code, message, data)
    }

    pub fn with_status(
        status: StatusCode,
        code: impl Into<String>,
        message: impl Into<String>,
        data: T,
    ) -> Self {
        Self {
            success: status.is_success(),
            status: status.as_u16(),
            code: code.into(),
            message: message.into(),
            details: None,
            data: Some(data),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Error half of the envelope
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
    details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

/// HTTP status for an error category
pub fn status_for(error: &Error) -> StatusCode {
    match error.category() {
        ErrorCategory::Validation => match error {
            Error::Campaign(
                CampaignError::InvalidField { .. } | CampaignError::InvalidRecurrence(_),
            ) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::BAD_REQUEST,
        },
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::Conflict => StatusCode::CONFLICT,
        ErrorCategory::Collaborator => StatusCode::BAD_GATEWAY,
        ErrorCategory::Storage | ErrorCategory::Config | ErrorCategory::Other => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let status = status_for(&error);
        if status.is_server_error() {
            tracing::error!(code = error.code(), error = %error, "Request failed");
        }
        Self::new(status, error.code(), error.to_string()).with_details(serde_json::json!({
            "category": error.category().as_str(),
            "recoverable": error.is_recoverable(),
        }))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), "invalid_body", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            status: self.status.as_u16(),
            code: self.code,
            message: self.message,
            details: self.details,
            data: None,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub platforms: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StageControlResponse {
    pub stage: Stage,
    pub state: StageState,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub campaign_id: String,
    pub deleted_tasks: usize,
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/api/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        // Stage endpoints
        .route("/api/stages", get(list_stages))
        .route("/api/stages/{stage}", post(run_stage))
        .route("/api/stages/{stage}/pause", post(pause_stage))
        .route("/api/stages/{stage}/resume", post(resume_stage))
        // Task endpoints
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/generate", post(generate_task))
        .route("/api/tasks/{id}/publish", post(publish_task))
        // Campaign endpoints
        .route("/api/campaigns", get(list_campaigns).post(create_campaign))
        .route(
            "/api/campaigns/{id}",
            get(get_campaign).put(update_campaign).delete(delete_campaign),
        )
        .layer(middleware::from_fn(track_requests))
        .with_state(state)
}

async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    metrics::record_api_request(
        &endpoint,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

// ============================================================================
// Health Handlers
// ============================================================================

async fn health_check(State(state): State<AppState>) -> ApiResponse<HealthResponse> {
    let platforms = state
        .orchestrator
        .context()
        .fanout
        .platforms()
        .into_iter()
        .map(|p| p.to_string())
        .collect();

    ApiResponse::ok(
        "healthy",
        "Service is running",
        HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: state.start_time.elapsed().as_secs(),
            platforms,
        },
    )
}

async fn metrics_endpoint() -> Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "metrics_error", e.to_string())
            .into_response(),
    }
}

// ============================================================================
// Stage Handlers
// ============================================================================

fn parse_stage(raw: &str) -> Result<Stage, ApiError> {
    raw.parse::<Stage>().map_err(|e| ApiError::from(Error::from(e)))
}

async fn list_stages(State(state): State<AppState>) -> ApiResponse<Vec<crate::pipeline::StageStatus>> {
    ApiResponse::ok("ok", "Stage status", state.orchestrator.stage_status())
}

/// Run one stage over every eligible task
async fn run_stage(
    State(state): State<AppState>,
    Path(stage): Path<String>,
) -> ApiResult<crate::pipeline::StageReport> {
    let stage = parse_stage(&stage)?;
    let report = state.orchestrator.run_stage(stage).await?;

    let (code, message) = match &report.skip_reason {
        Some(reason) => ("skipped", format!("{stage} skipped: {reason}")),
        None => (
            "completed",
            format!(
                "{stage} finished: {} advanced, {} failed, {} conflicts",
                report.advanced, report.failed, report.conflicts
            ),
        ),
    };
    Ok(ApiResponse::ok(code, message, report))
}

async fn pause_stage(
    State(state): State<AppState>,
    Path(stage): Path<String>,
) -> ApiResult<StageControlResponse> {
    let stage = parse_stage(&stage)?;
    let state = state.orchestrator.pause_stage(stage);
    Ok(ApiResponse::ok(
        "paused",
        format!("{stage} is {state}"),
        StageControlResponse { stage, state },
    ))
}

async fn resume_stage(
    State(state): State<AppState>,
    Path(stage): Path<String>,
) -> ApiResult<StageControlResponse> {
    let stage = parse_stage(&stage)?;
    let state = state.orchestrator.resume_stage(stage);
    Ok(ApiResponse::ok(
        "resumed",
        format!("{stage} is {state}"),
        StageControlResponse { stage, state },
    ))
}

// ============================================================================
// Task Handlers
// ============================================================================

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> ApiResult<Vec<crate::task::CampaignTask>> {
    let tasks = state.orchestrator.list_tasks(&query).await?;
    Ok(ApiResponse::ok("ok", format!("{} tasks", tasks.len()), tasks))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<crate::task::CampaignTask> {
    let task = state.orchestrator.get_task(&id).await?;
    Ok(ApiResponse::ok("ok", "Task found", task))
}

/// Envelope for a single-task trigger
fn outcome_response(outcome: TaskOutcome) -> ApiResponse<TaskOutcome> {
    let (status, code) = match outcome.status {
        OutcomeStatus::Advanced => (StatusCode::OK, "advanced"),
        OutcomeStatus::Failed => (StatusCode::BAD_GATEWAY, "task_failed"),
        OutcomeStatus::Conflict => (StatusCode::CONFLICT, "conflict"),
    };
    let message = outcome
        .message
        .clone()
        .unwrap_or_else(|| format!("{} is {}", outcome.task_id, outcome.task_status));

    ApiResponse::with_status(status, code, message, outcome)
}

async fn generate_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<TaskOutcome> {
    let outcome = state.orchestrator.generate_by_id(&id).await?;
    Ok(outcome_response(outcome))
}

async fn publish_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<TaskOutcome> {
    let outcome = state.orchestrator.publish_by_id(&id).await?;
    Ok(outcome_response(outcome))
}

// ============================================================================
// Campaign Handlers
// ============================================================================

async fn list_campaigns(State(state): State<AppState>) -> ApiResult<Vec<crate::campaign::Campaign>> {
    let campaigns = state.orchestrator.list_campaigns().await?;
    Ok(ApiResponse::ok("ok", format!("{} campaigns", campaigns.len()), campaigns))
}

async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<crate::campaign::Campaign> {
    let campaign = state.orchestrator.get_campaign(&id).await?;
    Ok(ApiResponse::ok("ok", "Campaign found", campaign))
}

async fn create_campaign(
    State(state): State<AppState>,
    body: Result<Json<CampaignInput>, JsonRejection>,
) -> ApiResult<crate::campaign::Campaign> {
    let Json(input) = body?;
    let campaign = state.orchestrator.create_campaign(input).await?;
    Ok(ApiResponse::with_status(
        StatusCode::CREATED,
        "created",
        format!("Campaign '{}' created", campaign.id),
        campaign,
    ))
}

async fn update_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<CampaignInput>, JsonRejection>,
) -> ApiResult<crate::campaign::Campaign> {
    let Json(input) = body?;
    let campaign = state.orchestrator.update_campaign(&id, input).await?;
    Ok(ApiResponse::ok(
        "updated",
        format!("Campaign '{}' updated", campaign.id),
        campaign,
    ))
}

async fn delete_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DeleteResponse> {
    let deleted_tasks = state.orchestrator.delete_campaign(&id).await?;
    Ok(ApiResponse::ok(
        "deleted",
        format!("Campaign '{id}' deleted with {deleted_tasks} tasks"),
        DeleteResponse {
            campaign_id: id,
            deleted_tasks,
        },
    ))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;
    use crate::task::TaskError;

    #[test]
    fn test_status_mapping() {
        let err: Error = CampaignError::invalid_field("lead_days", "too large").into();
        assert_eq!(status_for(&err), StatusCode::UNPROCESSABLE_ENTITY);

        let err: Error = TaskError::UnknownStage("deploy".into()).into();
        assert_eq!(status_for(&err), StatusCode::BAD_REQUEST);

        let err: Error = CampaignError::NotFound("launch".into()).into();
        assert_eq!(status_for(&err), StatusCode::NOT_FOUND);

        let err: Error = StorageError::already_exists("campaigns", "launch").into();
        assert_eq!(status_for(&err), StatusCode::CONFLICT);

        let err: Error = crate::llm::LlmError::EmptyResponse.into();
        assert_eq!(status_for(&err), StatusCode::BAD_GATEWAY);

        assert_eq!(status_for(&Error::other("boom")), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_envelope_shape() {
        let body = serde_json::to_value(ApiResponse::ok("ok", "fine", 42)).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["status"], 200);
        assert_eq!(body["code"], "ok");
        assert_eq!(body["data"], 42);
        assert!(body.get("details").is_none());
    }

    #[test]
    fn test_api_error_from_error() {
        let err = ApiError::from(Error::TaskNotFound("launch:d-0".into()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.code, "task_not_found");
        assert_eq!(err.details.as_ref().unwrap()["category"], "not_found");
    }
}
