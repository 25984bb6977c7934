//! Operational endpoints and the shared API error type.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use campaign_core::CampaignError;
use campaign_segmentation::SegmentationEngine;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};
use utoipa::ToSchema;

/// Shared state for the operational endpoints.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SegmentationEngine>,
    pub node_id: String,
    pub start_time: Instant,
}

/// GET /health — Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Operations",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        materialization_backend: state.engine.materialization_backend().to_string(),
    })
}

/// GET /ready — Readiness probe for Kubernetes.
/// Returns 200 only when the materialization store answers.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Operations",
    responses(
        (status = 200, description = "Ready to accept traffic"),
        (status = 503, description = "Materialization store unreachable"),
    )
)]
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.engine.check_store().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// GET /live — Liveness probe for Kubernetes.
#[utoipa::path(
    get,
    path = "/live",
    tag = "Operations",
    responses((status = 200, description = "Process is alive"))
)]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    /// Offending field, for validation errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub materialization_backend: String,
}

/// Handler error: a [`CampaignError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub CampaignError);

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            CampaignError::Validation { .. } => StatusCode::BAD_REQUEST,
            CampaignError::NotFound(_) => StatusCode::NOT_FOUND,
            CampaignError::BuildInProgress(_) | CampaignError::StaleBuild { .. } => StatusCode::CONFLICT,
            CampaignError::SourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CampaignError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            CampaignError::Config(_)
            | CampaignError::Cache(_)
            | CampaignError::Serialization(_)
            | CampaignError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorResponse {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal processing error".to_string()
        } else {
            self.0.to_string()
        };
        let field = match &self.0 {
            CampaignError::Validation { field, .. } => Some(field.clone()),
            _ => None,
        };
        ErrorResponse {
            error: self.0.code().to_string(),
            message,
            field,
        }
    }
}

impl From<CampaignError> for ApiError {
    fn from(err: CampaignError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self.0, code = self.0.code(), "Request failed");
        }
        metrics::counter!("api.errors", "code" => self.0.code()).increment(1);
        (status, Json(self.body())).into_response()
    }
}
