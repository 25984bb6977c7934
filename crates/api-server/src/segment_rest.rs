//! Segment REST API endpoints.

use crate::rest::{ApiError, ErrorResponse};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use campaign_core::types::SegmentId;
use campaign_core::CampaignError;
use campaign_segmentation::{
    EvaluationMode, EvaluationResult, MemberResolution, Segment, SegmentDefinition,
    SegmentationEngine,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use utoipa::{IntoParams, ToSchema};

/// Shared state for segment endpoints.
#[derive(Clone)]
pub struct SegmentState {
    pub engine: Arc<SegmentationEngine>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSegmentRequest {
    pub name: String,
    /// Omitted or `{}` matches every contact.
    #[schema(value_type = Option<Object>)]
    pub definition: Option<Value>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSegmentRequest {
    pub name: Option<String>,
    /// Replaces the stored definition wholesale when present.
    #[schema(value_type = Option<Object>)]
    pub definition: Option<Value>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    #[serde(default)]
    pub dry_run: bool,
    /// Overrides the configured evaluation timeout.
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct MembersQuery {
    pub timeout_ms: Option<u64>,
}

fn parse_definition(value: Option<&Value>) -> Result<Option<SegmentDefinition>, ApiError> {
    value
        .map(SegmentDefinition::from_json)
        .transpose()
        .map_err(ApiError::from)
}

fn timeout_from(timeout_ms: Option<u64>) -> Result<Option<Duration>, ApiError> {
    match timeout_ms {
        Some(0) => Err(CampaignError::validation("timeoutMs", "timeout must be greater than zero").into()),
        Some(ms) => Ok(Some(Duration::from_millis(ms))),
        None => Ok(None),
    }
}

/// GET /v1/segments — List all segments.
#[utoipa::path(
    get,
    path = "/v1/segments",
    tag = "Segments",
    responses((status = 200, description = "All segments, ascending by id", body = Vec<Segment>))
)]
pub async fn list_segments(State(state): State<SegmentState>) -> Result<Json<Vec<Segment>>, ApiError> {
    Ok(Json(state.engine.list_segments().await?))
}

/// POST /v1/segments — Create a segment.
#[utoipa::path(
    post,
    path = "/v1/segments",
    tag = "Segments",
    request_body = CreateSegmentRequest,
    responses(
        (status = 201, description = "Segment created", body = Segment),
        (status = 400, description = "Invalid name or definition", body = ErrorResponse),
    )
)]
pub async fn create_segment(
    State(state): State<SegmentState>,
    Json(request): Json<CreateSegmentRequest>,
) -> Result<(StatusCode, Json<Segment>), ApiError> {
    let definition = parse_definition(request.definition.as_ref())?.unwrap_or_default();
    let segment = state.engine.create_segment(&request.name, definition).await?;
    Ok((StatusCode::CREATED, Json(segment)))
}

/// GET /v1/segments/:id — Segment with its materialized count.
#[utoipa::path(
    get,
    path = "/v1/segments/{id}",
    tag = "Segments",
    params(("id" = u64, Path, description = "Segment id")),
    responses(
        (status = 200, description = "Segment found", body = Segment),
        (status = 404, description = "Unknown segment", body = ErrorResponse),
    )
)]
pub async fn get_segment(
    State(state): State<SegmentState>,
    Path(id): Path<SegmentId>,
) -> Result<Json<Segment>, ApiError> {
    Ok(Json(state.engine.get_segment(id).await?))
}

/// PATCH /v1/segments/:id — Rename and/or replace the definition. Never builds.
#[utoipa::path(
    patch,
    path = "/v1/segments/{id}",
    tag = "Segments",
    params(("id" = u64, Path, description = "Segment id")),
    request_body = UpdateSegmentRequest,
    responses(
        (status = 200, description = "Segment updated", body = Segment),
        (status = 400, description = "Invalid name or definition", body = ErrorResponse),
        (status = 404, description = "Unknown segment", body = ErrorResponse),
    )
)]
pub async fn update_segment(
    State(state): State<SegmentState>,
    Path(id): Path<SegmentId>,
    Json(request): Json<UpdateSegmentRequest>,
) -> Result<Json<Segment>, ApiError> {
    let definition = parse_definition(request.definition.as_ref())?;
    let segment = state
        .engine
        .update_segment(id, request.name.as_deref(), definition)
        .await?;
    Ok(Json(segment))
}

/// DELETE /v1/segments/:id — Delete a segment and its materialization.
#[utoipa::path(
    delete,
    path = "/v1/segments/{id}",
    tag = "Segments",
    params(("id" = u64, Path, description = "Segment id")),
    responses(
        (status = 204, description = "Segment deleted"),
        (status = 404, description = "Unknown segment", body = ErrorResponse),
    )
)]
pub async fn delete_segment(
    State(state): State<SegmentState>,
    Path(id): Path<SegmentId>,
) -> Result<StatusCode, ApiError> {
    state.engine.delete_segment(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/segments/:id/build — Dry run or build a segment.
#[utoipa::path(
    post,
    path = "/v1/segments/{id}/build",
    tag = "Segments",
    params(("id" = u64, Path, description = "Segment id")),
    request_body = BuildRequest,
    responses(
        (status = 200, description = "Evaluation complete", body = EvaluationResult),
        (status = 404, description = "Unknown segment", body = ErrorResponse),
        (status = 409, description = "Build already in progress", body = ErrorResponse),
        (status = 503, description = "Contact or membership store unavailable", body = ErrorResponse),
        (status = 504, description = "Evaluation timed out", body = ErrorResponse),
    )
)]
pub async fn build_segment(
    State(state): State<SegmentState>,
    Path(id): Path<SegmentId>,
    Json(request): Json<BuildRequest>,
) -> Result<Json<EvaluationResult>, ApiError> {
    let mode = if request.dry_run {
        EvaluationMode::DryRun
    } else {
        EvaluationMode::Build
    };
    let timeout = timeout_from(request.timeout_ms)?;
    Ok(Json(state.engine.evaluate(id, mode, timeout).await?))
}

/// GET /v1/segments/:id/members — Resolve every member at send time.
#[utoipa::path(
    get,
    path = "/v1/segments/{id}/members",
    tag = "Segments",
    params(("id" = u64, Path, description = "Segment id"), MembersQuery),
    responses(
        (status = 200, description = "Current member ids", body = MemberResolution),
        (status = 404, description = "Unknown segment", body = ErrorResponse),
        (status = 504, description = "Evaluation timed out", body = ErrorResponse),
    )
)]
pub async fn segment_members(
    State(state): State<SegmentState>,
    Path(id): Path<SegmentId>,
    Query(query): Query<MembersQuery>,
) -> Result<Json<MemberResolution>, ApiError> {
    let timeout = timeout_from(query.timeout_ms)?;
    Ok(Json(state.engine.resolve_members(id, timeout).await?))
}
