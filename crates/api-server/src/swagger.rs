//! OpenAPI specification and Swagger UI configuration.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Campaign Segments API",
        version = "0.1.0",
        description = "Contact segmentation for email campaigns.\n\nDefine segments as optional clauses over contact status, email, GDPR consent and list membership; preview them with dry runs and materialize their counts with builds.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Segments", description = "Segment definitions, dry runs, builds and member resolution"),
        (name = "Operations", description = "Health, readiness, and liveness probes"),
    ),
    paths(
        // Segments
        crate::segment_rest::list_segments,
        crate::segment_rest::create_segment,
        crate::segment_rest::get_segment,
        crate::segment_rest::update_segment,
        crate::segment_rest::delete_segment,
        crate::segment_rest::build_segment,
        crate::segment_rest::segment_members,
        // Operations
        crate::rest::health_check,
        crate::rest::readiness,
        crate::rest::liveness,
    ),
    components(schemas(
        // Segment types
        campaign_segmentation::Segment,
        campaign_segmentation::SegmentDefinition,
        campaign_segmentation::EvaluationResult,
        campaign_segmentation::MemberResolution,
        campaign_segmentation::DefinitionWarning,
        campaign_core::types::ContactStatus,
        campaign_core::types::ContactSummary,
        crate::segment_rest::CreateSegmentRequest,
        crate::segment_rest::UpdateSegmentRequest,
        crate::segment_rest::BuildRequest,
        // REST error/health types
        crate::rest::ErrorResponse,
        crate::rest::HealthResponse,
    ))
)]
pub struct ApiDoc;
