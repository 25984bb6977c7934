//! API server — REST routes, OpenAPI docs and the Prometheus exporter.

use crate::rest::{self, AppState};
use crate::segment_rest::{self, SegmentState};
use crate::swagger::ApiDoc;
use axum::routing::{get, post};
use axum::Router;
use campaign_core::config::AppConfig;
use campaign_segmentation::SegmentationEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub struct ApiServer {
    config: AppConfig,
    engine: Arc<SegmentationEngine>,
}

impl ApiServer {
    pub fn new(config: AppConfig, engine: Arc<SegmentationEngine>) -> Self {
        Self { config, engine }
    }

    /// Full application router with middleware applied.
    pub fn router(&self) -> Router {
        let app_state = AppState {
            engine: self.engine.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        };
        let segment_state = SegmentState {
            engine: self.engine.clone(),
        };

        let segments = Router::new()
            .route(
                "/v1/segments",
                get(segment_rest::list_segments).post(segment_rest::create_segment),
            )
            .route(
                "/v1/segments/:id",
                get(segment_rest::get_segment)
                    .patch(segment_rest::update_segment)
                    .delete(segment_rest::delete_segment),
            )
            .route("/v1/segments/:id/build", post(segment_rest::build_segment))
            .route("/v1/segments/:id/members", get(segment_rest::segment_members))
            .with_state(segment_state);

        let operations = Router::new()
            .route("/health", get(rest::health_check))
            .route("/ready", get(rest::readiness))
            .route("/live", get(rest::liveness))
            .with_state(app_state);

        Router::new()
            .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
            .merge(segments)
            .merge(operations)
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = self.router();
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
