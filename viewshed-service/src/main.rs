//! Viewshed Service - HTTP microservice for DSM viewshed computation.
//!
//! Computes the terrain visible from an observer by running the configured
//! viewshed engine against a single DSM, one engine process per request.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `VIEWSHED_DSM_PATH` | Path to the DSM raster | Required |
//! | `VIEWSHED_ENGINE` | Engine program | `python3` |
//! | `VIEWSHED_ENGINE_ARGS` | Whitespace-separated leading engine arguments | `process_dsm.py` |
//! | `VIEWSHED_ENGINE_TIMEOUT_SECS` | Engine deadline in seconds, `0` disables it | 300 |
//! | `VIEWSHED_DEFAULT_MAX_DISTANCE` | Radius when a request omits `maxDistance` | 500 |
//! | `VIEWSHED_PORT` | HTTP server port | 8080 |
//! | `RUST_LOG` | Log level (e.g., "info", "debug") | "info" |
//!
//! ## Endpoints
//!
//! - `POST /viewshed` - Compute a viewshed
//! - `GET /health` - Health check
//! - `GET /docs` - OpenAPI documentation (Swagger UI)

use std::net::SocketAddr;
use std::sync::Arc;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use viewshed::ViewshedServiceBuilder;
use viewshed_service::{handlers, AppState};

/// OpenAPI documentation for the viewshed service.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Viewshed Service",
        version = "0.1.0",
        description = "REST API computing the terrain visible from an observer over a DSM.",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT"),
        contact(name = "Pedro Sanz Martinez", url = "https://github.com/pedrosanzmtz/htg")
    ),
    paths(handlers::post_viewshed, handlers::health_check),
    components(schemas(
        handlers::ViewshedRequestBody,
        handlers::ErrorResponse,
        handlers::HealthResponse,
    )),
    tags(
        (name = "viewshed", description = "Viewshed computation endpoints"),
        (name = "system", description = "System and health endpoints")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "viewshed_service=info,viewshed=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load port from environment (service-specific config)
    let port: u16 = std::env::var("VIEWSHED_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    // The library handles: VIEWSHED_DSM_PATH, VIEWSHED_ENGINE, VIEWSHED_ENGINE_ARGS,
    // VIEWSHED_ENGINE_TIMEOUT_SECS, VIEWSHED_DEFAULT_MAX_DISTANCE
    let builder = ViewshedServiceBuilder::from_env()?;
    let engine = builder.engine_config().command_line();
    let viewshed_service = builder.build();

    tracing::info!(
        dsm = %viewshed_service.dsm().path().display(),
        engine = %engine,
        timeout_secs = ?viewshed_service.timeout().map(|t| t.as_secs()),
        default_max_distance = viewshed_service.default_max_distance(),
        port = port,
        "Starting viewshed service"
    );

    if !viewshed_service.dsm().is_available().await {
        tracing::warn!(
            dsm = %viewshed_service.dsm().path().display(),
            "DSM file not found; requests will fail until it is present"
        );
    }

    let state = Arc::new(AppState { viewshed_service });

    // Build router
    let app = viewshed_service::app(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        );

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
