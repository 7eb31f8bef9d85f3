//! HTTP request handlers for the viewshed service.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use viewshed::{ErrorCategory, RawViewshedRequest, ViewshedError};

use crate::AppState;

/// Body of a viewshed request.
///
/// All fields are optional at the wire level so that missing values produce
/// a `400` with a JSON error instead of a framework rejection.
///
/// Mirrors [`RawViewshedRequest`] field for field, renames included, so the
/// OpenAPI schema can be derived here; keep the two in step.
#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct ViewshedRequestBody {
    /// Observer longitude in decimal degrees (-180 to 180).
    #[serde(default)]
    pub lng: Option<f64>,
    /// Observer latitude in decimal degrees (-90 to 90).
    #[serde(default)]
    pub lat: Option<f64>,
    /// Equipment height above the DSM surface, in DSM units. Must be non-zero.
    #[serde(default, rename = "mountHeight")]
    pub mount_height: Option<f64>,
    /// Analysis radius in DSM units. Defaults to the service setting (500).
    #[serde(default, rename = "maxDistance", skip_serializing_if = "Option::is_none")]
    pub max_distance: Option<f64>,
}

impl From<ViewshedRequestBody> for RawViewshedRequest {
    fn from(body: ViewshedRequestBody) -> Self {
        RawViewshedRequest {
            lng: body.lng,
            lat: body.lat,
            mount_height: body.mount_height,
            max_distance: body.max_distance,
        }
    }
}

/// Error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Whether the configured DSM file is currently present.
    pub dsm_available: bool,
}

/// Compute the viewshed for an observer.
///
/// # Returns
///
/// - `200 OK` with a GeoJSON FeatureCollection on success, carrying coverage
///   statistics in a `stats` member when the engine reports a unit
/// - `400 Bad Request` for invalid input, a missing DSM, or an observer outside the DSM
/// - `500 Internal Server Error` when the engine fails or returns invalid output
#[utoipa::path(
    post,
    path = "/viewshed",
    tag = "viewshed",
    request_body = ViewshedRequestBody,
    responses(
        (status = 200, description = "GeoJSON FeatureCollection with observer, viewshed and analysis_range features"),
        (status = 400, description = "Request cannot be satisfied", body = ErrorResponse),
        (status = 500, description = "Viewshed computation failed", body = ErrorResponse)
    )
)]
#[axum::debug_handler]
pub async fn post_viewshed(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ViewshedRequestBody>, JsonRejection>,
) -> Response {
    let raw: RawViewshedRequest = match body {
        Ok(Json(body)) => body.into(),
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "Rejected viewshed request body");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: format!("Invalid request body: {}", rejection.body_text()),
                }),
            )
                .into_response();
        }
    };

    tracing::debug!(
        lng = raw.lng,
        lat = raw.lat,
        mount_height = raw.mount_height,
        max_distance = raw.max_distance,
        "Viewshed request"
    );

    match state.viewshed_service.compute(&raw).await {
        Ok(viewshed) => {
            tracing::info!(
                lng = viewshed.request.longitude,
                lat = viewshed.request.latitude,
                features = viewshed.response.features.len(),
                "Viewshed served"
            );
            (
                StatusCode::OK,
                Json(viewshed.to_feature_collection()),
            )
                .into_response()
        }
        Err(e) => error_response(&raw, e),
    }
}

/// Create an error response for viewshed requests.
///
/// The full error is logged; the caller only sees the public message.
fn error_response(raw: &RawViewshedRequest, e: ViewshedError) -> Response {
    let status = match e.category() {
        ErrorCategory::Client => StatusCode::BAD_REQUEST,
        ErrorCategory::Server => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!(lng = raw.lng, lat = raw.lat, error = %e, "Viewshed request failed");
    } else {
        tracing::warn!(lng = raw.lng, lat = raw.lat, error = %e, "Viewshed request rejected");
    }

    (
        status,
        Json(ErrorResponse {
            error: e.public_message(),
        }),
    )
        .into_response()
}

/// Health check endpoint.
///
/// Returns service status, version and DSM availability.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses((status = 200, description = "Service is running", body = HealthResponse))
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dsm_available: state.viewshed_service.dsm().is_available().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_deserialize() {
        let json = r#"{"lng": -96.21095, "lat": 41.1982, "mountHeight": 30}"#;
        let body: ViewshedRequestBody = serde_json::from_str(json).unwrap();
        assert_eq!(body.lng, Some(-96.21095));
        assert_eq!(body.mount_height, Some(30.0));
        assert_eq!(body.max_distance, None);

        let raw = RawViewshedRequest::from(body);
        assert_eq!(raw, RawViewshedRequest::new(-96.21095, 41.1982, 30.0));
    }

    #[test]
    fn test_error_response_serialize() {
        let response = ErrorResponse {
            error: "Invalid viewshed format: engine produced no result".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(
            json,
            r#"{"error":"Invalid viewshed format: engine produced no result"}"#
        );
    }

    #[test]
    fn test_health_response_serialize() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            version: "0.1.0".to_string(),
            dsm_available: true,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("\"dsm_available\":true"));
    }
}
