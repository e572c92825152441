//! REST API handlers for the experience overlay

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::service::{AppState, DivisorRequest};
use crate::color::LegendEntry;
use crate::error::GeoError;
use crate::models::RegionLevel;
use crate::overlay::{NoDataPolicy, RenderedLayer, RenderedOverlay};
use crate::pipeline::{Location, RefreshStatus};
use crate::ratio::BadnessDivisor;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn bad_request(err: GeoError) -> ApiError {
    error(StatusCode::BAD_REQUEST, err.to_string())
}

// ============================================================================
// Query Parameters
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct RenderQuery {
    pub divisor: Option<f64>,
    pub slider: Option<i64>,
    pub no_data: Option<NoDataPolicy>,
}

impl RenderQuery {
    fn divisor_request(&self) -> DivisorRequest {
        DivisorRequest {
            divisor: self.divisor,
            slider: self.slider,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LocateQuery {
    pub lat: f64,
    pub lon: f64,
}

fn resolve(service: &AppState, params: &RenderQuery) -> Result<(BadnessDivisor, NoDataPolicy), ApiError> {
    let divisor = service
        .divisor(params.divisor_request())
        .map_err(bad_request)?;
    Ok((divisor, params.no_data.unwrap_or(service.default_no_data())))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// GET /api/v1/status
pub async fn get_status(State(service): State<AppState>) -> Json<RefreshStatus> {
    Json(service.status().await)
}

/// GET /api/v1/overlay
pub async fn get_overlay(
    State(service): State<AppState>,
    Query(params): Query<RenderQuery>,
) -> Result<Json<RenderedOverlay>, ApiError> {
    let (divisor, policy) = resolve(&service, &params)?;
    match service.rendered(divisor, policy).await {
        Some(overlay) => Ok(Json(overlay)),
        None => Err(error(
            StatusCode::SERVICE_UNAVAILABLE,
            "No overlay published yet",
        )),
    }
}

/// GET /api/v1/overlay/:service/:level
pub async fn get_layer(
    State(service): State<AppState>,
    Path((service_id, level)): Path<(String, String)>,
    Query(params): Query<RenderQuery>,
) -> Result<Json<RenderedLayer>, ApiError> {
    let (divisor, policy) = resolve(&service, &params)?;
    let level: RegionLevel = level
        .parse()
        .map_err(|e: String| error(StatusCode::NOT_FOUND, e))?;
    match service.layer(&service_id, level, divisor, policy).await {
        Some(layer) => Ok(Json(layer)),
        None => Err(error(
            StatusCode::NOT_FOUND,
            format!("Layer not found: {} by {}", service_id, level),
        )),
    }
}

/// GET /api/v1/legend
pub async fn get_legend(
    State(service): State<AppState>,
    Query(params): Query<RenderQuery>,
) -> Result<Json<Vec<LegendEntry>>, ApiError> {
    let (divisor, _) = resolve(&service, &params)?;
    Ok(Json(service.legend(divisor)))
}

/// GET /api/v1/locate?lat=..&lon=..
pub async fn locate(
    State(service): State<AppState>,
    Query(params): Query<LocateQuery>,
) -> Result<Json<Location>, ApiError> {
    service
        .locate(params.lat, params.lon)
        .map(Json)
        .map_err(bad_request)
}
