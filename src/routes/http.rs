// GET/POST handlers: version, message dispatch, formatted current/summary views

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response as HttpResponse},
};
use serde::Serialize;

use super::AppState;
use crate::error::PipelineError;
use crate::models::{Request, Response};
use crate::units::{Scaled, format_emissions, format_energy, format_power};
use crate::version::{NAME, VERSION};

/// GET /version: returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

fn failure(status: StatusCode, error: &PipelineError) -> HttpResponse {
    (status, Json(Response::failure(error))).into_response()
}

/// POST /api/message: one message from the action table, answered with its response.
pub(super) async fn message_handler(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> HttpResponse {
    let request = match Request::from_json(body) {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(error = %e, "rejected message");
            return failure(StatusCode::BAD_REQUEST, &e);
        }
    };
    match state.aggregator.request(request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => failure(StatusCode::SERVICE_UNAVAILABLE, &e),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CurrentView {
    timestamp: u64,
    is_profiling: bool,
    source_count: usize,
    power: Scaled,
    energy: Scaled,
    emissions: Scaled,
    display: String,
}

/// GET /api/current: latest sample scaled into display units.
pub(super) async fn current_handler(State(state): State<AppState>) -> HttpResponse {
    match state.aggregator.request(Request::GetCurrentMetrics).await {
        Ok(Response::Current {
            metrics,
            is_profiling,
            ..
        }) => {
            let power = format_power(metrics.power_w);
            let energy = format_energy(metrics.energy_wh);
            let emissions = format_emissions(metrics.co2e_g);
            Json(CurrentView {
                timestamp: metrics.timestamp,
                is_profiling,
                source_count: metrics.source_metrics.source_count,
                display: format!("{} · {} · {}", power, energy, emissions),
                power,
                energy,
                emissions,
            })
            .into_response()
        }
        Ok(other) => failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            &PipelineError::Rejected(format!("unexpected response: {:?}", other)),
        ),
        Err(e) => failure(StatusCode::SERVICE_UNAVAILABLE, &e),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryView {
    sample_count: usize,
    duration_seconds: f64,
    total_energy: Scaled,
    total_emissions: Scaled,
    avg_power: Scaled,
}

/// GET /api/summary: full-session summary scaled into display units.
pub(super) async fn summary_handler(State(state): State<AppState>) -> HttpResponse {
    match state.aggregator.request(Request::GetFullSummary).await {
        Ok(Response::Summary { summary, .. }) => Json(SummaryView {
            sample_count: summary.sample_count,
            duration_seconds: summary.duration_seconds,
            total_energy: format_energy(summary.total_energy_wh),
            total_emissions: format_emissions(summary.total_co2e_g),
            avg_power: format_power(summary.avg_power_w),
        })
        .into_response(),
        Ok(other) => failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            &PipelineError::Rejected(format!("unexpected response: {:?}", other)),
        ),
        Err(e) => failure(StatusCode::SERVICE_UNAVAILABLE, &e),
    }
}
