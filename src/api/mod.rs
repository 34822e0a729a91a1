use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, Path, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::core::{AnalysisError, Calibration, CalibrationConfig, SearchMethod, calibrate};
use crate::scenario::{ScenarioAnalyzer, ScenarioParams, ScenarioResult, run_scenarios};
use crate::sim::{EntityLevel, Simulation, StylisedEngine, Variable};

#[derive(Clone)]
pub struct AppState {
    analyzer: Arc<ScenarioAnalyzer<StylisedEngine>>,
    grid: Arc<Vec<ScenarioParams>>,
}

impl AppState {
    pub fn new(analyzer: ScenarioAnalyzer<StylisedEngine>) -> Self {
        Self {
            analyzer: Arc::new(analyzer),
            grid: Arc::new(ScenarioParams::default_grid()),
        }
    }
}

/// Body of `POST /api/scenario`. Missing fields take the "Baseline" row's
/// values.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ScenarioPayload {
    name: Option<String>,
    adult_pa: Option<f64>,
    pensioner_pa: Option<f64>,
    ni_primary_threshold_weekly: Option<f64>,
    ubi_for_children: Option<bool>,
    ubi_for_pensioners: Option<bool>,
    ubi_in_means_tests: Option<bool>,
    child_share: Option<f64>,
}

/// Body of `POST /api/calibrate`: calibrate against the linear response
/// `slope * x + intercept`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CalibratePayload {
    initial_guess: Option<f64>,
    slope: Option<f64>,
    intercept: Option<f64>,
    target_revenue: Option<f64>,
    tolerance: Option<f64>,
    step: Option<f64>,
    max_iterations: Option<u32>,
    method: Option<SearchMethod>,
}

#[derive(Debug)]
struct CalibrateRequest {
    initial_guess: f64,
    slope: f64,
    intercept: f64,
    config: CalibrationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    people: usize,
    scenarios: usize,
}

#[derive(Debug, Serialize)]
struct BaselineResponse {
    variable: &'static str,
    total: f64,
    mean: f64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub async fn run_http_server(state: AppState, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "UBI reform API listening");
    info!("Local access: http://127.0.0.1:{port}/api/health");

    axum::serve(listener, router(state)).await
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/scenarios", get(scenarios_handler))
        .route("/api/baseline/:variable", get(baseline_handler))
        .route("/api/scenario", post(scenario_handler))
        .route("/api/calibrate", post(calibrate_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn health_handler(State(state): State<AppState>) -> Response {
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            people: state.analyzer.deciles().len(),
            scenarios: state.grid.len(),
        },
    )
}

async fn baseline_handler(
    State(state): State<AppState>,
    Path(variable): Path<String>,
) -> Response {
    match baseline_aggregate(&state, &variable) {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn baseline_aggregate(state: &AppState, name: &str) -> Result<BaselineResponse, AnalysisError> {
    let variable: Variable = name.parse()?;
    let baseline = state.analyzer.baseline();
    Ok(BaselineResponse {
        variable: variable.name(),
        total: baseline.total(variable)?,
        mean: baseline.calc(variable, EntityLevel::Person)?.mean(),
    })
}

async fn scenarios_handler(State(state): State<AppState>) -> Response {
    let analyzer = Arc::clone(&state.analyzer);
    let grid = Arc::clone(&state.grid);
    let outcome = tokio::task::spawn_blocking(move || {
        run_scenarios(&analyzer, &grid)
            .into_iter()
            .collect::<Result<Vec<ScenarioResult>, AnalysisError>>()
    })
    .await;
    blocking_response(outcome)
}

async fn scenario_handler(
    State(state): State<AppState>,
    payload: Result<Json<ScenarioPayload>, JsonRejection>,
) -> Response {
    let params = match payload
        .map_err(|e| format!("Invalid scenario JSON payload: {}", e.body_text()))
        .and_then(|Json(payload)| scenario_params_from_payload(payload))
    {
        Ok(params) => params,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let analyzer = Arc::clone(&state.analyzer);
    let outcome = tokio::task::spawn_blocking(move || analyzer.run(&params)).await;
    blocking_response(outcome)
}

async fn calibrate_handler(payload: Result<Json<CalibratePayload>, JsonRejection>) -> Response {
    let request = match payload
        .map_err(|e| format!("Invalid calibration JSON payload: {}", e.body_text()))
        .and_then(|Json(payload)| calibrate_request_from_payload(payload))
    {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match run_linear_calibration(&request) {
        Ok(calibration) => json_response(StatusCode::OK, calibration),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn run_linear_calibration(request: &CalibrateRequest) -> Result<Calibration, AnalysisError> {
    let (slope, intercept) = (request.slope, request.intercept);
    calibrate(request.initial_guess, request.config, |x| Ok(slope * x + intercept))
}

fn blocking_response<T: Serialize>(
    outcome: Result<Result<T, AnalysisError>, tokio::task::JoinError>,
) -> Response {
    match outcome {
        Ok(Ok(body)) => json_response(StatusCode::OK, body),
        Ok(Err(e)) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        Err(e) => {
            error!(error = %e, "analysis task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Analysis task failed")
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn scenario_params_from_json(json: &str) -> Result<ScenarioParams, String> {
    let payload = serde_json::from_str::<ScenarioPayload>(json)
        .map_err(|e| format!("Invalid scenario JSON payload: {e}"))?;
    scenario_params_from_payload(payload)
}

fn scenario_params_from_payload(payload: ScenarioPayload) -> Result<ScenarioParams, String> {
    let grid = ScenarioParams::default_grid();
    let mut params = grid
        .into_iter()
        .next()
        .ok_or_else(|| "scenario grid is empty".to_string())?;
    params.name = "Custom".to_string();

    if let Some(v) = payload.name {
        params.name = v;
    }
    if let Some(v) = payload.adult_pa {
        params.adult_pa = v;
    }
    if let Some(v) = payload.pensioner_pa {
        params.pensioner_pa = v;
    }
    if let Some(v) = payload.ni_primary_threshold_weekly {
        params.ni_primary_threshold_weekly = v;
    }
    if let Some(v) = payload.ubi_for_children {
        params.ubi_for_children = v;
    }
    if let Some(v) = payload.ubi_for_pensioners {
        params.ubi_for_pensioners = v;
    }
    if let Some(v) = payload.ubi_in_means_tests {
        params.ubi_in_means_tests = v;
    }
    if payload.child_share.is_some() {
        params.child_share = payload.child_share;
    }

    params.validate().map_err(|e| e.to_string())?;
    Ok(params)
}

#[cfg(test)]
fn calibrate_request_from_json(json: &str) -> Result<CalibrateRequest, String> {
    let payload = serde_json::from_str::<CalibratePayload>(json)
        .map_err(|e| format!("Invalid calibration JSON payload: {e}"))?;
    calibrate_request_from_payload(payload)
}

fn calibrate_request_from_payload(payload: CalibratePayload) -> Result<CalibrateRequest, String> {
    let slope = payload.slope.ok_or("slope is required")?;
    let intercept = payload.intercept.ok_or("intercept is required")?;
    if !slope.is_finite() || !intercept.is_finite() {
        return Err("slope and intercept must be finite".to_string());
    }

    let mut config = CalibrationConfig::default();
    if let Some(v) = payload.target_revenue {
        config.target_revenue = v;
    }
    if let Some(v) = payload.tolerance {
        config.tolerance = v;
    }
    if let Some(v) = payload.step {
        config.step = v;
    }
    if let Some(v) = payload.max_iterations {
        config.max_iterations = v;
    }
    if let Some(v) = payload.method {
        config.method = v;
    }

    Ok(CalibrateRequest {
        initial_guess: payload.initial_guess.unwrap_or(0.0),
        slope,
        intercept,
        config,
    })
}
