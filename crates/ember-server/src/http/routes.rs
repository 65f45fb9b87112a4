use super::{AppError, AppResult, AppState, JsonResponse};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::header,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use ember_core::{
    DependencyStatus, EmberError, OverallState, Plan, PlanSource, Request, SourceFailure,
};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/rescue-plan", post(rescue_plan))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(state)
}

#[derive(Serialize)]
struct PlanResponse {
    #[serde(flatten)]
    plan: Plan,
    source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback_reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failed_sources: Vec<SourceFailure>,
}

async fn rescue_plan(
    State(state): State<AppState>,
    body: Result<Json<Request>, JsonRejection>,
) -> AppResult<Json<JsonResponse<PlanResponse>>> {
    let Json(request) = body.map_err(|e| {
        state.metrics.validation_errors.inc();
        AppError::bad_request(e.body_text())
    })?;

    let _permit = state.limiter.clone().acquire_owned().await?;
    let in_flight = state.metrics.track_in_flight();
    let started = Instant::now();
    let outcome = state.coordinator.coordinate(&request).await;
    drop(in_flight);

    let resolution = match outcome {
        Ok(resolution) => resolution,
        Err(EmberError::Validation(msg)) => {
            state.metrics.validation_errors.inc();
            return Err(AppError::bad_request(msg));
        }
        Err(e) => return Err(e.into()),
    };
    state.metrics.record_resolution(&resolution, started.elapsed());

    let fallback_reason = match &resolution.source {
        PlanSource::Fallback(reason) => {
            warn!("Fallback plan served: {}", reason);
            Some(reason.to_string())
        }
        _ => None,
    };
    info!(
        "Rescue plan {} ({}) in {:?}",
        resolution.plan.id(),
        resolution.source.label(),
        started.elapsed()
    );

    Ok(Json(JsonResponse::ok(PlanResponse {
        source: resolution.source.label(),
        fallback_reason,
        failed_sources: resolution.failures,
        plan: resolution.plan,
    })))
}

#[derive(Serialize)]
struct HealthResponse {
    healthy: bool,
    overall: OverallState,
    version: String,
    uptime_seconds: u64,
    healthy_dependencies: usize,
    total_dependencies: usize,
    dependencies: Vec<DependencyStatus>,
}

async fn health(State(state): State<AppState>) -> AppResult<Json<JsonResponse<HealthResponse>>> {
    let report = state.registry.overall();
    Ok(Json(JsonResponse::ok(HealthResponse {
        healthy: report.overall == OverallState::Healthy,
        overall: report.overall,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        healthy_dependencies: report.healthy,
        total_dependencies: report.total,
        dependencies: report.dependencies,
    })))
}

#[derive(Serialize)]
struct StatusResponse {
    overall: OverallState,
    uptime_seconds: u64,
    dependencies: Vec<DependencyStatus>,
    coordinator: CoordinatorSummary,
}

#[derive(Serialize)]
struct CoordinatorSummary {
    sources: Vec<String>,
    source_timeout_secs: f64,
    fanout_deadline_secs: f64,
    max_context_chars: usize,
    generation_timeout_secs: f64,
    generation_model: Option<String>,
    cache_ttl_secs: u64,
    cache_timeout_secs: f64,
    max_concurrent_requests: usize,
    available_permits: usize,
}

async fn status(State(state): State<AppState>) -> AppResult<Json<JsonResponse<StatusResponse>>> {
    let report = state.registry.overall();
    let aggregator = state.coordinator.aggregator();
    let config = state.coordinator.config();
    Ok(Json(JsonResponse::ok(StatusResponse {
        overall: report.overall,
        uptime_seconds: state.start_time.elapsed().as_secs(),
        dependencies: report.dependencies,
        coordinator: CoordinatorSummary {
            sources: aggregator.source_names().into_iter().map(String::from).collect(),
            source_timeout_secs: aggregator.config().source_timeout.as_secs_f64(),
            fanout_deadline_secs: aggregator.fanout_deadline().as_secs_f64(),
            max_context_chars: aggregator.config().max_context_chars,
            generation_timeout_secs: config.generation_timeout.as_secs_f64(),
            generation_model: config.generation.model.clone(),
            cache_ttl_secs: config.cache_ttl.as_secs(),
            cache_timeout_secs: config.cache_timeout.as_secs_f64(),
            max_concurrent_requests: state.max_concurrent,
            available_permits: state.limiter.available_permits(),
        },
    })))
}

async fn metrics(State(state): State<AppState>) -> AppResult<Response> {
    state
        .metrics
        .refresh(&state.registry, state.start_time.elapsed());
    let body = state.metrics.encode()?;
    Ok((
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        body,
    )
        .into_response())
}
