pub mod metrics;
mod routes;

pub use metrics::EmberMetrics;
pub use routes::create_router;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ember_core::{Coordinator, HealthRegistry};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub registry: Arc<HealthRegistry>,
    pub metrics: Arc<EmberMetrics>,
    /// Bounds coordination cycles in flight.
    pub limiter: Arc<Semaphore>,
    pub max_concurrent: usize,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>, registry: Arc<HealthRegistry>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            coordinator,
            registry,
            metrics: Arc::new(EmberMetrics::new()),
            limiter: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            start_time: std::time::Instant::now(),
        }
    }
}

/// JSON response wrapper
#[derive(Serialize)]
pub struct JsonResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> JsonResponse<()> {
        JsonResponse {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Error type for HTTP handlers. Anything converted through `?` is a 500.
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        Self {
            status: StatusCode::BAD_REQUEST,
            error: anyhow::anyhow!(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(JsonResponse::<()>::err(self.error.to_string())),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: err.into(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
