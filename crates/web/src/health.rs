//! Health check endpoint: GET /health-check

use axum::{Router, extract::State, http::StatusCode, routing::get};
use rightsizer_updater::{HealthCheck, HealthReport};
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Path the health check is served on.
pub const HEALTH_CHECK_PATH: &str = "/health-check";

/// Create the health-check router.
pub fn health_router(check: HealthCheck) -> Router {
    Router::new()
        .route(HEALTH_CHECK_PATH, get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(check)
}

/// GET /health-check - 200 while the loop is alive, 500 once it went stale
async fn health_check(State(check): State<HealthCheck>) -> (StatusCode, String) {
    match check.check(Instant::now()) {
        HealthReport::Healthy => (StatusCode::OK, "OK".to_string()),
        HealthReport::Stale { age, timeout } => {
            warn!(
                age_ms = age.as_millis(),
                timeout_ms = timeout.as_millis(),
                "Health check failed"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error: last activity more than {age:?} ago"),
            )
        }
    }
}
