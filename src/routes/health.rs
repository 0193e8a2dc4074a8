use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use tracing::warn;

use crate::models::{AppState, HealthResponse};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (database, queue) = tokio::join!(state.store.health_check(), state.dispatcher.health_check());

    let database_status = match &database {
        Ok(()) => "connected".to_string(),
        Err(e) => {
            warn!(error = %e, "Database health check failed");
            "unavailable".to_string()
        }
    };

    let queue_status = match &queue {
        Ok(()) => "connected".to_string(),
        Err(e) => {
            warn!(error = %e, "Queue health check failed");
            "unavailable".to_string()
        }
    };

    // Depth is informational; reachability alone decides health.
    let queue_depth = if queue.is_ok() {
        match state.dispatcher.depth().await {
            Ok(depth) => Some(depth),
            Err(e) => {
                warn!(error = %e, "Could not read queue depth");
                None
            }
        }
    } else {
        None
    };

    let healthy = database.is_ok() && queue.is_ok();
    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    let response = HealthResponse {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        database: database_status,
        queue: queue_status,
        queue_depth,
    };

    (status, Json(response))
}
