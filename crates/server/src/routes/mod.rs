//! Route handlers for the reelrun server.

pub mod health;
pub mod jobs;
pub mod ws;

use std::sync::Arc;

use axum::Router;

use crate::metrics;
use crate::state::AppState;

/// Create the combined router.
///
/// Routes:
/// - GET  /              - Service banner with active job count
/// - GET  /health        - Health check
/// - POST /execute       - Submit a pipeline job (auth)
/// - GET  /status/{id}   - Job status with the most recent log lines
/// - GET  /jobs          - Recent jobs, most recent last (auth)
/// - POST /cancel/{id}   - Cancel a running job (auth)
/// - GET  /jobs/stream   - SSE stream of job events (auth)
/// - GET  /ws            - WebSocket stream of job events
/// - GET  /metrics       - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(jobs::router())
        .merge(ws::router())
        .merge(metrics::router())
        .with_state(state)
}
