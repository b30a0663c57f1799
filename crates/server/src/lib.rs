// crates/server/src/lib.rs
//! reelrun server library.
//!
//! Axum HTTP and WebSocket layer over the job core in `reelrun-server-jobs`:
//! submit pipeline jobs, query and cancel them, and stream their events.

pub mod auth;
pub mod config;
pub mod error;
pub mod keepalive;
pub mod metrics;
pub mod routes;
pub mod state;

pub use auth::{AuthCheck, RequireAuth, SharedSecret};
pub use config::ServerConfig;
pub use error::*;
pub use metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// CORS for the configured origins, or any origin when none are configured.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(values)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - Job, health, WebSocket and metrics routes
/// - CORS for the configured origins
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.allowed_origins);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use pretty_assertions::assert_eq;
    use reelrun_server_jobs::{ControllerConfig, JobController, ScriptPipeline};
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";

    /// State whose pipeline is `true <script> <flags>`: every job exits 0 at once.
    fn test_state(dir: &TempDir, origins: Vec<String>) -> Arc<AppState> {
        let controller = JobController::new(
            ControllerConfig::new(dir.path().join("videos"), dir.path().join("logs")),
            Arc::new(ScriptPipeline::new("true", "pipeline.py")),
        );
        AppState::new(controller, Arc::new(SharedSecret::new(SECRET)), origins)
    }

    fn test_app() -> (Router, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let app = create_app(test_state(&dir, Vec::new()));
        (app, dir)
    }

    /// Helper to make a GET request to the app.
    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.oneshot(request).await.unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body_str = String::from_utf8(body.to_vec()).unwrap();

        (status, body_str)
    }

    fn authed(method: &str, uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("Authorization", format!("Bearer {SECRET}"))
            .header("Content-Type", "application/json")
            .body(body)
            .unwrap()
    }

    async fn wait_for_terminal(app: &Router, id: &str) -> serde_json::Value {
        for _ in 0..100 {
            let (_, body) = get(app.clone(), &format!("/status/{id}")).await;
            let json: serde_json::Value = serde_json::from_str(&body).unwrap();
            if !matches!(json["status"].as_str(), Some("pending") | Some("processing")) {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("job {id} did not finish");
    }

    // ========================================================================
    // Health Endpoint Tests
    // ========================================================================

    #[tokio::test]
    async fn test_root_endpoint() {
        let (app, _dir) = test_app();
        let (status, body) = get(app, "/").await;

        assert_eq!(status, StatusCode::OK);
        let json: routes::health::RootResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(json.status, "active");
        assert_eq!(json.active_jobs, 0);
        assert_eq!(json.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _dir) = test_app();
        let (status, body) = get(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert!(json["timestamp"].is_string());
        assert!(json["uptime_secs"].is_number());
    }

    // ========================================================================
    // Auth Tests
    // ========================================================================

    #[tokio::test]
    async fn test_execute_without_token_is_forbidden() {
        let (app, _dir) = test_app();
        let request = Request::builder()
            .method("POST")
            .uri("/execute")
            .header("Content-Type", "application/json")
            .body(Body::from(r#"{"mode":"test"}"#))
            .unwrap();
        let (status, body) = send(app, request).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, r#"{"error":"Invalid authentication"}"#);
    }

    #[tokio::test]
    async fn test_wrong_token_is_forbidden() {
        let (app, _dir) = test_app();
        let request = Request::builder()
            .uri("/jobs")
            .header("Authorization", "Bearer nope")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(app, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_stream_requires_token() {
        let (app, _dir) = test_app();
        let (status, _) = get(app, "/jobs/stream").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    // ========================================================================
    // Job Endpoint Tests
    // ========================================================================

    #[tokio::test]
    async fn test_execute_invalid_mode_is_bad_request() {
        let (app, _dir) = test_app();
        let (status, body) = send(
            app.clone(),
            authed("POST", "/execute", Body::from(r#"{"mode":"turbo"}"#)),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(error.details.as_deref(), Some("Invalid mode"));

        let (_, body) = send(app, authed("GET", "/jobs", Body::empty())).await;
        let list: routes::jobs::JobListResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(list.total, 0);
    }

    #[tokio::test]
    async fn test_execute_then_status() {
        let (app, _dir) = test_app();
        let (status, body) = send(
            app.clone(),
            authed(
                "POST",
                "/execute",
                Body::from(r#"{"mode":"single","theme":"cine","user_id":"u1"}"#),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let created: routes::jobs::ExecuteResponse = serde_json::from_str(&body).unwrap();
        assert!(created.success);
        assert_eq!(created.message, "Job started in single mode");
        assert_eq!(created.status_url, format!("/status/{}", created.job_id));

        let job = wait_for_terminal(&app, &created.job_id).await;
        assert_eq!(job["status"], "completed");
        assert_eq!(job["progress"], 100);
        assert_eq!(job["mode"], "single");
        assert_eq!(job["theme"], "cine");
        assert!(job["completed_at"].is_string());

        let (_, body) = send(app.clone(), authed("GET", "/jobs?limit=5", Body::empty())).await;
        let list: routes::jobs::JobListResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(list.total, 1);
        assert_eq!(list.jobs[0].job_id, created.job_id);

        let uri = format!("/cancel/{}", created.job_id);
        let (status, body) = send(app, authed("POST", &uri, Body::empty())).await;
        assert_eq!(status, StatusCode::OK);
        let cancel: routes::jobs::CancelResponse = serde_json::from_str(&body).unwrap();
        assert!(!cancel.success);
        assert_eq!(cancel.message, "Job not running");
    }

    #[tokio::test]
    async fn test_status_unknown_job_is_404() {
        let (app, _dir) = test_app();
        let (status, body) = get(app, "/status/does-not-exist").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        let error: ErrorResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(error.error, "Job not found");
    }

    #[tokio::test]
    async fn test_cancel_unknown_job_is_404() {
        let (app, _dir) = test_app();
        let (status, _) = send(app, authed("POST", "/cancel/nope", Body::empty())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_defaults_to_twenty() {
        let (app, _dir) = test_app();
        for _ in 0..22 {
            let (status, _) = send(
                app.clone(),
                authed("POST", "/execute", Body::from(r#"{"mode":"batch"}"#)),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
        let (_, body) = send(app, authed("GET", "/jobs", Body::empty())).await;
        let list: routes::jobs::JobListResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(list.total, 22);
        assert_eq!(list.jobs.len(), 20);
    }

    // ========================================================================
    // Metrics Tests
    // ========================================================================

    #[tokio::test]
    async fn test_metrics_endpoint() {
        init_metrics();
        let (app, _dir) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));
    }

    // ========================================================================
    // CORS Tests
    // ========================================================================

    #[tokio::test]
    async fn test_cors_allows_any_origin_by_default() {
        let (app, _dir) = test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("Origin", "http://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let allow_origin = response.headers().get("access-control-allow-origin");
        assert_eq!(allow_origin.unwrap(), "*");
    }

    #[tokio::test]
    async fn test_cors_restricts_to_configured_origins() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_app(test_state(&dir, vec!["http://localhost:3000".into()]));

        let allowed = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("Origin", "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            allowed.headers().get("access-control-allow-origin").unwrap(),
            "http://localhost:3000"
        );

        let denied = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("Origin", "http://evil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(denied.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn test_404_for_unknown_route() {
        let (app, _dir) = test_app();
        let (status, _body) = get(app, "/api/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
