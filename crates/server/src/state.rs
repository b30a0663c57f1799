// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use reelrun_server_jobs::JobController;

use crate::auth::AuthCheck;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Job submission, status, cancellation and event subscription.
    pub controller: JobController,
    /// Token check applied by [`crate::auth::RequireAuth`].
    pub auth: Arc<dyn AuthCheck>,
    /// CORS origins; empty allows any origin.
    pub allowed_origins: Vec<String>,
}

impl AppState {
    pub fn new(
        controller: JobController,
        auth: Arc<dyn AuthCheck>,
        allowed_origins: Vec<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            controller,
            auth,
            allowed_origins,
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
