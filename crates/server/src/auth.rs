// crates/server/src/auth.rs
//! Bearer-token check for the mutating endpoints.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};

use crate::error::ApiError;
use crate::state::AppState;

/// Decides whether a presented token grants access.
pub trait AuthCheck: Send + Sync {
    fn is_authorized(&self, token: &str) -> bool;
}

/// Accepts exactly one configured secret.
pub struct SharedSecret {
    secret: String,
}

impl SharedSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl AuthCheck for SharedSecret {
    fn is_authorized(&self, token: &str) -> bool {
        let (a, b) = (token.as_bytes(), self.secret.as_bytes());
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Extractor that rejects the request with 403 unless a valid
/// `Authorization: Bearer <token>` header is present.
///
/// ```ignore
/// async fn cancel(_: RequireAuth, Path(id): Path<String>) -> ApiResult<Json<()>> { .. }
/// ```
pub struct RequireAuth;

impl FromRequestParts<Arc<AppState>> for RequireAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match bearer_token(parts) {
            Some(token) if state.auth.is_authorized(token) => Ok(RequireAuth),
            _ => Err(ApiError::Unauthorized),
        }
    }
}
