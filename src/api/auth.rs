// =============================================================================
// Bearer Token Authentication — Axum Middleware
// =============================================================================
//
// Extracts the `Authorization: Bearer <token>` header and resolves it to a
// `UserIdentity` via the configured `UserDirectory` (Postgres-backed in
// production, in-memory in tests), mirroring the original Django app's
// reliance on its parent project's auth system purely for id/email/admin-flag
// lookups. A second extractor, `AdminContext`, additionally requires
// `is_admin = true` for the admin-only config/universe/status endpoints.
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::app_state::AppState;
use crate::stores::UserIdentity;

/// Compare two byte slices in constant time. Used for the admin bootstrap
/// token (`SCANNER_ADMIN_TOKEN`), which is compared directly rather than
/// resolved through the user directory.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, axum::Json(body)).into_response()
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// An authenticated caller, resolved from the `Authorization` header via the
/// `UserDirectory`. Falls back to the `SCANNER_ADMIN_TOKEN` bootstrap token
/// (constant-time compared) for the admin account when no directory entry
/// exists yet, matching the original's ability to administer the scanner
/// before any user row is provisioned.
pub struct AuthContext(pub UserIdentity);

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    Arc<AppState>: axum::extract::FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let State(app): State<Arc<AppState>> = State::from_request_parts(parts, state)
            .await
            .map_err(|_| AuthRejection {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "server misconfigured",
            })?;

        let token = bearer_token(parts).ok_or(AuthRejection {
            status: StatusCode::FORBIDDEN,
            message: "missing or invalid authorization token",
        })?;

        if !app.config.scanner_admin_token.is_empty()
            && constant_time_eq(token.as_bytes(), app.config.scanner_admin_token.as_bytes())
        {
            return Ok(AuthContext(UserIdentity {
                user_id: 0,
                email: app.config.scanner_admin_email.clone(),
                is_admin: true,
            }));
        }

        match app.user_directory.resolve_token(token).await {
            Ok(Some(identity)) => Ok(AuthContext(identity)),
            Ok(None) => {
                warn!("bearer token did not resolve to a known user");
                Err(AuthRejection {
                    status: StatusCode::FORBIDDEN,
                    message: "invalid authorization token",
                })
            }
            Err(e) => {
                warn!(error = %e, "user directory lookup failed");
                Err(AuthRejection {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    message: "authentication backend unavailable",
                })
            }
        }
    }
}

/// Like [`AuthContext`] but additionally requires `is_admin`.
pub struct AdminContext(pub UserIdentity);

#[async_trait]
impl<S> FromRequestParts<S> for AdminContext
where
    Arc<AppState>: axum::extract::FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthContext(identity) = AuthContext::from_request_parts(parts, state).await?;
        if !identity.is_admin {
            return Err(AuthRejection {
                status: StatusCode::FORBIDDEN,
                message: "admin privileges required",
            });
        }
        Ok(AdminContext(identity))
    }
}

/// Resolve a token passed as a websocket `?token=` query parameter to a
/// `UserIdentity`, since the upgrade request can't carry custom headers from
/// a browser `WebSocket` client.
pub async fn resolve_ws_token(app: &Arc<AppState>, token: &str) -> Option<UserIdentity> {
    if !app.config.scanner_admin_token.is_empty()
        && constant_time_eq(token.as_bytes(), app.config.scanner_admin_token.as_bytes())
    {
        return Some(UserIdentity { user_id: 0, email: app.config.scanner_admin_email.clone(), is_admin: true });
    }
    app.user_directory.resolve_token(token).await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_identical() {
        assert!(constant_time_eq(b"hello", b"hello"));
    }

    #[test]
    fn constant_time_eq_different() {
        assert!(!constant_time_eq(b"hello", b"world"));
    }

    #[test]
    fn constant_time_eq_different_lengths() {
        assert!(!constant_time_eq(b"short", b"longer_string"));
    }
}
