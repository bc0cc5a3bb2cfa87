//! Tenant auth middleware — verifies the bearer JWT and writes the
//! tenant's `user_id` into request extensions. This crate has no
//! role/permission system to enforce, only tenant isolation: every
//! downstream store query and file lookup is scoped by this `user_id`.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::utils::{ApiError, JwtUtil};

#[derive(Clone)]
pub struct AuthState {
    pub jwt_util: Arc<JwtUtil>,
}

/// The authenticated tenant, inserted into request extensions for handlers
/// to pull out with `Extension<UserContext>`.
#[derive(Clone, Debug)]
pub struct UserContext {
    pub user_id: String,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let uri = req.uri().to_string();
    let method = req.method().to_string();

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing authorization header for {} {}", method, uri);
            ApiError::unauthorized("Missing authorization header")
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::warn!("Invalid authorization header format for {} {}", method, uri);
        ApiError::unauthorized("Invalid authorization header format")
    })?;

    let claims = state.jwt_util.verify_token(token).map_err(|err| {
        tracing::warn!("JWT verification failed for {} {}: {:?}", method, uri, err);
        err
    })?;

    tracing::debug!("Authenticated user {} on {} {}", claims.sub, method, uri);

    req.extensions_mut().insert(UserContext { user_id: claims.sub });

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest, routing::get, Router};
    use tower::ServiceExt;

    fn app(jwt_util: Arc<JwtUtil>) -> Router {
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(axum::middleware::from_fn_with_state(
                AuthState { jwt_util },
                auth_middleware,
            ))
    }

    #[tokio::test]
    async fn rejects_missing_authorization_header() {
        let jwt_util = Arc::new(JwtUtil::new("secret", 3600));
        let response = app(jwt_util)
            .oneshot(HttpRequest::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn accepts_valid_bearer_token() {
        let jwt_util = Arc::new(JwtUtil::new("secret", 3600));
        let token = jwt_util.issue_token("u1").unwrap();
        let response = app(jwt_util)
            .oneshot(
                HttpRequest::builder()
                    .uri("/ping")
                    .header("Authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
