//! services/api/src/web/middleware.rs
//!
//! Per-request authentication.
//!
//! `authenticate` runs on every route. It never rejects a request on its own:
//! it either attaches the caller's `Identity` to the request extensions or
//! leaves the request anonymous. Handlers that need a caller take the
//! `CurrentIdentity` extractor, which turns an anonymous request into a 401.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use learnhub_core::domain::{CredentialKind, Identity};
use learnhub_core::ports::PortError;
use std::sync::Arc;
use tracing::debug;

use crate::error::ApiError;
use crate::web::state::AppState;

/// Path prefixes that are served without looking at credentials.
pub const EXEMPT_PATH_PREFIXES: &[&str] = &[
    "/auth/",
    "/oauth2/",
    "/login/oauth2/",
    "/swagger-ui",
    "/api-docs",
    "/health",
];

pub fn is_exempt(path: &str) -> bool {
    EXEMPT_PATH_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Middleware that attaches the caller's identity when a valid access token is
/// presented. Invalid or missing credentials leave the request anonymous.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    // Nothing upstream may smuggle an identity in.
    req.extensions_mut().remove::<Identity>();

    if is_exempt(req.uri().path()) {
        return next.run(req).await;
    }

    let validated = bearer_token(req.headers())
        .map(|token| state.tokens.validate(token, CredentialKind::Access));
    if let Some(result) = validated {
        match result {
            Ok(identity) => {
                debug!("Request authenticated as {}", identity.subject);
                req.extensions_mut().insert(identity);
            }
            Err(e) => debug!("Ignoring invalid bearer credential: {}", e),
        }
    }

    next.run(req).await
}

//=========================================================================================
// Extractors
//=========================================================================================

/// The authenticated caller. Rejects anonymous requests with 401.
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Identity);

impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(CurrentIdentity)
            .ok_or(ApiError::Port(PortError::Unauthorized))
    }
}
