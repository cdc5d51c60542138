//! services/api/src/web/routes.rs
//!
//! Assembles the HTTP router.

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::error::ApiError;
use crate::web::{
    admin::{attach_video_handler, detach_video_handler},
    auth::{login_handler, logout_handler, me_handler, refresh_handler, signup_handler},
    middleware::authenticate,
    state::AppState,
    tracking::{course_progress_handler, record_attendance_handler, update_progress_handler},
    ws_handler::{authenticate_handshake, ws_handler},
};

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn router(state: Arc<AppState>) -> Router {
    // The upgrade request is checked before the WebSocket handler runs.
    let channel_routes = Router::new()
        .route("/ws", get(ws_handler))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            authenticate_handshake,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/refresh", post(refresh_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/me", get(me_handler))
        .route("/lectures/{lecture_id}/attendance", post(record_attendance_handler))
        .route("/lectures/{lecture_id}/progress", put(update_progress_handler))
        .route("/courses/{course_id}/progress", get(course_progress_handler))
        .route(
            "/admin/lectures/{lecture_id}/video/{video_id}",
            put(attach_video_handler),
        )
        .route("/admin/lectures/{lecture_id}/video", delete(detach_video_handler))
        .merge(channel_routes)
        .layer(axum_middleware::from_fn_with_state(state.clone(), authenticate))
        .with_state(state)
}

pub fn cors_layer(config: &Config) -> Result<CorsLayer, ApiError> {
    let origin = config
        .cors_allowed_origin
        .parse::<HeaderValue>()
        .map_err(|e| ApiError::Internal(format!("Invalid CORS origin: {}", e)))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]))
}
