//! services/api/src/web/admin.rs
//!
//! Catalog management endpoints. Admin role required.

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use learnhub_core::authz;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::middleware::CurrentIdentity;
use crate::web::state::AppState;

/// PUT /admin/lectures/{lecture_id}/video/{video_id} - Attach a video asset
pub async fn attach_video_handler(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    Path((lecture_id, video_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    authz::can_manage_catalog(&identity).into_result("catalog")?;

    state.db.attach_video(lecture_id, video_id).await?;
    info!("{} attached video {} to lecture {}", identity.subject, video_id, lecture_id);
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /admin/lectures/{lecture_id}/video - Detach the lecture's video asset
pub async fn detach_video_handler(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(lecture_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    authz::can_manage_catalog(&identity).into_result("catalog")?;

    match state.db.detach_video(lecture_id).await? {
        Some(video_id) => info!(
            "{} detached video {} from lecture {}",
            identity.subject, video_id, lecture_id
        ),
        None => info!("Lecture {} had no video to detach", lecture_id),
    }
    Ok(StatusCode::NO_CONTENT)
}
