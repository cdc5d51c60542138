//! services/api/src/web/tracking.rs
//!
//! Playback tracking endpoints: daily attendance, lecture progress, and the
//! course progress snapshot.

use axum::{
    extract::{ConnectInfo, FromRequestParts, Path, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    Json,
};
use learnhub_core::authz;
use learnhub_core::ports::ProgressPublisher;
use learnhub_core::{AttendanceOutcome, ClientInfo};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::middleware::CurrentIdentity;
use crate::web::protocol::CourseProgressView;
use crate::web::state::AppState;

//=========================================================================================
// Client Metadata
//=========================================================================================

/// Resolves the caller's address: first hop of `X-Forwarded-For`, then
/// `X-Real-IP`, then the socket peer.
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(first) = header_value("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real_ip) = header_value("x-real-ip") {
        return real_ip.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Address and user agent of the calling client.
#[derive(Debug, Clone)]
pub struct RequestClient(pub ClientInfo);

impl<S> FromRequestParts<S> for RequestClient
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Ok(RequestClient(ClientInfo {
            ip: resolve_client_ip(&parts.headers, peer),
            user_agent,
        }))
    }
}

//=========================================================================================
// Request Types
//=========================================================================================

#[derive(Deserialize, Debug)]
pub struct ProgressUpdateRequest {
    /// Playback position reported by the player, in seconds.
    pub watched_seconds: i64,
    #[serde(default)]
    pub completed: Option<bool>,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /lectures/{lecture_id}/attendance - Record the first playback of the day
pub async fn record_attendance_handler(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(lecture_id): Path<Uuid>,
    RequestClient(client): RequestClient,
) -> Result<StatusCode, ApiError> {
    let user = state.current_user(&identity).await?;

    match state
        .attendance_tracker()
        .record_first_playback_of_day(user.user_id, lecture_id, &client)
        .await?
    {
        AttendanceOutcome::Recorded(record) => {
            info!(
                "Attendance for {} in course {} on {}",
                user.email, record.course_id, record.attended_on
            );
        }
        AttendanceOutcome::AlreadyRecorded => {
            debug!("Attendance for {} already recorded today", user.email);
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /lectures/{lecture_id}/progress - Report playback position
///
/// Persists the new position, recomputes the course snapshot and pushes it to
/// the caller's own channel sessions before returning it.
pub async fn update_progress_handler(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(lecture_id): Path<Uuid>,
    Json(req): Json<ProgressUpdateRequest>,
) -> Result<Json<CourseProgressView>, ApiError> {
    let user = state.current_user(&identity).await?;

    // 1. Resolve the lecture and check the caller may track its course
    let lecture = state.db.get_lecture(lecture_id).await?;
    let enrollment = state.db.find_enrollment(user.user_id, lecture.course_id).await?;
    authz::can_track_course(user.user_id, lecture.course_id, enrollment.as_ref())
        .into_result(&format!("course {}", lecture.course_id))?;

    // 2. Persist the progress
    let progress = state
        .progress_tracker()
        .apply_progress(
            user.user_id,
            lecture_id,
            req.watched_seconds,
            lecture.duration_seconds,
            state.config.completion_threshold,
            req.completed.unwrap_or(false),
        )
        .await?;

    // 3. Recompute and push the course snapshot
    let snapshot = state
        .aggregator()
        .snapshot(user.user_id, lecture.course_id, Some((&lecture, &progress)))
        .await?;
    state.broker.publish(&identity.subject, &snapshot).await;

    Ok(Json(CourseProgressView::from(&snapshot)))
}

/// GET /courses/{course_id}/progress - Current course snapshot for the caller
pub async fn course_progress_handler(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(course_id): Path<Uuid>,
) -> Result<Json<CourseProgressView>, ApiError> {
    let user = state.current_user(&identity).await?;

    // Unknown course is a 404 before enrollment is considered.
    state.db.get_course_lectures(course_id).await?;

    let enrollment = state.db.find_enrollment(user.user_id, course_id).await?;
    authz::can_track_course(user.user_id, course_id, enrollment.as_ref())
        .into_result(&format!("course {}", course_id))?;

    let snapshot = state.aggregator().snapshot(user.user_id, course_id, None).await?;
    Ok(Json(CourseProgressView::from(&snapshot)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some("10.0.0.7:51234".parse().unwrap())
    }

    #[test]
    fn forwarded_for_wins_and_uses_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" 203.0.113.9 , 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(resolve_client_ip(&headers, peer()), "203.0.113.9");
    }

    #[test]
    fn falls_back_to_real_ip_then_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(resolve_client_ip(&headers, peer()), "198.51.100.2");

        let headers = HeaderMap::new();
        assert_eq!(resolve_client_ip(&headers, peer()), "10.0.0.7");
        assert_eq!(resolve_client_ip(&headers, None), "unknown");

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" , "));
        assert_eq!(resolve_client_ip(&headers, peer()), "10.0.0.7");
    }
}
