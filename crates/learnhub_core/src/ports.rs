//! crates/learnhub_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases,
//! token formats or the real-time channel.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::domain::{
    AttendanceRecord, CourseProgressSnapshot, CredentialKind, Enrollment, Identity,
    IssuedCredential, Lecture, LectureProgress, Role, User, UserCredentials,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// The credential failed signature, format, kind or expiry checks.
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Access denied: {0}")]
    AccessDenied(String),
    /// A uniqueness constraint rejected an insert.
    #[error("Duplicate: {0}")]
    Duplicate(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    /// A write reported success but the row could not be read back.
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- User Management ---
    /// Fails with `Duplicate` when the email is already registered.
    async fn create_user(&self, email: &str, hashed_password: &str, role: Role)
        -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<User>;

    async fn get_credentials_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    // --- Refresh Credentials (one active row per subject) ---
    /// Stores `token` as the single active refresh credential of `subject`,
    /// replacing any previous one.
    async fn store_refresh_token(
        &self,
        subject: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn get_refresh_token(&self, subject: &str) -> PortResult<Option<String>>;

    async fn delete_refresh_token(&self, subject: &str) -> PortResult<()>;

    // --- Catalog (read-only apart from video linkage) ---
    async fn get_lecture(&self, lecture_id: Uuid) -> PortResult<Lecture>;

    /// All lectures of a course. Fails with `NotFound` when the course does not exist.
    async fn get_course_lectures(&self, course_id: Uuid) -> PortResult<Vec<Lecture>>;

    /// Links a video asset and a lecture, updating the stored key on both sides.
    async fn attach_video(&self, lecture_id: Uuid, video_id: Uuid) -> PortResult<()>;

    /// Unlinks the lecture's video asset (if any) on both sides and returns its id.
    async fn detach_video(&self, lecture_id: Uuid) -> PortResult<Option<Uuid>>;

    // --- Enrollment ---
    async fn find_enrollment(&self, user_id: Uuid, course_id: Uuid)
        -> PortResult<Option<Enrollment>>;

    // --- Attendance ---
    async fn find_attendance(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        day: NaiveDate,
    ) -> PortResult<Option<AttendanceRecord>>;

    /// Fails with `Duplicate` when a record for the same (user, course, day) exists.
    async fn insert_attendance(&self, record: &AttendanceRecord) -> PortResult<()>;

    // --- Lecture Progress ---
    /// Returns the row for (user, lecture), creating it with zero progress first if needed.
    async fn load_or_create_progress(
        &self,
        user_id: Uuid,
        lecture_id: Uuid,
    ) -> PortResult<LectureProgress>;

    /// Writes `progress` only if the stored row still has `expected_version`,
    /// bumping the version. Returns whether the write happened.
    async fn compare_and_set_progress(
        &self,
        progress: &LectureProgress,
        expected_version: i64,
    ) -> PortResult<bool>;

    async fn get_progress(
        &self,
        user_id: Uuid,
        lecture_id: Uuid,
    ) -> PortResult<Option<LectureProgress>>;

    /// All of the user's progress rows for lectures of the course.
    async fn get_course_progress(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> PortResult<Vec<LectureProgress>>;
}

/// Issues and validates signed, time-bounded credentials.
///
/// Implementations hold nothing but a signing key, so every method is pure.
pub trait TokenService: Send + Sync {
    fn issue_access(&self, subject: &str, roles: &[Role]) -> PortResult<IssuedCredential>;

    fn issue_refresh(&self, subject: &str) -> PortResult<IssuedCredential>;

    /// Fails with `Unauthorized` on a bad signature, malformed token, expiry
    /// in the past, or a credential of the other kind.
    fn validate(&self, token: &str, kind: CredentialKind) -> PortResult<Identity>;

    /// Time left before expiry; `None` if the credential is already invalid.
    fn remaining_lifetime(&self, token: &str) -> Option<Duration>;
}

#[async_trait]
pub trait ProgressPublisher: Send + Sync {
    /// Fire-and-forget delivery of a snapshot to every live session of
    /// `principal`. Returns how many sessions it was handed to.
    async fn publish(&self, principal: &str, snapshot: &CourseProgressSnapshot) -> usize;
}
