//! crates/learnhub_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

//=========================================================================================
// Identity
//=========================================================================================

/// A role granted to an account and carried inside its access credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Member,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Admin => "admin",
        }
    }

    /// Parses the stored/claimed form of a role. Unknown names yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "member" => Some(Role::Member),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// The identity resolved from a validated credential.
///
/// Never persisted: it is rebuilt from the credential on every request and
/// on every channel connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable user-identifying string (the account email).
    pub subject: String,
    pub roles: Vec<Role>,
}

impl Identity {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Which of the two credential flavours a token claims to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Access,
    Refresh,
}

/// A freshly signed credential together with its expiry.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

// Represents a user - used throughout app
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub hashed_password: String,
}

impl UserCredentials {
    pub fn to_user(&self) -> User {
        User {
            user_id: self.user_id,
            email: self.email.clone(),
            role: self.role,
        }
    }
}

//=========================================================================================
// Catalog (read-only for the tracking core)
//=========================================================================================

/// A lecture as seen by the tracking core. `duration_seconds` is the
/// duration of the attached video asset, or 0 when none is attached.
#[derive(Debug, Clone)]
pub struct Lecture {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub video_id: Option<Uuid>,
    pub duration_seconds: i64,
}

/// A stored video file. Linked to at most one lecture through `lecture_id`;
/// the lecture links back through its own `video_id`.
#[derive(Debug, Clone)]
pub struct VideoAsset {
    pub id: Uuid,
    pub lecture_id: Option<Uuid>,
    pub storage_key: String,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct Enrollment {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub active: bool,
    pub enrolled_at: DateTime<Utc>,
}

//=========================================================================================
// Tracking
//=========================================================================================

/// One row per (user, course, reference-timezone day).
#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub attended_on: NaiveDate,
    pub first_played_at: DateTime<Utc>,
    pub lecture_id: Uuid,
    pub client_ip: String,
    pub user_agent: String,
    pub attended: bool,
}

/// Watch position state for a (user, lecture) pair.
///
/// `version` is bumped by the store on every successful write and is what
/// compare-and-set updates are checked against.
#[derive(Debug, Clone, PartialEq)]
pub struct LectureProgress {
    pub user_id: Uuid,
    pub lecture_id: Uuid,
    pub watched_seconds: i64,
    pub completed: bool,
    pub last_played_at: DateTime<Utc>,
    pub version: i64,
}

/// The triggering lecture's part of a course snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct LectureProgressSnapshot {
    pub lecture_id: Uuid,
    pub watched_seconds: i64,
    pub ratio: f64,
    pub completed: bool,
}

/// Course-level completion derived from `LectureProgress` rows. Not a source
/// of truth; recomputed on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseProgressSnapshot {
    pub course_id: Uuid,
    pub ratio: f64,
    pub completed_lectures: usize,
    pub total_lectures: usize,
    pub lecture: Option<LectureProgressSnapshot>,
}
