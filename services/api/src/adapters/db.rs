//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use learnhub_core::domain::{
    AttendanceRecord, Enrollment, Lecture, LectureProgress, Role, User, UserCredentials,
};
use learnhub_core::ports::{DatabaseService, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use tracing::error;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    error!("Database operation failed: {:?}", e);
    PortError::Unexpected(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    email: String,
    role: String,
    password_hash: String,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<UserCredentials> {
        let role = Role::parse(&self.role).ok_or_else(|| {
            PortError::Unexpected(format!("User {} has unknown role {}", self.id, self.role))
        })?;
        Ok(UserCredentials {
            user_id: self.id,
            email: self.email,
            role,
            hashed_password: self.password_hash,
        })
    }
}

#[derive(FromRow)]
struct LectureRecord {
    id: Uuid,
    course_id: Uuid,
    title: String,
    video_id: Option<Uuid>,
    duration_seconds: i64,
}
impl LectureRecord {
    fn to_domain(self) -> Lecture {
        Lecture {
            id: self.id,
            course_id: self.course_id,
            title: self.title,
            video_id: self.video_id,
            duration_seconds: self.duration_seconds,
        }
    }
}

#[derive(FromRow)]
struct EnrollmentRecord {
    user_id: Uuid,
    course_id: Uuid,
    active: bool,
    enrolled_at: DateTime<Utc>,
}
impl EnrollmentRecord {
    fn to_domain(self) -> Enrollment {
        Enrollment {
            user_id: self.user_id,
            course_id: self.course_id,
            active: self.active,
            enrolled_at: self.enrolled_at,
        }
    }
}

#[derive(FromRow)]
struct AttendanceRow {
    id: Uuid,
    user_id: Uuid,
    course_id: Uuid,
    attended_on: NaiveDate,
    first_played_at: DateTime<Utc>,
    lecture_id: Uuid,
    client_ip: String,
    user_agent: String,
    attended: bool,
}
impl AttendanceRow {
    fn to_domain(self) -> AttendanceRecord {
        AttendanceRecord {
            id: self.id,
            user_id: self.user_id,
            course_id: self.course_id,
            attended_on: self.attended_on,
            first_played_at: self.first_played_at,
            lecture_id: self.lecture_id,
            client_ip: self.client_ip,
            user_agent: self.user_agent,
            attended: self.attended,
        }
    }
}

#[derive(FromRow)]
struct ProgressRecord {
    user_id: Uuid,
    lecture_id: Uuid,
    watched_seconds: i64,
    completed: bool,
    last_played_at: DateTime<Utc>,
    version: i64,
}
impl ProgressRecord {
    fn to_domain(self) -> LectureProgress {
        LectureProgress {
            user_id: self.user_id,
            lecture_id: self.lecture_id,
            watched_seconds: self.watched_seconds,
            completed: self.completed,
            last_played_at: self.last_played_at,
            version: self.version,
        }
    }
}

const LECTURE_COLUMNS: &str = r#"
    SELECT l.id, l.course_id, l.title, l.video_id,
           COALESCE(v.duration_seconds, 0)::BIGINT AS duration_seconds
    FROM lectures l
    LEFT JOIN video_assets v ON v.id = l.video_id
"#;

const PROGRESS_COLUMNS: &str =
    "user_id, lecture_id, watched_seconds, completed, last_played_at, version";

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_user(
        &self,
        email: &str,
        hashed_password: &str,
        role: Role,
    ) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (id, email, password_hash, role) VALUES ($1, $2, $3, $4)
             RETURNING id, email, role, password_hash",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(hashed_password)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                PortError::Duplicate(format!("User {} already exists", email))
            } else {
                unexpected(e)
            }
        })?;
        Ok(record.to_domain()?.to_user())
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<User> {
        Ok(self.get_credentials_by_email(email).await?.to_user())
    }

    async fn get_credentials_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        sqlx::query_as::<_, UserRecord>(
            "SELECT id, email, role, password_hash FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))?
        .to_domain()
    }

    async fn store_refresh_token(
        &self,
        subject: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO refresh_tokens (subject, token, expires_at, updated_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (subject) DO UPDATE
             SET token = EXCLUDED.token, expires_at = EXCLUDED.expires_at, updated_at = now()",
        )
        .bind(subject)
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_refresh_token(&self, subject: &str) -> PortResult<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT token FROM refresh_tokens WHERE subject = $1")
            .bind(subject)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)
    }

    async fn delete_refresh_token(&self, subject: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM refresh_tokens WHERE subject = $1")
            .bind(subject)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn get_lecture(&self, lecture_id: Uuid) -> PortResult<Lecture> {
        let query = format!("{} WHERE l.id = $1", LECTURE_COLUMNS);
        sqlx::query_as::<_, LectureRecord>(&query)
            .bind(lecture_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .map(LectureRecord::to_domain)
            .ok_or_else(|| PortError::NotFound(format!("Lecture {} not found", lecture_id)))
    }

    async fn get_course_lectures(&self, course_id: Uuid) -> PortResult<Vec<Lecture>> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM courses WHERE id = $1)",
        )
        .bind(course_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        if !exists {
            return Err(PortError::NotFound(format!("Course {} not found", course_id)));
        }

        let query = format!("{} WHERE l.course_id = $1 ORDER BY l.position, l.id", LECTURE_COLUMNS);
        let records = sqlx::query_as::<_, LectureRecord>(&query)
            .bind(course_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(LectureRecord::to_domain).collect())
    }

    async fn attach_video(&self, lecture_id: Uuid, video_id: Uuid) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        sqlx::query_scalar::<_, Option<Uuid>>(
            "SELECT video_id FROM lectures WHERE id = $1 FOR UPDATE",
        )
        .bind(lecture_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Lecture {} not found", lecture_id)))?;

        let owner = sqlx::query_scalar::<_, Option<Uuid>>(
            "SELECT lecture_id FROM video_assets WHERE id = $1 FOR UPDATE",
        )
        .bind(video_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Video {} not found", video_id)))?;

        if let Some(owner) = owner.filter(|owner| *owner != lecture_id) {
            return Err(PortError::Conflict(format!(
                "Video {} is attached to lecture {}",
                video_id, owner
            )));
        }

        sqlx::query("UPDATE video_assets SET lecture_id = NULL WHERE lecture_id = $1 AND id <> $2")
            .bind(lecture_id)
            .bind(video_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        sqlx::query("UPDATE video_assets SET lecture_id = $1 WHERE id = $2")
            .bind(lecture_id)
            .bind(video_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        sqlx::query("UPDATE lectures SET video_id = $1 WHERE id = $2")
            .bind(video_id)
            .bind(lecture_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)
    }

    async fn detach_video(&self, lecture_id: Uuid) -> PortResult<Option<Uuid>> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let detached = sqlx::query_scalar::<_, Option<Uuid>>(
            "SELECT video_id FROM lectures WHERE id = $1 FOR UPDATE",
        )
        .bind(lecture_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Lecture {} not found", lecture_id)))?;

        if let Some(video_id) = detached {
            sqlx::query("UPDATE lectures SET video_id = NULL WHERE id = $1")
                .bind(lecture_id)
                .execute(&mut *tx)
                .await
                .map_err(unexpected)?;
            sqlx::query("UPDATE video_assets SET lecture_id = NULL WHERE id = $1")
                .bind(video_id)
                .execute(&mut *tx)
                .await
                .map_err(unexpected)?;
        }

        tx.commit().await.map_err(unexpected)?;
        Ok(detached)
    }

    async fn find_enrollment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> PortResult<Option<Enrollment>> {
        let record = sqlx::query_as::<_, EnrollmentRecord>(
            "SELECT user_id, course_id, active, enrolled_at FROM enrollments
             WHERE user_id = $1 AND course_id = $2",
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(EnrollmentRecord::to_domain))
    }

    async fn find_attendance(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        day: NaiveDate,
    ) -> PortResult<Option<AttendanceRecord>> {
        let record = sqlx::query_as::<_, AttendanceRow>(
            "SELECT id, user_id, course_id, attended_on, first_played_at, lecture_id,
                    client_ip, user_agent, attended
             FROM attendance_records
             WHERE user_id = $1 AND course_id = $2 AND attended_on = $3",
        )
        .bind(user_id)
        .bind(course_id)
        .bind(day)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(AttendanceRow::to_domain))
    }

    async fn insert_attendance(&self, record: &AttendanceRecord) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO attendance_records
                (id, user_id, course_id, attended_on, first_played_at, lecture_id,
                 client_ip, user_agent, attended)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.course_id)
        .bind(record.attended_on)
        .bind(record.first_played_at)
        .bind(record.lecture_id)
        .bind(&record.client_ip)
        .bind(&record.user_agent)
        .bind(record.attended)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                PortError::Duplicate(format!(
                    "Attendance for user {} course {} on {} exists",
                    record.user_id, record.course_id, record.attended_on
                ))
            } else {
                unexpected(e)
            }
        })?;
        Ok(())
    }

    async fn load_or_create_progress(
        &self,
        user_id: Uuid,
        lecture_id: Uuid,
    ) -> PortResult<LectureProgress> {
        sqlx::query(
            "INSERT INTO lecture_progress
                (user_id, lecture_id, watched_seconds, completed, last_played_at, version)
             VALUES ($1, $2, 0, FALSE, now(), 0)
             ON CONFLICT (user_id, lecture_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(lecture_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        self.get_progress(user_id, lecture_id).await?.ok_or_else(|| {
            PortError::InconsistentState(format!(
                "progress for user {} lecture {} missing after insert",
                user_id, lecture_id
            ))
        })
    }

    async fn compare_and_set_progress(
        &self,
        progress: &LectureProgress,
        expected_version: i64,
    ) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE lecture_progress
             SET watched_seconds = $3, completed = $4, last_played_at = $5, version = version + 1
             WHERE user_id = $1 AND lecture_id = $2 AND version = $6",
        )
        .bind(progress.user_id)
        .bind(progress.lecture_id)
        .bind(progress.watched_seconds)
        .bind(progress.completed)
        .bind(progress.last_played_at)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_progress(
        &self,
        user_id: Uuid,
        lecture_id: Uuid,
    ) -> PortResult<Option<LectureProgress>> {
        let query = format!(
            "SELECT {} FROM lecture_progress WHERE user_id = $1 AND lecture_id = $2",
            PROGRESS_COLUMNS
        );
        let record = sqlx::query_as::<_, ProgressRecord>(&query)
            .bind(user_id)
            .bind(lecture_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(record.map(ProgressRecord::to_domain))
    }

    async fn get_course_progress(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> PortResult<Vec<LectureProgress>> {
        let records = sqlx::query_as::<_, ProgressRecord>(
            "SELECT p.user_id, p.lecture_id, p.watched_seconds, p.completed,
                    p.last_played_at, p.version
             FROM lecture_progress p
             JOIN lectures l ON l.id = p.lecture_id
             WHERE p.user_id = $1 AND l.course_id = $2",
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(ProgressRecord::to_domain).collect())
    }
}
