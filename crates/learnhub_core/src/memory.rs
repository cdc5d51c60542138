//! crates/learnhub_core/src/memory.rs
//!
//! An in-process `DatabaseService` for tests (`test-support` feature). It keeps
//! the same rules the SQL schema enforces: unique emails, one attendance row
//! per (user, course, day), one progress row per (user, lecture), and
//! version-checked progress writes.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    AttendanceRecord, Enrollment, Lecture, LectureProgress, Role, User, UserCredentials,
    VideoAsset,
};
use crate::ports::{DatabaseService, PortError, PortResult};

#[derive(Debug, Clone)]
struct LectureRow {
    id: Uuid,
    course_id: Uuid,
    title: String,
    video_id: Option<Uuid>,
}

#[derive(Default)]
struct Tables {
    users: HashMap<String, UserCredentials>,
    refresh_tokens: HashMap<String, (String, DateTime<Utc>)>,
    courses: HashMap<Uuid, String>,
    lectures: HashMap<Uuid, LectureRow>,
    videos: HashMap<Uuid, VideoAsset>,
    enrollments: HashMap<(Uuid, Uuid), Enrollment>,
    attendance: HashMap<(Uuid, Uuid, NaiveDate), AttendanceRecord>,
    progress: HashMap<(Uuid, Uuid), LectureProgress>,
    course_progress_reads: usize,
}

impl Tables {
    fn lecture(&self, row: &LectureRow) -> Lecture {
        let duration_seconds = row
            .video_id
            .and_then(|id| self.videos.get(&id))
            .map(|v| v.duration_seconds)
            .unwrap_or(0);
        Lecture {
            id: row.id,
            course_id: row.course_id,
            title: row.title.clone(),
            video_id: row.video_id,
            duration_seconds,
        }
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get_course_progress` calls served so far.
    pub async fn course_progress_reads(&self) -> usize {
        self.tables.lock().await.course_progress_reads
    }

    pub async fn add_course(&self, title: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.tables.lock().await.courses.insert(id, title.to_string());
        id
    }

    /// Adds an unattached video asset.
    pub async fn add_video(&self, duration_seconds: i64) -> Uuid {
        let id = Uuid::new_v4();
        self.tables.lock().await.videos.insert(
            id,
            VideoAsset {
                id,
                lecture_id: None,
                storage_key: format!("videos/{id}.mp4"),
                duration_seconds,
            },
        );
        id
    }

    /// Adds a lecture with a freshly attached video of the given duration.
    pub async fn add_lecture(&self, course_id: Uuid, title: &str, duration_seconds: i64) -> Uuid {
        let video_id = self.add_video(duration_seconds).await;
        let id = Uuid::new_v4();
        let mut tables = self.tables.lock().await;
        tables.lectures.insert(
            id,
            LectureRow {
                id,
                course_id,
                title: title.to_string(),
                video_id: Some(video_id),
            },
        );
        if let Some(video) = tables.videos.get_mut(&video_id) {
            video.lecture_id = Some(id);
        }
        id
    }

    pub async fn enroll(&self, user_id: Uuid, course_id: Uuid, active: bool) {
        self.tables.lock().await.enrollments.insert(
            (user_id, course_id),
            Enrollment {
                user_id,
                course_id,
                active,
                enrolled_at: Utc::now(),
            },
        );
    }

    pub async fn video(&self, video_id: Uuid) -> Option<VideoAsset> {
        self.tables.lock().await.videos.get(&video_id).cloned()
    }

    pub async fn attendance_count(&self, user_id: Uuid, course_id: Uuid) -> usize {
        self.tables
            .lock()
            .await
            .attendance
            .keys()
            .filter(|(u, c, _)| *u == user_id && *c == course_id)
            .count()
    }
}

#[async_trait]
impl DatabaseService for InMemoryStore {
    async fn create_user(
        &self,
        email: &str,
        hashed_password: &str,
        role: Role,
    ) -> PortResult<User> {
        let mut tables = self.tables.lock().await;
        if tables.users.contains_key(email) {
            return Err(PortError::Duplicate(format!("User {} already exists", email)));
        }
        let creds = UserCredentials {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            role,
            hashed_password: hashed_password.to_string(),
        };
        let user = creds.to_user();
        tables.users.insert(email.to_string(), creds);
        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<User> {
        self.get_credentials_by_email(email).await.map(|c| c.to_user())
    }

    async fn get_credentials_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        self.tables
            .lock()
            .await
            .users
            .get(email)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))
    }

    async fn store_refresh_token(
        &self,
        subject: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.tables
            .lock()
            .await
            .refresh_tokens
            .insert(subject.to_string(), (token.to_string(), expires_at));
        Ok(())
    }

    async fn get_refresh_token(&self, subject: &str) -> PortResult<Option<String>> {
        Ok(self
            .tables
            .lock()
            .await
            .refresh_tokens
            .get(subject)
            .map(|(token, _)| token.clone()))
    }

    async fn delete_refresh_token(&self, subject: &str) -> PortResult<()> {
        self.tables.lock().await.refresh_tokens.remove(subject);
        Ok(())
    }

    async fn get_lecture(&self, lecture_id: Uuid) -> PortResult<Lecture> {
        let tables = self.tables.lock().await;
        tables
            .lectures
            .get(&lecture_id)
            .map(|row| tables.lecture(row))
            .ok_or_else(|| PortError::NotFound(format!("Lecture {} not found", lecture_id)))
    }

    async fn get_course_lectures(&self, course_id: Uuid) -> PortResult<Vec<Lecture>> {
        let tables = self.tables.lock().await;
        if !tables.courses.contains_key(&course_id) {
            return Err(PortError::NotFound(format!("Course {} not found", course_id)));
        }
        Ok(tables
            .lectures
            .values()
            .filter(|row| row.course_id == course_id)
            .map(|row| tables.lecture(row))
            .collect())
    }

    async fn attach_video(&self, lecture_id: Uuid, video_id: Uuid) -> PortResult<()> {
        let mut tables = self.tables.lock().await;
        let previous = tables
            .lectures
            .get(&lecture_id)
            .ok_or_else(|| PortError::NotFound(format!("Lecture {} not found", lecture_id)))?
            .video_id;
        let video = tables
            .videos
            .get(&video_id)
            .ok_or_else(|| PortError::NotFound(format!("Video {} not found", video_id)))?;
        if let Some(owner) = video.lecture_id {
            if owner != lecture_id {
                return Err(PortError::Conflict(format!(
                    "Video {} is attached to lecture {}",
                    video_id, owner
                )));
            }
        }

        if let Some(old) = previous.filter(|old| *old != video_id) {
            if let Some(old_video) = tables.videos.get_mut(&old) {
                old_video.lecture_id = None;
            }
        }
        if let Some(video) = tables.videos.get_mut(&video_id) {
            video.lecture_id = Some(lecture_id);
        }
        if let Some(lecture) = tables.lectures.get_mut(&lecture_id) {
            lecture.video_id = Some(video_id);
        }
        Ok(())
    }

    async fn detach_video(&self, lecture_id: Uuid) -> PortResult<Option<Uuid>> {
        let mut tables = self.tables.lock().await;
        let lecture = tables
            .lectures
            .get_mut(&lecture_id)
            .ok_or_else(|| PortError::NotFound(format!("Lecture {} not found", lecture_id)))?;
        let detached = lecture.video_id.take();
        if let Some(video) = detached.and_then(|id| tables.videos.get_mut(&id)) {
            video.lecture_id = None;
        }
        Ok(detached)
    }

    async fn find_enrollment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> PortResult<Option<Enrollment>> {
        Ok(self
            .tables
            .lock()
            .await
            .enrollments
            .get(&(user_id, course_id))
            .cloned())
    }

    async fn find_attendance(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        day: NaiveDate,
    ) -> PortResult<Option<AttendanceRecord>> {
        Ok(self
            .tables
            .lock()
            .await
            .attendance
            .get(&(user_id, course_id, day))
            .cloned())
    }

    async fn insert_attendance(&self, record: &AttendanceRecord) -> PortResult<()> {
        let mut tables = self.tables.lock().await;
        let key = (record.user_id, record.course_id, record.attended_on);
        if tables.attendance.contains_key(&key) {
            return Err(PortError::Duplicate(format!(
                "Attendance for user {} course {} on {} exists",
                record.user_id, record.course_id, record.attended_on
            )));
        }
        tables.attendance.insert(key, record.clone());
        Ok(())
    }

    async fn load_or_create_progress(
        &self,
        user_id: Uuid,
        lecture_id: Uuid,
    ) -> PortResult<LectureProgress> {
        let mut tables = self.tables.lock().await;
        let row = tables
            .progress
            .entry((user_id, lecture_id))
            .or_insert_with(|| LectureProgress {
                user_id,
                lecture_id,
                watched_seconds: 0,
                completed: false,
                last_played_at: Utc::now(),
                version: 0,
            });
        Ok(row.clone())
    }

    async fn compare_and_set_progress(
        &self,
        progress: &LectureProgress,
        expected_version: i64,
    ) -> PortResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.progress.get_mut(&(progress.user_id, progress.lecture_id)) {
            Some(row) if row.version == expected_version => {
                row.watched_seconds = progress.watched_seconds;
                row.completed = progress.completed;
                row.last_played_at = progress.last_played_at;
                row.version = expected_version + 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_progress(
        &self,
        user_id: Uuid,
        lecture_id: Uuid,
    ) -> PortResult<Option<LectureProgress>> {
        Ok(self
            .tables
            .lock()
            .await
            .progress
            .get(&(user_id, lecture_id))
            .cloned())
    }

    async fn get_course_progress(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> PortResult<Vec<LectureProgress>> {
        let mut tables = self.tables.lock().await;
        tables.course_progress_reads += 1;
        Ok(tables
            .progress
            .values()
            .filter(|p| p.user_id == user_id)
            .filter(|p| {
                tables
                    .lectures
                    .get(&p.lecture_id)
                    .is_some_and(|l| l.course_id == course_id)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attach_replaces_previous_video_on_both_sides() {
        let store = InMemoryStore::new();
        let course = store.add_course("Rust").await;
        let lecture = store.add_lecture(course, "Ownership", 120).await;
        let old_video = store.get_lecture(lecture).await.unwrap().video_id.unwrap();
        let new_video = store.add_video(300).await;

        store.attach_video(lecture, new_video).await.unwrap();

        let reloaded = store.get_lecture(lecture).await.unwrap();
        assert_eq!(reloaded.video_id, Some(new_video));
        assert_eq!(reloaded.duration_seconds, 300);
        assert_eq!(store.video(new_video).await.unwrap().lecture_id, Some(lecture));
        assert_eq!(store.video(old_video).await.unwrap().lecture_id, None);
    }

    #[tokio::test]
    async fn attach_refuses_video_owned_by_another_lecture() {
        let store = InMemoryStore::new();
        let course = store.add_course("Rust").await;
        let first = store.add_lecture(course, "One", 60).await;
        let second = store.add_lecture(course, "Two", 60).await;
        let first_video = store.get_lecture(first).await.unwrap().video_id.unwrap();

        let result = store.attach_video(second, first_video).await;
        assert!(matches!(result, Err(PortError::Conflict(_))));
    }

    #[tokio::test]
    async fn detach_clears_both_keys() {
        let store = InMemoryStore::new();
        let course = store.add_course("Rust").await;
        let lecture = store.add_lecture(course, "Traits", 90).await;

        let detached = store.detach_video(lecture).await.unwrap().unwrap();

        let reloaded = store.get_lecture(lecture).await.unwrap();
        assert_eq!(reloaded.video_id, None);
        assert_eq!(reloaded.duration_seconds, 0);
        assert_eq!(store.video(detached).await.unwrap().lecture_id, None);
        assert_eq!(store.detach_video(lecture).await.unwrap(), None);
    }

    #[tokio::test]
    async fn stale_version_write_is_rejected() {
        let store = InMemoryStore::new();
        let (user, lecture) = (Uuid::new_v4(), Uuid::new_v4());
        let row = store.load_or_create_progress(user, lecture).await.unwrap();

        let mut next = row.clone();
        next.watched_seconds = 10;
        assert!(store.compare_and_set_progress(&next, row.version).await.unwrap());
        next.watched_seconds = 5;
        assert!(!store.compare_and_set_progress(&next, row.version).await.unwrap());

        let stored = store.get_progress(user, lecture).await.unwrap().unwrap();
        assert_eq!(stored.watched_seconds, 10);
        assert_eq!(stored.version, row.version + 1);
    }
}
