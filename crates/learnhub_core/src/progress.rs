//! crates/learnhub_core/src/progress.rs
//!
//! Per (user, lecture) watch-position state machine.
//!
//! A reported position is capped at the lecture duration and only ever raises
//! the stored high-water mark. The row flips to `completed` once the
//! completion threshold is reached (or the client says so). Completion is
//! sticky and lifts `watched_seconds` to at least the duration.
//!
//! `watched_seconds` never decreases, not even when a shorter video is
//! attached to the lecture later. Ratios cap it at the current duration.
//!
//! Writes go through a version-checked compare-and-set so two concurrent
//! reports for the same row cannot drop each other's advance.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::LectureProgress;
use crate::ports::{DatabaseService, PortError, PortResult};

/// How many times a lost compare-and-set is retried before giving up.
pub const MAX_WRITE_ATTEMPTS: usize = 5;

/// One playback report from a client.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackReport {
    pub position_seconds: i64,
    pub duration_seconds: i64,
    pub completion_threshold: f64,
    pub client_claims_completed: bool,
}

impl PlaybackReport {
    /// Durations of zero or less are treated as one second.
    pub fn effective_duration(&self) -> i64 {
        self.duration_seconds.max(1)
    }
}

/// Applies a report to the current row and returns the next state.
/// The version is left untouched; the store bumps it on write.
pub fn advance(current: &LectureProgress, report: &PlaybackReport, now: DateTime<Utc>) -> LectureProgress {
    let duration = report.effective_duration();
    let clamped = current
        .watched_seconds
        .max(report.position_seconds.min(duration));

    let reached_threshold = clamped as f64 / duration as f64 >= report.completion_threshold;
    let completed = current.completed || report.client_claims_completed || reached_threshold;

    LectureProgress {
        user_id: current.user_id,
        lecture_id: current.lecture_id,
        watched_seconds: if completed { clamped.max(duration) } else { clamped },
        completed,
        last_played_at: now,
        version: current.version,
    }
}

/// Watched fraction of a single lecture, in `[0, 1]`.
pub fn lecture_ratio(progress: &LectureProgress, duration_seconds: i64) -> f64 {
    let duration = duration_seconds.max(1);
    (progress.watched_seconds.min(duration) as f64 / duration as f64).clamp(0.0, 1.0)
}

#[derive(Clone)]
pub struct ProgressTracker {
    db: Arc<dyn DatabaseService>,
}

impl ProgressTracker {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    /// Records a reported playback position for (user, lecture) and returns
    /// the row as persisted.
    pub async fn apply_progress(
        &self,
        user_id: Uuid,
        lecture_id: Uuid,
        reported_position_seconds: i64,
        duration_seconds: i64,
        completion_threshold: f64,
        client_claims_completed: bool,
    ) -> PortResult<LectureProgress> {
        let report = PlaybackReport {
            position_seconds: reported_position_seconds,
            duration_seconds,
            completion_threshold,
            client_claims_completed,
        };

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.db.load_or_create_progress(user_id, lecture_id).await?;
            let next = advance(&current, &report, Utc::now());

            if self.db.compare_and_set_progress(&next, current.version).await? {
                return self
                    .db
                    .get_progress(user_id, lecture_id)
                    .await?
                    .ok_or_else(|| {
                        PortError::InconsistentState(format!(
                            "progress for user {} lecture {} vanished after write",
                            user_id, lecture_id
                        ))
                    });
            }
            debug!(%user_id, %lecture_id, attempt, "progress row changed concurrently, retrying");
        }

        warn!(%user_id, %lecture_id, "gave up on progress write after repeated conflicts");
        Err(PortError::Conflict(format!(
            "progress for lecture {} kept changing concurrently",
            lecture_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::domain::{AttendanceRecord, Enrollment, Lecture, Role, User, UserCredentials};

    fn row(watched: i64, completed: bool) -> LectureProgress {
        LectureProgress {
            user_id: Uuid::nil(),
            lecture_id: Uuid::nil(),
            watched_seconds: watched,
            completed,
            last_played_at: Utc::now(),
            version: 3,
        }
    }

    fn report(position: i64, duration: i64) -> PlaybackReport {
        PlaybackReport {
            position_seconds: position,
            duration_seconds: duration,
            completion_threshold: 0.9,
            client_claims_completed: false,
        }
    }

    #[test]
    fn position_is_capped_at_duration_and_never_regresses() {
        let next = advance(&row(40, false), &report(10, 100), Utc::now());
        assert_eq!(next.watched_seconds, 40);
        assert!(!next.completed);

        let next = advance(&row(0, false), &report(-20, 100), Utc::now());
        assert_eq!(next.watched_seconds, 0);

        let next = advance(&row(0, false), &report(150, 1000), Utc::now());
        assert_eq!(next.watched_seconds, 150);
        assert_eq!(next.version, 3);
    }

    #[test]
    fn threshold_is_inclusive() {
        let below = advance(&row(0, false), &report(89, 100), Utc::now());
        assert!(!below.completed);
        assert_eq!(below.watched_seconds, 89);

        let at = advance(&row(0, false), &report(90, 100), Utc::now());
        assert!(at.completed);
        assert_eq!(at.watched_seconds, 100);
    }

    #[test]
    fn client_claim_completes_and_normalizes() {
        let mut r = report(5, 100);
        r.client_claims_completed = true;
        let next = advance(&row(0, false), &r, Utc::now());
        assert!(next.completed);
        assert_eq!(next.watched_seconds, 100);
    }

    #[test]
    fn zero_duration_counts_as_one_second() {
        let next = advance(&row(0, false), &report(0, 0), Utc::now());
        assert!(!next.completed);
        let mut r = report(0, 0);
        r.client_claims_completed = true;
        let next = advance(&row(0, false), &r, Utc::now());
        assert!(next.completed);
        assert_eq!(next.watched_seconds, 1);
    }

    #[test]
    fn shorter_video_does_not_lower_the_high_water_mark() {
        // 500 s of a 600 s video, then a 300 s video replaces it.
        let next = advance(&row(500, false), &report(10, 300), Utc::now());
        assert_eq!(next.watched_seconds, 500);
        assert!(next.completed);
        assert_eq!(lecture_ratio(&next, 300), 1.0);

        let next = advance(&row(500, true), &report(10, 300), Utc::now());
        assert_eq!(next.watched_seconds, 500);
    }

    #[test]
    fn lecture_ratio_is_bounded() {
        assert_eq!(lecture_ratio(&row(50, false), 200), 0.25);
        assert_eq!(lecture_ratio(&row(500, true), 200), 1.0);
        assert_eq!(lecture_ratio(&row(0, false), 0), 0.0);
    }

    #[tokio::test]
    async fn high_water_mark_survives_rewind() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = ProgressTracker::new(store.clone());
        let (user, lecture) = (Uuid::new_v4(), Uuid::new_v4());

        tracker.apply_progress(user, lecture, 40, 100, 0.9, false).await.unwrap();
        let after = tracker.apply_progress(user, lecture, 10, 100, 0.9, false).await.unwrap();

        assert_eq!(after.watched_seconds, 40);
        assert!(!after.completed);
        assert_eq!(after.version, 2);
    }

    #[tokio::test]
    async fn completion_is_sticky() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = ProgressTracker::new(store);
        let (user, lecture) = (Uuid::new_v4(), Uuid::new_v4());

        let done = tracker.apply_progress(user, lecture, 95, 100, 0.9, false).await.unwrap();
        assert!(done.completed);

        let later = tracker.apply_progress(user, lecture, 3, 100, 0.9, false).await.unwrap();
        assert!(later.completed);
        assert_eq!(later.watched_seconds, 100);
    }

    #[tokio::test]
    async fn concurrent_reports_keep_the_highest_position() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = ProgressTracker::new(store.clone());
        let (user, lecture) = (Uuid::new_v4(), Uuid::new_v4());

        let (a, b) = tokio::join!(
            tracker.apply_progress(user, lecture, 30, 100, 0.9, false),
            tracker.apply_progress(user, lecture, 60, 100, 0.9, false),
        );
        a.unwrap();
        b.unwrap();

        let stored = store.get_progress(user, lecture).await.unwrap().unwrap();
        assert_eq!(stored.watched_seconds, 60);
    }

    /// How `InterferingStore` disturbs the compare-and-set path.
    #[derive(Clone, Copy)]
    enum Interference {
        /// Another session advances the row to 70 just before the first write.
        LoseFirstWrite,
        /// Every write succeeds but the row cannot be read back afterwards.
        ForgetAfterWrite,
        /// Every write loses to a concurrent one.
        LoseEveryWrite,
    }

    /// Delegates to an in-memory store, interfering with progress writes.
    struct InterferingStore {
        inner: InMemoryStore,
        interference: Interference,
        write_attempts: AtomicUsize,
        wrote: AtomicBool,
    }

    impl InterferingStore {
        fn new(interference: Interference) -> Self {
            Self {
                inner: InMemoryStore::new(),
                interference,
                write_attempts: AtomicUsize::new(0),
                wrote: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl DatabaseService for InterferingStore {
        async fn create_user(&self, email: &str, hash: &str, role: Role) -> PortResult<User> {
            self.inner.create_user(email, hash, role).await
        }
        async fn get_user_by_email(&self, email: &str) -> PortResult<User> {
            self.inner.get_user_by_email(email).await
        }
        async fn get_credentials_by_email(&self, email: &str) -> PortResult<UserCredentials> {
            self.inner.get_credentials_by_email(email).await
        }
        async fn store_refresh_token(
            &self,
            subject: &str,
            token: &str,
            expires_at: DateTime<Utc>,
        ) -> PortResult<()> {
            self.inner.store_refresh_token(subject, token, expires_at).await
        }
        async fn get_refresh_token(&self, subject: &str) -> PortResult<Option<String>> {
            self.inner.get_refresh_token(subject).await
        }
        async fn delete_refresh_token(&self, subject: &str) -> PortResult<()> {
            self.inner.delete_refresh_token(subject).await
        }
        async fn get_lecture(&self, lecture_id: Uuid) -> PortResult<Lecture> {
            self.inner.get_lecture(lecture_id).await
        }
        async fn get_course_lectures(&self, course_id: Uuid) -> PortResult<Vec<Lecture>> {
            self.inner.get_course_lectures(course_id).await
        }
        async fn attach_video(&self, lecture_id: Uuid, video_id: Uuid) -> PortResult<()> {
            self.inner.attach_video(lecture_id, video_id).await
        }
        async fn detach_video(&self, lecture_id: Uuid) -> PortResult<Option<Uuid>> {
            self.inner.detach_video(lecture_id).await
        }
        async fn find_enrollment(&self, u: Uuid, c: Uuid) -> PortResult<Option<Enrollment>> {
            self.inner.find_enrollment(u, c).await
        }
        async fn find_attendance(
            &self,
            u: Uuid,
            c: Uuid,
            day: NaiveDate,
        ) -> PortResult<Option<AttendanceRecord>> {
            self.inner.find_attendance(u, c, day).await
        }
        async fn insert_attendance(&self, record: &AttendanceRecord) -> PortResult<()> {
            self.inner.insert_attendance(record).await
        }
        async fn load_or_create_progress(&self, u: Uuid, l: Uuid) -> PortResult<LectureProgress> {
            self.inner.load_or_create_progress(u, l).await
        }
        async fn compare_and_set_progress(
            &self,
            progress: &LectureProgress,
            expected_version: i64,
        ) -> PortResult<bool> {
            let attempt = self.write_attempts.fetch_add(1, Ordering::SeqCst);
            match self.interference {
                Interference::LoseFirstWrite if attempt == 0 => {
                    let mut theirs = progress.clone();
                    theirs.watched_seconds = 70;
                    self.inner.compare_and_set_progress(&theirs, expected_version).await?;
                    Ok(false)
                }
                Interference::LoseEveryWrite => Ok(false),
                _ => {
                    let written = self.inner.compare_and_set_progress(progress, expected_version).await?;
                    self.wrote.store(written, Ordering::SeqCst);
                    Ok(written)
                }
            }
        }
        async fn get_progress(&self, u: Uuid, l: Uuid) -> PortResult<Option<LectureProgress>> {
            if matches!(self.interference, Interference::ForgetAfterWrite)
                && self.wrote.load(Ordering::SeqCst)
            {
                return Ok(None);
            }
            self.inner.get_progress(u, l).await
        }
        async fn get_course_progress(&self, u: Uuid, c: Uuid) -> PortResult<Vec<LectureProgress>> {
            self.inner.get_course_progress(u, c).await
        }
    }

    #[tokio::test]
    async fn lost_write_is_retried_against_the_fresh_row() {
        let store = Arc::new(InterferingStore::new(Interference::LoseFirstWrite));
        let tracker = ProgressTracker::new(store.clone());
        let (user, lecture) = (Uuid::new_v4(), Uuid::new_v4());

        let result = tracker.apply_progress(user, lecture, 50, 100, 0.9, false).await.unwrap();

        // The concurrent advance to 70 is kept rather than overwritten with 50.
        assert_eq!(result.watched_seconds, 70);
        assert_eq!(result.version, 2);
        assert_eq!(store.write_attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn row_missing_after_write_is_inconsistent_state() {
        let store = Arc::new(InterferingStore::new(Interference::ForgetAfterWrite));
        let tracker = ProgressTracker::new(store.clone());

        let result = tracker
            .apply_progress(Uuid::new_v4(), Uuid::new_v4(), 50, 100, 0.9, false)
            .await;

        assert!(matches!(result, Err(PortError::InconsistentState(_))));
        assert_eq!(store.write_attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn persistent_contention_gives_up_with_conflict() {
        let store = Arc::new(InterferingStore::new(Interference::LoseEveryWrite));
        let tracker = ProgressTracker::new(store.clone());

        let result = tracker
            .apply_progress(Uuid::new_v4(), Uuid::new_v4(), 50, 100, 0.9, false)
            .await;

        assert!(matches!(result, Err(PortError::Conflict(_))));
        assert_eq!(store.write_attempts.load(Ordering::SeqCst), MAX_WRITE_ATTEMPTS);
    }
}
