//! crates/learnhub_core/src/aggregate.rs
//!
//! Derives course-level completion from per-lecture progress rows.

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{CourseProgressSnapshot, Lecture, LectureProgress, LectureProgressSnapshot};
use crate::ports::{DatabaseService, PortResult};
use crate::progress::lecture_ratio;

#[derive(Clone)]
pub struct ProgressAggregator {
    db: Arc<dyn DatabaseService>,
}

impl ProgressAggregator {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    /// Watched seconds (each capped at its lecture's duration) over the
    /// course's total duration. 0 when the course has no duration.
    pub async fn course_completion_ratio(&self, user_id: Uuid, course_id: Uuid) -> PortResult<f64> {
        let (lectures, rows) = self.load(user_id, course_id).await?;
        Ok(completion_ratio(&lectures, &rows))
    }

    /// `(completed, total)` lecture counts for the course.
    pub async fn completion_counts(&self, user_id: Uuid, course_id: Uuid) -> PortResult<(usize, usize)> {
        let (lectures, rows) = self.load(user_id, course_id).await?;
        Ok(completion_counts(&lectures, &rows))
    }

    /// Builds the full snapshot, optionally carrying the lecture whose update
    /// triggered it.
    pub async fn snapshot(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        trigger: Option<(&Lecture, &LectureProgress)>,
    ) -> PortResult<CourseProgressSnapshot> {
        let (lectures, rows) = self.load(user_id, course_id).await?;
        let (completed_lectures, total_lectures) = completion_counts(&lectures, &rows);

        Ok(CourseProgressSnapshot {
            course_id,
            ratio: completion_ratio(&lectures, &rows),
            completed_lectures,
            total_lectures,
            lecture: trigger.map(|(lecture, progress)| LectureProgressSnapshot {
                lecture_id: lecture.id,
                watched_seconds: progress.watched_seconds,
                ratio: lecture_ratio(progress, lecture.duration_seconds),
                completed: progress.completed,
            }),
        })
    }

    async fn load(&self, user_id: Uuid, course_id: Uuid) -> PortResult<(Vec<Lecture>, Vec<LectureProgress>)> {
        let lectures = self.db.get_course_lectures(course_id).await?;
        let rows = self.db.get_course_progress(user_id, course_id).await?;
        Ok((lectures, rows))
    }
}

fn completion_ratio(lectures: &[Lecture], rows: &[LectureProgress]) -> f64 {
    let total: i64 = lectures.iter().map(|l| l.duration_seconds.max(0)).sum();
    if total == 0 {
        return 0.0;
    }
    let watched_by_lecture: HashMap<Uuid, i64> =
        rows.iter().map(|p| (p.lecture_id, p.watched_seconds)).collect();
    let watched: i64 = lectures
        .iter()
        .map(|l| {
            let seen = watched_by_lecture.get(&l.id).copied().unwrap_or(0);
            seen.clamp(0, l.duration_seconds.max(0))
        })
        .sum();
    (watched as f64 / total as f64).clamp(0.0, 1.0)
}

fn completion_counts(lectures: &[Lecture], rows: &[LectureProgress]) -> (usize, usize) {
    let completed = rows
        .iter()
        .filter(|p| p.completed && lectures.iter().any(|l| l.id == p.lecture_id))
        .count();
    (completed, lectures.len())
}
