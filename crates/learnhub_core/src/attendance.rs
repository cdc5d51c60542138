//! crates/learnhub_core/src/attendance.rs
//!
//! Records at most one attendance fact per (user, course, calendar day).
//!
//! The day is computed in a single fixed reference timezone. The durable
//! uniqueness constraint on (user, course, day) decides which of several
//! racing first plays wins; the losers see `PortError::Duplicate` and are
//! reported as an ordinary no-op.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::authz;
use crate::domain::AttendanceRecord;
use crate::ports::{DatabaseService, PortError, PortResult};

/// Request metadata stored with the attendance row.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub enum AttendanceOutcome {
    /// This call created today's record.
    Recorded(AttendanceRecord),
    /// A record for today already existed, or a concurrent call created it first.
    AlreadyRecorded,
}

#[derive(Clone)]
pub struct AttendanceTracker {
    db: Arc<dyn DatabaseService>,
    reference_offset: FixedOffset,
}

impl AttendanceTracker {
    pub fn new(db: Arc<dyn DatabaseService>, reference_offset: FixedOffset) -> Self {
        Self {
            db,
            reference_offset,
        }
    }

    /// The calendar day `instant` falls on in the reference timezone.
    pub fn reference_day(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.reference_offset).date_naive()
    }

    pub async fn record_first_playback_of_day(
        &self,
        user_id: Uuid,
        lecture_id: Uuid,
        client: &ClientInfo,
    ) -> PortResult<AttendanceOutcome> {
        self.record_first_playback_at(user_id, lecture_id, client, Utc::now())
            .await
    }

    /// Same as [`record_first_playback_of_day`](Self::record_first_playback_of_day)
    /// with an explicit clock reading.
    pub async fn record_first_playback_at(
        &self,
        user_id: Uuid,
        lecture_id: Uuid,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> PortResult<AttendanceOutcome> {
        let lecture = self.db.get_lecture(lecture_id).await?;
        let course_id = lecture.course_id;

        let enrollment = self.db.find_enrollment(user_id, course_id).await?;
        authz::can_track_course(user_id, course_id, enrollment.as_ref())
            .into_result(&format!("course {}", course_id))?;

        let today = self.reference_day(now);
        if self
            .db
            .find_attendance(user_id, course_id, today)
            .await?
            .is_some()
        {
            debug!(%user_id, %course_id, %today, "attendance already recorded");
            return Ok(AttendanceOutcome::AlreadyRecorded);
        }

        let record = AttendanceRecord {
            id: Uuid::new_v4(),
            user_id,
            course_id,
            attended_on: today,
            first_played_at: now,
            lecture_id,
            client_ip: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            attended: true,
        };

        match self.db.insert_attendance(&record).await {
            Ok(()) => {
                info!(%user_id, %course_id, %today, %lecture_id, "attendance recorded");
                Ok(AttendanceOutcome::Recorded(record))
            }
            Err(PortError::Duplicate(_)) => {
                debug!(%user_id, %course_id, %today, "concurrent first play suppressed");
                Ok(AttendanceOutcome::AlreadyRecorded)
            }
            Err(e) => Err(e),
        }
    }
}
