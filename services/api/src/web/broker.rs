//! services/api/src/web/broker.rs
//!
//! In-process message broker for the `/ws` channel.
//!
//! Every authenticated session registers an outbound queue under its
//! principal. Addressed sends fan out to all live sessions of one principal;
//! each session filters deliveries against its own subscriptions.

use async_trait::async_trait;
use learnhub_core::domain::CourseProgressSnapshot;
use learnhub_core::ports::ProgressPublisher;
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::web::protocol::CourseProgressView;

/// Prefix that marks a destination as addressed to the session's own principal.
pub const USER_DESTINATION_PREFIX: &str = "/user";

/// Destination (relative to the user prefix) of a course's progress snapshots.
pub fn course_progress_destination(course_id: Uuid) -> String {
    format!("/queue/courses/{}/progress", course_id)
}

/// A message handed to one session.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub destination: String,
    pub body: serde_json::Value,
}

struct SessionEntry {
    principal: String,
    outbound: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
pub struct ChannelBroker {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

impl ChannelBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session for `principal` and returns its id and inbox.
    pub async fn register(&self, principal: &str) -> (Uuid, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = Uuid::new_v4();
        self.sessions.write().await.insert(
            session_id,
            SessionEntry {
                principal: principal.to_string(),
                outbound: tx,
            },
        );
        info!("Channel session {} registered for {}", session_id, principal);
        (session_id, rx)
    }

    pub async fn unregister(&self, session_id: Uuid) {
        if self.sessions.write().await.remove(&session_id).is_some() {
            info!("Channel session {} unregistered", session_id);
        }
    }

    pub async fn session_count(&self, principal: &str) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.principal == principal)
            .count()
    }

    /// Sends `body` to every live session of `principal`, under
    /// `/user{destination}`. Returns the number of sessions reached.
    pub async fn send_to_user(
        &self,
        principal: &str,
        destination: &str,
        body: serde_json::Value,
    ) -> usize {
        let delivery = Delivery {
            destination: format!("{}{}", USER_DESTINATION_PREFIX, destination),
            body,
        };
        let sessions = self.sessions.read().await;
        let mut reached = 0;
        for (id, session) in sessions.iter().filter(|(_, s)| s.principal == principal) {
            // A closed inbox only means the session is shutting down.
            if session.outbound.send(delivery.clone()).is_ok() {
                reached += 1;
            } else {
                debug!("Channel session {} is gone, skipping delivery", id);
            }
        }
        reached
    }
}

#[async_trait]
impl ProgressPublisher for ChannelBroker {
    async fn publish(&self, principal: &str, snapshot: &CourseProgressSnapshot) -> usize {
        let body = match serde_json::to_value(CourseProgressView::from(snapshot)) {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to serialize progress snapshot: {}", e);
                return 0;
            }
        };
        let reached = self
            .send_to_user(principal, &course_progress_destination(snapshot.course_id), body)
            .await;
        debug!(
            "Progress for course {} pushed to {} session(s) of {}",
            snapshot.course_id, reached, principal
        );
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(course_id: Uuid) -> CourseProgressSnapshot {
        CourseProgressSnapshot {
            course_id,
            ratio: 0.5,
            completed_lectures: 1,
            total_lectures: 2,
            lecture: None,
        }
    }

    #[tokio::test]
    async fn addressed_send_reaches_every_session_of_the_principal_only() {
        let broker = ChannelBroker::new();
        let (_, mut tab_one) = broker.register("ana@example.com").await;
        let (_, mut tab_two) = broker.register("ana@example.com").await;
        let (_, mut other) = broker.register("bo@example.com").await;

        let course = Uuid::new_v4();
        let reached = broker.publish("ana@example.com", &snapshot(course)).await;
        assert_eq!(reached, 2);

        let expected = format!("/user/queue/courses/{}/progress", course);
        for inbox in [&mut tab_one, &mut tab_two] {
            let delivery = inbox.recv().await.unwrap();
            assert_eq!(delivery.destination, expected);
            assert_eq!(delivery.body["completed_lectures"], 1);
        }
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_sessions_is_a_no_op() {
        let broker = ChannelBroker::new();
        assert_eq!(broker.publish("nobody@example.com", &snapshot(Uuid::new_v4())).await, 0);
    }

    #[tokio::test]
    async fn unregistered_and_dropped_sessions_are_skipped() {
        let broker = ChannelBroker::new();
        let (first, _inbox) = broker.register("ana@example.com").await;
        let (_, dropped) = broker.register("ana@example.com").await;
        drop(dropped);
        assert_eq!(broker.session_count("ana@example.com").await, 2);

        broker.unregister(first).await;
        assert_eq!(broker.session_count("ana@example.com").await, 1);
        assert_eq!(broker.publish("ana@example.com", &snapshot(Uuid::new_v4())).await, 0);
    }
}
