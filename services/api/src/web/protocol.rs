//! services/api/src/web/protocol.rs
//!
//! Defines the messaging protocol spoken over the `/ws` WebSocket after the
//! transport handshake, plus the JSON views shared by REST and channel
//! payloads.

use learnhub_core::domain::{CourseProgressSnapshot, LectureProgressSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

//=========================================================================================
// Frames Sent FROM the Client TO the Server
//=========================================================================================

/// Represents the text frames a client can send to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Opens the messaging session. This must be the first frame on the connection
    /// and carries its own credential in `headers`.
    Connect {
        #[serde(default)]
        headers: HashMap<String, String>,
    },

    /// Starts receiving messages sent to `destination` under the id `id`.
    Subscribe { id: String, destination: String },

    Unsubscribe { id: String },

    /// Ends the session; the server closes the socket.
    Disconnect,
}

//=========================================================================================
// Frames Sent FROM the Server TO the Client
//=========================================================================================

/// Represents the text frames the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Confirms the connect frame and names the principal bound to the session.
    Connected { principal: String },

    /// A message delivered to one of the session's subscriptions.
    Message {
        subscription: String,
        destination: String,
        body: serde_json::Value,
    },

    /// Reports a rejected frame. Fatal when sent in reply to `connect`.
    Error { message: String },
}

//=========================================================================================
// Progress Views
//=========================================================================================

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LectureProgressView {
    pub lecture_id: Uuid,
    pub watched_seconds: i64,
    pub ratio: f64,
    pub completed: bool,
}

/// JSON form of a course snapshot, returned by the progress endpoints and
/// pushed to `/user/queue/courses/{course_id}/progress`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CourseProgressView {
    pub course_id: Uuid,
    pub ratio: f64,
    pub completed_lectures: usize,
    pub total_lectures: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lecture: Option<LectureProgressView>,
}

impl From<&LectureProgressSnapshot> for LectureProgressView {
    fn from(s: &LectureProgressSnapshot) -> Self {
        Self {
            lecture_id: s.lecture_id,
            watched_seconds: s.watched_seconds,
            ratio: s.ratio,
            completed: s.completed,
        }
    }
}

impl From<&CourseProgressSnapshot> for CourseProgressView {
    fn from(s: &CourseProgressSnapshot) -> Self {
        Self {
            course_id: s.course_id,
            ratio: s.ratio,
            completed_lectures: s.completed_lectures,
            total_lectures: s.total_lectures,
            lecture: s.lecture.as_ref().map(LectureProgressView::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_are_tagged_by_type() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"connect","headers":{"Authorization":"Bearer abc"}}"#,
        )
        .unwrap();
        match frame {
            ClientFrame::Connect { headers } => {
                assert_eq!(headers.get("Authorization").map(String::as_str), Some("Bearer abc"))
            }
            other => panic!("unexpected frame {:?}", other),
        }

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"connect"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Connect { headers } if headers.is_empty()));

        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"subscribe","id":"s1","destination":"/user/queue/x"}"#)
                .unwrap();
        assert!(matches!(frame, ClientFrame::Subscribe { .. }));
    }

    #[test]
    fn server_message_frame_shape() {
        let frame = ServerFrame::Message {
            subscription: "s1".to_string(),
            destination: "/user/queue/x".to_string(),
            body: serde_json::json!({"ratio": 0.5}),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["subscription"], "s1");
        assert_eq!(value["body"]["ratio"], 0.5);
    }
}
