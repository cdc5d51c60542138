pub mod aggregate;
pub mod attendance;
pub mod authz;
pub mod domain;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod ports;
pub mod progress;

pub use aggregate::ProgressAggregator;
pub use attendance::{AttendanceOutcome, AttendanceTracker, ClientInfo};
pub use authz::Decision;
pub use domain::{
    AttendanceRecord, CourseProgressSnapshot, CredentialKind, Enrollment, Identity,
    IssuedCredential, Lecture, LectureProgress, LectureProgressSnapshot, Role, User,
    UserCredentials, VideoAsset,
};
#[cfg(any(test, feature = "test-support"))]
pub use memory::InMemoryStore;
pub use ports::{DatabaseService, PortError, PortResult, ProgressPublisher, TokenService};
pub use progress::ProgressTracker;
