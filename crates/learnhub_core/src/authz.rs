//! crates/learnhub_core/src/authz.rs
//!
//! Explicit authorization predicates. Each operation calls the predicate it
//! needs at its top and turns a `Deny` into `PortError::AccessDenied`.

use uuid::Uuid;

use crate::domain::{Enrollment, Identity, Role};
use crate::ports::{PortError, PortResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }

    /// Converts the decision into a result, naming the guarded resource on denial.
    pub fn into_result(self, resource: &str) -> PortResult<()> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny => Err(PortError::AccessDenied(resource.to_string())),
        }
    }
}

/// A user may record attendance and progress for a course only while holding
/// an active enrollment in it.
pub fn can_track_course(user_id: Uuid, course_id: Uuid, enrollment: Option<&Enrollment>) -> Decision {
    match enrollment {
        Some(e) if e.user_id == user_id && e.course_id == course_id && e.active => Decision::Allow,
        _ => Decision::Deny,
    }
}

/// Linking or unlinking catalog assets requires the admin role.
pub fn can_manage_catalog(identity: &Identity) -> Decision {
    if identity.has_role(Role::Admin) {
        Decision::Allow
    } else {
        Decision::Deny
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn enrollment(user_id: Uuid, course_id: Uuid, active: bool) -> Enrollment {
        Enrollment {
            user_id,
            course_id,
            active,
            enrolled_at: Utc::now(),
        }
    }

    #[test]
    fn active_enrollment_allows_tracking() {
        let (user, course) = (Uuid::new_v4(), Uuid::new_v4());
        let e = enrollment(user, course, true);
        assert_eq!(can_track_course(user, course, Some(&e)), Decision::Allow);
    }

    #[test]
    fn missing_inactive_or_foreign_enrollment_denies() {
        let (user, course) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(can_track_course(user, course, None), Decision::Deny);

        let inactive = enrollment(user, course, false);
        assert_eq!(can_track_course(user, course, Some(&inactive)), Decision::Deny);

        let other_course = enrollment(user, Uuid::new_v4(), true);
        assert_eq!(can_track_course(user, course, Some(&other_course)), Decision::Deny);
    }

    #[test]
    fn only_admins_manage_catalog() {
        let member = Identity {
            subject: "m@example.com".to_string(),
            roles: vec![Role::Member],
        };
        let admin = Identity {
            subject: "a@example.com".to_string(),
            roles: vec![Role::Member, Role::Admin],
        };
        assert!(!can_manage_catalog(&member).is_allowed());
        assert!(can_manage_catalog(&admin).is_allowed());
        assert!(matches!(
            can_manage_catalog(&member).into_result("catalog"),
            Err(PortError::AccessDenied(_))
        ));
    }
}
