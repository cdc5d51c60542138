//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use crate::error::ApiError;
use crate::web::broker::ChannelBroker;
use learnhub_core::domain::{Identity, User};
use learnhub_core::ports::{DatabaseService, PortError, TokenService};
use learnhub_core::{AttendanceTracker, ProgressAggregator, ProgressTracker};
use std::sync::Arc;
use tracing::warn;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub tokens: Arc<dyn TokenService>,
    pub broker: Arc<ChannelBroker>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn attendance_tracker(&self) -> AttendanceTracker {
        AttendanceTracker::new(self.db.clone(), self.config.attendance_offset)
    }

    pub fn progress_tracker(&self) -> ProgressTracker {
        ProgressTracker::new(self.db.clone())
    }

    pub fn aggregator(&self) -> ProgressAggregator {
        ProgressAggregator::new(self.db.clone())
    }

    /// Resolves the account behind an authenticated identity. A subject that no
    /// longer maps to a user is treated as unauthenticated.
    pub async fn current_user(&self, identity: &Identity) -> Result<User, ApiError> {
        match self.db.get_user_by_email(&identity.subject).await {
            Ok(user) => Ok(user),
            Err(PortError::NotFound(_)) => {
                warn!("Authenticated subject {} has no account", identity.subject);
                Err(PortError::Unauthorized.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}
