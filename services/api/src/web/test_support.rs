//! services/api/src/web/test_support.rs
//!
//! Builders shared by the HTTP tests.

use chrono::Duration;
use learnhub_core::domain::{Role, User};
use learnhub_core::ports::{DatabaseService, TokenService};
use learnhub_core::InMemoryStore;
use std::sync::Arc;
use tracing::Level;

use crate::adapters::JwtTokenAdapter;
use crate::config::Config;
use crate::web::broker::ChannelBroker;
use crate::web::state::AppState;

pub const TEST_SECRET: &str = "an-hmac-secret-that-is-long-enough-for-tests";

pub fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        database_url: "postgres://unused".to_string(),
        log_level: Level::INFO,
        jwt_secret: TEST_SECRET.to_string(),
        access_token_ttl: Duration::minutes(30),
        refresh_token_ttl: Duration::days(14),
        attendance_offset: crate::config::parse_utc_offset("+09:00").unwrap(),
        completion_threshold: 0.9,
        cors_allowed_origin: "http://localhost:3000".to_string(),
    }
}

pub fn test_tokens(access_ttl: Duration, refresh_ttl: Duration) -> JwtTokenAdapter {
    JwtTokenAdapter::new(TEST_SECRET.as_bytes(), access_ttl, refresh_ttl)
}

pub struct TestApp {
    pub store: Arc<InMemoryStore>,
    pub state: Arc<AppState>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_tokens(test_tokens(Duration::minutes(30), Duration::days(14)))
    }

    pub fn with_tokens(tokens: JwtTokenAdapter) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let state = Arc::new(AppState {
            db: store.clone(),
            tokens: Arc::new(tokens),
            broker: Arc::new(ChannelBroker::new()),
            config: Arc::new(test_config()),
        });
        Self { store, state }
    }

    /// Creates an account directly in the store and returns it with a valid
    /// access token.
    pub async fn user(&self, email: &str, role: Role) -> (User, String) {
        let user = self.store.create_user(email, "not-a-real-hash", role).await.unwrap();
        let roles = match role {
            Role::Member => vec![Role::Member],
            Role::Admin => vec![Role::Member, Role::Admin],
        };
        let token = self.state.tokens.issue_access(email, &roles).unwrap().token;
        (user, token)
    }
}
