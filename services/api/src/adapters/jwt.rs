//! services/api/src/adapters/jwt.rs
//!
//! HMAC-signed JWT implementation of the `TokenService` port.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use learnhub_core::domain::{CredentialKind, Identity, IssuedCredential, Role};
use learnhub_core::ports::{PortError, PortResult, TokenService};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ClaimKind {
    Access,
    Refresh,
}

impl From<CredentialKind> for ClaimKind {
    fn from(kind: CredentialKind) -> Self {
        match kind {
            CredentialKind::Access => ClaimKind::Access,
            CredentialKind::Refresh => ClaimKind::Refresh,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    roles: Vec<String>,
    kind: ClaimKind,
    jti: String,
    iat: i64,
    exp: i64,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct JwtTokenAdapter {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtTokenAdapter {
    pub fn new(secret: &[u8], access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            access_ttl,
            refresh_ttl,
        }
    }

    fn issue(
        &self,
        subject: &str,
        roles: &[Role],
        kind: CredentialKind,
        ttl: Duration,
    ) -> PortResult<IssuedCredential> {
        let issued_at = Utc::now();
        let expires_at = issued_at + ttl;
        let claims = Claims {
            sub: subject.to_string(),
            roles: roles.iter().map(|r| r.as_str().to_string()).collect(),
            kind: kind.into(),
            jti: Uuid::new_v4().to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|e| {
            error!("Failed to sign credential: {:?}", e);
            PortError::Unexpected(e.to_string())
        })?;
        Ok(IssuedCredential { token, expires_at })
    }

    fn decode_claims(&self, token: &str) -> PortResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("Credential rejected: {}", e);
                PortError::Unauthorized
            })
    }
}

//=========================================================================================
// `TokenService` Trait Implementation
//=========================================================================================

impl TokenService for JwtTokenAdapter {
    fn issue_access(&self, subject: &str, roles: &[Role]) -> PortResult<IssuedCredential> {
        self.issue(subject, roles, CredentialKind::Access, self.access_ttl)
    }

    fn issue_refresh(&self, subject: &str) -> PortResult<IssuedCredential> {
        self.issue(subject, &[], CredentialKind::Refresh, self.refresh_ttl)
    }

    fn validate(&self, token: &str, kind: CredentialKind) -> PortResult<Identity> {
        let claims = self.decode_claims(token)?;
        if claims.kind != ClaimKind::from(kind) {
            debug!("Credential of kind {:?} presented where {:?} expected", claims.kind, kind);
            return Err(PortError::Unauthorized);
        }
        Ok(Identity {
            subject: claims.sub,
            roles: claims.roles.iter().filter_map(|r| Role::parse(r)).collect(),
        })
    }

    fn remaining_lifetime(&self, token: &str) -> Option<Duration> {
        let claims = self.decode_claims(token).ok()?;
        let remaining = claims.exp - Utc::now().timestamp();
        (remaining > 0).then(|| Duration::seconds(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"an-hmac-secret-that-is-long-enough-for-tests";

    fn adapter() -> JwtTokenAdapter {
        JwtTokenAdapter::new(SECRET, Duration::minutes(30), Duration::days(14))
    }

    #[test]
    fn access_credential_round_trips_subject_and_roles() {
        let tokens = adapter();
        for subject in ["learner@example.com", "", "名前@例え.jp"] {
            let issued = tokens.issue_access(subject, &[Role::Member, Role::Admin]).unwrap();
            let identity = tokens.validate(&issued.token, CredentialKind::Access).unwrap();
            assert_eq!(identity.subject, subject);
            assert_eq!(identity.roles, vec![Role::Member, Role::Admin]);
        }
    }

    #[test]
    fn expired_credential_is_rejected() {
        let tokens = JwtTokenAdapter::new(SECRET, Duration::minutes(-5), Duration::days(-1));
        let access = tokens.issue_access("learner@example.com", &[]).unwrap();
        let refresh = tokens.issue_refresh("learner@example.com").unwrap();

        assert!(matches!(
            tokens.validate(&access.token, CredentialKind::Access),
            Err(PortError::Unauthorized)
        ));
        assert!(matches!(
            tokens.validate(&refresh.token, CredentialKind::Refresh),
            Err(PortError::Unauthorized)
        ));
        assert!(tokens.remaining_lifetime(&access.token).is_none());
    }

    #[test]
    fn foreign_signature_and_garbage_are_rejected() {
        let other = JwtTokenAdapter::new(
            b"a-completely-different-secret-of-some-length",
            Duration::minutes(30),
            Duration::days(14),
        );
        let issued = other.issue_access("learner@example.com", &[]).unwrap();
        let tokens = adapter();

        assert!(tokens.validate(&issued.token, CredentialKind::Access).is_err());
        assert!(tokens.validate("invalid.token.here", CredentialKind::Access).is_err());
        assert!(tokens.validate("", CredentialKind::Access).is_err());
    }

    #[test]
    fn kinds_are_not_interchangeable() {
        let tokens = adapter();
        let access = tokens.issue_access("learner@example.com", &[Role::Member]).unwrap();
        let refresh = tokens.issue_refresh("learner@example.com").unwrap();

        assert!(tokens.validate(&access.token, CredentialKind::Refresh).is_err());
        assert!(tokens.validate(&refresh.token, CredentialKind::Access).is_err());
        assert!(tokens.validate(&refresh.token, CredentialKind::Refresh).is_ok());
    }

    #[test]
    fn remaining_lifetime_tracks_ttl() {
        let tokens = adapter();
        let issued = tokens.issue_access("learner@example.com", &[]).unwrap();
        let remaining = tokens.remaining_lifetime(&issued.token).unwrap();
        assert!(remaining <= Duration::minutes(30));
        assert!(remaining > Duration::minutes(29));
    }

    #[test]
    fn refresh_credentials_are_unique_per_issue() {
        let tokens = adapter();
        let first = tokens.issue_refresh("learner@example.com").unwrap();
        let second = tokens.issue_refresh("learner@example.com").unwrap();
        assert_ne!(first.token, second.token);
    }
}
