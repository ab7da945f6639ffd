use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;
use uuid::Uuid;

use synergy_types::api::Claims;
use synergy_types::models::PrincipalRole;

use crate::error::{MessagingError, Result};

/// Verifies and mints HS256 bearer tokens.
#[derive(Clone)]
pub struct Identity {
    secret: String,
    token_ttl: Duration,
}

impl Identity {
    pub fn new(secret: impl Into<String>, token_ttl_hours: i64) -> Self {
        Self {
            secret: secret.into(),
            token_ttl: Duration::hours(token_ttl_hours),
        }
    }

    /// Decode a bearer token. Any failure (bad signature, expiry,
    /// malformed claims) is reported as `Unauthenticated`.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|e| {
            debug!("Rejected bearer token: {}", e);
            MessagingError::Unauthenticated("invalid or expired credential".into())
        })
    }

    pub fn issue_token(&self, principal_id: Uuid, display_name: &str, role: PrincipalRole) -> Result<String> {
        let claims = Claims {
            sub: principal_id,
            name: display_name.to_string(),
            role,
            exp: (Utc::now() + self.token_ttl).timestamp() as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| MessagingError::Internal(format!("token encoding failed: {e}")))
    }
}
