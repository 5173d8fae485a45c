use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::role::{Identity, Role};
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    role: Role,
    exp: i64,
    iat: i64,
}

/// HS256 bearer-token verification shared by the HTTP boundary and the
/// realtime gateway.
#[derive(Clone)]
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Identity, AppError> {
        let data = decode::<Claims>(token.trim(), &self.decoding, &self.validation)
            .map_err(|err| AppError::Unauthenticated(format!("invalid token: {err}")))?;

        Ok(Identity::new(data.claims.sub, data.claims.role))
    }

    pub fn issue(&self, identity: Identity, ttl: Duration) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: identity.subject_id,
            role: identity.role,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| AppError::Internal(format!("failed to sign token: {err}")))
    }
}

/// Extractor resolving the caller from `Authorization: Bearer <token>`.
pub struct AuthIdentity(pub Identity);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| AppError::Unauthenticated("missing bearer token".to_string()))?
            .to_str()
            .map_err(|_| AppError::Unauthenticated("malformed authorization header".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::Unauthenticated("missing bearer token".to_string()))?;

        state.tokens.verify(token).map(AuthIdentity)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::TokenVerifier;
    use crate::models::role::{Identity, Role};

    #[test]
    fn issued_token_verifies_to_same_identity() {
        let verifier = TokenVerifier::new(b"secret");
        let identity = Identity::new(Uuid::new_v4(), Role::Courier);

        let token = verifier.issue(identity, Duration::minutes(5)).unwrap();
        assert_eq!(verifier.verify(&token).unwrap(), identity);
    }

    #[test]
    fn expired_token_is_rejected() {
        let verifier = TokenVerifier::new(b"secret");
        let identity = Identity::new(Uuid::new_v4(), Role::Vendor);

        let token = verifier.issue(identity, Duration::minutes(-5)).unwrap();
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let issuer = TokenVerifier::new(b"one");
        let verifier = TokenVerifier::new(b"two");
        let token = issuer
            .issue(Identity::new(Uuid::new_v4(), Role::Admin), Duration::minutes(5))
            .unwrap();

        assert!(verifier.verify(&token).is_err());
    }
}
