//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs issued elsewhere; this module only verifies them.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use checkout::Actor;
use common::UserId;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: usize,
}

/// Verifies bearer tokens with the configured secret.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ApiError::Unauthorized("Token expired".to_string())
                }
                _ => ApiError::Unauthorized("Invalid token".to_string()),
            })
    }
}

/// Signs claims with `secret`. Used by tooling and tests.
pub fn encode_token(secret: &str, claims: &Claims) -> Result<String, ApiError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|err| ApiError::Internal(format!("failed to sign token: {err}")))
}

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.user_id,
            is_admin: self.is_admin(),
        }
    }

    /// Fails with 403 unless the caller is an admin.
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtVerifier: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

        let claims = JwtVerifier::from_ref(state).verify(token)?;
        Ok(AuthUser {
            user_id: UserId::from_uuid(claims.sub),
            role: claims.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(role: Role, exp_offset: i64) -> Claims {
        Claims {
            sub: Uuid::new_v4(),
            role,
            exp: (chrono::Utc::now().timestamp() + exp_offset) as usize,
        }
    }

    #[test]
    fn test_round_trip() {
        let original = claims(Role::Admin, 3600);
        let token = encode_token("secret", &original).unwrap();
        let verified = JwtVerifier::new("secret").verify(&token).unwrap();
        assert_eq!(verified.sub, original.sub);
        assert_eq!(verified.role, Role::Admin);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = encode_token("secret", &claims(Role::Customer, 3600)).unwrap();
        assert!(matches!(
            JwtVerifier::new("other").verify(&token),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_expired_rejected() {
        let token = encode_token("secret", &claims(Role::Customer, -3600)).unwrap();
        assert!(matches!(
            JwtVerifier::new("secret").verify(&token),
            Err(ApiError::Unauthorized(msg)) if msg == "Token expired"
        ));
    }
}
