//! Bearer-token authentication. Identity issuance (phone-OTP sign-up) lives in
//! an external provider; this module only verifies the tokens it mints and
//! resolves them to a stable user id.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::{errors::ServiceError, AppState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// "customer" or "admin"
    pub role: String,
    pub exp: usize,
}

/// Verified principal attached to a request.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: String,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    /// Guards operations scoped to a specific user: admins may act on any
    /// account, everyone else only on their own.
    pub fn authorize_user(&self, user_id: Uuid) -> Result<(), ServiceError> {
        if self.is_admin() || self.user_id == user_id {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "cannot act on another user's data".to_string(),
            ))
        }
    }

    pub fn require_admin(&self) -> Result<(), ServiceError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden("admin role required".to_string()))
        }
    }
}

/// Issue an HS256 token for a user. Exposed for tests and local tooling.
pub fn issue_token(
    secret: &str,
    user_id: Uuid,
    role: &str,
    ttl_secs: i64,
) -> Result<String, ServiceError> {
    let claims = Claims {
        sub: user_id.to_string(),
        role: role.to_string(),
        exp: (Utc::now().timestamp() + ttl_secs) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ServiceError::InternalError(format!("token encoding failed: {}", e)))
}

pub fn verify_token(secret: &str, token: &str) -> Result<AuthenticatedUser, ServiceError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| ServiceError::Unauthorized(format!("invalid token: {}", e)))?;

    let user_id = Uuid::parse_str(&data.claims.sub)
        .map_err(|_| ServiceError::Unauthorized("invalid subject claim".to_string()))?;

    Ok(AuthenticatedUser {
        user_id,
        role: data.claims.role,
    })
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing authorization header".to_string()))?;

        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or_else(|| ServiceError::Unauthorized("expected bearer token".to_string()))?;

        verify_token(&state.config.jwt_secret, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test_secret_key_for_testing_purposes_only";

    #[test]
    fn token_round_trips() {
        let user_id = Uuid::new_v4();
        let token = issue_token(SECRET, user_id, "customer", 3600).unwrap();
        let user = verify_token(SECRET, &token).unwrap();
        assert_eq!(user.user_id, user_id);
        assert!(!user.is_admin());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token(SECRET, Uuid::new_v4(), "customer", 3600).unwrap();
        assert!(verify_token("another_secret_key_that_is_long_enough", &token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue_token(SECRET, Uuid::new_v4(), "customer", -60).unwrap();
        assert!(verify_token(SECRET, &token).is_err());
    }

    #[test]
    fn user_scope_enforcement() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let user = AuthenticatedUser {
            user_id: me,
            role: "customer".to_string(),
        };
        assert!(user.authorize_user(me).is_ok());
        assert!(user.authorize_user(other).is_err());

        let admin = AuthenticatedUser {
            user_id: me,
            role: "admin".to_string(),
        };
        assert!(admin.authorize_user(other).is_ok());
    }
}
