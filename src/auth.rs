use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::errors::ErrorResponse;

/// JWT claims carried by storefront access tokens. The identity provider
/// itself is external; this service only validates what it issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id
    pub sub: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Authenticated caller, extracted from a Bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_token_expiration: Duration,
}

impl AuthConfig {
    pub fn new(jwt_secret: String, access_token_expiration: Duration) -> Self {
        Self {
            jwt_secret,
            access_token_expiration,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Token expired")]
    ExpiredToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            success: false,
            error: "Unauthorized".to_string(),
            message: self.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

/// Validates (and, for tests and tooling, issues) storefront access tokens.
pub struct AuthService {
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    pub fn generate_token(
        &self,
        user_id: &str,
        email: Option<&str>,
        name: Option<&str>,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.map(str::to_string),
            name: name.map(str::to_string),
            iat: now.timestamp(),
            exp: (now + self.config.access_token_expiration).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<AuthService>: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_service = Arc::<AuthService>::from_ref(state);

        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::MissingAuth)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .ok_or(AuthError::MissingAuth)?;

        let claims = auth_service.validate_token(token)?;
        Ok(AuthUser {
            user_id: claims.sub,
            email: claims.email,
            name: claims.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new(AuthConfig::new(
            "test_secret_key_for_testing_purposes_only_32chars".to_string(),
            Duration::from_secs(3600),
        ))
    }

    #[test]
    fn round_trip_token() {
        let svc = service();
        let token = svc
            .generate_token("user-1", Some("claire@example.com"), Some("Claire"))
            .unwrap();
        let claims = svc.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email.as_deref(), Some("claire@example.com"));
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let other = AuthService::new(AuthConfig::new(
            "another_secret_key_that_is_also_32_chars_long!!".to_string(),
            Duration::from_secs(3600),
        ));
        let token = other.generate_token("user-1", None, None).unwrap();
        assert!(matches!(
            service().validate_token(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn rejects_garbage_token() {
        assert!(service().validate_token("not-a-jwt").is_err());
    }
}
