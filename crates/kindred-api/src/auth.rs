//! Bearer token verification.
//!
//! Clients present an HS256 JWT whose `sub` claim is their user id, either
//! in `Authorization: Bearer <token>` or (for the WebSocket handshake, where
//! browsers cannot set headers) as `?token=`.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use kindred_core::{normalize_user_id, Error, Result};

use crate::error::ApiError;
use crate::state::AppState;

/// Token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub exp: usize,
}

/// Verifies HS256 tokens against one shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Decode `token` and return the user id it was issued to.
    pub fn verify(&self, token: &str) -> Result<String> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| Error::Unauthorized(format!("invalid token: {}", e)))?;
        normalize_user_id(&data.claims.sub)
            .map(String::from)
            .ok_or_else(|| Error::Unauthorized("token has no subject".to_string()))
    }
}

/// Token from an `Authorization: Bearer` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Extractor for authenticated requests.
///
/// ```ignore
/// async fn handler(user: RequireUser) -> impl IntoResponse {
///     format!("hello {}", user.user_id)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireUser {
    pub user_id: String,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for RequireUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))?;
        let user_id = state.verifier.verify(token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected bearer token");
            ApiError::from(e)
        })?;
        Ok(RequireUser { user_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, sub: &str, exp: usize) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &Claims {
                sub: sub.to_string(),
                exp,
            },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    // 2100-01-01
    const FAR_FUTURE: usize = 4_102_444_800;

    #[test]
    fn test_verify_valid_token() {
        let verifier = TokenVerifier::new("s3cret");
        assert_eq!(verifier.verify(&token("s3cret", "u1", FAR_FUTURE)).unwrap(), "u1");
    }

    #[test]
    fn test_verify_rejects_wrong_secret_and_expired() {
        let verifier = TokenVerifier::new("s3cret");
        assert!(matches!(
            verifier.verify(&token("other", "u1", FAR_FUTURE)),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            verifier.verify(&token("s3cret", "u1", 1)),
            Err(Error::Unauthorized(_))
        ));
        assert!(verifier.verify("not-a-jwt").is_err());
    }

    #[test]
    fn test_verify_rejects_blank_subject() {
        let verifier = TokenVerifier::new("s3cret");
        assert!(verifier.verify(&token("s3cret", " ", FAR_FUTURE)).is_err());
    }

    #[test]
    fn test_verify_trims_subject() {
        let verifier = TokenVerifier::new("s3cret");
        assert_eq!(verifier.verify(&token("s3cret", " u1 ", FAR_FUTURE)).unwrap(), "u1");
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));
    }
}
