//! Bearer-token verification for protected media paths.

use axum::http::HeaderValue;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a token was refused. Only ever logged; callers see one uniform 401.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingHeader,
    #[error("authorization header is not a bearer token")]
    MalformedHeader,
    #[error("token rejected: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token carries no subject")]
    MissingSubject,
}

/// Claims minted by the API backend for media access.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

/// The caller a verified token speaks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: String,
    pub email: Option<String>,
}

/// HS256 verifier holding the shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_aud = false;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify an `Authorization` header value.
    pub fn verify_header(&self, header: Option<&HeaderValue>) -> Result<Viewer, AuthError> {
        let header = header.ok_or(AuthError::MissingHeader)?;
        let token = header
            .to_str()
            .ok()
            .and_then(extract_bearer_token)
            .ok_or(AuthError::MalformedHeader)?;
        self.verify(token)
    }

    /// Verify a compact JWT. Signature, algorithm and expiry are all checked.
    pub fn verify(&self, token: &str) -> Result<Viewer, AuthError> {
        let claims = decode::<Claims>(token, &self.key, &self.validation)?.claims;
        let user_id = claims
            .user_id
            .filter(|id| !id.is_empty())
            .or(claims.sub.filter(|sub| !sub.is_empty()))
            .ok_or(AuthError::MissingSubject)?;
        Ok(Viewer {
            user_id,
            email: claims.email,
        })
    }
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

/// Extract the token from `Bearer <token>`.
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
