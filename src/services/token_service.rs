//! Bearer token issuing and validation.
//!
//! Tokens are HS256 JWTs carrying `{sub, iat, exp}`. Nothing is stored
//! server-side: validity is recomputed from the token, the current time and
//! the configured secret, so a token can only stop working by expiring.

use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scheme prefix every presented credential must start with.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Lifetime of an issued token.
pub const TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("credential is not a bearer token")]
    MalformedCredential,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    #[error("token has no subject")]
    MissingSubject,
    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
    #[serde(default)]
    iat: i64,
    exp: i64,
}

/// Issues and checks bearer tokens against a single shared secret.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        // Expiry is checked by hand so that `now == exp` already counts as
        // expired and so tests can pin the clock.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims::<&str>(&[]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Issue a token for `username`, valid for [`TOKEN_TTL_HOURS`].
    pub fn issue_token(&self, username: &str) -> Result<String, AuthError> {
        self.issue_token_at(username, Utc::now())
    }

    pub fn issue_token_at(&self, username: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = Claims {
            sub: Some(username.to_string()),
            iat: now.timestamp(),
            exp: (now + TimeDelta::hours(TOKEN_TTL_HOURS)).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(AuthError::Signing)
    }

    /// Validate a presented `Bearer <token>` credential and return its subject.
    pub fn validate_token(&self, credential: &str) -> Result<String, AuthError> {
        self.validate_token_at(credential, Utc::now())
    }

    pub fn validate_token_at(
        &self,
        credential: &str,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let token = credential
            .strip_prefix(BEARER_PREFIX)
            .ok_or(AuthError::MalformedCredential)?;

        let claims = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(classify_decode_error)?
            .claims;

        if now.timestamp() >= claims.exp {
            return Err(AuthError::Expired);
        }

        match claims.sub {
            Some(subject) if !subject.is_empty() => Ok(subject),
            _ => Err(AuthError::MissingSubject),
        }
    }
}

/// Anything that fails to decode behind a bearer prefix counts as a failed
/// verification. `MalformedCredential` is kept for a missing prefix.
fn classify_decode_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::InvalidSignature,
    }
}
