//! Access gate: turns presented credentials into an [`Identity`], and
//! username/password pairs into tokens.
//!
//! There is no authorization step. Any valid token for any registered user
//! grants access to every bucket.

use crate::services::token_service::{AuthError, TokenService};
use std::{collections::BTreeMap, sync::Arc};
use tracing::debug;

/// The authenticated caller attached to a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
}

/// Fixed username → password mapping, loaded once at start-up.
#[derive(Debug, Default)]
pub struct UserRegistry {
    users: BTreeMap<String, String>,
}

impl UserRegistry {
    pub fn new(users: BTreeMap<String, String>) -> Self {
        Self { users }
    }

    /// True only for a registered user presenting their exact password.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .is_some_and(|expected| expected == password)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }
}

#[derive(Clone)]
pub struct AccessGate {
    tokens: Arc<TokenService>,
    users: Arc<UserRegistry>,
}

impl AccessGate {
    pub fn new(tokens: TokenService, users: UserRegistry) -> Self {
        Self {
            tokens: Arc::new(tokens),
            users: Arc::new(users),
        }
    }

    /// Exchange a username/password pair for a fresh token.
    pub fn login(&self, username: &str, password: &str) -> Result<String, AuthError> {
        if !self.users.verify(username, password) {
            debug!(username, "login rejected");
            return Err(AuthError::InvalidCredentials);
        }
        let token = self.tokens.issue_token(username)?;
        debug!(username, "token issued");
        Ok(token)
    }

    /// Resolve the raw `Authorization` header value to an identity.
    ///
    /// A missing header is treated like any other malformed credential.
    pub fn authenticate(&self, credential: Option<&str>) -> Result<Identity, AuthError> {
        let credential = credential.ok_or(AuthError::MalformedCredential)?;
        match self.tokens.validate_token(credential) {
            Ok(username) => Ok(Identity { username }),
            Err(err) => {
                debug!(reason = %err, "credential rejected");
                Err(err)
            }
        }
    }
}
