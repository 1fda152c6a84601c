//! Bearer-token verification.
//!
//! Every authenticated endpoint runs [`TokenVerifier::verify`] first. The
//! verifier only establishes *who* is calling; there are no roles, so any
//! verified subject may use every endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::AuthError;

const BEARER_PREFIX: &str = "Bearer ";

/// Reason an identity provider rejected a token. Only logged; callers see
/// [`AuthError::InvalidOrExpiredToken`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct IdentityError(pub String);

/// External service that turns an ID token into a subject identifier.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_id_token(&self, token: &str) -> Result<String, IdentityError>;
}

/// Extract the token from a raw `Authorization` header value.
///
/// ```
/// use bodega::auth::bearer_token;
/// use bodega::AuthError;
///
/// assert_eq!(bearer_token(Some("Bearer abc")), Ok("abc"));
/// assert_eq!(bearer_token(None), Err(AuthError::MissingHeader));
/// assert_eq!(bearer_token(Some("Basic abc")), Err(AuthError::MalformedHeader));
/// ```
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = match header {
        Some(h) if !h.is_empty() => h,
        _ => return Err(AuthError::MissingHeader),
    };

    if header.len() <= BEARER_PREFIX.len() || !header.starts_with(BEARER_PREFIX) {
        return Err(AuthError::MalformedHeader);
    }

    Ok(&header[BEARER_PREFIX.len()..])
}

/// Subject proven by a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedUser {
    pub uid: String,
}

/// Header extraction plus provider verification.
#[derive(Clone)]
pub struct TokenVerifier {
    provider: Arc<dyn IdentityProvider>,
}

impl TokenVerifier {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    pub async fn verify(&self, header: Option<&str>) -> Result<VerifiedUser, AuthError> {
        let token = bearer_token(header).inspect_err(|err| {
            warn!(error = %err, "Invalid header token");
        })?;

        match self.provider.verify_id_token(token).await {
            Ok(uid) => {
                info!(uid = %uid, "Verified user");
                Ok(VerifiedUser { uid })
            }
            Err(err) => {
                warn!(error = %err, "Invalid token");
                Err(AuthError::InvalidOrExpiredToken)
            }
        }
    }
}

/// Fixed token → subject table. Used for local development and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    tokens: HashMap<String, String>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, uid: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), uid.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StaticIdentityProvider {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            tokens: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify_id_token(&self, token: &str) -> Result<String, IdentityError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| IdentityError("unknown token".into()))
    }
}
