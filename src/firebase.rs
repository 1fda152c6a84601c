//! Firebase Authentication ID-token verification.
//!
//! Firebase ID tokens are RS256 JWTs signed by rotating Google keys. The
//! public keys are published as a JWK set whose `Cache-Control: max-age`
//! says how long they may be cached.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::header::CACHE_CONTROL;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::auth::{IdentityError, IdentityProvider};

const JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

const DEFAULT_KEY_TTL: Duration = Duration::from_secs(3600);

/// Minimum age of the cached key set before an unknown `kid` refetches it.
const REFETCH_FLOOR: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    sub: String,
}

struct CachedKeys {
    set: JwkSet,
    fetched_at: Instant,
    expires_at: Instant,
}

impl CachedKeys {
    /// Answer from the cache, or `None` when the set must be refetched:
    /// it expired, or it lacks `kid` and is older than the refetch floor.
    fn lookup(&self, kid: &str, now: Instant) -> Option<Result<Jwk, IdentityError>> {
        if now >= self.expires_at {
            return None;
        }
        match self.set.find(kid) {
            Some(jwk) => Some(Ok(jwk.clone())),
            None if now.duration_since(self.fetched_at) < REFETCH_FLOOR => Some(Err(unknown_kid(kid))),
            None => None,
        }
    }
}

fn unknown_kid(kid: &str) -> IdentityError {
    IdentityError(format!("no signing key with kid {kid}"))
}

pub struct FirebaseIdentityProvider {
    project_id: String,
    http: reqwest::Client,
    keys: RwLock<Option<CachedKeys>>,
}

impl FirebaseIdentityProvider {
    pub fn new(http: reqwest::Client, project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            http,
            keys: RwLock::new(None),
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[format!("https://securetoken.google.com/{}", self.project_id)]);
        validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);
        validation
    }

    async fn key(&self, kid: &str) -> Result<Jwk, IdentityError> {
        if let Some(found) = cached(self.keys.read().await.as_ref(), kid) {
            return found;
        }

        // One refetch at a time; callers queued behind it reuse its result.
        let mut guard = self.keys.write().await;
        if let Some(found) = cached(guard.as_ref(), kid) {
            return found;
        }
        let fresh = self.fetch_keys().await?;
        let jwk = fresh.set.find(kid).cloned();
        *guard = Some(fresh);
        jwk.ok_or_else(|| unknown_kid(kid))
    }

    async fn fetch_keys(&self) -> Result<CachedKeys, IdentityError> {
        let response = self
            .http
            .get(JWKS_URL)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| IdentityError(format!("fetching signing keys: {e}")))?;

        let ttl = response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(max_age)
            .unwrap_or(DEFAULT_KEY_TTL);

        let set: JwkSet = response
            .json()
            .await
            .map_err(|e| IdentityError(format!("decoding signing keys: {e}")))?;

        debug!(keys = set.keys.len(), ttl_secs = ttl.as_secs(), "Fetched Firebase signing keys");
        let fetched_at = Instant::now();
        Ok(CachedKeys {
            set,
            fetched_at,
            expires_at: fetched_at + ttl,
        })
    }
}

fn cached(keys: Option<&CachedKeys>, kid: &str) -> Option<Result<Jwk, IdentityError>> {
    keys.and_then(|keys| keys.lookup(kid, Instant::now()))
}

/// `max-age` directive of a `Cache-Control` value.
fn max_age(cache_control: &str) -> Option<Duration> {
    cache_control
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|secs| secs.parse().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl IdentityProvider for FirebaseIdentityProvider {
    async fn verify_id_token(&self, token: &str) -> Result<String, IdentityError> {
        let header = decode_header(token).map_err(|e| IdentityError(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(IdentityError(format!("unexpected algorithm {:?}", header.alg)));
        }
        let kid = header
            .kid
            .ok_or_else(|| IdentityError("token has no kid".into()))?;

        let jwk = self.key(&kid).await?;
        let key = DecodingKey::from_jwk(&jwk).map_err(|e| IdentityError(e.to_string()))?;
        let data = decode::<FirebaseClaims>(token, &key, &self.validation())
            .map_err(|e| IdentityError(e.to_string()))?;

        if data.claims.sub.is_empty() {
            return Err(IdentityError("token has empty subject".into()));
        }
        Ok(data.claims.sub)
    }
}
