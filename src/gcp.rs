//! OAuth access tokens for the Google Cloud REST APIs.
//!
//! On Cloud Run / GCE the metadata server hands out short-lived tokens for
//! the attached service account. Outside Google Cloud a token can be
//! supplied directly (e.g. `gcloud auth print-access-token`).

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh this long before the advertised expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

enum Source {
    Static(String),
    MetadataServer {
        cached: Mutex<Option<(String, Instant)>>,
    },
}

/// Supplies bearer tokens for `storage.googleapis.com` and
/// `firestore.googleapis.com`.
pub struct AccessTokenSource {
    http: reqwest::Client,
    source: Source,
}

impl AccessTokenSource {
    pub fn from_static(http: reqwest::Client, token: impl Into<String>) -> Self {
        Self {
            http,
            source: Source::Static(token.into()),
        }
    }

    pub fn from_metadata_server(http: reqwest::Client) -> Self {
        Self {
            http,
            source: Source::MetadataServer {
                cached: Mutex::new(None),
            },
        }
    }

    pub async fn token(&self) -> Result<String, String> {
        let cached = match &self.source {
            Source::Static(token) => return Ok(token.clone()),
            Source::MetadataServer { cached } => cached,
        };

        let mut guard = cached.lock().await;
        if let Some((token, expires_at)) = guard.as_ref() {
            if Instant::now() + EXPIRY_MARGIN < *expires_at {
                return Ok(token.clone());
            }
        }

        let fresh: MetadataToken = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| format!("metadata server token request failed: {e}"))?
            .json()
            .await
            .map_err(|e| format!("metadata server token response malformed: {e}"))?;

        debug!(expires_in = fresh.expires_in, "Refreshed GCP access token");
        let expires_at = Instant::now() + Duration::from_secs(fresh.expires_in);
        *guard = Some((fresh.access_token.clone(), expires_at));
        Ok(fresh.access_token)
    }
}
