use crate::config::{Backend, ServerConfig};
use crate::error::{ServerError, ServerResult};
use bodega::auth::IdentityProvider;
use bodega::firebase::FirebaseIdentityProvider;
use bodega::firestore::FirestoreStore;
use bodega::gcp::AccessTokenSource;
use bodega::gcs::GcsBlobStore;
use bodega::mail::{MailerSendMailer, Sender};
use bodega::{
    BlobStore, Clock, CustomerDirectory, DocumentStore, Exporter, ImageIngestor, Mailer,
    MemoryBlobStore, MemoryDocumentStore, Notifier, QueryService, RecordingMailer,
    StaticIdentityProvider, StoreDirectorySource, SubmissionPipeline, SystemClock, TokenVerifier,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;
use subtle::ConstantTimeEq;

/// External services the handlers talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityProvider>,
    pub blobs: Arc<dyn BlobStore>,
    pub store: Arc<dyn DocumentStore>,
    pub mailer: Arc<dyn Mailer>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Build the collaborators selected by `config.backend`.
    pub fn from_config(config: &ServerConfig) -> ServerResult<Self> {
        match config.backend {
            Backend::Memory => Ok(Self::memory(config)),
            Backend::Gcp => Self::gcp(config),
        }
    }

    fn memory(config: &ServerConfig) -> Self {
        let identity: StaticIdentityProvider = config
            .dev_tokens
            .iter()
            .map(|(token, uid)| (token.clone(), uid.clone()))
            .collect();
        let mailer: Arc<dyn Mailer> = match &config.mail.api_key {
            Some(key) => Arc::new(mailersend(config, reqwest::Client::new(), key)),
            None => Arc::new(RecordingMailer::new()),
        };

        Self {
            identity: Arc::new(identity),
            blobs: Arc::new(MemoryBlobStore::new(&config.gcp.bucket)),
            store: Arc::new(MemoryDocumentStore::new()),
            mailer,
            clock: Arc::new(SystemClock),
        }
    }

    fn gcp(config: &ServerConfig) -> ServerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ServerError::Config(format!("HTTP client: {e}")))?;

        let tokens = Arc::new(match &config.gcp.access_token {
            Some(token) => AccessTokenSource::from_static(http.clone(), token),
            None => AccessTokenSource::from_metadata_server(http.clone()),
        });
        let api_key = config.mail.api_key.clone().unwrap_or_default();

        Ok(Self {
            identity: Arc::new(FirebaseIdentityProvider::new(
                http.clone(),
                config.firebase_project_id(),
            )),
            blobs: Arc::new(GcsBlobStore::new(
                http.clone(),
                tokens.clone(),
                &config.gcp.bucket,
            )),
            store: Arc::new(FirestoreStore::new(
                http.clone(),
                tokens,
                &config.gcp.project_id,
                &config.gcp.database,
            )),
            mailer: Arc::new(mailersend(config, http, &api_key)),
            clock: Arc::new(SystemClock),
        })
    }
}

fn mailersend(config: &ServerConfig, http: reqwest::Client, api_key: &str) -> MailerSendMailer {
    let sender = Sender {
        email: config.mail.sender_email.clone(),
        name: config.mail.sender_name.clone(),
    };
    MailerSendMailer::new(http, api_key, sender).with_endpoint(&config.mail.endpoint)
}

/// Shared application state
pub struct ServerState {
    /// Server configuration
    pub config: Arc<ServerConfig>,

    pub verifier: TokenVerifier,

    pub pipeline: SubmissionPipeline,

    pub queries: Arc<QueryService>,

    pub exporter: Exporter,

    /// Cached customer ids behind `/get-customers`
    pub directory: CustomerDirectory,

    /// Prometheus render handle, when a recorder is installed
    pub metrics: Option<PrometheusHandle>,

    pub started_at: Instant,
}

impl ServerState {
    /// Create new server state
    pub fn new(config: ServerConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            identity,
            blobs,
            store,
            mailer,
            clock,
        } = collaborators;

        let notifier = Arc::new(
            Notifier::new(store.clone(), mailer.clone()).with_deadline(config.mail_timeout()),
        );
        let pipeline = SubmissionPipeline::new(ImageIngestor::new(blobs), store.clone(), notifier);
        let queries = Arc::new(QueryService::new(store.clone(), clock.clone()));
        let exporter = Exporter::new(queries.clone(), mailer, clock.clone(), config.mail_timeout());
        let directory = CustomerDirectory::new(
            Arc::new(StoreDirectorySource::new(store)),
            clock,
            config.customer_cache_ttl(),
        );

        Self {
            config: Arc::new(config),
            verifier: TokenVerifier::new(identity),
            pipeline,
            queries,
            exporter,
            directory,
            metrics: None,
            started_at: Instant::now(),
        }
    }

    /// Create state from configuration alone
    pub fn from_config(config: ServerConfig) -> ServerResult<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Ok(Self::new(config, collaborators))
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Constant-time check of an `Authorization: Bearer <key>` header
    /// against the configured RMA key. No key configured rejects all.
    pub fn rma_key_matches(&self, header: Option<&str>) -> bool {
        let (Some(expected), Some(header)) = (self.config.rma_api_key.as_deref(), header) else {
            return false;
        };
        if expected.is_empty() {
            return false;
        }
        match header.strip_prefix("Bearer ") {
            Some(presented) => presented.as_bytes().ct_eq(expected.as_bytes()).into(),
            None => false,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(rma_api_key: Option<&str>) -> ServerState {
        let config = ServerConfig {
            rma_api_key: rma_api_key.map(str::to_string),
            ..ServerConfig::default()
        };
        ServerState::from_config(config).unwrap()
    }

    #[test]
    fn rma_key_requires_exact_bearer_match() {
        let state = state(Some("s3cret"));
        assert!(state.rma_key_matches(Some("Bearer s3cret")));
        assert!(!state.rma_key_matches(Some("Bearer s3cre")));
        assert!(!state.rma_key_matches(Some("s3cret")));
        assert!(!state.rma_key_matches(None));
    }

    #[test]
    fn missing_rma_key_rejects_everything() {
        let state = state(None);
        assert!(!state.rma_key_matches(Some("Bearer ")));
        assert!(!state.rma_key_matches(Some("Bearer anything")));
    }
}
