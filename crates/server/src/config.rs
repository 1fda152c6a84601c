use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Which collaborators the server is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process stores, static dev tokens, recording mailer.
    #[default]
    Memory,
    /// Firebase Auth, Cloud Storage, Firestore and MailerSend.
    Gcp,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server bind address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum submission body size in MB
    #[serde(default = "default_max_body_size_mb")]
    pub max_body_size_mb: usize,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Metrics endpoint enabled
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    #[serde(default)]
    pub backend: Backend,

    #[serde(default)]
    pub gcp: GcpConfig,

    /// Token → subject table accepted by the memory backend
    #[serde(default)]
    pub dev_tokens: HashMap<String, String>,

    /// How long the customer id list is served from memory
    #[serde(default = "default_customer_cache_ttl_secs")]
    pub customer_cache_ttl_secs: u64,

    #[serde(default)]
    pub mail: MailConfig,

    /// Static key partner systems present on `/rma`
    #[serde(default)]
    pub rma_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GcpConfig {
    #[serde(default = "default_project_id")]
    pub project_id: String,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Firebase project whose ID tokens are accepted; defaults to `project_id`
    #[serde(default)]
    pub firebase_project_id: Option<String>,

    /// Fixed OAuth token instead of the metadata server (local runs)
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MailConfig {
    /// MailerSend API key; without one the memory backend records mail
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_sender_email")]
    pub sender_email: String,

    #[serde(default = "default_sender_name")]
    pub sender_name: String,

    #[serde(default = "default_mail_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_mail_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
            max_body_size_mb: default_max_body_size_mb(),
            enable_cors: default_true(),
            log_level: default_log_level(),
            metrics_enabled: default_true(),
            backend: Backend::default(),
            gcp: GcpConfig::default(),
            dev_tokens: HashMap::new(),
            customer_cache_ttl_secs: default_customer_cache_ttl_secs(),
            mail: MailConfig::default(),
            rma_api_key: None,
        }
    }
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            project_id: default_project_id(),
            database: default_database(),
            bucket: default_bucket(),
            firebase_project_id: None,
            access_token: None,
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            sender_email: default_sender_email(),
            sender_name: default_sender_name(),
            endpoint: default_mail_endpoint(),
            timeout_secs: default_mail_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from `.env`, an optional `server.*` file and
    /// `BODEGA_SERVER__*` environment variables, in increasing precedence.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("server").required(false))
            .add_source(config::Environment::with_prefix("BODEGA_SERVER").separator("__"));

        let config: ServerConfig = builder.build()?.try_deserialize()?;

        if config.backend == Backend::Memory && config.dev_tokens.is_empty() {
            tracing::warn!("Memory backend without dev tokens: every authenticated call will fail");
        }
        if config.rma_api_key.is_none() {
            tracing::warn!("No RMA API key configured, /rma will reject every call");
        }

        Ok(config)
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.bind_addr, self.port);
        Ok(addr_str.parse()?)
    }

    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get max body size in bytes
    pub fn max_body_size(&self) -> usize {
        self.max_body_size_mb * 1024 * 1024
    }

    pub fn customer_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.customer_cache_ttl_secs)
    }

    pub fn mail_timeout(&self) -> Duration {
        Duration::from_secs(self.mail.timeout_secs)
    }

    pub fn firebase_project_id(&self) -> &str {
        self.gcp
            .firebase_project_id
            .as_deref()
            .unwrap_or(&self.gcp.project_id)
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_body_size_mb() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_customer_cache_ttl_secs() -> u64 {
    15 * 60
}

fn default_project_id() -> String {
    "b-materials".to_string()
}

fn default_database() -> String {
    "app-in-out-good".to_string()
}

fn default_bucket() -> String {
    "app-entradas-salidas-merc".to_string()
}

fn default_sender_email() -> String {
    "noreply@buhologistics.com".to_string()
}

fn default_sender_name() -> String {
    "Buho Logistics".to_string()
}

fn default_mail_endpoint() -> String {
    bodega::mail::MAILERSEND_ENDPOINT.to_string()
}

fn default_mail_timeout_secs() -> u64 {
    10
}
