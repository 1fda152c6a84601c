use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bodega::{
    AuthError, InputError, MailError, PipelineError, QueryError, StorageError, StoreError,
};

pub type ServerResult<T> = Result<T, ServerError>;

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Authentication(#[from] AuthError),

    /// Wrong or missing static API key.
    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    BadRequest(#[from] InputError),

    #[error("{0}")]
    NotFound(String),

    #[error("Customer already exists")]
    Conflict,

    #[error("Image upload failed: {0}")]
    Storage(#[from] StorageError),

    #[error("{context}: {source}")]
    Persistence {
        context: &'static str,
        source: StoreError,
    },

    #[error("Failed to send email: {0}")]
    Mail(#[from] MailError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ServerError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Authentication(_) | ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Conflict => StatusCode::CONFLICT,
            ServerError::Storage(_)
            | ServerError::Persistence { .. }
            | ServerError::Mail(_)
            | ServerError::Internal(_)
            | ServerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::Authentication(_) => "AUTH_FAILED",
            ServerError::Unauthorized => "UNAUTHORIZED",
            ServerError::BadRequest(_) => "BAD_REQUEST",
            ServerError::NotFound(_) => "NOT_FOUND",
            ServerError::Conflict => "CONFLICT",
            ServerError::Storage(_) => "STORAGE_ERROR",
            ServerError::Persistence { .. } => "PERSISTENCE_ERROR",
            ServerError::Mail(_) => "MAIL_ERROR",
            ServerError::Internal(_) => "INTERNAL_ERROR",
            ServerError::Config(_) => "CONFIG_ERROR",
        }
    }
}

/// Error bodies are plain text.
impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(code = self.error_code(), error = %message, "Request failed");
        } else {
            tracing::warn!(code = self.error_code(), status = status.as_u16(), error = %message, "Request rejected");
        }

        (status, message).into_response()
    }
}

impl From<PipelineError> for ServerError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Auth(e) => e.into(),
            PipelineError::Input(e) => e.into(),
            PipelineError::Storage(e) => e.into(),
            PipelineError::Store(source) => ServerError::Persistence {
                context: "Error saving document",
                source,
            },
        }
    }
}

impl From<QueryError> for ServerError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Input(e) => e.into(),
            QueryError::NotFound(message) => ServerError::NotFound(message),
            QueryError::Conflict => ServerError::Conflict,
            QueryError::Store(source) => ServerError::Persistence {
                context: "Error querying documents",
                source,
            },
            QueryError::Mail(e) => e.into(),
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        QueryError::from(err).into()
    }
}

impl From<std::net::AddrParseError> for ServerError {
    fn from(err: std::net::AddrParseError) -> Self {
        ServerError::Config(format!("Invalid address: {err}"))
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}
