//! Error types shared by every stage of the bodega pipelines.
//!
//! Each failure category maps onto exactly one HTTP status at the server
//! boundary:
//!
//! | Error | Category | Status |
//! |-------|----------|--------|
//! | [`AuthError`] | Authentication | 401 |
//! | [`InputError`] | Validation | 400 |
//! | [`StorageError`] | Blob store | 500 |
//! | [`StoreError::NotFound`] | Document store | 404 |
//! | [`StoreError::AlreadyExists`] | Document store | 409 |
//! | [`StoreError::Backend`] | Document store | 500 |
//!
//! [`PipelineError`] and [`QueryError`] wrap these so handlers can propagate
//! with `?` and let the server decide the response.

use thiserror::Error;

/// Bearer-token extraction and verification failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing Authorization token")]
    MissingHeader,

    #[error("invalid token format")]
    MalformedHeader,

    #[error("invalid or expired token")]
    InvalidOrExpiredToken,
}

/// Client input that cannot be accepted. Every variant names the offending
/// form field so the 400 body tells the caller what to fix.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InputError {
    #[error("Failed to parse {field}")]
    MalformedJson { field: String },

    #[error("Missing base64 image in {field}")]
    MissingImage { field: String },

    #[error("B64 decoding error in {field}")]
    MalformedBase64 { field: String },

    #[error("Invalid image content in {field}")]
    NotAnImage { field: String },

    #[error("Missing {field}")]
    MissingField { field: String },

    #[error("Invalid {field}")]
    InvalidNumber { field: String },

    #[error("Invalid {field} format")]
    InvalidDate { field: String },

    #[error("Invalid {field}")]
    OutOfRange { field: String },

    #[error("Error parsing form: {0}")]
    MalformedForm(String),

    #[error("Invalid request body: {0}")]
    MalformedBody(String),
}

impl InputError {
    pub fn missing(field: &str) -> Self {
        InputError::MissingField {
            field: field.to_string(),
        }
    }

    pub fn invalid_number(field: &str) -> Self {
        InputError::InvalidNumber {
            field: field.to_string(),
        }
    }

    pub fn invalid_date(field: &str) -> Self {
        InputError::InvalidDate {
            field: field.to_string(),
        }
    }

    pub fn out_of_range(field: &str) -> Self {
        InputError::OutOfRange {
            field: field.to_string(),
        }
    }
}

/// Blob-store failure while writing or finalizing an uploaded object.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("failed to write object {key}: {reason}")]
    Write { key: String, reason: String },

    #[error("failed to finalize object {key}: {reason}")]
    Finalize { key: String, reason: String },
}

/// Document-store failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    #[error("document {collection}/{id} is malformed: {reason}")]
    Malformed {
        collection: String,
        id: String,
        reason: String,
    },

    #[error("document store error: {0}")]
    Backend(String),
}

/// Transactional-email failures. Never escapes the notification path, but
/// the export path reports it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    #[error("no recipient address for {0}")]
    NoRecipient(String),

    #[error("email send timed out after {0}s")]
    Timeout(u64),

    #[error("email provider rejected the message: {0}")]
    Rejected(String),

    #[error("email transport error: {0}")]
    Transport(String),

    #[error("email is not configured: {0}")]
    NotConfigured(String),
}

/// Everything a submission can fail with, in stage order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error("Image upload failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Error saving document: {0}")]
    Store(#[from] StoreError),
}

/// Failures of the read, update and report operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("{0}")]
    NotFound(String),

    #[error("Customer already exists")]
    Conflict,

    #[error("Error querying documents: {0}")]
    Store(StoreError),

    #[error("Failed to send email: {0}")]
    Mail(#[from] MailError),
}

impl From<StoreError> for QueryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => {
                QueryError::NotFound(format!("No matching document found in {collection}: {id}"))
            }
            StoreError::AlreadyExists { .. } => QueryError::Conflict,
            other => QueryError::Store(other),
        }
    }
}
