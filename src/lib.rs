//! Warehouse inbound/outbound tracking.
//!
//! Entradas (goods received) and salidas (goods dispatched) are submitted as
//! forms carrying photographic evidence. Each submission is authenticated,
//! validated, has its images uploaded to a blob store and is persisted as a
//! document. Read, report and export operations sit on the same document
//! store.
//!
//! The external collaborators sit behind narrow traits
//! ([`IdentityProvider`], [`BlobStore`], [`DocumentStore`], [`Mailer`],
//! [`DirectorySource`], [`Clock`]). In-memory implementations are always
//! available; the Google Cloud and MailerSend clients need the `gcp`
//! feature.

pub mod auth;
pub mod blob;
pub mod dates;
pub mod directory;
pub mod error;
pub mod evidence;
pub mod export;
pub mod mail;
pub mod notify;
pub mod pipeline;
pub mod query;
pub mod records;
pub mod store;

#[cfg(feature = "gcp")]
pub mod firebase;
#[cfg(feature = "gcp")]
pub mod firestore;
#[cfg(feature = "gcp")]
pub mod gcp;
#[cfg(feature = "gcp")]
pub mod gcs;

pub use auth::{IdentityProvider, StaticIdentityProvider, TokenVerifier, VerifiedUser};
pub use blob::{BlobStore, MemoryBlobStore};
pub use directory::{
    Clock, CustomerDirectory, DirectorySource, ManualClock, StoreDirectorySource, SystemClock,
};
pub use error::{
    AuthError, InputError, MailError, PipelineError, QueryError, StorageError, StoreError,
};
pub use evidence::ImageIngestor;
pub use export::{ExportRequest, Exporter};
pub use mail::RecordingMailer;
pub use notify::{Mailer, Notifier, NotifyOutcome};
pub use pipeline::{FormFields, Inbound, Outbound, SubmissionKind, SubmissionPipeline, Submitted};
pub use query::{AsnUpdate, NewCustomer, QueryService, RmaSummary};
pub use records::{CustomerRecord, InboundRecord, OutboundRecord, Record, StoredRecord};
pub use store::{DocumentStore, MemoryDocumentStore};
