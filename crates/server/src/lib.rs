//! Bodega Server - HTTP API for warehouse entradas/salidas tracking
//!
//! Exposes the `bodega` submission pipeline, queries, reports and exports
//! over HTTP. Every endpoint except `/`, `/health` and `/metrics` requires
//! `Authorization: Bearer <token>`: a Firebase ID token, or for `/rma` the
//! static partner key. Error bodies are plain text.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use server::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::load()?;
//!     server::start_server(config).await?;
//!     Ok(())
//! }
//! ```
//!
//! # API Endpoints
//!
//! - `POST /entradas` - multipart inbound submission (201)
//! - `POST /salidas` - multipart outbound submission (201)
//! - `POST /query-entrada`, `POST /query-salida` - record by `id`
//! - `POST /query-entrada-remision` - entrada by `numero_remision_factura`
//! - `POST /update-asn` - set `asn` and `fecha_ajuste_asn` on an entrada (201)
//! - `POST /entradas-data`, `POST /salidas-data` - records for `month`/`year`
//! - `GET /get-customers` - customer ids, cached
//! - `POST /create-customer` - create-only customer (201, 409 on duplicates)
//! - `POST /export` - month export mailed as CSV
//! - `POST /rma` - entrada summary by ASN
//! - `GET /health`, `GET /metrics`, `GET /`

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::{Backend, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use server::{build_router, start_server};
pub use state::{Collaborators, ServerState};
