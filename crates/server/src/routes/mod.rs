//! API route handlers
//!
//! Routes are organized by functionality:
//!
//! - `health`: liveness and Prometheus metrics
//! - `submissions`: entrada and salida multipart submissions
//! - `queries`: lookups, month reports and ASN updates
//! - `customers`: customer directory and creation
//! - `export`: CSV export by email
//! - `rma`: partner RMA lookup behind a static key

pub mod customers;
pub mod export;
pub mod health;
pub mod queries;
pub mod rma;
pub mod submissions;

use crate::error::ServerError;
use axum::extract::{Form, FromRequest, Json, Query, Request};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::convert::Infallible;

/// `{"message": ...}` success body.
#[derive(Debug, Serialize)]
pub struct Message {
    pub message: &'static str,
}

/// Raw `Authorization` header value, if any.
pub(crate) fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
}

/// Named parameters from the query string merged with a urlencoded or
/// JSON object body. Body values win over query values. Unparseable
/// bodies contribute nothing; handlers report the missing field instead.
#[derive(Debug, Default)]
pub struct Params(pub HashMap<String, String>);

impl Params {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

impl<S: Send + Sync> FromRequest<S> for Params {
    type Rejection = Infallible;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let mut params = Query::<HashMap<String, String>>::try_from_uri(request.uri())
            .map(|Query(q)| q)
            .unwrap_or_default();

        let is_json = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if is_json {
            if let Ok(Json(body)) = Json::<Map<String, Value>>::from_request(request, state).await {
                params.extend(body.into_iter().filter_map(|(k, v)| scalar(v).map(|v| (k, v))));
            }
        } else if let Ok(Form(body)) = Form::<HashMap<String, String>>::from_request(request, state).await {
            params.extend(body);
        }

        Ok(Params(params))
    }
}

fn scalar(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// API name, version and endpoints
pub async fn api_info() -> impl IntoResponse {
    Json(json!({
        "name": "Bodega Server",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/entradas",
            "/salidas",
            "/query-entrada",
            "/query-salida",
            "/query-entrada-remision",
            "/update-asn",
            "/get-customers",
            "/create-customer",
            "/entradas-data",
            "/salidas-data",
            "/rma",
            "/export",
            "/health",
            "/metrics"
        ]
    }))
}

/// 404 Not Found handler
pub async fn not_found() -> ServerError {
    ServerError::NotFound("Not found".to_string())
}
