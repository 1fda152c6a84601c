use crate::error::{ServerError, ServerResult};
use crate::routes::authorization;
use crate::state::ServerState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use bodega::{InputError, RmaSummary};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct RmaRequest {
    #[serde(default)]
    pub rma: String,
}

/// `POST /rma` with `{rma}`, authenticated by the static partner key
pub async fn rma_lookup(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Result<Json<RmaRequest>, JsonRejection>,
) -> ServerResult<Json<RmaSummary>> {
    if !state.rma_key_matches(authorization(&headers)) {
        return Err(ServerError::Unauthorized);
    }
    let Json(request) = body.map_err(|e| ServerError::from(InputError::MalformedBody(e.body_text())))?;

    let summary = state.queries.rma_lookup(&request.rma).await?;
    Ok(Json(summary))
}
