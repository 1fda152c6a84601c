use crate::error::{ServerError, ServerResult};
use crate::routes::{authorization, Message};
use crate::state::ServerState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use bodega::{ExportRequest, InputError};
use std::sync::Arc;

/// `POST /export` with `{email, filters}`
pub async fn export(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Result<Json<ExportRequest>, JsonRejection>,
) -> ServerResult<Json<Message>> {
    let user = state.verifier.verify(authorization(&headers)).await?;
    let Json(request) = body.map_err(|e| ServerError::from(InputError::MalformedBody(e.body_text())))?;

    state.exporter.export(&user, &request).await?;

    Ok(Json(Message {
        message: "Email sent successfully",
    }))
}
