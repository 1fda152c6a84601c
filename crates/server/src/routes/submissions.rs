use crate::error::ServerResult;
use crate::routes::{authorization, Message};
use crate::state::ServerState;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use bodega::{FormFields, Inbound, InputError, Outbound, SubmissionKind};
use std::sync::Arc;

/// `POST /entradas`
pub async fn submit_entrada(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> ServerResult<(StatusCode, Json<Message>)> {
    submit::<Inbound>(&state, &headers, multipart).await
}

/// `POST /salidas`
pub async fn submit_salida(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> ServerResult<(StatusCode, Json<Message>)> {
    submit::<Outbound>(&state, &headers, multipart).await
}

async fn submit<K: SubmissionKind>(
    state: &ServerState,
    headers: &HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> ServerResult<(StatusCode, Json<Message>)> {
    let user = state.verifier.verify(authorization(headers)).await?;
    let form = read_form(multipart).await?;

    let submitted = match state.pipeline.submit::<K>(&user, &form).await {
        Ok(submitted) => submitted,
        Err(err) => {
            metrics::counter!("bodega_submissions_total", "kind" => K::NAME, "outcome" => "rejected")
                .increment(1);
            return Err(err.into());
        }
    };

    metrics::counter!("bodega_submissions_total", "kind" => K::NAME, "outcome" => "stored")
        .increment(1);
    Ok((
        StatusCode::CREATED,
        Json(Message {
            message: submitted.message,
        }),
    ))
}

/// Collect every multipart part as a text field. Size overruns surface
/// here as read errors.
async fn read_form(multipart: Result<Multipart, MultipartRejection>) -> Result<FormFields, InputError> {
    let mut multipart = multipart.map_err(|e| InputError::MalformedForm(e.body_text()))?;
    let mut form = FormFields::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| InputError::MalformedForm(e.body_text()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let value = field
            .text()
            .await
            .map_err(|e| InputError::MalformedForm(e.body_text()))?;
        form.insert(name, value);
    }

    Ok(form)
}
