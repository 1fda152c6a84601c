use crate::error::{ServerError, ServerResult};
use crate::routes::{authorization, Message};
use crate::state::ServerState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use bodega::{InputError, NewCustomer};
use std::sync::Arc;

/// `GET /get-customers`
///
/// A fresh cached list is served without checking the caller's token; a
/// refresh only happens for an authenticated caller. The directory lock is
/// held throughout so concurrent misses share one refresh.
pub async fn get_customers(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> ServerResult<Json<Vec<String>>> {
    let mut directory = state.directory.lock().await;
    if let Some(ids) = directory.fresh() {
        return Ok(Json(ids));
    }

    state.verifier.verify(authorization(&headers)).await?;
    let ids = directory.refresh().await?;
    Ok(Json(ids))
}

/// `POST /create-customer`
pub async fn create_customer(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Result<Json<NewCustomer>, JsonRejection>,
) -> ServerResult<(StatusCode, Json<Message>)> {
    let user = state.verifier.verify(authorization(&headers)).await?;
    let Json(customer) = body.map_err(|e| ServerError::from(InputError::MalformedBody(e.body_text())))?;

    state.queries.create_customer(&user, customer).await?;

    Ok((
        StatusCode::CREATED,
        Json(Message {
            message: "Customer created successfully.",
        }),
    ))
}
