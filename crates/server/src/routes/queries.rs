use crate::error::ServerResult;
use crate::routes::{authorization, Message, Params};
use crate::state::ServerState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use bodega::{AsnUpdate, InboundRecord, OutboundRecord, Record, StoredRecord};
use std::sync::Arc;

type Records<R> = Json<Vec<StoredRecord<R>>>;

/// `POST /query-entrada` with `id`
pub async fn query_entrada(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    params: Params,
) -> ServerResult<Records<InboundRecord>> {
    by_id(&state, &headers, &params).await
}

/// `POST /query-salida` with `id`
pub async fn query_salida(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    params: Params,
) -> ServerResult<Records<OutboundRecord>> {
    by_id(&state, &headers, &params).await
}

async fn by_id<R: Record>(
    state: &ServerState,
    headers: &HeaderMap,
    params: &Params,
) -> ServerResult<Records<R>> {
    let user = state.verifier.verify(authorization(headers)).await?;
    let found = state.queries.get_by_id::<R>(&user, params.get("id")).await?;
    Ok(Json(found))
}

/// `POST /query-entrada-remision` with `numero_remision_factura`
pub async fn query_entrada_remision(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    params: Params,
) -> ServerResult<Records<InboundRecord>> {
    let user = state.verifier.verify(authorization(&headers)).await?;
    let found = state
        .queries
        .get_by_reference(&user, params.get("numero_remision_factura"))
        .await?;
    Ok(Json(found))
}

/// `POST /update-asn` with `id`, `asn` and `fecha_ajuste_asn`
pub async fn update_asn(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    params: Params,
) -> ServerResult<(StatusCode, Json<Message>)> {
    let user = state.verifier.verify(authorization(&headers)).await?;
    let update = AsnUpdate {
        id: params.get("id").unwrap_or_default().to_string(),
        asn: params.get("asn").unwrap_or_default().to_string(),
        fecha_ajuste_asn: params.get("fecha_ajuste_asn").unwrap_or_default().to_string(),
    };
    state.queries.update_asn(&user, &update).await?;

    Ok((
        StatusCode::CREATED,
        Json(Message {
            message: "ASN updated successfully.",
        }),
    ))
}

/// `POST /entradas-data` with `month` and `year`
pub async fn entradas_data(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    params: Params,
) -> ServerResult<Records<InboundRecord>> {
    month_report(&state, &headers, &params).await
}

/// `POST /salidas-data` with `month` and `year`
pub async fn salidas_data(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    params: Params,
) -> ServerResult<Records<OutboundRecord>> {
    month_report(&state, &headers, &params).await
}

async fn month_report<R: Record>(
    state: &ServerState,
    headers: &HeaderMap,
    params: &Params,
) -> ServerResult<Records<R>> {
    let user = state.verifier.verify(authorization(headers)).await?;
    let found = state
        .queries
        .month_report::<R>(&user, params.get("month"), params.get("year"))
        .await?;
    Ok(Json(found))
}
