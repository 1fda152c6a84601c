//! Read, report and maintenance operations over the stored records.
//!
//! Authentication happens before any of these run; the ones that need it
//! take the [`VerifiedUser`] as proof.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::auth::VerifiedUser;
use crate::dates::{parse_timestamp, MonthWindow};
use crate::directory::Clock;
use crate::error::{InputError, QueryError};
use crate::records::{CustomerRecord, InboundRecord, Record, StoredRecord, CUSTOMERS, ENTRADAS};
use crate::store::{Document, DocumentStore, Query};

const NO_MATCH: &str = "No matching document found";

/// Form of `/update-asn`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AsnUpdate {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub asn: String,
    #[serde(default)]
    pub fecha_ajuste_asn: String,
}

/// Body of `/create-customer`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NewCustomer {
    #[serde(default)]
    pub cliente: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub rep_name: String,
}

/// What `/rma` tells a partner system about a returned delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RmaSummary {
    #[serde(rename = "ASN")]
    pub asn: String,
    pub cliente: String,
    pub fecha_recepcion: DateTime<Utc>,
    #[serde(rename = "FechaAjusteASN")]
    pub fecha_ajuste_asn: Option<DateTime<Utc>>,
    pub cantidad: i64,
    pub tipo_delivery: String,
    pub bodega_recepcion: String,
}

impl From<InboundRecord> for RmaSummary {
    fn from(record: InboundRecord) -> Self {
        Self {
            asn: record.asn.unwrap_or_default(),
            cliente: record.cliente,
            fecha_recepcion: record.fecha_recepcion,
            fecha_ajuste_asn: record.fecha_ajuste_asn,
            cantidad: record.cantidad,
            tipo_delivery: record.tipo_delivery,
            bodega_recepcion: record.bodega_recepcion,
        }
    }
}

pub struct QueryService {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
}

impl QueryService {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The record stored under `id`, as a one-element list.
    pub async fn get_by_id<R: Record>(
        &self,
        user: &VerifiedUser,
        id: Option<&str>,
    ) -> Result<Vec<StoredRecord<R>>, QueryError> {
        let id = required(id, "id")?;
        debug!(uid = %user.uid, collection = R::COLLECTION, id, "Fetching by id");

        let document = self
            .store
            .get(R::COLLECTION, id)
            .await?
            .ok_or_else(|| QueryError::NotFound(NO_MATCH.to_string()))?;
        Ok(vec![StoredRecord {
            id: id.to_string(),
            record: R::from_document(id, &document)?,
        }])
    }

    /// First entrada whose reference number equals `raw`.
    ///
    /// The reference must be numeric but is matched as submitted, so
    /// leading zeros are kept. Documents that stored the reference as an
    /// integer are tried when no text match exists.
    pub async fn get_by_reference(
        &self,
        user: &VerifiedUser,
        raw: Option<&str>,
    ) -> Result<Vec<StoredRecord<InboundRecord>>, QueryError> {
        let field = "numero_remision_factura";
        let reference = required(raw, field)?.trim();
        let numeric: i64 = reference
            .parse()
            .map_err(|_| InputError::invalid_number(field))?;
        debug!(uid = %user.uid, reference, "Fetching entrada by reference");

        let mut found = self
            .store
            .query(ENTRADAS, &Query::new().where_eq("NumeroRemisionFactura", reference).limit(1))
            .await?;
        if found.is_empty() {
            found = self
                .store
                .query(ENTRADAS, &Query::new().where_eq("NumeroRemisionFactura", numeric).limit(1))
                .await?;
        }
        let first = found
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::NotFound(NO_MATCH.to_string()))?;

        Ok(vec![StoredRecord {
            record: InboundRecord::from_document(&first.id, &first.fields)?,
            id: first.id,
        }])
    }

    /// Every record dated inside the given calendar month.
    pub async fn month_report<R: Record>(
        &self,
        user: &VerifiedUser,
        month: Option<&str>,
        year: Option<&str>,
    ) -> Result<Vec<StoredRecord<R>>, QueryError> {
        let window = MonthWindow::from_params(month, year, self.clock.now())?;
        debug!(uid = %user.uid, collection = R::COLLECTION, start = %window.start, "Month report");
        self.records_in(window).await
    }

    pub(crate) async fn records_in<R: Record>(
        &self,
        window: MonthWindow,
    ) -> Result<Vec<StoredRecord<R>>, QueryError> {
        let query = Query::new()
            .where_ge(R::DATE_FIELD, window.start)
            .where_lt(R::DATE_FIELD, window.end)
            .order_by(R::DATE_FIELD, R::REPORT_ORDER);

        self.store
            .query(R::COLLECTION, &query)
            .await?
            .into_iter()
            .map(|doc| -> Result<StoredRecord<R>, QueryError> {
                Ok(StoredRecord {
                    record: R::from_document(&doc.id, &doc.fields)?,
                    id: doc.id,
                })
            })
            .collect()
    }

    /// Set the ASN fields of an existing entrada, leaving the rest alone.
    pub async fn update_asn(&self, user: &VerifiedUser, update: &AsnUpdate) -> Result<(), QueryError> {
        let fecha = parse_timestamp("fecha_ajuste_asn", &update.fecha_ajuste_asn)?;
        let id = required(Some(&update.id), "id")?;

        if self.store.get(ENTRADAS, id).await?.is_none() {
            return Err(QueryError::NotFound(NO_MATCH.to_string()));
        }

        let mut fields = Document::new();
        fields.insert("ASN".into(), update.asn.as_str().into());
        fields.insert("FechaAjusteASN".into(), fecha.into());
        self.store.update(ENTRADAS, id, fields).await?;

        info!(uid = %user.uid, id, asn = %update.asn, "ASN updated");
        Ok(())
    }

    /// Create a customer keyed by `cliente`. An existing customer is left
    /// untouched and reported as a conflict.
    pub async fn create_customer(
        &self,
        user: &VerifiedUser,
        customer: NewCustomer,
    ) -> Result<(), QueryError> {
        let cliente = required(Some(&customer.cliente), "cliente")?;
        let code = required(Some(&customer.code), "code")?;

        let record = CustomerRecord {
            code: code.to_string(),
            email: customer.email.trim().to_string(),
            rep_name: customer.rep_name.trim().to_string(),
        };
        self.store
            .create(CUSTOMERS, cliente, record.to_document())
            .await?;

        info!(uid = %user.uid, cliente, "Customer created");
        Ok(())
    }

    /// The entrada whose ASN equals `rma`.
    pub async fn rma_lookup(&self, rma: &str) -> Result<RmaSummary, QueryError> {
        let not_found = || QueryError::NotFound("RMA or ASN not found".to_string());
        if rma.trim().is_empty() {
            return Err(not_found());
        }

        let query = Query::new().where_eq("ASN", rma).limit(1);
        let first = self
            .store
            .query(ENTRADAS, &query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(not_found)?;

        Ok(InboundRecord::from_document(&first.id, &first.fields)?.into())
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, InputError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| InputError::missing(field))
}
