//! Persisted record types and their document mapping.
//!
//! Field names are the PascalCase names the `entradas` and `salidas`
//! collections have always used; the same names appear in JSON responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::{Direction, Document, FieldValue};

pub const ENTRADAS: &str = "entradas";
pub const SALIDAS: &str = "salidas";
pub const CUSTOMERS: &str = "customers";

/// Stored in place of a client when the form sent the literal `"null"`.
pub const NO_CLIENT: &str = "N/A";

/// Delivery type that triggers a customer notification.
pub const RMA_DELIVERY: &str = "Devolución (RMA)";

/// Map the form's `"null"` client to [`NO_CLIENT`].
pub fn normalize_client(raw: &str) -> String {
    if raw == "null" {
        NO_CLIENT.to_string()
    } else {
        raw.to_string()
    }
}

/// Generates `COLUMNS`, `to_document` and `from_document` from one table
/// of `field: "StoredName" => reader` entries, in column order.
macro_rules! persisted_fields {
    ($collection:expr; $($field:ident: $name:literal => $read:ident),+ $(,)?) => {
        const COLUMNS: &'static [&'static str] = &[$($name),+];

        fn to_document(&self) -> Document {
            let mut doc = Document::new();
            $(doc.insert($name.to_string(), FieldValue::from(self.$field.clone()));)+
            doc
        }

        fn from_document(id: &str, document: &Document) -> Result<Self, StoreError> {
            let f = FieldReader::new($collection, id, document);
            Ok(Self {
                $($field: f.$read($name)?,)+
            })
        }
    };
}

/// A record type stored in its own collection.
pub trait Record: Serialize + Sized + Send + Sync {
    const COLLECTION: &'static str;

    /// Timestamp field the month reports filter and sort on.
    const DATE_FIELD: &'static str;

    const REPORT_ORDER: Direction;

    /// Field names in export column order.
    const COLUMNS: &'static [&'static str];

    fn to_document(&self) -> Document;

    fn from_document(id: &str, document: &Document) -> Result<Self, StoreError>;
}

/// Goods received at a warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InboundRecord {
    pub tipo_delivery: String,
    pub bodega_recepcion: String,
    pub proveedor_recepcion: String,
    pub cliente: String,
    pub numero_remision_factura: String,
    pub persona_recepcion: String,
    pub fecha_recepcion: DateTime<Utc>,
    pub evidencia_recepcion: String,
    pub cantidad: i64,
    pub comentarios: String,
    #[serde(rename = "ASN", default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<String>,
    #[serde(rename = "FechaAjusteASN", default, skip_serializing_if = "Option::is_none")]
    pub fecha_ajuste_asn: Option<DateTime<Utc>>,
}

impl InboundRecord {
    pub fn is_rma(&self) -> bool {
        self.tipo_delivery == RMA_DELIVERY
    }

    pub fn has_client(&self) -> bool {
        self.cliente != NO_CLIENT
    }
}

impl Record for InboundRecord {
    const COLLECTION: &'static str = ENTRADAS;
    const DATE_FIELD: &'static str = "FechaRecepcion";
    const REPORT_ORDER: Direction = Direction::Ascending;

    persisted_fields! { ENTRADAS;
        tipo_delivery: "TipoDelivery" => text,
        bodega_recepcion: "BodegaRecepcion" => text,
        proveedor_recepcion: "ProveedorRecepcion" => text,
        cliente: "Cliente" => text,
        numero_remision_factura: "NumeroRemisionFactura" => text,
        persona_recepcion: "PersonaRecepcion" => text,
        fecha_recepcion: "FechaRecepcion" => timestamp,
        evidencia_recepcion: "EvidenciaRecepcion" => text,
        cantidad: "Cantidad" => integer,
        comentarios: "Comentarios" => text,
        asn: "ASN" => optional_text,
        fecha_ajuste_asn: "FechaAjusteASN" => optional_timestamp,
    }
}

/// Goods leaving a warehouse, signed for by the person collecting them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutboundRecord {
    pub bodega_salida: String,
    pub proveedor_salida: String,
    pub cliente: String,
    pub numero_orden_consecutivo: String,
    pub persona_entrega: String,
    pub persona_recoge: String,
    pub firma_persona_recoge: String,
    pub evidencia_salida: String,
    pub fecha_salida: DateTime<Utc>,
    pub comentarios: String,
}

impl Record for OutboundRecord {
    const COLLECTION: &'static str = SALIDAS;
    const DATE_FIELD: &'static str = "FechaSalida";
    const REPORT_ORDER: Direction = Direction::Descending;

    persisted_fields! { SALIDAS;
        bodega_salida: "BodegaSalida" => text,
        proveedor_salida: "ProveedorSalida" => text,
        cliente: "Cliente" => text,
        numero_orden_consecutivo: "NumeroOrdenConsecutivo" => text,
        persona_entrega: "PersonaEntrega" => text,
        persona_recoge: "PersonaRecoge" => text,
        firma_persona_recoge: "FirmaPersonaRecoge" => text,
        evidencia_salida: "EvidenciaSalida" => text,
        fecha_salida: "FechaSalida" => timestamp,
        comentarios: "Comentarios" => text,
    }
}

/// Customer contact, stored under the client identifier as document id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub code: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub rep_name: String,
}

impl CustomerRecord {
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("code".into(), self.code.as_str().into());
        doc.insert("email".into(), self.email.as_str().into());
        doc.insert("rep_name".into(), self.rep_name.as_str().into());
        doc
    }

    pub fn from_document(id: &str, document: &Document) -> Result<Self, StoreError> {
        let f = FieldReader::new(CUSTOMERS, id, document);
        Ok(Self {
            code: f.text("code")?,
            email: f.text("email")?,
            rep_name: f.text("rep_name")?,
        })
    }
}

/// A record with the id of the document it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredRecord<T> {
    pub id: String,
    #[serde(flatten)]
    pub record: T,
}

/// Typed access to document fields with errors naming the document.
struct FieldReader<'a> {
    collection: &'static str,
    id: &'a str,
    document: &'a Document,
}

impl<'a> FieldReader<'a> {
    fn new(collection: &'static str, id: &'a str, document: &'a Document) -> Self {
        Self {
            collection,
            id,
            document,
        }
    }

    fn malformed(&self, field: &str, expected: &str) -> StoreError {
        StoreError::Malformed {
            collection: self.collection.to_string(),
            id: self.id.to_string(),
            reason: format!("{field} is not {expected}"),
        }
    }

    /// Missing text reads as empty. Integers are accepted for reference
    /// numbers written before they became text.
    fn text(&self, field: &str) -> Result<String, StoreError> {
        Ok(self.optional_text(field)?.unwrap_or_default())
    }

    fn optional_text(&self, field: &str) -> Result<Option<String>, StoreError> {
        match self.document.get(field) {
            None | Some(FieldValue::Null) => Ok(None),
            Some(FieldValue::String(s)) => Ok(Some(s.clone())),
            Some(FieldValue::Integer(i)) => Ok(Some(i.to_string())),
            Some(FieldValue::Timestamp(_)) => Err(self.malformed(field, "text")),
        }
    }

    fn integer(&self, field: &str) -> Result<i64, StoreError> {
        match self.document.get(field) {
            None | Some(FieldValue::Null) => Ok(0),
            Some(FieldValue::Integer(i)) => Ok(*i),
            Some(_) => Err(self.malformed(field, "an integer")),
        }
    }

    fn timestamp(&self, field: &str) -> Result<DateTime<Utc>, StoreError> {
        self.optional_timestamp(field)?
            .ok_or_else(|| self.malformed(field, "a timestamp"))
    }

    fn optional_timestamp(&self, field: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        match self.document.get(field) {
            None | Some(FieldValue::Null) => Ok(None),
            Some(FieldValue::Timestamp(t)) => Ok(Some(*t)),
            Some(_) => Err(self.malformed(field, "a timestamp")),
        }
    }
}
