//! Firestore REST client.
//!
//! Speaks the v1 `documents` API directly: typed values are encoded as
//! `{"stringValue": ..}`-style objects, create-only inserts use
//! `documentId`, partial updates use an `updateMask` with an existence
//! precondition, and queries go through `:runQuery`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::StoreError;
use crate::gcp::AccessTokenSource;
use crate::store::{Direction, Document, DocumentStore, FieldValue, FilterOp, Query, StoredDocument};

const API_BASE: &str = "https://firestore.googleapis.com/v1";
const LIST_PAGE_SIZE: &str = "300";

pub struct FirestoreStore {
    http: reqwest::Client,
    tokens: Arc<AccessTokenSource>,
    /// `projects/{project}/databases/{database}/documents`
    root: String,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RunQueryItem {
    document: Option<RawDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    documents: Vec<RawDocument>,
    next_page_token: Option<String>,
}

impl FirestoreStore {
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<AccessTokenSource>,
        project: &str,
        database: &str,
    ) -> Self {
        Self {
            http,
            tokens,
            root: format!("projects/{project}/databases/{database}/documents"),
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = Url::parse(&format!("{API_BASE}/{}", self.root))
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Backend("Firestore base URL cannot be a base".into()))?
            .extend(segments);
        Ok(url)
    }

    async fn token(&self) -> Result<String, StoreError> {
        self.tokens.token().await.map_err(StoreError::Backend)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        collection: &str,
        id: &str,
    ) -> Result<reqwest::Response, StoreError> {
        let response = request
            .bearer_auth(self.token().await?)
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
            StatusCode::CONFLICT => Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
            status => {
                let detail = response.text().await.unwrap_or_default();
                Err(StoreError::Backend(format!("{status}: {detail}")))
            }
        }
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn add(&self, collection: &str, document: Document) -> Result<String, StoreError> {
        let request = self
            .http
            .post(self.url(&[collection])?)
            .json(&json!({ "fields": encode_fields(&document) }));
        let created: RawDocument = self
            .send(request, collection, "")
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(document_id(&created.name).to_string())
    }

    async fn create(&self, collection: &str, id: &str, document: Document) -> Result<(), StoreError> {
        let mut url = self.url(&[collection])?;
        url.query_pairs_mut().append_pair("documentId", id);
        let request = self
            .http
            .post(url)
            .json(&json!({ "fields": encode_fields(&document) }));
        self.send(request, collection, id).await?;
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let request = self.http.get(self.url(&[collection, id])?);
        let response = match self.send(request, collection, id).await {
            Ok(response) => response,
            Err(StoreError::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };
        let raw: RawDocument = response
            .json()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Some(decode_fields(&raw.fields)))
    }

    async fn update(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError> {
        let mut url = self.url(&[collection, id])?;
        {
            let mut query = url.query_pairs_mut();
            for field in fields.keys() {
                query.append_pair("updateMask.fieldPaths", field);
            }
            query.append_pair("currentDocument.exists", "true");
        }
        let request = self
            .http
            .patch(url)
            .json(&json!({ "fields": encode_fields(&fields) }));
        self.send(request, collection, id).await?;
        Ok(())
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        let url = Url::parse(&format!("{API_BASE}/{}:runQuery", self.root))
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let request = self
            .http
            .post(url)
            .json(&json!({ "structuredQuery": structured_query(collection, query) }));

        let items: Vec<RunQueryItem> = self
            .send(request, collection, "")
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let documents: Vec<StoredDocument> = items
            .into_iter()
            .filter_map(|item| item.document)
            .map(|raw| StoredDocument {
                id: document_id(&raw.name).to_string(),
                fields: decode_fields(&raw.fields),
            })
            .collect();
        debug!(collection, matches = documents.len(), "Firestore query");
        Ok(documents)
    }

    async fn list_ids(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.url(&[collection])?;
            {
                let mut query = url.query_pairs_mut();
                query
                    .append_pair("pageSize", LIST_PAGE_SIZE)
                    .append_pair("mask.fieldPaths", "__name__");
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let page: ListPage = self
                .send(self.http.get(url), collection, "")
                .await?
                .json()
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            ids.extend(page.documents.iter().map(|d| document_id(&d.name).to_string()));
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(ids)
    }
}

/// Last path segment of a full document name.
fn document_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

fn encode_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => json!({ "nullValue": null }),
        FieldValue::Integer(i) => json!({ "integerValue": i.to_string() }),
        FieldValue::String(s) => json!({ "stringValue": s }),
        FieldValue::Timestamp(t) => {
            json!({ "timestampValue": t.to_rfc3339_opts(SecondsFormat::AutoSi, true) })
        }
    }
}

fn encode_fields(document: &Document) -> Value {
    Value::Object(
        document
            .iter()
            .map(|(name, value)| (name.clone(), encode_value(value)))
            .collect(),
    )
}

/// Kinds the records never use (booleans, maps, arrays...) decode as `None`.
fn decode_value(value: &Value) -> Option<FieldValue> {
    let (kind, inner) = value.as_object()?.iter().next()?;
    match kind.as_str() {
        "nullValue" => Some(FieldValue::Null),
        "stringValue" => inner.as_str().map(|s| FieldValue::String(s.to_string())),
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse().ok())
            .or_else(|| inner.as_i64())
            .map(FieldValue::Integer),
        "doubleValue" => inner
            .as_f64()
            .filter(|f| f.fract() == 0.0)
            .map(|f| FieldValue::Integer(f as i64)),
        "timestampValue" => inner
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| FieldValue::Timestamp(t.with_timezone(&Utc))),
        _ => None,
    }
}

fn decode_fields(fields: &Map<String, Value>) -> Document {
    fields
        .iter()
        .filter_map(|(name, value)| decode_value(value).map(|v| (name.clone(), v)))
        .collect()
}

fn structured_query(collection: &str, query: &Query) -> Value {
    let mut structured = json!({ "from": [{ "collectionId": collection }] });

    let filters: Vec<Value> = query
        .filters
        .iter()
        .map(|filter| {
            let op = match filter.op {
                FilterOp::Equal => "EQUAL",
                FilterOp::GreaterOrEqual => "GREATER_THAN_OR_EQUAL",
                FilterOp::LessThan => "LESS_THAN",
            };
            json!({ "fieldFilter": {
                "field": { "fieldPath": filter.field },
                "op": op,
                "value": encode_value(&filter.value),
            }})
        })
        .collect();

    match filters.len() {
        0 => {}
        1 => structured["where"] = filters[0].clone(),
        _ => {
            structured["where"] = json!({ "compositeFilter": { "op": "AND", "filters": filters } })
        }
    }

    if let Some((field, direction)) = &query.order_by {
        let direction = match direction {
            Direction::Ascending => "ASCENDING",
            Direction::Descending => "DESCENDING",
        };
        structured["orderBy"] = json!([{ "field": { "fieldPath": field }, "direction": direction }]);
    }
    if let Some(limit) = query.limit {
        structured["limit"] = json!(limit);
    }
    structured
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> FirestoreStore {
        let http = reqwest::Client::new();
        let tokens = Arc::new(AccessTokenSource::from_static(http.clone(), "t"));
        FirestoreStore::new(http, tokens, "b-materials", "app-in-out-good")
    }

    #[test]
    fn document_urls_escape_ids() {
        let url = store().url(&["customers", "ACME Corp/MX"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://firestore.googleapis.com/v1/projects/b-materials/databases/app-in-out-good/documents/customers/ACME%20Corp%2FMX"
        );
    }

    #[test]
    fn values_encode_as_firestore_kinds() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap();
        assert_eq!(encode_value(&FieldValue::Integer(12)), json!({ "integerValue": "12" }));
        assert_eq!(
            encode_value(&FieldValue::Timestamp(at)),
            json!({ "timestampValue": "2024-03-01T15:00:00Z" })
        );
        assert_eq!(encode_value(&FieldValue::Null), json!({ "nullValue": null }));
    }

    #[test]
    fn decodes_known_kinds_and_skips_others() {
        let fields: Map<String, Value> = serde_json::from_value(json!({
            "Cantidad": { "integerValue": "4" },
            "Cliente": { "stringValue": "ACME" },
            "FechaRecepcion": { "timestampValue": "2024-03-01T15:00:00.123456Z" },
            "ASN": { "nullValue": null },
            "Flag": { "booleanValue": true }
        }))
        .unwrap();

        let doc = decode_fields(&fields);
        assert_eq!(doc["Cantidad"], FieldValue::Integer(4));
        assert_eq!(doc["Cliente"], FieldValue::from("ACME"));
        assert!(doc["FechaRecepcion"].as_timestamp().is_some());
        assert_eq!(doc["ASN"], FieldValue::Null);
        assert!(!doc.contains_key("Flag"));
    }

    #[test]
    fn range_query_uses_composite_filter() {
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let query = Query::new()
            .where_ge("FechaSalida", at)
            .where_lt("FechaSalida", at)
            .order_by("FechaSalida", Direction::Descending);
        let structured = structured_query("salidas", &query);

        assert_eq!(structured["from"][0]["collectionId"], "salidas");
        assert_eq!(structured["where"]["compositeFilter"]["op"], "AND");
        assert_eq!(
            structured["where"]["compositeFilter"]["filters"][0]["fieldFilter"]["op"],
            "GREATER_THAN_OR_EQUAL"
        );
        assert_eq!(structured["orderBy"][0]["direction"], "DESCENDING");
        assert!(structured.get("limit").is_none());
    }

    #[test]
    fn single_filter_is_not_wrapped() {
        let structured = structured_query("entradas", &Query::new().where_eq("ASN", "R1").limit(1));
        assert_eq!(structured["where"]["fieldFilter"]["op"], "EQUAL");
        assert_eq!(structured["limit"], 1);
    }

    #[test]
    fn ids_come_from_document_names() {
        assert_eq!(
            document_id("projects/p/databases/d/documents/entradas/abc123"),
            "abc123"
        );
    }
}
