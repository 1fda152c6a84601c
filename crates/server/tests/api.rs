//! HTTP-level tests for the Bodega API, run against the in-memory
//! collaborators through `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bodega::store::FieldValue;
use bodega::{
    DocumentStore, InboundRecord, ManualClock, MemoryBlobStore, MemoryDocumentStore, Record,
    RecordingMailer, StaticIdentityProvider,
};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use server::{build_router, Collaborators, ServerConfig, ServerState};
use tower::ServiceExt;

const TOKEN: &str = "good-token";
const RMA_KEY: &str = "partner-key";
const BOUNDARY: &str = "XBODEGABOUNDARY";
const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

struct TestApp {
    router: Router,
    blobs: Arc<MemoryBlobStore>,
    store: Arc<MemoryDocumentStore>,
    clock: Arc<ManualClock>,
}

fn test_app_with(config: ServerConfig) -> TestApp {
    let blobs = Arc::new(MemoryBlobStore::new("app-entradas-salidas-merc"));
    let store = Arc::new(MemoryDocumentStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    ));
    let collaborators = Collaborators {
        identity: Arc::new(StaticIdentityProvider::new().with_token(TOKEN, "user-1")),
        blobs: blobs.clone(),
        store: store.clone(),
        mailer: Arc::new(RecordingMailer::new()),
        clock: clock.clone(),
    };
    let state = ServerState::new(config, collaborators);

    TestApp {
        router: build_router(Arc::new(state)),
        blobs,
        store,
        clock,
    }
}

fn test_app() -> TestApp {
    test_app_with(ServerConfig {
        rma_api_key: Some(RMA_KEY.to_string()),
        ..ServerConfig::default()
    })
}

impl TestApp {
    async fn call(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }
}

fn image_field() -> String {
    json!({ "base64Data": STANDARD.encode(PNG) }).to_string()
}

fn multipart(fields: &[(&str, String)]) -> Body {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    Body::from(body)
}

fn entrada_fields() -> Vec<(&'static str, String)> {
    vec![
        ("evidencia_recepcion", image_field()),
        ("tipo_delivery", "Normal".into()),
        ("bodega_recepcion", "Bodega Norte".into()),
        ("proveedor_recepcion", "DHL".into()),
        ("cliente", "ACME".into()),
        ("numero_remision_factura", "1001".into()),
        ("persona_recepcion", "Ana".into()),
        ("fecha_recepcion", "2024-03-01T10:00:00.000-0500".into()),
        ("cantidad", "12".into()),
        ("comentarios", "".into()),
    ]
}

fn submit_request(path: &str, token: Option<&str>, body: Body) -> Request<Body> {
    let mut builder = Request::post(path).header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={BOUNDARY}"),
    );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(body).unwrap()
}

fn form_request(path: &str, body: &str) -> Request<Body> {
    Request::post(path)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn json_request(path: &str, auth: &str, body: Value) -> Request<Body> {
    Request::post(path)
        .header(header::AUTHORIZATION, auth)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn entrada_at(at: chrono::DateTime<Utc>) -> InboundRecord {
    InboundRecord {
        tipo_delivery: "Normal".into(),
        bodega_recepcion: "Norte".into(),
        proveedor_recepcion: "DHL".into(),
        cliente: "ACME".into(),
        numero_remision_factura: "1".into(),
        persona_recepcion: "Ana".into(),
        fecha_recepcion: at,
        evidencia_recepcion: "u".into(),
        cantidad: 1,
        comentarios: String::new(),
        asn: None,
        fecha_ajuste_asn: None,
    }
}

#[tokio::test]
async fn health_is_public() {
    let app = test_app();
    let (status, body) = app
        .call(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("healthy"));
}

#[tokio::test]
async fn unknown_route_is_404() {
    let app = test_app();
    let (status, _) = app
        .call(Request::get("/nope").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn submission_without_token_is_401() {
    let app = test_app();
    let (status, body) = app
        .call(submit_request("/entradas", None, multipart(&entrada_fields())))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, "missing Authorization token");
    assert!(app.blobs.is_empty());
}

#[tokio::test]
async fn submission_with_unknown_token_is_401() {
    let app = test_app();
    let (status, body) = app
        .call(submit_request("/entradas", Some("stolen"), multipart(&entrada_fields())))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, "invalid or expired token");
}

#[tokio::test]
async fn entrada_submission_is_created() {
    let app = test_app();
    let (status, body) = app
        .call(submit_request("/entradas", Some(TOKEN), multipart(&entrada_fields())))
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, r#"{"message":"Entrada submitted successfully."}"#);
    assert_eq!(app.store.count("entradas"), 1);
    assert_eq!(app.blobs.len(), 1);

    let stored = &app.store.documents("entradas")[0];
    let url = stored.fields["EvidenciaRecepcion"].as_str().unwrap();
    assert!(url.starts_with("https://storage.googleapis.com/app-entradas-salidas-merc/evidencias_entradas/"));
}

#[tokio::test]
async fn unparseable_quantity_is_400_with_no_side_effects() {
    let app = test_app();
    let mut fields = entrada_fields();
    fields.retain(|(name, _)| *name != "cantidad");
    fields.push(("cantidad", "doce".into()));

    let (status, body) = app
        .call(submit_request("/entradas", Some(TOKEN), multipart(&fields)))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Invalid cantidad");
    assert!(app.blobs.is_empty());
    assert_eq!(app.store.count("entradas"), 0);
}

#[tokio::test]
async fn non_multipart_submission_is_400() {
    let app = test_app();
    let (status, _) = app
        .call(json_request("/entradas", &format!("Bearer {TOKEN}"), json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_submission_is_400() {
    let app = test_app_with(ServerConfig {
        max_body_size_mb: 1,
        ..ServerConfig::default()
    });
    let mut fields = entrada_fields();
    fields.push(("comentarios_extra", "x".repeat(2 * 1024 * 1024)));

    let (status, _) = app
        .call(submit_request("/entradas", Some(TOKEN), multipart(&fields)))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.blobs.is_empty());
}

#[tokio::test]
async fn salida_submission_uploads_both_images() {
    let app = test_app();
    let fields = vec![
        ("evidencia_salida", image_field()),
        ("firma_persona_recoge", image_field()),
        ("bodega_salida", "Bodega Sur".to_string()),
        ("cliente", "null".to_string()),
        ("numero_orden_consecutivo", "A-7".to_string()),
        ("fecha_salida", "2024-03-02T18:30:00.000-0600".to_string()),
    ];

    let (status, body) = app
        .call(submit_request("/salidas", Some(TOKEN), multipart(&fields)))
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, r#"{"message":"Salida submitted successfully."}"#);
    assert_eq!(app.blobs.len(), 2);
    assert_eq!(
        app.store.documents("salidas")[0].fields["Cliente"],
        FieldValue::from("N/A")
    );
}

#[tokio::test]
async fn query_entrada_by_id() {
    let app = test_app();
    let id = app
        .store
        .add("entradas", entrada_at(Utc::now()).to_document())
        .await
        .unwrap();

    let (status, body) = app
        .call(form_request("/query-entrada", &format!("id={id}")))
        .await;
    assert_eq!(status, StatusCode::OK);
    let records: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(records[0]["id"], id.as_str());
    assert_eq!(records[0]["BodegaRecepcion"], "Norte");

    let (status, _) = app.call(form_request("/query-entrada", "id=missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.call(form_request("/query-entrada", "")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Missing id");
}

#[tokio::test]
async fn month_report_filters_to_the_month() {
    let app = test_app();
    for (month, day) in [(1, 31), (2, 1), (2, 29), (3, 1)] {
        let at = Utc.with_ymd_and_hms(2024, month, day, 0, 0, 0).unwrap();
        app.store.add("entradas", entrada_at(at).to_document()).await.unwrap();
    }

    let (status, body) = app
        .call(json_request(
            "/entradas-data",
            &format!("Bearer {TOKEN}"),
            json!({ "month": 2, "year": "2024" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let records: Vec<Value> = serde_json::from_str(&body).unwrap();
    let dates: Vec<&str> = records
        .iter()
        .map(|r| r["FechaRecepcion"].as_str().unwrap())
        .collect();
    assert_eq!(dates, vec!["2024-02-01T00:00:00Z", "2024-02-29T00:00:00Z"]);

    let (status, _) = app
        .call(json_request(
            "/entradas-data",
            &format!("Bearer {TOKEN}"),
            json!({ "month": 13, "year": 2024 }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn update_asn_is_201_and_partial() {
    let app = test_app();
    let id = app
        .store
        .add("entradas", entrada_at(Utc::now()).to_document())
        .await
        .unwrap();

    let (status, _) = app
        .call(form_request(
            "/update-asn",
            &format!("id={id}&asn=ASN-42&fecha_ajuste_asn=2024-05-01T09%3A00%3A00.000-0500"),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let doc = app.store.get("entradas", &id).await.unwrap().unwrap();
    assert_eq!(doc["ASN"], FieldValue::from("ASN-42"));
    assert_eq!(doc["BodegaRecepcion"], FieldValue::from("Norte"));
}

#[tokio::test]
async fn create_customer_twice_conflicts() {
    let app = test_app();
    let auth = format!("Bearer {TOKEN}");
    let body = json!({ "cliente": "ACME", "code": "AC", "email": "ops@acme.test", "rep_name": "Marta" });

    let (status, _) = app.call(json_request("/create-customer", &auth, body)).await;
    assert_eq!(status, StatusCode::CREATED);

    let again = json!({ "cliente": "ACME", "code": "ZZ" });
    let (status, message) = app.call(json_request("/create-customer", &auth, again)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(message, "Customer already exists");

    let doc = app.store.get("customers", "ACME").await.unwrap().unwrap();
    assert_eq!(doc["code"], FieldValue::from("AC"));
}

#[tokio::test]
async fn customer_list_is_cached_for_the_ttl() {
    let app = test_app();
    app.store
        .create("customers", "ACME", Default::default())
        .await
        .unwrap();

    let authed = || {
        Request::get("/get-customers")
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .body(Body::empty())
            .unwrap()
    };
    let anonymous = || Request::get("/get-customers").body(Body::empty()).unwrap();

    let (status, first) = app.call(authed()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, r#"["ACME"]"#);

    app.store
        .create("customers", "Globex", Default::default())
        .await
        .unwrap();
    app.clock.advance(Duration::from_secs(10 * 60));

    let (status, second) = app.call(anonymous()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second, first);

    app.clock.advance(Duration::from_secs(5 * 60));
    let (status, _) = app.call(anonymous()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, refreshed) = app.call(authed()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refreshed, r#"["ACME","Globex"]"#);
}

#[tokio::test]
async fn rma_requires_partner_key() {
    let app = test_app();
    let mut record = entrada_at(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
    record.asn = Some("RMA-7".into());
    app.store.add("entradas", record.to_document()).await.unwrap();

    let (status, body) = app
        .call(json_request("/rma", &format!("Bearer {TOKEN}"), json!({ "rma": "RMA-7" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, "unauthorized");

    let partner = format!("Bearer {RMA_KEY}");
    let (status, body) = app
        .call(json_request("/rma", &partner, json!({ "rma": "RMA-7" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    let summary: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(summary["ASN"], "RMA-7");
    assert_eq!(summary["Cliente"], "ACME");

    let (status, body) = app
        .call(json_request("/rma", &partner, json!({ "rma": "RMA-8" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "RMA or ASN not found");
}

#[tokio::test]
async fn export_requires_email() {
    let app = test_app();
    let (status, body) = app
        .call(json_request("/export", &format!("Bearer {TOKEN}"), json!({ "filters": {} })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Missing email");

    let (status, _) = app
        .call(json_request(
            "/export",
            &format!("Bearer {TOKEN}"),
            json!({ "email": "boss@example.test", "filters": { "tipo": "salidas" } }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
}
