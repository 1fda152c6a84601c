use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bodega::store::FieldValue;
use bodega::{
    DocumentStore, FormFields, ImageIngestor, Inbound, InputError, MemoryBlobStore,
    MemoryDocumentStore, Notifier, NotifyOutcome, Outbound, PipelineError, RecordingMailer, StorageError,
    StoreError, SubmissionPipeline, VerifiedUser,
};

const BUCKET: &str = "app-entradas-salidas-merc";
const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, b'I', b'H'];

struct Harness {
    blobs: Arc<MemoryBlobStore>,
    store: Arc<MemoryDocumentStore>,
    mailer: Arc<RecordingMailer>,
    pipeline: SubmissionPipeline,
}

fn harness_with(blobs: MemoryBlobStore) -> Harness {
    let blobs = Arc::new(blobs);
    let store = Arc::new(MemoryDocumentStore::new());
    let mailer = Arc::new(RecordingMailer::new());
    let notifier = Arc::new(Notifier::new(store.clone(), mailer.clone()));
    let pipeline = SubmissionPipeline::new(ImageIngestor::new(blobs.clone()), store.clone(), notifier);
    Harness {
        blobs,
        store,
        mailer,
        pipeline,
    }
}

fn harness() -> Harness {
    harness_with(MemoryBlobStore::new(BUCKET))
}

fn user() -> VerifiedUser {
    VerifiedUser {
        uid: "warehouse-op".into(),
    }
}

fn image_wrapper() -> String {
    format!(r#"{{"base64Data":"{}"}}"#, STANDARD.encode(PNG))
}

fn entrada_form() -> FormFields {
    [
        ("evidencia_recepcion", image_wrapper().as_str()),
        ("tipo_delivery", "Normal"),
        ("bodega_recepcion", "Bodega Norte"),
        ("proveedor_recepcion", "DHL"),
        ("cliente", "ACME"),
        ("numero_remision_factura", "1001"),
        ("persona_recepcion", "Ana"),
        ("fecha_recepcion", "2024-03-01T10:00:00.000-0500"),
        ("cantidad", "12"),
        ("comentarios", "sin daños"),
    ]
    .into_iter()
    .collect()
}

fn salida_form() -> FormFields {
    [
        ("evidencia_salida", image_wrapper().as_str()),
        ("firma_persona_recoge", image_wrapper().as_str()),
        ("bodega_salida", "Bodega Sur"),
        ("proveedor_salida", "FedEx"),
        ("cliente", "null"),
        ("numero_orden_consecutivo", "A-77"),
        ("persona_entrega", "Luis"),
        ("persona_recoge", "Marta"),
        ("fecha_salida", "2024-03-02T18:30:00.000-0600"),
        ("comentarios", ""),
    ]
    .into_iter()
    .collect()
}

#[tokio::test]
async fn entrada_is_stored_with_public_evidence_url() {
    let h = harness();
    let submitted = h.pipeline.submit::<Inbound>(&user(), &entrada_form()).await.unwrap();

    assert_eq!(submitted.message, "Entrada submitted successfully.");
    assert_eq!(h.store.count("entradas"), 1);
    assert_eq!(h.blobs.len(), 1);

    let doc = h.store.get("entradas", &submitted.id).await.unwrap().unwrap();
    let url = doc["EvidenciaRecepcion"].as_str().unwrap();
    let key = h.blobs.keys().remove(0);
    assert!(key.starts_with("evidencias_entradas/"));
    assert_eq!(url, format!("https://storage.googleapis.com/{BUCKET}/{key}"));
    assert_eq!(doc["Cantidad"], FieldValue::Integer(12));
    assert_eq!(
        h.blobs.get(&key).unwrap().metadata["upload-source"],
        "retool-app-entradas"
    );
}

#[tokio::test]
async fn bad_quantity_uploads_and_writes_nothing() {
    let h = harness();
    let mut form = entrada_form();
    form.insert("cantidad", "doce");

    let err = h.pipeline.submit::<Inbound>(&user(), &form).await.unwrap_err();

    assert_eq!(err, PipelineError::Input(InputError::invalid_number("cantidad")));
    assert!(h.blobs.is_empty());
    assert_eq!(h.store.count("entradas"), 0);
}

#[tokio::test]
async fn non_image_evidence_is_rejected_before_upload() {
    let h = harness();
    let mut form = entrada_form();
    form.insert(
        "evidencia_recepcion",
        format!(r#"{{"base64Data":"{}"}}"#, STANDARD.encode(b"just text")),
    );

    let err = h.pipeline.submit::<Inbound>(&user(), &form).await.unwrap_err();
    assert!(matches!(err, PipelineError::Input(InputError::NotAnImage { .. })));
    assert!(h.blobs.is_empty());
}

#[tokio::test]
async fn salida_uploads_evidence_then_signature() {
    let h = harness();
    let submitted = h.pipeline.submit::<Outbound>(&user(), &salida_form()).await.unwrap();

    assert_eq!(submitted.message, "Salida submitted successfully.");
    assert_eq!(submitted.images.len(), 2);
    assert!(submitted.images[0].key.starts_with("evidencias_salidas/"));
    assert!(submitted.images[1]
        .key
        .starts_with("evidencias_salidas/salidas_firmas/"));

    let doc = h.store.get("salidas", &submitted.id).await.unwrap().unwrap();
    assert_eq!(doc["Cliente"], FieldValue::from("N/A"));
    assert_eq!(doc["EvidenciaSalida"].as_str(), Some(submitted.images[0].url.as_str()));
    assert_eq!(doc["FirmaPersonaRecoge"].as_str(), Some(submitted.images[1].url.as_str()));
}

#[tokio::test]
async fn signature_upload_failure_leaves_evidence_orphaned() {
    let h = harness_with(MemoryBlobStore::new(BUCKET).failing_from(1));

    let err = h.pipeline.submit::<Outbound>(&user(), &salida_form()).await.unwrap_err();

    assert!(matches!(err, PipelineError::Storage(StorageError::Write { .. })));
    assert_eq!(h.blobs.len(), 1);
    assert_eq!(h.store.count("salidas"), 0);
}

#[tokio::test]
async fn store_failure_after_upload_is_reported() {
    let h = harness();
    h.store.set_fail_writes(true);

    let err = h.pipeline.submit::<Inbound>(&user(), &entrada_form()).await.unwrap_err();

    assert!(matches!(err, PipelineError::Store(StoreError::Backend(_))));
    assert_eq!(h.blobs.len(), 1);
}

#[tokio::test]
async fn rma_entrada_notifies_known_customer() {
    let h = harness();
    let customer = bodega::CustomerRecord {
        code: "AC".into(),
        email: "ops@acme.test".into(),
        rep_name: "Marta".into(),
    };
    h.store
        .create("customers", "ACME", customer.to_document())
        .await
        .unwrap();

    let mut form = entrada_form();
    form.insert("tipo_delivery", "Devolución (RMA)");
    let submitted = h.pipeline.submit::<Inbound>(&user(), &form).await.unwrap();
    assert_eq!(submitted.notified, Some(NotifyOutcome::Sent));

    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to[0].email, "ops@acme.test");
    assert!(sent[0].text.contains("Bodega: Bodega Norte"));
}

#[tokio::test]
async fn rma_without_customer_still_succeeds() {
    let h = harness();
    let mut form = entrada_form();
    form.insert("tipo_delivery", "Devolución (RMA)");

    let submitted = h.pipeline.submit::<Inbound>(&user(), &form).await.unwrap();

    assert_eq!(submitted.notified, Some(NotifyOutcome::UnknownCustomer));
    assert!(h.mailer.sent().is_empty());
    assert_eq!(h.store.count("entradas"), 1);
}

#[tokio::test]
async fn rma_with_null_client_skips_notification() {
    let h = harness();
    let mut form = entrada_form();
    form.insert("tipo_delivery", "Devolución (RMA)");
    form.insert("cliente", "null");

    let submitted = h.pipeline.submit::<Inbound>(&user(), &form).await.unwrap();

    assert_eq!(submitted.notified, None);
    assert!(h.mailer.sent().is_empty());
}
