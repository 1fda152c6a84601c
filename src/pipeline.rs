//! The submission pipeline shared by entradas and salidas.
//!
//! A submission runs in fixed stages, each gating the next:
//!
//! 1. authentication (done by the caller, proven by a [`VerifiedUser`]),
//! 2. decoding and sniffing every image slot,
//! 3. parsing the scalar form fields into a record,
//! 4. uploading the images in slot order,
//! 5. the kind's notification hook,
//! 6. the document write.
//!
//! Stages 2 and 3 are pure, so invalid input never reaches the blob store.
//! Nothing is compensated: an upload or write failure leaves the objects
//! uploaded before it in the bucket, and their keys are logged.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::auth::VerifiedUser;
use crate::dates::{parse_timestamp, parse_timestamp_strict};
use crate::error::{InputError, PipelineError};
use crate::evidence::{decode_evidence, DecodedImage, ImageIngestor, UploadedImage};
use crate::notify::{Notifier, NotifyOutcome};
use crate::records::{normalize_client, InboundRecord, OutboundRecord, Record};
use crate::store::DocumentStore;

/// Text fields of a submitted form, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields(HashMap<String, String>);

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Value of `name`, empty when absent.
    pub fn text(&self, name: &str) -> String {
        self.get(name).unwrap_or_default().to_string()
    }

    /// Non-blank value of `name`.
    pub fn required(&self, name: &str) -> Result<&str, InputError> {
        self.get(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| InputError::missing(name))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// One image field of a form and the bucket folder it is uploaded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSlot {
    pub field: &'static str,
    pub folder: &'static str,
}

/// Shape of one kind of submission.
pub trait SubmissionKind: Send + Sync + 'static {
    type Record: Record;

    const NAME: &'static str;

    /// Uploaded in this order.
    const IMAGE_SLOTS: &'static [ImageSlot];

    /// Value of the `upload-source` metadata on uploaded objects.
    const UPLOAD_SOURCE: &'static str;

    const SUCCESS_MESSAGE: &'static str;

    /// Build the record from the scalar fields. Image URL fields are left
    /// empty until [`SubmissionKind::attach_image`] fills them.
    fn parse(form: &FormFields) -> Result<Self::Record, InputError>;

    fn attach_image(record: &mut Self::Record, slot: &ImageSlot, url: String);

    /// The record to notify about before it is written, if any.
    fn notification(_record: &Self::Record) -> Option<&InboundRecord> {
        None
    }
}

/// `/entradas`: one evidence photo, RMA notification.
#[derive(Debug, Clone, Copy)]
pub struct Inbound;

impl SubmissionKind for Inbound {
    type Record = InboundRecord;

    const NAME: &'static str = "entrada";
    const IMAGE_SLOTS: &'static [ImageSlot] = &[ImageSlot {
        field: "evidencia_recepcion",
        folder: "evidencias_entradas",
    }];
    const UPLOAD_SOURCE: &'static str = "retool-app-entradas";
    const SUCCESS_MESSAGE: &'static str = "Entrada submitted successfully.";

    fn parse(form: &FormFields) -> Result<InboundRecord, InputError> {
        let cantidad = form
            .required("cantidad")?
            .parse::<i64>()
            .map_err(|_| InputError::invalid_number("cantidad"))?;
        let fecha_recepcion = parse_timestamp(
            "fecha_recepcion",
            form.get("fecha_recepcion").unwrap_or_default(),
        )?;

        Ok(InboundRecord {
            tipo_delivery: form.text("tipo_delivery"),
            bodega_recepcion: form.text("bodega_recepcion"),
            proveedor_recepcion: form.text("proveedor_recepcion"),
            cliente: normalize_client(&form.text("cliente")),
            numero_remision_factura: form.text("numero_remision_factura"),
            persona_recepcion: form.text("persona_recepcion"),
            fecha_recepcion,
            evidencia_recepcion: String::new(),
            cantidad,
            comentarios: form.text("comentarios"),
            asn: None,
            fecha_ajuste_asn: None,
        })
    }

    fn attach_image(record: &mut InboundRecord, _slot: &ImageSlot, url: String) {
        record.evidencia_recepcion = url;
    }

    fn notification(record: &InboundRecord) -> Option<&InboundRecord> {
        (record.is_rma() && record.has_client()).then_some(record)
    }
}

/// `/salidas`: evidence photo plus the collector's signature.
#[derive(Debug, Clone, Copy)]
pub struct Outbound;

impl Outbound {
    pub const EVIDENCE: ImageSlot = ImageSlot {
        field: "evidencia_salida",
        folder: "evidencias_salidas",
    };
    pub const SIGNATURE: ImageSlot = ImageSlot {
        field: "firma_persona_recoge",
        folder: "evidencias_salidas/salidas_firmas",
    };
}

impl SubmissionKind for Outbound {
    type Record = OutboundRecord;

    const NAME: &'static str = "salida";
    const IMAGE_SLOTS: &'static [ImageSlot] = &[Outbound::EVIDENCE, Outbound::SIGNATURE];
    const UPLOAD_SOURCE: &'static str = "retool-app-salidas";
    const SUCCESS_MESSAGE: &'static str = "Salida submitted successfully.";

    fn parse(form: &FormFields) -> Result<OutboundRecord, InputError> {
        let fecha_salida =
            parse_timestamp_strict("fecha_salida", form.get("fecha_salida").unwrap_or_default())?;

        Ok(OutboundRecord {
            bodega_salida: form.text("bodega_salida"),
            proveedor_salida: form.text("proveedor_salida"),
            cliente: normalize_client(&form.text("cliente")),
            numero_orden_consecutivo: form.text("numero_orden_consecutivo"),
            persona_entrega: form.text("persona_entrega"),
            persona_recoge: form.text("persona_recoge"),
            firma_persona_recoge: String::new(),
            evidencia_salida: String::new(),
            fecha_salida,
            comentarios: form.text("comentarios"),
        })
    }

    fn attach_image(record: &mut OutboundRecord, slot: &ImageSlot, url: String) {
        if slot.field == Outbound::SIGNATURE.field {
            record.firma_persona_recoge = url;
        } else {
            record.evidencia_salida = url;
        }
    }
}

/// Result of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub id: String,
    pub message: &'static str,
    pub images: Vec<UploadedImage>,
    /// Outcome of the return notification, for kinds that sent one.
    pub notified: Option<NotifyOutcome>,
}

pub struct SubmissionPipeline {
    ingestor: ImageIngestor,
    store: Arc<dyn DocumentStore>,
    notifier: Arc<Notifier>,
}

impl SubmissionPipeline {
    pub fn new(ingestor: ImageIngestor, store: Arc<dyn DocumentStore>, notifier: Arc<Notifier>) -> Self {
        Self {
            ingestor,
            store,
            notifier,
        }
    }

    /// Validate, upload, notify and persist one submission of kind `K`.
    pub async fn submit<K: SubmissionKind>(
        &self,
        user: &VerifiedUser,
        form: &FormFields,
    ) -> Result<Submitted, PipelineError> {
        let decoded = K::IMAGE_SLOTS
            .iter()
            .map(|slot| {
                decode_evidence(slot.field, form.get(slot.field).unwrap_or_default())
                    .map(|image| (slot, image))
            })
            .collect::<Result<Vec<(&ImageSlot, DecodedImage)>, InputError>>()?;
        let mut record = K::parse(form)?;

        let mut images = Vec::with_capacity(decoded.len());
        for (slot, image) in decoded {
            match self.ingestor.upload(image, slot.folder, K::UPLOAD_SOURCE).await {
                Ok(uploaded) => {
                    K::attach_image(&mut record, slot, uploaded.url.clone());
                    images.push(uploaded);
                }
                Err(err) => {
                    log_orphans(K::NAME, &images);
                    return Err(err.into());
                }
            }
        }

        let notified = match K::notification(&record) {
            Some(inbound) => {
                let outcome = self.notifier.notify_return(inbound).await;
                debug!(kind = K::NAME, ?outcome, "Return notification finished");
                Some(outcome)
            }
            None => None,
        };

        let id = match self
            .store
            .add(<K::Record as Record>::COLLECTION, record.to_document())
            .await
        {
            Ok(id) => id,
            Err(err) => {
                log_orphans(K::NAME, &images);
                return Err(err.into());
            }
        };

        info!(kind = K::NAME, id = %id, uid = %user.uid, "Submission stored");
        Ok(Submitted {
            id,
            message: K::SUCCESS_MESSAGE,
            images,
            notified,
        })
    }
}

fn log_orphans(kind: &str, images: &[UploadedImage]) {
    for image in images {
        warn!(kind, key = %image.key, "Uploaded object left orphaned");
    }
}
