//! Customer notification for returned goods.
//!
//! When an RMA entrada names a known client, the client's contact gets a
//! templated email. Nothing in here can fail a submission: every error is
//! logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::error::MailError;
use crate::records::{CustomerRecord, InboundRecord, CUSTOMERS};
use crate::store::DocumentStore;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub const RETURN_SUBJECT: &str = "Nueva devolución de mercancía";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: Vec<Recipient>,
    pub subject: String,
    pub text: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
}

/// Transactional email transport. The sender identity belongs to the
/// implementation.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError>;
}

/// Send with an upper bound on how long the transport may take.
pub async fn send_with_deadline(
    mailer: &dyn Mailer,
    message: &EmailMessage,
    deadline: Duration,
) -> Result<(), MailError> {
    match tokio::time::timeout(deadline, mailer.send(message)).await {
        Ok(result) => result,
        Err(_) => Err(MailError::Timeout(deadline.as_secs())),
    }
}

pub fn render_return_text(record: &InboundRecord) -> String {
    format!(
        "Hola,\n\n\
         Se ha registrado una nueva devolución para el cliente \"{cliente}\".\n\n\
         Fecha de entrada: {fecha}\n\
         Bodega: {bodega}\n\
         Cantidad: {cantidad}\n\
         Numero de remisión: {remision}\n\
         Con proveedor: {proveedor}\n\
         Link a evidencia de entrada: {evidencia}\n\n\
         Saludos,\n\
         Buho Logistics\n\n\
         (Correo automático, favor de no responder.)\n",
        cliente = record.cliente,
        fecha = record.fecha_recepcion.format("%Y-%m-%d %H:%M:%S UTC"),
        bodega = record.bodega_recepcion,
        cantidad = record.cantidad,
        remision = record.numero_remision_factura,
        proveedor = record.proveedor_recepcion,
        evidencia = record.evidencia_recepcion,
    )
}

pub fn render_return_html(record: &InboundRecord) -> String {
    let evidencia = escape_html(&record.evidencia_recepcion);
    format!(
        "<p>Hola,</p>\
         <p>Se ha registrado una nueva devolución para el cliente &quot;{cliente}&quot;.</p>\
         <ul>\
         <li>Fecha de entrada: {fecha}</li>\
         <li>Bodega: {bodega}</li>\
         <li>Cantidad: {cantidad}</li>\
         <li>Numero de remisión: {remision}</li>\
         <li>Con proveedor: {proveedor}</li>\
         <li>Link a evidencia de entrada: <a href=\"{evidencia}\">{evidencia}</a></li>\
         </ul>\
         <p>Saludos,<br>Buho Logistics</p>\
         <p><small>(Correo automático, favor de no responder.)</small></p>",
        cliente = escape_html(&record.cliente),
        fecha = record.fecha_recepcion.format("%Y-%m-%d %H:%M:%S UTC"),
        bodega = escape_html(&record.bodega_recepcion),
        cantidad = record.cantidad,
        remision = escape_html(&record.numero_remision_factura),
        proveedor = escape_html(&record.proveedor_recepcion),
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// What a notification attempt ended in. Never fails the submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    UnknownCustomer,
    Failed(String),
}

pub struct Notifier {
    store: Arc<dyn DocumentStore>,
    mailer: Arc<dyn Mailer>,
    deadline: Duration,
}

impl Notifier {
    pub fn new(store: Arc<dyn DocumentStore>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            store,
            mailer,
            deadline: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn mailer(&self) -> &Arc<dyn Mailer> {
        &self.mailer
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Email the client's contact about a returned delivery.
    pub async fn notify_return(&self, record: &InboundRecord) -> NotifyOutcome {
        info!(cliente = %record.cliente, "Looking up customer for return notification");

        let document = match self.store.get(CUSTOMERS, &record.cliente).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                warn!(cliente = %record.cliente, "No customer found, skipping notification");
                return NotifyOutcome::UnknownCustomer;
            }
            Err(err) => {
                error!(cliente = %record.cliente, error = %err, "Customer lookup failed");
                return NotifyOutcome::Failed(err.to_string());
            }
        };

        let customer = match CustomerRecord::from_document(&record.cliente, &document) {
            Ok(customer) => customer,
            Err(err) => {
                error!(cliente = %record.cliente, error = %err, "Failed to parse customer document");
                return NotifyOutcome::Failed(err.to_string());
            }
        };

        match self.send_return(record, &customer).await {
            Ok(()) => {
                info!(cliente = %record.cliente, to = %customer.email, "Return notification sent");
                NotifyOutcome::Sent
            }
            Err(err) => {
                error!(cliente = %record.cliente, error = %err, "Failed to send return notification");
                NotifyOutcome::Failed(err.to_string())
            }
        }
    }

    async fn send_return(
        &self,
        record: &InboundRecord,
        customer: &CustomerRecord,
    ) -> Result<(), MailError> {
        if customer.email.trim().is_empty() {
            return Err(MailError::NoRecipient(record.cliente.clone()));
        }

        let message = EmailMessage {
            to: vec![Recipient {
                email: customer.email.clone(),
                name: customer.rep_name.clone(),
            }],
            subject: RETURN_SUBJECT.to_string(),
            text: render_return_text(record),
            html: render_return_html(record),
            attachments: Vec::new(),
        };
        send_with_deadline(self.mailer.as_ref(), &message, self.deadline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::RecordingMailer;
    use crate::records::RMA_DELIVERY;
    use crate::store::MemoryDocumentStore;
    use chrono::{TimeZone, Utc};

    fn record() -> InboundRecord {
        InboundRecord {
            tipo_delivery: RMA_DELIVERY.into(),
            bodega_recepcion: "Bodega <Sur>".into(),
            proveedor_recepcion: "Estafeta".into(),
            cliente: "ACME".into(),
            numero_remision_factura: "4410".into(),
            persona_recepcion: "Luis".into(),
            fecha_recepcion: Utc.with_ymd_and_hms(2024, 5, 2, 9, 30, 0).unwrap(),
            evidencia_recepcion: "https://storage.googleapis.com/b/e.png".into(),
            cantidad: 3,
            comentarios: String::new(),
            asn: None,
            fecha_ajuste_asn: None,
        }
    }

    async fn store_with_customer(email: &str) -> Arc<MemoryDocumentStore> {
        let store = Arc::new(MemoryDocumentStore::new());
        let customer = CustomerRecord {
            code: "AC".into(),
            email: email.into(),
            rep_name: "Marta".into(),
        };
        store
            .create(CUSTOMERS, "ACME", customer.to_document())
            .await
            .unwrap();
        store
    }

    #[test]
    fn text_template_substitutes_record_fields() {
        let text = render_return_text(&record());
        assert!(text.starts_with("Hola,"));
        assert!(text.contains("para el cliente \"ACME\""));
        assert!(text.contains("Fecha de entrada: 2024-05-02 09:30:00 UTC"));
        assert!(text.contains("Cantidad: 3"));
        assert!(text.contains("Numero de remisión: 4410"));
        assert!(text.contains("Link a evidencia de entrada: https://storage.googleapis.com/b/e.png"));
    }

    #[test]
    fn html_template_escapes_values() {
        let html = render_return_html(&record());
        assert!(html.contains("Bodega &lt;Sur&gt;"));
        assert!(!html.contains("<Sur>"));
    }

    #[tokio::test]
    async fn sends_to_customer_contact() {
        let store = store_with_customer("ops@acme.test").await;
        let mailer = Arc::new(RecordingMailer::new());
        let notifier = Notifier::new(store, mailer.clone());

        assert_eq!(notifier.notify_return(&record()).await, NotifyOutcome::Sent);

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, RETURN_SUBJECT);
        assert_eq!(sent[0].to[0].email, "ops@acme.test");
        assert_eq!(sent[0].to[0].name, "Marta");
    }

    #[tokio::test]
    async fn unknown_customer_is_a_no_op() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mailer = Arc::new(RecordingMailer::new());
        let notifier = Notifier::new(store, mailer.clone());

        assert_eq!(
            notifier.notify_return(&record()).await,
            NotifyOutcome::UnknownCustomer
        );
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn missing_email_is_reported_not_sent() {
        let store = store_with_customer("").await;
        let mailer = Arc::new(RecordingMailer::new());
        let notifier = Notifier::new(store, mailer.clone());

        assert!(matches!(
            notifier.notify_return(&record()).await,
            NotifyOutcome::Failed(_)
        ));
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_transport_hits_the_deadline() {
        let store = store_with_customer("ops@acme.test").await;
        let mailer = Arc::new(RecordingMailer::new().with_delay(Duration::from_secs(30)));
        let notifier = Notifier::new(store, mailer);

        let outcome = notifier.notify_return(&record()).await;
        assert_eq!(
            outcome,
            NotifyOutcome::Failed(MailError::Timeout(10).to_string())
        );
    }
}
