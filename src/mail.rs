//! Mail transports.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::MailError;
use crate::notify::{EmailMessage, Mailer};

/// Keeps every message instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    delay: Option<Duration>,
    fail: bool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every message.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Sleep before accepting each message.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(MailError::Rejected("recording mailer set to fail".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(message.clone());
        Ok(())
    }
}

#[cfg(feature = "gcp")]
pub use mailersend::{MailerSendMailer, Sender, MAILERSEND_ENDPOINT};

#[cfg(feature = "gcp")]
mod mailersend {
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::Serialize;
    use tracing::debug;

    use crate::error::MailError;
    use crate::notify::{EmailMessage, Mailer};

    pub const MAILERSEND_ENDPOINT: &str = "https://api.mailersend.com/v1/email";

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct Sender {
        pub email: String,
        pub name: String,
    }

    #[derive(Serialize)]
    struct Address<'a> {
        email: &'a str,
        #[serde(skip_serializing_if = "str::is_empty")]
        name: &'a str,
    }

    #[derive(Serialize)]
    struct AttachmentBody<'a> {
        content: String,
        filename: &'a str,
        disposition: &'static str,
    }

    #[derive(Serialize)]
    struct EmailBody<'a> {
        from: &'a Sender,
        to: Vec<Address<'a>>,
        subject: &'a str,
        text: &'a str,
        html: &'a str,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<AttachmentBody<'a>>,
    }

    /// MailerSend email API client.
    pub struct MailerSendMailer {
        http: reqwest::Client,
        endpoint: String,
        api_key: String,
        sender: Sender,
    }

    impl MailerSendMailer {
        pub fn new(http: reqwest::Client, api_key: impl Into<String>, sender: Sender) -> Self {
            Self {
                http,
                endpoint: MAILERSEND_ENDPOINT.to_string(),
                api_key: api_key.into(),
                sender,
            }
        }

        pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
            self.endpoint = endpoint.into();
            self
        }

        fn body<'a>(&'a self, message: &'a EmailMessage) -> EmailBody<'a> {
            EmailBody {
                from: &self.sender,
                to: message
                    .to
                    .iter()
                    .map(|r| Address {
                        email: &r.email,
                        name: &r.name,
                    })
                    .collect(),
                subject: &message.subject,
                text: &message.text,
                html: &message.html,
                attachments: message
                    .attachments
                    .iter()
                    .map(|a| AttachmentBody {
                        content: STANDARD.encode(&a.content),
                        filename: &a.filename,
                        disposition: "attachment",
                    })
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl Mailer for MailerSendMailer {
        async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
            if self.api_key.is_empty() {
                return Err(MailError::NotConfigured("MailerSend API key is empty".into()));
            }

            let response = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&self.body(message))
                .send()
                .await
                .map_err(|e| MailError::Transport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                return Err(MailError::Rejected(format!("{status}: {detail}")));
            }

            let message_id = response
                .headers()
                .get("x-message-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-");
            debug!(message_id, recipients = message.to.len(), "Email accepted by MailerSend");
            Ok(())
        }
    }

}
