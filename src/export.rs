//! Month exports mailed as CSV attachments.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, SecondsFormat};
use serde::Deserialize;
use tracing::info;

use crate::auth::VerifiedUser;
use crate::dates::MonthWindow;
use crate::directory::Clock;
use crate::error::{InputError, QueryError};
use crate::notify::{send_with_deadline, Attachment, EmailMessage, Mailer, Recipient};
use crate::query::QueryService;
use crate::records::{InboundRecord, OutboundRecord, Record, StoredRecord, ENTRADAS, SALIDAS};
use crate::store::FieldValue;

pub const EXPORT_FILENAME: &str = "filtered_data.csv";
pub const EXPORT_SUBJECT: &str = "Your Exported Data";
const EXPORT_BODY: &str = "See attached CSV.";

/// Body of `/export`. Recognised filters: `tipo` (`entradas` or
/// `salidas`), `month` and `year`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

pub struct Exporter {
    queries: Arc<QueryService>,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
    deadline: Duration,
}

impl Exporter {
    pub fn new(
        queries: Arc<QueryService>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
        deadline: Duration,
    ) -> Self {
        Self {
            queries,
            mailer,
            clock,
            deadline,
        }
    }

    /// Render the filtered month as CSV and mail it. Returns the number of
    /// exported rows.
    pub async fn export(&self, user: &VerifiedUser, request: &ExportRequest) -> Result<usize, QueryError> {
        let email = request.email.trim();
        if email.is_empty() {
            return Err(InputError::missing("email").into());
        }

        let now = self.clock.now();
        let filter = |name: &str| request.filters.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());
        let month = filter("month").map_or_else(|| now.month().to_string(), str::to_string);
        let year = filter("year").map_or_else(|| now.year().to_string(), str::to_string);
        let window = MonthWindow::from_params(Some(&month), Some(&year), now)?;

        let (csv, rows) = match filter("tipo").unwrap_or(ENTRADAS) {
            ENTRADAS => self.render::<InboundRecord>(window).await?,
            SALIDAS => self.render::<OutboundRecord>(window).await?,
            _ => return Err(InputError::out_of_range("tipo").into()),
        };

        let message = EmailMessage {
            to: vec![Recipient {
                email: email.to_string(),
                name: String::new(),
            }],
            subject: EXPORT_SUBJECT.to_string(),
            text: EXPORT_BODY.to_string(),
            html: EXPORT_BODY.to_string(),
            attachments: vec![Attachment {
                filename: EXPORT_FILENAME.to_string(),
                content_type: "text/csv".to_string(),
                content: csv.into_bytes(),
            }],
        };
        send_with_deadline(self.mailer.as_ref(), &message, self.deadline).await?;

        info!(uid = %user.uid, to = email, rows, "Export sent");
        Ok(rows)
    }

    async fn render<R: Record>(&self, window: MonthWindow) -> Result<(String, usize), QueryError> {
        let records: Vec<StoredRecord<R>> = self.queries.records_in(window).await?;
        Ok((records_csv(&records), records.len()))
    }
}

/// Header row of `id` plus the record's columns, then one row per record.
pub fn records_csv<R: Record>(records: &[StoredRecord<R>]) -> String {
    let mut out = String::new();
    let header = std::iter::once("id").chain(R::COLUMNS.iter().copied());
    write_row(&mut out, header);

    for stored in records {
        let document = stored.record.to_document();
        let cells: Vec<String> = R::COLUMNS
            .iter()
            .map(|column| document.get(*column).map(cell).unwrap_or_default())
            .collect();
        write_row(
            &mut out,
            std::iter::once(stored.id.as_str()).chain(cells.iter().map(String::as_str)),
        );
    }
    out
}

fn cell(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => String::new(),
        FieldValue::Integer(i) => i.to_string(),
        FieldValue::String(s) => s.clone(),
        FieldValue::Timestamp(t) => t.to_rfc3339_opts(SecondsFormat::Secs, true),
    }
}

fn write_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
    for (i, value) in cells.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if value.contains([',', '"', '\n', '\r']) || value.starts_with(' ') || value.ends_with(' ') {
            out.push('"');
            out.push_str(&value.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(value);
        }
    }
    out.push('\n');
}
