//! Timestamp parsing for form fields and month windows for reports.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::InputError;

/// `2024-03-01T10:00:00.000-0500`
pub const OFFSET_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%z";

/// `2024-03-01T10:00:00.000`, read as UTC.
pub const LOCAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Earliest year accepted by the month/year reports.
pub const MIN_REPORT_YEAR: i32 = 2000;

/// Parse with the offset format, falling back to the offset-less format.
pub fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, InputError> {
    parse_with_offset(raw)
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, LOCAL_FORMAT)
                .ok()
                .map(|naive| naive.and_utc())
        })
        .ok_or_else(|| InputError::invalid_date(field))
}

/// Parse with the offset format only.
pub fn parse_timestamp_strict(field: &str, raw: &str) -> Result<DateTime<Utc>, InputError> {
    parse_with_offset(raw).ok_or_else(|| InputError::invalid_date(field))
}

fn parse_with_offset(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, OFFSET_FORMAT)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Half-open `[start, end)` interval covering one calendar month in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MonthWindow {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)?
        };
        Some(Self {
            start: Utc.from_utc_datetime(&first.and_hms_opt(0, 0, 0)?),
            end: Utc.from_utc_datetime(&next.and_hms_opt(0, 0, 0)?),
        })
    }

    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        self.start <= *instant && *instant < self.end
    }

    /// Validate raw `month`/`year` parameters. `month` must be 1..=12 and
    /// `year` between 2000 and the year after `today`.
    pub fn from_params(
        month: Option<&str>,
        year: Option<&str>,
        today: DateTime<Utc>,
    ) -> Result<Self, InputError> {
        let (month, year) = match (month.map(str::trim), year.map(str::trim)) {
            (Some(m), Some(y)) if !m.is_empty() && !y.is_empty() => (m, y),
            _ => return Err(InputError::missing("'month' or 'year' parameter")),
        };

        let month: u32 = month
            .parse()
            .ok()
            .filter(|m| (1..=12).contains(m))
            .ok_or_else(|| InputError::out_of_range("month"))?;

        let year: i32 = year
            .parse()
            .ok()
            .filter(|y| (MIN_REPORT_YEAR..=today.year() + 1).contains(y))
            .ok_or_else(|| InputError::out_of_range("year"))?;

        Self::new(year, month).ok_or_else(|| InputError::out_of_range("month"))
    }
}
