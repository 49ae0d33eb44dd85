//! Upload-time extraction from object metadata.
//!
//! Buckets that have been written by several generations of tooling carry the
//! upload instant under different field names and in different encodings.
//! Extraction walks [`TimestampField::ORDER`] and, for text values,
//! [`TextFormat::ORDER`], taking the first value that parses.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use d1_backup_storage::{MetadataValue, ObjectMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampField {
    Uploaded,
    UploadedAt,
    UploadedSnakeOn,
    UploadedOn,
}

impl TimestampField {
    pub const ORDER: [TimestampField; 4] = [
        TimestampField::Uploaded,
        TimestampField::UploadedAt,
        TimestampField::UploadedSnakeOn,
        TimestampField::UploadedOn,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TimestampField::Uploaded => "uploaded",
            TimestampField::UploadedAt => "uploadedAt",
            TimestampField::UploadedSnakeOn => "uploaded_on",
            TimestampField::UploadedOn => "uploadedOn",
        }
    }

    pub fn extract(&self, metadata: &ObjectMetadata) -> Option<DateTime<Utc>> {
        metadata.get(self.name()).and_then(parse_value)
    }
}

/// Textual timestamp encodings, all interpreted as UTC when no offset is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    /// `2024-05-01T03:00:00.000Z`, `2024-05-01T05:00:00+02:00`
    Rfc3339,
    /// `Wed, 01 May 2024 03:00:00 GMT`
    Rfc2822,
    /// `2024-05-01T03:00:00` or `2024-05-01 03:00:00.123`
    NaiveDateTime,
    /// `2024-05-01`, taken as midnight
    DateOnly,
}

impl TextFormat {
    pub const ORDER: [TextFormat; 4] = [
        TextFormat::Rfc3339,
        TextFormat::Rfc2822,
        TextFormat::NaiveDateTime,
        TextFormat::DateOnly,
    ];

    pub fn parse(&self, text: &str) -> Option<DateTime<Utc>> {
        match self {
            TextFormat::Rfc3339 => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            TextFormat::Rfc2822 => DateTime::parse_from_rfc2822(text)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            TextFormat::NaiveDateTime => ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|naive| naive.and_utc()),
            TextFormat::DateOnly => NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc()),
        }
    }
}

fn parse_value(value: &MetadataValue) -> Option<DateTime<Utc>> {
    match value {
        MetadataValue::Timestamp(at) => Some(*at),
        MetadataValue::EpochMillis(millis) => Utc.timestamp_millis_opt(*millis).single(),
        MetadataValue::Text(text) => {
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            TextFormat::ORDER.iter().find_map(|format| format.parse(text))
        }
    }
}

/// Upload instant of an object, or `None` when no known field parses.
pub fn extract_uploaded_at(metadata: &ObjectMetadata) -> Option<DateTime<Utc>> {
    TimestampField::ORDER
        .iter()
        .find_map(|field| field.extract(metadata))
}
