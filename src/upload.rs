//! Question-bank upload input: mode flag, loosely-typed rows and the CSV row source.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::reconcile::UploadReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    Append,
    Replace,
}

impl UploadMode {
    pub fn parse(s: &str) -> Result<Self, UploadError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "replace" => Ok(Self::Replace),
            _ => Err(UploadError::BadMode),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Replace => "replace",
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("mode must be either 'append' or 'replace'")]
    BadMode,

    #[error("Invalid CSV format")]
    InvalidFormat,

    #[error("CSV file exceeds the {limit} byte upload limit")]
    TooLarge { limit: usize },

    #[error("CSV has no rows")]
    NoRows,

    /// Every row failed validation. The report still lists the failures.
    #[error("No valid rows found in CSV")]
    NoValidRows(Box<UploadReport>),

    #[error("Failed to save questions")]
    Storage(#[from] rusqlite::Error),
}

impl UploadError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadMode => "bad_params",
            Self::InvalidFormat => "invalid_csv",
            Self::TooLarge { .. } => "upload_too_large",
            Self::NoRows => "empty_upload",
            Self::NoValidRows(_) => "no_valid_rows",
            Self::Storage(_) => "save_failed",
        }
    }
}

/// One uploaded record: field name to raw string value, exactly as received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RawRow(BTreeMap<String, String>);

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with(mut self, field: &str, value: &str) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: &str, value: &str) {
        self.0.insert(field.to_string(), value.to_string());
    }

    /// Missing fields read as empty.
    pub fn field(&self, name: &str) -> &str {
        self.0.get(name).map(String::as_str).unwrap_or("")
    }

    /// Builds a row from a JSON object, stringifying scalars. `null` fields are dropped.
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let mut row = Self::new();
        for (k, v) in obj {
            let text = match v {
                Value::Null => continue,
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => other.to_string(),
            };
            row.insert(&k.trim().to_ascii_lowercase(), &text);
        }
        Some(row)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Reads a headered CSV upload into rows keyed by lowercased header name.
/// Blank lines are skipped and fields are trimmed. A ragged record fails the whole upload.
pub fn parse_csv(bytes: &[u8], max_bytes: usize) -> Result<Vec<RawRow>, UploadError> {
    if bytes.len() > max_bytes {
        return Err(UploadError::TooLarge { limit: max_bytes });
    }
    let text = std::str::from_utf8(bytes).map_err(|_| UploadError::InvalidFormat)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| {
            tracing::debug!(error = %e, "csv header read failed");
            UploadError::InvalidFormat
        })?
        .iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| {
            tracing::debug!(error = %e, "csv record rejected");
            UploadError::InvalidFormat
        })?;
        let mut row = RawRow::new();
        for (header, value) in headers.iter().zip(record.iter()) {
            row.insert(header, value);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Rows passed directly as a JSON array of objects. Non-object entries are a format error.
/// The byte limit applies to the serialized array, the same cap CSV text gets.
pub fn rows_from_json(value: &Value, max_bytes: usize) -> Result<Vec<RawRow>, UploadError> {
    if value.to_string().len() > max_bytes {
        return Err(UploadError::TooLarge { limit: max_bytes });
    }
    let items = value.as_array().ok_or(UploadError::InvalidFormat)?;
    items
        .iter()
        .map(|v| RawRow::from_json(v).ok_or(UploadError::InvalidFormat))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const LIMIT: usize = 1024 * 1024;

    #[test]
    fn mode_parse_is_case_insensitive() {
        assert_eq!(UploadMode::parse("Replace").ok(), Some(UploadMode::Replace));
        assert_eq!(UploadMode::parse(" append ").ok(), Some(UploadMode::Append));
        assert!(matches!(UploadMode::parse("merge"), Err(UploadError::BadMode)));
    }

    #[test]
    fn csv_rows_are_trimmed_and_keyed_by_header() {
        let csv = "Question, Answer ,LEVEL\n  2+2? , 4 ,1\n\n\"Capital, of France\",Paris,2\n";
        let rows = parse_csv(csv.as_bytes(), LIMIT).expect("parse csv");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].field("question"), "2+2?");
        assert_eq!(rows[0].field("answer"), "4");
        assert_eq!(rows[0].field("level"), "1");
        assert_eq!(rows[1].field("question"), "Capital, of France");
    }

    #[test]
    fn header_only_csv_has_no_rows() {
        let rows = parse_csv(b"question,answer,level\n", LIMIT).expect("parse csv");
        assert!(rows.is_empty());
    }

    #[test]
    fn ragged_records_and_bad_utf8_are_format_errors() {
        let ragged = "question,answer,level\nonly one field\n";
        assert!(matches!(
            parse_csv(ragged.as_bytes(), LIMIT),
            Err(UploadError::InvalidFormat)
        ));
        assert!(matches!(
            parse_csv(&[0x71, 0xff, 0xfe, 0x0a], LIMIT),
            Err(UploadError::InvalidFormat)
        ));
    }

    #[test]
    fn oversized_upload_is_refused_before_parsing() {
        let err = parse_csv(b"question,answer,level\n", 4).expect_err("too large");
        assert!(matches!(err, UploadError::TooLarge { limit: 4 }));
    }

    #[test]
    fn oversized_json_rows_are_refused() {
        let rows = json!([{ "question": "x".repeat(64), "answer": "y", "level": 1 }]);
        let err = rows_from_json(&rows, 32).expect_err("too large");
        assert!(matches!(err, UploadError::TooLarge { limit: 32 }));
        assert_eq!(rows_from_json(&rows, LIMIT).map(|r| r.len()).ok(), Some(1));
    }

    #[test]
    fn json_rows_stringify_numbers() {
        let rows = rows_from_json(
            &json!([
                { "question": "2+2?", "answer": "4", "level": 1 },
                { "Question": " x ", "level": null }
            ]),
            LIMIT,
        )
        .expect("json rows");
        assert_eq!(rows[0].field("level"), "1");
        assert_eq!(rows[1].field("question"), " x ");
        assert_eq!(rows[1].field("level"), "");
        assert!(matches!(
            rows_from_json(&json!([1, 2]), LIMIT),
            Err(UploadError::InvalidFormat)
        ));
    }
}
