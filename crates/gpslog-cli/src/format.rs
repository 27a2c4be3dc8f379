//! Output formatting for location listings.

use anyhow::Result;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use gpslog_core::sink::list_row;
use gpslog_types::LocationRecord;

/// Escape a string for CSV output.
/// Wraps the value in quotes if it contains commas, quotes, or newlines.
#[must_use]
pub fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn rfc3339(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_default()
}

/// One row per record, the same rows the live list view shows.
pub fn format_records_text(records: &[LocationRecord]) -> Result<String> {
    if records.is_empty() {
        return Ok("No locations recorded.\n".to_string());
    }
    let mut output = String::new();
    for record in records {
        output.push_str(&list_row(record)?);
        output.push('\n');
    }
    Ok(output)
}

pub fn format_records_csv(records: &[LocationRecord], no_header: bool) -> String {
    let mut output = if no_header {
        String::new()
    } else {
        "id,latitude,longitude,created_at\n".to_string()
    };
    for record in records {
        let id = record.id.as_ref().map(|id| id.as_str()).unwrap_or("");
        output.push_str(&format!(
            "{},{},{},{}\n",
            csv_escape(id),
            record.latitude,
            record.longitude,
            rfc3339(record.created_at)
        ));
    }
    output
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    id: Option<&'a str>,
    latitude: f64,
    longitude: f64,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

pub fn format_records_json(records: &[LocationRecord]) -> Result<String> {
    let rows: Vec<JsonRecord<'_>> = records
        .iter()
        .map(|record| JsonRecord {
            id: record.id.as_ref().map(|id| id.as_str()),
            latitude: record.latitude,
            longitude: record.longitude,
            created_at: record.created_at,
        })
        .collect();
    let mut json = serde_json::to_string_pretty(&rows)?;
    json.push('\n');
    Ok(json)
}
