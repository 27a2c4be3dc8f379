//! Presentation sinks: consumers of the ordered location view.
//!
//! A sink receives the complete ordered view on every render and must
//! replace whatever it showed before. The engine renders sinks one snapshot
//! at a time, in version order.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Value, json};
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use gpslog_types::LocationRecord;

use crate::error::Result;

/// A view of the recorded locations.
///
/// Renders happen while the engine holds its publish lock, so no new
/// snapshot is published until a render returns. On a multi-threaded
/// runtime blocking renders are moved off the async worker; on a
/// current-thread runtime they stall it.
pub trait PresentationSink: Send + Sync {
    /// Replace the rendered state with `records`, already in display order.
    fn render(&self, records: &[LocationRecord]) -> Result<()>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "sink"
    }
}

fn format_time(record: &LocationRecord) -> io::Result<String> {
    record.created_at.format(&Rfc3339).map_err(io::Error::other)
}

/// One text row per record: `lat,lon  created_at`.
///
/// Each render writes a header line followed by the full list, so a reader
/// of the output can always take the last block as the current state.
pub struct ListSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> ListSink<W> {
    /// Render into the given writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Format a single list row.
pub fn list_row(record: &LocationRecord) -> io::Result<String> {
    let marker = if record.is_pending() { " (pending)" } else { "" };
    Ok(format!("{}  {}{}", record.title(), format_time(record)?, marker))
}

impl<W: Write + Send> PresentationSink for ListSink<W> {
    fn render(&self, records: &[LocationRecord]) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "== {} locations ==", records.len())?;
        for record in records {
            writeln!(writer, "{}", list_row(record)?)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "list"
    }
}

/// Map pins as a GeoJSON `FeatureCollection`, rewritten atomically.
#[derive(Debug, Clone)]
pub struct GeoJsonSink {
    path: PathBuf,
}

impl GeoJsonSink {
    /// Write pins to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The output file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Build the GeoJSON document for a list of records.
///
/// Each record becomes a Point feature titled `lat,lon` with its timestamp
/// as the subtitle, like a map pin callout.
pub fn feature_collection(records: &[LocationRecord]) -> io::Result<Value> {
    let features = records
        .iter()
        .map(|record| -> io::Result<Value> {
            Ok(json!({
                "type": "Feature",
                "geometry": {
                    "type": "Point",
                    "coordinates": [record.longitude, record.latitude],
                },
                "properties": {
                    "id": record.id.as_ref().map(|id| id.as_str()),
                    "title": record.title(),
                    "subtitle": format_time(record)?,
                    "pending": record.is_pending(),
                },
            }))
        })
        .collect::<io::Result<Vec<_>>>()?;

    Ok(json!({
        "type": "FeatureCollection",
        "features": features,
    }))
}

impl PresentationSink for GeoJsonSink {
    fn render(&self, records: &[LocationRecord]) -> Result<()> {
        let document = feature_collection(records)?;
        let temp = self.temp_path();

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(&temp, serde_json::to_vec_pretty(&document).map_err(io::Error::other)?)?;
        // Rename is atomic, so readers never see a half-written file
        fs::rename(&temp, &self.path)?;

        debug!("Wrote {} pins to {}", records.len(), self.path.display());
        Ok(())
    }

    fn name(&self) -> &str {
        "geojson"
    }
}

/// Captures every render. Clones share the captured history.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    renders: Arc<Mutex<Vec<Vec<LocationRecord>>>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every render so far, oldest first.
    pub fn renders(&self) -> Vec<Vec<LocationRecord>> {
        self.renders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recent render.
    pub fn last(&self) -> Option<Vec<LocationRecord>> {
        self.renders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Number of renders so far.
    pub fn render_count(&self) -> usize {
        self.renders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl PresentationSink for MemorySink {
    fn render(&self, records: &[LocationRecord]) -> Result<()> {
        self.renders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(records.to_vec());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
