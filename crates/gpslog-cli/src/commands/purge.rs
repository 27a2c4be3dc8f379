//! Purge and delete commands.

use std::path::Path;

use anyhow::{Context, Result, bail};
use time::format_description::well_known::Rfc3339;

use gpslog_core::purge_older_than;
use gpslog_store::LocationStore;
use gpslog_types::RecordId;

use crate::config::{Config, hours};
use crate::util::open_store;

/// Delete every location older than the given age, or the configured retention.
pub async fn cmd_purge(
    older_than_hours: Option<u64>,
    db_path: &Path,
    config: &Config,
    quiet: bool,
) -> Result<()> {
    let age = older_than_hours.unwrap_or(config.retention_hours);
    let store = open_store(db_path)?;
    let report = purge_older_than(&store, hours(age))
        .await
        .context("Purge failed")?;

    if !quiet {
        println!(
            "Removed {} locations recorded before {}",
            report.removed,
            report.cutoff.format(&Rfc3339)?
        );
    }
    Ok(())
}

/// Delete every location.
pub async fn cmd_clear(yes: bool, db_path: &Path, quiet: bool) -> Result<()> {
    if !yes {
        bail!("Refusing to delete every location without --yes");
    }
    let store = open_store(db_path)?;
    let removed = store.delete_all().await.context("Clear failed")?;
    if !quiet {
        println!("Removed {} locations", removed);
    }
    Ok(())
}

/// Delete one location by id.
pub async fn cmd_delete(id: &str, db_path: &Path, quiet: bool) -> Result<()> {
    let store = open_store(db_path)?;
    store
        .delete(&RecordId::new(id))
        .await
        .with_context(|| format!("Failed to delete location {}", id))?;
    if !quiet {
        println!("Deleted {}", id);
    }
    Ok(())
}
