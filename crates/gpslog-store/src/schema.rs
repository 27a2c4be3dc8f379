//! Database schema and migrations.
//!
//! The schema version lives in SQLite's `user_version` pragma. Each entry of
//! [`MIGRATIONS`] upgrades the schema by one version and runs in its own
//! transaction together with the version bump.

use rusqlite::Connection;
use tracing::info;

use crate::error::{Error, Result};

/// Migration scripts; entry `n` upgrades version `n` to `n + 1`.
///
/// `created_at` is stored as Unix nanoseconds so sub-second ordering
/// survives a round trip; `seq` is the insertion-order tie-breaker.
const MIGRATIONS: &[&str] = &[r#"
    CREATE TABLE locations (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        latitude REAL NOT NULL CHECK (latitude BETWEEN -90.0 AND 90.0),
        longitude REAL NOT NULL CHECK (longitude BETWEEN -180.0 AND 180.0),
        created_at INTEGER NOT NULL,
        submission INTEGER
    );
    CREATE INDEX idx_locations_created ON locations(created_at, seq);
"#];

/// Current schema version.
pub const SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

/// Bring the database schema up to [`SCHEMA_VERSION`].
pub fn initialize(conn: &mut Connection) -> Result<()> {
    let found = schema_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(Error::UnsupportedSchema {
            found,
            supported: SCHEMA_VERSION,
        });
    }

    for (from, script) in MIGRATIONS.iter().enumerate().skip(found.max(0) as usize) {
        let to = from as i32 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(script)?;
        tx.pragma_update(None, "user_version", to)?;
        tx.commit()?;
        info!("Migrated location database to schema version {}", to);
    }
    Ok(())
}

fn schema_version(conn: &Connection) -> Result<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_fresh_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        initialize(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert!(tables.contains(&"locations".to_string()));
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);

        initialize(&mut conn).unwrap();
        initialize(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();

        let err = initialize(&mut conn).unwrap_err();
        assert!(matches!(err, Error::UnsupportedSchema { found, .. } if found == SCHEMA_VERSION + 1));
    }

    #[test]
    fn test_out_of_range_coordinates_are_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        initialize(&mut conn).unwrap();

        let result = conn.execute(
            "INSERT INTO locations (id, latitude, longitude, created_at) VALUES ('x', 91.0, 0.0, 0)",
            [],
        );
        assert!(result.is_err());
    }
}
