//! Catalog schema migrations.
//!
//! # Responsibility
//! - Keep the ordered list of catalog schema steps.
//! - Bring a connection from its stored schema version to the latest one.
//!
//! # Invariants
//! - Step versions start at 1 and increase by exactly one.
//! - The stored version lives in `PRAGMA user_version` and is re-read under
//!   the write lock, so two connections opening a fresh file never run the
//!   same step twice.
//! - A database stamped with a newer version than this binary knows is
//!   rejected, never downgraded.
//! - `product_tags` carries `UNIQUE(product_id, tag_id)`; the relation
//!   reconciler relies on it to detect concurrent writers.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::{Connection, TransactionBehavior};
use std::time::Instant;

struct SchemaStep {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const SCHEMA_STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "catalog",
        sql: include_str!("0001_catalog.sql"),
    },
    SchemaStep {
        version: 2,
        name: "product_tags",
        sql: include_str!("0002_product_tags.sql"),
    },
];

/// Schema version produced by the last known step.
pub fn latest_version() -> u32 {
    SCHEMA_STEPS.last().map_or(0, |step| step.version)
}

/// Runs every step newer than the stored version in one write transaction.
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the file was written by a newer binary.
/// - `Sqlite` when a step fails; nothing from this call is kept.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let latest = latest_version();
    let stored = current_user_version(conn)?;
    ensure_supported(stored, latest)?;
    if stored == latest {
        return Ok(());
    }

    let started_at = Instant::now();
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    // Another connection may have migrated while we waited for the lock.
    let from_version = current_user_version(&tx)?;
    ensure_supported(from_version, latest)?;

    for step in SCHEMA_STEPS.iter().filter(|step| step.version > from_version) {
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", step.version)?;
        info!(
            "event=db_migrate_step module=db status=ok version={} name={}",
            step.version, step.name
        );
    }
    tx.commit()?;

    if from_version < latest {
        info!(
            "event=db_migrate module=db status=ok from_version={} to_version={} duration_ms={}",
            from_version,
            latest,
            started_at.elapsed().as_millis()
        );
    }
    Ok(())
}

/// Reads the schema version stored in `PRAGMA user_version`.
pub fn current_user_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?)
}

fn ensure_supported(stored: u32, latest: u32) -> DbResult<()> {
    if stored > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: stored,
            latest_supported: latest,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{apply_migrations, current_user_version, latest_version, SCHEMA_STEPS};
    use rusqlite::Connection;

    #[test]
    fn step_versions_are_contiguous_from_one() {
        for (index, step) in SCHEMA_STEPS.iter().enumerate() {
            assert_eq!(step.version as usize, index + 1, "step {}", step.name);
        }
    }

    #[test]
    fn partially_migrated_database_runs_only_missing_steps() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_STEPS[0].sql).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();

        apply_migrations(&mut conn).unwrap();
        assert_eq!(current_user_version(&conn).unwrap(), latest_version());

        apply_migrations(&mut conn).unwrap();
        assert_eq!(current_user_version(&conn).unwrap(), latest_version());
    }
}
