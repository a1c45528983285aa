use std::path::Path;
use rusqlite::{Connection, params};
use tracing::{info, warn};

use crate::database::error::Result;
use crate::database::open;
use crate::database::schema::{ColumnMigration, MIGRATIONS, SCHEMA};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: Vec<String>,
    pub present: Vec<String>,
    pub failed: Vec<String>,
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |row| row.get(0),
    )
}

#[cfg(test)]
pub fn column_names(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let names = stmt
        .query_map(params![table], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

/// Apply each step whose column is not in the live schema yet. A failing
/// step is logged and skipped; later steps still run.
pub fn apply_migrations(conn: &Connection, steps: &[ColumnMigration]) -> MigrationReport {
    let mut report = MigrationReport::default();

    for step in steps {
        let label = format!("v{} {}.{}", step.version, step.table, step.column);
        match column_exists(conn, step.table, step.column) {
            Ok(true) => report.present.push(label),
            Ok(false) => {
                let sql = format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    step.table, step.column, step.definition
                );
                match conn.execute_batch(&sql) {
                    Ok(()) => {
                        info!("Applied migration {}", label);
                        report.applied.push(label);
                    }
                    Err(e) => {
                        warn!("Migration {} failed, skipping: {}", label, e);
                        report.failed.push(label);
                    }
                }
            }
            Err(e) => {
                warn!("Could not inspect schema for {}, skipping: {}", label, e);
                report.failed.push(label);
            }
        }
    }

    if report.failed.is_empty() {
        if let Some(latest) = steps.iter().map(|s| s.version).max() {
            if let Err(e) = conn.pragma_update(None, "user_version", latest) {
                warn!("Failed to record schema version {}: {}", latest, e);
            }
        }
    }

    report
}

pub fn schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

/// Create the base tables and bring the schema up to date. Run once at startup.
pub fn initialize(db_path: &Path) -> Result<MigrationReport> {
    let conn = open(db_path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(apply_migrations(&conn, MIGRATIONS))
}
