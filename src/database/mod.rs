pub mod auth;
pub mod error;
pub mod migrate;
pub mod repo;
pub mod schema;
pub mod users;

use std::path::Path;
use rusqlite::Connection;

use crate::database::error::Result;

/// Open a fresh connection for one operation. Handles are never shared
/// between threads.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

/// Empty optional text fields are stored as NULL.
pub(crate) fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
