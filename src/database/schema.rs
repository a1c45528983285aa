/// Base tables as first created. Later columns arrive through `MIGRATIONS`
/// so databases written by older builds upgrade in place.
pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT UNIQUE NOT NULL,
        password_hash TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        judul_kasus TEXT NOT NULL,
        nomor_lp TEXT,
        tanggal_kejadian TEXT,
        path_mentah TEXT NOT NULL,
        path_ekstraksi TEXT NOT NULL,
        user_id INTEGER,
        timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (user_id) REFERENCES users(id)
    );

    CREATE INDEX IF NOT EXISTS idx_history_user ON history(user_id);
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMigration {
    pub version: u32,
    pub table: &'static str,
    pub column: &'static str,
    pub definition: &'static str,
}

/// Ordered, forward-only column additions.
// SQLite refuses a non-constant default in ADD COLUMN once the table has
// rows, so created_at is filled in by the application on insert.
pub const MIGRATIONS: &[ColumnMigration] = &[
    ColumnMigration { version: 1, table: "users", column: "full_name", definition: "TEXT" },
    ColumnMigration { version: 2, table: "users", column: "nrp", definition: "TEXT" },
    ColumnMigration { version: 3, table: "users", column: "jabatan", definition: "TEXT" },
    ColumnMigration { version: 4, table: "users", column: "nomor_hp", definition: "TEXT" },
    ColumnMigration { version: 5, table: "users", column: "email", definition: "TEXT" },
    ColumnMigration { version: 6, table: "users", column: "is_admin", definition: "INTEGER NOT NULL DEFAULT 0" },
    ColumnMigration { version: 7, table: "users", column: "level", definition: "INTEGER NOT NULL DEFAULT 0" },
    ColumnMigration { version: 8, table: "users", column: "created_at", definition: "TEXT" },
    ColumnMigration { version: 9, table: "history", column: "minutiae_count", definition: "INTEGER" },
];
