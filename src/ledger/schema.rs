//! Ledger schema definitions

/// SQL schema for the ledger database
pub const SCHEMA_SQL: &str = r#"
-- Track harvest runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- One logical row per attempted item
CREATE TABLE IF NOT EXISTS attempts (
    source TEXT NOT NULL,
    webpage TEXT NOT NULL,
    success INTEGER,
    error TEXT,
    skipped INTEGER,
    status TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (source, webpage)
);

CREATE INDEX IF NOT EXISTS idx_attempts_status ON attempts(status);
"#;

/// Initializes the ledger schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)
}
