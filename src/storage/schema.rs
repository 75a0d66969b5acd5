//! Record store schema definitions

/// SQL schema for the record database
pub const SCHEMA_SQL: &str = r#"
-- Extracted listings, one row per append
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    reference TEXT NOT NULL,
    item_id TEXT,
    fields TEXT NOT NULL,
    media TEXT NOT NULL,
    scraped_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_source ON records(source);
CREATE INDEX IF NOT EXISTS idx_records_reference ON records(source, reference);

-- Media URLs that could not be fetched or stored
CREATE TABLE IF NOT EXISTS media_errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    source TEXT NOT NULL,
    item_id TEXT NOT NULL,
    error TEXT NOT NULL,
    logged_at TEXT NOT NULL
);
"#;

/// Initializes the record store schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)
}
