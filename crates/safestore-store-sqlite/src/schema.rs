//! SQL schema for the SafeStore SQLite backend.
//!
//! Executed at connection startup. The version is tracked in
//! `PRAGMA user_version`; a database written by a newer build is refused.

pub const SCHEMA_VERSION: i64 = 1;

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per storage key; the value is the JSON text the vault wrote.
CREATE TABLE IF NOT EXISTS kv (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL   -- ISO 8601 UTC
);

PRAGMA user_version = 1;
";
