use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

pub const SCHEMA_VERSION: i32 = 1;

pub struct Schema;

impl Schema {
    /// Initialize database schema
    pub fn initialize(conn: &Connection) -> Result<()> {
        // Current packages, one row per package; `data` is the JSON form
        conn.execute(
            "CREATE TABLE IF NOT EXISTS packages (
                id           INTEGER PRIMARY KEY,
                effname      TEXT NOT NULL,
                repo         TEXT NOT NULL,
                family       TEXT NOT NULL,
                visiblename  TEXT NOT NULL,
                version      TEXT NOT NULL,
                versionclass INTEGER NOT NULL,
                flags        INTEGER NOT NULL,
                shadow       INTEGER NOT NULL,
                data         TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_packages_effname ON packages(effname)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_packages_repo ON packages(repo)",
            [],
        )?;

        // Classless hash per project; rowid-less so paging walks the key
        conn.execute(
            "CREATE TABLE IF NOT EXISTS project_hashes (
                effname TEXT PRIMARY KEY,
                hash    INTEGER NOT NULL
            ) WITHOUT ROWID",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS changed_projects (
                id         INTEGER PRIMARY KEY,
                effname    TEXT NOT NULL,
                changed_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS metadata (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?)",
            [SCHEMA_VERSION.to_string()],
        )?;

        Ok(())
    }

    /// Get current schema version, 0 for a fresh database
    pub fn get_version(conn: &Connection) -> Result<i32> {
        let exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'metadata'",
            [],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(0);
        }

        let version: Option<String> = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version.and_then(|v| v.parse().ok()).unwrap_or(0))
    }
}
