//! Schema creation, pragmas and column introspection.
//!
//! Older project databases were created without the `label`, `comment` and
//! `creation` columns. Instead of versioned migrations the table layout is
//! inspected on open and missing columns are added in place.

use super::to_storage_err;
use crate::ScipionError;
use crate::primitives::OBJECTS_TABLE;
use rusqlite::Connection;

const CREATE_OBJECTS: &str = "
    CREATE TABLE IF NOT EXISTS Objects (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER REFERENCES Objects(id) ON DELETE CASCADE,
        name      TEXT NOT NULL DEFAULT '',
        classname TEXT NOT NULL,
        value     TEXT DEFAULT NULL,
        label     TEXT DEFAULT NULL,
        comment   TEXT DEFAULT NULL,
        creation  TEXT DEFAULT NULL
    );
";

const CREATE_RELATIONS: &str = "
    CREATE TABLE IF NOT EXISTS Relations (
        id                     INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id              INTEGER REFERENCES Objects(id) ON DELETE CASCADE,
        name                   TEXT NOT NULL,
        classname              TEXT DEFAULT NULL,
        object_parent_id       INTEGER REFERENCES Objects(id) ON DELETE CASCADE,
        object_child_id        INTEGER REFERENCES Objects(id) ON DELETE CASCADE,
        creation               TEXT DEFAULT NULL,
        object_parent_extended TEXT DEFAULT NULL,
        object_child_extended  TEXT DEFAULT NULL
    );
";

const CREATE_INDEXES: &str = "
    CREATE INDEX IF NOT EXISTS idx_objects_parent ON Objects(parent_id);
    CREATE INDEX IF NOT EXISTS idx_objects_name ON Objects(name);
    CREATE INDEX IF NOT EXISTS idx_objects_class ON Objects(classname);
    CREATE INDEX IF NOT EXISTS idx_relations_name ON Relations(name);
    CREATE INDEX IF NOT EXISTS idx_relations_parent ON Relations(object_parent_id);
    CREATE INDEX IF NOT EXISTS idx_relations_child ON Relations(object_child_id);
    CREATE INDEX IF NOT EXISTS idx_relations_creator ON Relations(parent_id);
";

/// Columns added after the first schema, with their declarations.
const LATE_OBJECT_COLUMNS: &[(&str, &str)] = &[
    ("label", "TEXT DEFAULT NULL"),
    ("comment", "TEXT DEFAULT NULL"),
    ("creation", "TEXT DEFAULT NULL"),
];

/// Apply connection pragmas.
pub(crate) fn apply_pragmas(conn: &Connection) -> Result<(), ScipionError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        PRAGMA foreign_keys = ON;
        ",
    )
    .map_err(to_storage_err)
}

/// Create missing tables and columns; returns the columns added.
pub(crate) fn ensure_schema(conn: &Connection) -> Result<Vec<String>, ScipionError> {
    conn.execute_batch(CREATE_OBJECTS).map_err(to_storage_err)?;
    conn.execute_batch(CREATE_RELATIONS)
        .map_err(to_storage_err)?;

    let existing = column_names(conn, OBJECTS_TABLE)?;
    let mut added = Vec::new();
    for (column, decl) in LATE_OBJECT_COLUMNS {
        if !existing.iter().any(|c| c == column) {
            conn.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {} {};",
                OBJECTS_TABLE, column, decl
            ))
            .map_err(to_storage_err)?;
            added.push((*column).to_string());
        }
    }

    conn.execute_batch(CREATE_INDEXES).map_err(to_storage_err)?;
    Ok(added)
}

/// Names of the user tables in the database, sorted.
pub(crate) fn table_names(conn: &Connection) -> Result<Vec<String>, ScipionError> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .map_err(to_storage_err)?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(to_storage_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(to_storage_err)
}

/// Column names of `table` in declaration order (empty if absent).
pub(crate) fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>, ScipionError> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
        .map_err(to_storage_err)?;
    let rows = stmt
        .query_map([table], |row| row.get::<_, String>(0))
        .map_err(to_storage_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(to_storage_err)
}
