//! Sidecar schema and access helpers.
//!
//! Tables:
//!
//! ```text
//! AccessPoints(uncompressedOffset PK, uncompressedEndOffset,
//!              compressedOffset, bitOffset, window BLOB)
//! LineOffsets(line PK, offset, length)
//! Indexes(name PK, creationString, isNumeric)
//! Metadata(key PK, value)
//! index_<name>(key [INTEGER|TEXT] [PRIMARY KEY], line, offset)
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{named_params, Connection, OpenFlags};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Schema version recorded in the metadata table.
pub(crate) const VERSION: u32 = 1;

const DDL: &str = "
CREATE TABLE AccessPoints(
    uncompressedOffset INTEGER PRIMARY KEY,
    uncompressedEndOffset INTEGER,
    compressedOffset INTEGER,
    bitOffset INTEGER,
    window BLOB
);

CREATE TABLE LineOffsets(
    line INTEGER PRIMARY KEY,
    offset INTEGER,
    length INTEGER
);

CREATE TABLE Indexes(
    name TEXT PRIMARY KEY,
    creationString TEXT,
    isNumeric INTEGER
);

CREATE TABLE Metadata(
    key TEXT PRIMARY KEY,
    value TEXT
);
";

/// Creates a fresh sidecar, tuned for one bulk-insert pass. The
/// application id marks the file as ours ("ZIDX").
pub(crate) fn create(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA synchronous = OFF;
         PRAGMA application_id = 0x5a494458;",
    )?;
    // journal_mode reports its new value as a result row.
    conn.query_row("PRAGMA journal_mode = MEMORY", [], |_| Ok(()))?;
    conn.execute_batch(DDL)?;
    Ok(conn)
}

pub(crate) fn open_read_only(path: &Path) -> Result<Connection> {
    Ok(Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY,
    )?)
}

pub(crate) fn add_metadata(conn: &Connection, key: &str, value: &str) -> Result<()> {
    debug!(key, value, "adding metadata");
    conn.prepare_cached("INSERT INTO Metadata VALUES(:key, :value)")?
        .execute(named_params! {":key": key, ":value": value})?;
    Ok(())
}

/// Reads the whole metadata table. Errors here are not fatal: older or
/// foreign sidecars are caught by the integrity check instead.
pub(crate) fn read_metadata(conn: &Connection) -> BTreeMap<String, String> {
    match try_read_metadata(conn) {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!(error = %err, "could not read sidecar metadata");
            BTreeMap::new()
        }
    }
}

fn try_read_metadata(conn: &Connection) -> rusqlite::Result<BTreeMap<String, String>> {
    let mut stmt = conn.prepare("SELECT key, value FROM Metadata")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    rows.collect()
}

/// Total decompressed size of the indexed stream: one past the last access
/// point's end offset (0 for an empty stream).
pub(crate) fn uncompressed_size(conn: &Connection) -> Result<u64> {
    let size: i64 = conn.query_row(
        "SELECT COALESCE(MAX(uncompressedEndOffset) + 1, 0) FROM AccessPoints",
        [],
        |row| row.get(0),
    )?;
    Ok(size as u64)
}

/// Index names are interpolated into table identifiers, so only accept
/// names that cannot terminate the identifier.
pub(crate) fn check_index_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_owned()))
    }
}
