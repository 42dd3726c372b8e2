//! Key persistence behind the index sink.
//!
//! Two handlers, one per key type: alphabetic stores the key text
//! verbatim, numeric parses it as a strict signed base-10 integer. Both
//! persist `(key, line, offset)` rows into the per-index table.

use anyhow::anyhow;
use rusqlite::{named_params, Connection};
use tracing::debug;

use crate::indexer::{IndexSink, LineIndexer};
use crate::{Error, Result};

/// How a secondary index persists its keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum KeyKind {
    Alpha,
    Numeric,
}

/// One registered line indexer bound to its per-index table.
pub(crate) struct IndexHandler {
    insert_sql: String,
    kind: KeyKind,
    indexer: Box<dyn LineIndexer>,
}

impl IndexHandler {
    pub(crate) fn new(table: &str, kind: KeyKind, indexer: Box<dyn LineIndexer>) -> Self {
        Self {
            insert_sql: format!("INSERT INTO {table} VALUES(:key, :line, :offset)"),
            kind,
            indexer,
        }
    }

    /// Runs the indexer over one line. Any failure — the indexer itself, a
    /// malformed key, a rejected insert — is wrapped with the line's number
    /// and text and aborts the build.
    pub(crate) fn on_line(&mut self, conn: &Connection, line_no: u64, line: &[u8]) -> Result<()> {
        let mut sink = TableSink {
            conn,
            insert_sql: &self.insert_sql,
            kind: self.kind,
            line_no,
        };
        self.indexer
            .index(&mut sink, line)
            .map_err(|source| Error::Indexing {
                line: line_no,
                text: String::from_utf8_lossy(line).into_owned(),
                source,
            })
    }
}

struct TableSink<'a> {
    conn: &'a Connection,
    insert_sql: &'a str,
    kind: KeyKind,
    line_no: u64,
}

impl IndexSink for TableSink<'_> {
    fn add(&mut self, key: &[u8], offset: u64) -> anyhow::Result<()> {
        let mut insert = self.conn.prepare_cached(self.insert_sql)?;
        match self.kind {
            KeyKind::Alpha => {
                let key = std::str::from_utf8(key).map_err(|_| {
                    anyhow!("key '{}' is not valid UTF-8", String::from_utf8_lossy(key))
                })?;
                debug!(key, line = self.line_no, "found key");
                insert.execute(named_params! {
                    ":key": key,
                    ":line": self.line_no as i64,
                    ":offset": offset as i64,
                })?;
            }
            KeyKind::Numeric => {
                let value = parse_numeric_key(key)?;
                debug!(key = value, line = self.line_no, "found key");
                insert.execute(named_params! {
                    ":key": value,
                    ":line": self.line_no as i64,
                    ":offset": offset as i64,
                })?;
            }
        }
        Ok(())
    }
}

/// Strict signed base-10 parse: an optional leading `-`, then one or more
/// ASCII digits and nothing else. Magnitudes past `i64::MAX` are rejected.
pub(crate) fn parse_numeric_key(key: &[u8]) -> anyhow::Result<i64> {
    let (negative, digits) = match key {
        [b'-', rest @ ..] => (true, rest),
        rest => (false, rest),
    };
    if digits.is_empty() {
        return Err(non_numeric(key));
    }
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(non_numeric(key));
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(i64::from(b - b'0')))
            .ok_or_else(|| {
                anyhow!(
                    "numeric key out of range: '{}'",
                    String::from_utf8_lossy(key)
                )
            })?;
    }
    Ok(if negative { -value } else { value })
}

fn non_numeric(key: &[u8]) -> anyhow::Error {
    anyhow!("non-numeric key: '{}'", String::from_utf8_lossy(key))
}
