//! # Engine — index builder and random-access fetcher
//!
//! Ties the [`zstream`] inflater and the [`linefind`] scanner together into
//! the two halves of random line access over a DEFLATE-compressed file:
//!
//! ```text
//! BUILD (once, sequential)
//!   compressed bytes ──> block-stepping inflater ──> 32 KiB window buffer
//!                             |                            |
//!                 block boundary + spacing             line finder
//!                             v                            v
//!                     AccessPoints row           LineOffsets rows
//!                  (offset, bit, window)        + secondary indexes
//!
//! FETCH (per line, random)
//!   line no ──> sidecar join ──> covering access point
//!                                   |
//!              seek + prime bits + install window dictionary
//!                                   |
//!              skip (offset - u_start) bytes ──> emit `length` bytes
//! ```
//!
//! ## Module responsibilities
//!
//! | Module        | Purpose                                              |
//! |---------------|------------------------------------------------------|
//! | [`lib.rs`]    | `Index` façade, `Error`, load + integrity check       |
//! | [`builder`]   | One-pass build: inflate loop, checkpoints, line table |
//! | [`fetch`]     | Restore decoder state, skip, extract one line         |
//! | [`handlers`]  | Key persistence: alphabetic and strict-numeric        |
//! | [`indexer`]   | Line-indexer contract, field and external indexers    |
//! | [`sidecar`]   | Schema DDL, pragmas, metadata access                  |
//!
//! The sidecar is a SQLite file marked with application id `0x5a494458`
//! ("ZIDX"). It is written exclusively by [`IndexBuilder`] in a single
//! transaction and read immutably by [`Index`].

mod builder;
mod fetch;
mod handlers;
mod indexer;
mod sidecar;

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use thiserror::Error as ThisError;
use tracing::warn;

pub use builder::IndexBuilder;
pub use indexer::{ExternalIndexer, FieldIndexer, IndexSink, LineIndexer};
pub use linefind::LineSink;
pub use zstream::Format;

/// Default spacing between checkpoints, in decompressed bytes.
pub const DEFAULT_INDEX_EVERY: u64 = 32 * 1024 * 1024;

/// Compressed input is read in chunks of this size.
pub(crate) const CHUNK_SIZE: usize = 16 * 1024;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, ThisError)]
pub enum Error {
    /// The inflater or window codec failed: the source is not valid
    /// DEFLATE/zlib/gzip data, or a stored checkpoint window is corrupt.
    #[error("compression error: {0}")]
    Compression(#[from] zstream::ZlibError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The sidecar store rejected DDL or a statement.
    #[error("sidecar store error: {0}")]
    Schema(#[from] rusqlite::Error),

    /// The sidecar disagrees with the source file, or with itself.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// A registered line indexer failed during the build.
    #[error("failed to index line {line}: '{text}'")]
    Indexing {
        line: u64,
        text: String,
        #[source]
        source: anyhow::Error,
    },

    /// No index with this name exists in the sidecar.
    #[error("no index named '{0}'")]
    UnknownIndex(String),

    /// The name cannot be used as part of a table identifier.
    #[error("invalid index name '{0}': use letters, digits and underscores")]
    InvalidName(String),

    /// A caller-supplied line sink failed.
    #[error("line sink failed")]
    Sink(#[source] anyhow::Error),
}

impl Error {
    /// Recovers the typed error a build sink carried through the line
    /// finder's `anyhow` boundary.
    pub(crate) fn from_sink(err: anyhow::Error) -> Error {
        match err.downcast::<Error>() {
            Ok(e) => e,
            Err(e) => Error::Sink(e),
        }
    }
}

/// Read-only handle over a compressed source and its sidecar index.
///
/// All lookup state lives in the sidecar; this handle only holds the two
/// open files. It never modifies either one.
#[derive(Debug)]
pub struct Index {
    source: File,
    conn: rusqlite::Connection,
    metadata: BTreeMap<String, String>,
    /// Total decompressed size, recovered from the last access point.
    uncompressed_size: u64,
}

impl Index {
    /// Opens an existing sidecar and verifies it still matches the source.
    ///
    /// A size or mtime mismatch is fatal unless `force` is set, in which
    /// case it is logged and ignored. Results are only correct under
    /// `force` if the compressed bytes themselves are unchanged.
    pub fn load(source_path: &Path, sidecar_path: &Path, force: bool) -> Result<Index> {
        let source = File::open(source_path)?;
        let conn = sidecar::open_read_only(sidecar_path)?;
        let metadata = sidecar::read_metadata(&conn);
        let uncompressed_size = sidecar::uncompressed_size(&conn)?;
        let index = Index {
            source,
            conn,
            metadata,
            uncompressed_size,
        };
        index.verify_source(force)?;
        Ok(index)
    }

    /// Metadata recorded at build time. Unknown keys are preserved.
    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    fn verify_source(&self, force: bool) -> Result<()> {
        let stat = self.source.metadata()?;
        if let Some(expected) = self.metadata.get("compressedSize") {
            let actual = stat.len().to_string();
            if *expected != actual {
                if force {
                    warn!(
                        expected = %expected,
                        actual = %actual,
                        "compressed size mismatch, continuing anyway"
                    );
                } else {
                    return Err(Error::Integrity(format!(
                        "compressed size changed since the index was built \
                         ({actual} vs expected {expected})"
                    )));
                }
            }
        }
        if let Some(expected) = self.metadata.get("compressedModTime") {
            if let Some(mtime) = mtime_secs(&stat) {
                let actual = mtime.to_string();
                if *expected != actual {
                    if force {
                        warn!(
                            expected = %expected,
                            actual = %actual,
                            "compressed file timestamp mismatch, continuing anyway"
                        );
                    } else {
                        return Err(Error::Integrity(
                            "compressed file has been modified since the index was built"
                                .to_owned(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn mtime_secs(meta: &std::fs::Metadata) -> Option<u64> {
    meta.modified()
        .ok()?
        .duration_since(std::time::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
}

#[cfg(test)]
mod tests;
