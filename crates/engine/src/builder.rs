//! The build pass: one sequential decompression that writes the whole
//! sidecar inside a single transaction.
//!
//! The inflater is stepped with `Z_BLOCK` so every DEFLATE block boundary
//! is visible. Output rotates through a 32 KiB buffer that doubles as the
//! sliding window: when a boundary satisfies the checkpoint spacing, the
//! buffer's rotation is snapshotted, compressed, and recorded together
//! with the compressed offset and bit position. Each completed fill is
//! handed to the line finder, which drives the registered secondary
//! indexers line by line.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};

use linefind::{LineFinder, LineSink};
use rusqlite::{named_params, Connection};
use tracing::{debug, info, warn};
use zstream::{Format, Inflater, ZlibError, WINDOW_SIZE};

use crate::handlers::{IndexHandler, KeyKind};
use crate::indexer::LineIndexer;
use crate::{sidecar, Error, Result, CHUNK_SIZE, DEFAULT_INDEX_EVERY};

const PROGRESS_EVERY: Duration = Duration::from_secs(20);

/// Builds the sidecar index for one compressed source.
///
/// Construction replaces any existing sidecar at the target path and
/// records the source's size and mtime so later loads can detect a stale
/// index. Register secondary indexers before calling
/// [`build`](IndexBuilder::build); the builder owns them for the duration
/// of the pass.
pub struct IndexBuilder {
    source: File,
    conn: Connection,
    format: Format,
    index_every: u64,
    skip_first: u64,
    handlers: Vec<IndexHandler>,
}

/// An access point whose upper bound is not yet known. Written out when
/// the next checkpoint (or the end of the stream) closes it.
struct PendingPoint {
    u_start: u64,
    c_offset: u64,
    bit_offset: u8,
    window: Vec<u8>,
}

impl PendingPoint {
    fn close(self, conn: &Connection, u_end: u64) -> Result<()> {
        conn.prepare_cached(
            "INSERT INTO AccessPoints VALUES(\
             :uncompressedOffset, :uncompressedEndOffset, \
             :compressedOffset, :bitOffset, :window)",
        )?
        .execute(named_params! {
            ":uncompressedOffset": self.u_start as i64,
            ":uncompressedEndOffset": u_end as i64,
            ":compressedOffset": self.c_offset as i64,
            ":bitOffset": i64::from(self.bit_offset),
            ":window": self.window,
        })?;
        Ok(())
    }
}

impl IndexBuilder {
    /// Opens the source and creates a fresh sidecar at `sidecar_path`,
    /// removing any previous one first.
    pub fn new(source_path: &Path, sidecar_path: &Path) -> Result<Self> {
        let source = File::open(source_path)?;
        if std::fs::remove_file(sidecar_path).is_ok() {
            warn!(path = %sidecar_path.display(), "rebuilding existing index");
        }
        let conn = sidecar::create(sidecar_path)?;

        sidecar::add_metadata(&conn, "version", &sidecar::VERSION.to_string())?;
        sidecar::add_metadata(&conn, "compressedFile", &source_path.display().to_string())?;
        let stat = source.metadata()?;
        sidecar::add_metadata(&conn, "compressedSize", &stat.len().to_string())?;
        if let Some(mtime) = crate::mtime_secs(&stat) {
            sidecar::add_metadata(&conn, "compressedModTime", &mtime.to_string())?;
        }

        Ok(Self {
            source,
            conn,
            format: Format::ZlibOrGzip,
            index_every: DEFAULT_INDEX_EVERY,
            skip_first: 0,
            handlers: Vec::new(),
        })
    }

    /// Spacing between checkpoints, in decompressed bytes. Checkpoints land
    /// only on block boundaries, so actual gaps vary around this.
    #[must_use]
    pub fn index_every(mut self, bytes: u64) -> Self {
        self.index_every = bytes;
        self
    }

    /// Leaves the first `n` lines out of every secondary index. They stay
    /// in the line-offset table and remain fetchable.
    #[must_use]
    pub fn skip_first(mut self, n: u64) -> Self {
        self.skip_first = n;
        self
    }

    /// Header handling for the source; auto zlib/gzip by default.
    #[must_use]
    pub fn source_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Registers a secondary index: creates its table, records its
    /// descriptor, and binds `indexer` to it for the build pass.
    pub fn add_indexer(
        &mut self,
        name: &str,
        creation: &str,
        numeric: bool,
        unique: bool,
        indexer: Box<dyn LineIndexer>,
    ) -> Result<()> {
        sidecar::check_index_name(name)?;
        let table = format!("index_{name}");
        let mut key_type = if numeric { "INTEGER" } else { "TEXT" }.to_owned();
        if unique {
            key_type.push_str(" PRIMARY KEY");
        }
        self.conn.execute_batch(&format!(
            "CREATE TABLE {table}(key {key_type}, line INTEGER, offset INTEGER)"
        ))?;
        self.conn
            .prepare_cached("INSERT INTO Indexes VALUES(:name, :creationString, :isNumeric)")?
            .execute(named_params! {
                ":name": name,
                ":creationString": creation,
                ":isNumeric": numeric as i64,
            })?;
        let kind = if numeric { KeyKind::Numeric } else { KeyKind::Alpha };
        self.handlers.push(IndexHandler::new(&table, kind, indexer));
        Ok(())
    }

    /// Runs the build pass and commits the sidecar.
    pub fn build(mut self) -> Result<()> {
        let source_size = self.source.metadata()?.len();
        info!(index_every = self.index_every, source_size, "building index");

        self.conn.execute_batch("BEGIN TRANSACTION")?;
        // An early error return drops the connection with the transaction
        // open, discarding every row written so far.
        self.run(source_size)?;
        self.conn.execute_batch("COMMIT")?;
        info!("index complete");
        Ok(())
    }

    fn run(&mut self, source_size: u64) -> Result<()> {
        let mut inflater = Inflater::new(self.format)?;
        let mut input = [0u8; CHUNK_SIZE];
        let mut window = vec![0u8; WINDOW_SIZE];
        // Start "full" so the first loop iteration performs the initial
        // buffer setup without feeding the finder.
        let mut out_pos = WINDOW_SIZE;
        let mut first_fill = true;

        let mut total_in: u64 = 0;
        let mut total_out: u64 = 0;
        let mut last_checkpoint: u64 = 0;
        let mut pending: Option<PendingPoint> = None;
        let mut finder = LineFinder::new();
        let mut next_progress = Instant::now();

        // A zlib/gzip source yields its first block boundary at the end of
        // the header; a raw stream has no header, but offset 0 is itself a
        // safe resume point.
        if self.format == Format::Raw {
            pending = Some(PendingPoint {
                u_start: 0,
                c_offset: 0,
                bit_offset: 0,
                window: zstream::make_window(&window, 0)?,
            });
        }

        'stream: loop {
            let filled = self.source.read(&mut input)?;
            if filled == 0 {
                return Err(Error::Compression(ZlibError::Data(
                    "compressed stream is truncated".into(),
                )));
            }
            let mut pos = 0;
            while pos < filled {
                if out_pos == WINDOW_SIZE {
                    if !first_fill {
                        let mut sink = BuildSink {
                            conn: &self.conn,
                            handlers: &mut self.handlers,
                            skip_first: self.skip_first,
                        };
                        finder
                            .add(&window, false, &mut sink)
                            .map_err(Error::from_sink)?;
                    }
                    first_fill = false;
                    out_pos = 0;
                }

                let step = inflater.inflate_block(&input[pos..filled], &mut window[out_pos..])?;
                pos += step.consumed;
                out_pos += step.produced;
                total_in += step.consumed as u64;
                total_out += step.produced as u64;
                if step.stream_end {
                    break 'stream;
                }
                if step.consumed == 0 && step.produced == 0 {
                    // Output space and input were both available, so the
                    // inflater should always move.
                    return Err(Error::Compression(ZlibError::Data(
                        "inflater stalled mid-stream".into(),
                    )));
                }

                let since_last = total_out - last_checkpoint;
                if step.end_of_block
                    && !step.last_block
                    && (since_last > self.index_every || total_out == 0)
                {
                    debug!(
                        uncompressed = total_out,
                        compressed = total_in,
                        bit_offset = step.bit_offset,
                        "creating checkpoint"
                    );
                    if total_out != 0 {
                        if let Some(prev) = pending.take() {
                            prev.close(&self.conn, total_out - 1)?;
                        }
                    }
                    pending = Some(PendingPoint {
                        u_start: total_out,
                        c_offset: total_in,
                        bit_offset: step.bit_offset,
                        window: zstream::make_window(&window, out_pos)?,
                    });
                    last_checkpoint = total_out;
                }

                let now = Instant::now();
                if now >= next_progress {
                    let percent = if source_size == 0 {
                        100.0
                    } else {
                        total_in as f64 * 100.0 / source_size as f64
                    };
                    info!(
                        compressed_in = total_in,
                        compressed_total = source_size,
                        percent = %format_args!("{percent:.2}"),
                        "indexing progress"
                    );
                    next_progress = now + PROGRESS_EVERY;
                }
            }
        }

        if total_out != 0 {
            if let Some(prev) = pending.take() {
                prev.close(&self.conn, total_out - 1)?;
            }
        }

        {
            let mut sink = BuildSink {
                conn: &self.conn,
                handlers: &mut self.handlers,
                skip_first: self.skip_first,
            };
            finder
                .add(&window[..out_pos], true, &mut sink)
                .map_err(Error::from_sink)?;
        }
        debug_assert_eq!(finder.total_bytes(), total_out);

        let offsets = finder.line_offsets();
        let mut add_line = self
            .conn
            .prepare_cached("INSERT INTO LineOffsets VALUES(:line, :offset, :length)")?;
        for (i, pair) in offsets.windows(2).enumerate() {
            add_line.execute(named_params! {
                ":line": (i + 1) as i64,
                ":offset": pair[0] as i64,
                ":length": (pair[1] - pair[0]) as i64,
            })?;
        }
        info!(
            lines = finder.line_count(),
            uncompressed = total_out,
            "line table written"
        );
        Ok(())
    }
}

/// Feeds each completed line to every registered handler, honoring the
/// skip-first cutoff.
struct BuildSink<'a> {
    conn: &'a Connection,
    handlers: &'a mut Vec<IndexHandler>,
    skip_first: u64,
}

impl LineSink for BuildSink<'_> {
    fn on_line(&mut self, line_no: u64, _offset: u64, line: &[u8]) -> anyhow::Result<()> {
        if line_no <= self.skip_first {
            return Ok(());
        }
        for handler in self.handlers.iter_mut() {
            handler
                .on_line(self.conn, line_no, line)
                .map_err(anyhow::Error::new)?;
        }
        Ok(())
    }
}
