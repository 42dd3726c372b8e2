//! The fetch path: restore decoder state from the covering access point,
//! skip to the line's offset, and emit exactly its recorded bytes.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use linefind::LineSink;
use rusqlite::{named_params, OptionalExtension};
use tracing::debug;
use zstream::{Format, Inflater, ZlibError, WINDOW_SIZE};

use crate::{handlers, sidecar, Error, Index, Result, CHUNK_SIZE};

/// Everything needed to extract one line: its row from `LineOffsets`
/// joined with the access point covering its offset.
struct LineLocation {
    line: u64,
    offset: u64,
    length: u64,
    u_start: u64,
    c_offset: u64,
    bit_offset: i64,
    window: Vec<u8>,
}

const LINE_QUERY: &str = "\
SELECT line, offset, length, uncompressedOffset, compressedOffset, bitOffset, window
FROM LineOffsets, AccessPoints
WHERE offset >= uncompressedOffset AND offset <= uncompressedEndOffset
AND line = :line
LIMIT 1";

impl Index {
    /// Fetches one line, delivering its bytes (without the trailing
    /// newline) to `sink`. A line number past the end of the file is not
    /// an error: the sink is simply never invoked.
    pub fn get_line(&mut self, line: u64, sink: &mut dyn LineSink) -> Result<()> {
        let location = self
            .conn
            .prepare_cached(LINE_QUERY)?
            .query_row(named_params! {":line": line as i64}, |row| {
                Ok(LineLocation {
                    line: row.get::<_, i64>(0)? as u64,
                    offset: row.get::<_, i64>(1)? as u64,
                    length: row.get::<_, i64>(2)? as u64,
                    u_start: row.get::<_, i64>(3)? as u64,
                    c_offset: row.get::<_, i64>(4)? as u64,
                    bit_offset: row.get(5)?,
                    window: row.get(6)?,
                })
            })
            .optional()?;
        match location {
            Some(location) => self.extract(location, sink),
            None => Ok(()),
        }
    }

    /// Fetches several lines, one at a time, in the caller's order.
    pub fn get_lines(&mut self, lines: &[u64], sink: &mut dyn LineSink) -> Result<()> {
        for &line in lines {
            self.get_line(line, sink)?;
        }
        Ok(())
    }

    /// Line numbers whose key in the named index equals `key`. A key that
    /// matches nothing (including one unparseable for a numeric index)
    /// yields an empty result.
    pub fn query_index(&self, name: &str, key: &str) -> Result<Vec<u64>> {
        sidecar::check_index_name(name)?;
        let numeric: Option<bool> = self
            .conn
            .query_row(
                "SELECT isNumeric FROM Indexes WHERE name = :name",
                named_params! {":name": name},
                |row| row.get::<_, i64>(0).map(|v| v != 0),
            )
            .optional()?;
        let Some(numeric) = numeric else {
            return Err(Error::UnknownIndex(name.to_owned()));
        };

        let sql = format!("SELECT line FROM index_{name} WHERE key = :query");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let lines = if numeric {
            let Ok(value) = handlers::parse_numeric_key(key.as_bytes()) else {
                return Ok(Vec::new());
            };
            stmt.query_map(named_params! {":query": value}, |row| row.get::<_, i64>(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?
        } else {
            stmt.query_map(named_params! {":query": key}, |row| row.get::<_, i64>(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?
        };
        Ok(lines.into_iter().map(|l| l as u64).collect())
    }

    /// Union of per-key results, in the given order, without deduplication.
    pub fn query_index_multi(&self, name: &str, keys: &[String]) -> Result<Vec<u64>> {
        let mut all = Vec::new();
        for key in keys {
            all.extend(self.query_index(name, key)?);
        }
        Ok(all)
    }

    /// Number of entries in the named index.
    pub fn index_size(&self, name: &str) -> Result<u64> {
        sidecar::check_index_name(name)?;
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM index_{name}"), [], |row| {
                    row.get(0)
                })?;
        Ok(count as u64)
    }

    /// Number of lines recorded in the sidecar.
    pub fn line_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM LineOffsets", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn extract(&mut self, loc: LineLocation, sink: &mut dyn LineSink) -> Result<()> {
        debug!(
            line = loc.line,
            offset = loc.offset,
            checkpoint = loc.u_start,
            "fetching line"
        );
        // Sidecar values drive buffer sizes and seeks; never trust them
        // blindly.
        if loc.length == 0 || loc.offset + loc.length > self.uncompressed_size {
            return Err(Error::Integrity(format!(
                "line {} has implausible extent {}+{} in a {}-byte stream",
                loc.line, loc.offset, loc.length, self.uncompressed_size
            )));
        }
        let bit_offset = match u8::try_from(loc.bit_offset) {
            Ok(b @ 0..=7) if b == 0 || loc.c_offset > 0 => b,
            _ => {
                return Err(Error::Integrity(format!(
                    "access point covering line {} is corrupt",
                    loc.line
                )))
            }
        };

        let mut inflater = Inflater::new(Format::Raw)?;
        if bit_offset != 0 {
            // The boundary splits a byte: reread it and feed the inflater
            // the bits belonging to the next block.
            self.source.seek(SeekFrom::Start(loc.c_offset - 1))?;
            let mut byte = [0u8; 1];
            self.source.read_exact(&mut byte)?;
            inflater.prime(bit_offset, byte[0] >> (8 - bit_offset))?;
        } else {
            self.source.seek(SeekFrom::Start(loc.c_offset))?;
        }
        // The first access point covers the start of the stream; its
        // stored window is an empty-prefix sentinel, not a dictionary.
        if loc.u_start != 0 {
            let window = zstream::decompress_window(&loc.window)?;
            inflater.set_dictionary(&window)?;
        }

        let mut reader = ChunkReader {
            source: &mut self.source,
            buf: [0u8; CHUNK_SIZE],
            pos: 0,
            filled: 0,
        };

        let mut to_skip = loc.offset - loc.u_start;
        let mut discard = vec![0u8; WINDOW_SIZE];
        while to_skip > 0 {
            let want = to_skip.min(WINDOW_SIZE as u64) as usize;
            let got = reader.inflate_into(&mut inflater, &mut discard[..want])?;
            if got < want {
                return Err(Error::Integrity(format!(
                    "stream ended while seeking to line {}",
                    loc.line
                )));
            }
            to_skip -= want as u64;
        }

        let mut line_buf = vec![0u8; loc.length as usize];
        let got = reader.inflate_into(&mut inflater, &mut line_buf)?;
        if got < line_buf.len() {
            return Err(Error::Integrity(format!(
                "stream ended inside line {}",
                loc.line
            )));
        }
        // Recorded lengths include the terminator, except for a final line
        // the source never terminated.
        let payload = match line_buf.last() {
            Some(&b'\n') => &line_buf[..line_buf.len() - 1],
            _ => &line_buf[..],
        };
        sink.on_line(loc.line, loc.offset, payload).map_err(Error::Sink)
    }
}

/// Chunked reads from the compressed source feeding an inflater.
struct ChunkReader<'a> {
    source: &'a mut File,
    buf: [u8; CHUNK_SIZE],
    pos: usize,
    filled: usize,
}

impl ChunkReader<'_> {
    /// Inflates until `out` is full or the compressed stream ends,
    /// returning the number of bytes produced.
    fn inflate_into(&mut self, inflater: &mut Inflater, out: &mut [u8]) -> Result<usize> {
        let mut done = 0;
        while done < out.len() {
            if self.pos == self.filled {
                self.filled = self.source.read(&mut self.buf)?;
                self.pos = 0;
                if self.filled == 0 {
                    return Err(Error::Compression(ZlibError::Data(
                        "compressed stream is truncated".into(),
                    )));
                }
            }
            let step = inflater.inflate(&self.buf[self.pos..self.filled], &mut out[done..])?;
            self.pos += step.consumed;
            done += step.produced;
            if step.stream_end {
                break;
            }
            if step.consumed == 0 && step.produced == 0 && self.pos < self.filled {
                return Err(Error::Compression(ZlibError::Data(
                    "inflater stalled mid-stream".into(),
                )));
            }
        }
        Ok(done)
    }
}
