//! # linefind — incremental line-boundary discovery
//!
//! Decompressed output arrives as a sequence of byte windows; this crate
//! finds the lines in that stream without ever holding more than one
//! partial line in memory.
//!
//! `\n` (0x0A) is the sole terminator. Lines are the bytes between
//! terminators; a line's recorded extent includes its terminator, but the
//! bytes handed to the [`LineSink`] exclude it, so every consumer sees the
//! same payload whether the line came from a build scan or a later fetch.
//! After the final window, any trailing bytes not followed by a terminator
//! form a last line with no terminator to include.
//!
//! The finder also accumulates the table of line-start offsets. Once
//! finished, a terminal sentinel equal to the total stream length is
//! appended, so the length of 1-based line `i` is
//! `offsets[i] - offsets[i - 1]`.

/// Receives each completed line, in strictly increasing line-number order.
pub trait LineSink {
    /// `line` holds the line's bytes without the terminating newline;
    /// `offset` is the byte offset of its first character in the
    /// decompressed stream.
    fn on_line(&mut self, line_no: u64, offset: u64, line: &[u8]) -> anyhow::Result<()>;
}

/// Streaming `\n` scanner. Feed windows with [`add`](LineFinder::add) in
/// arrival order; pass `is_final` with the last window (an empty final
/// window is fine).
pub struct LineFinder {
    /// Start offset of every line seen so far, plus the terminal sentinel
    /// once finished.
    offsets: Vec<u64>,
    /// Bytes of the current line carried over from previous windows.
    partial: Vec<u8>,
    /// Total bytes consumed.
    position: u64,
    /// Start offset of the line currently being accumulated, if any.
    open_line: Option<u64>,
    next_line: u64,
    finished: bool,
}

impl LineFinder {
    pub fn new() -> Self {
        Self {
            offsets: Vec::new(),
            partial: Vec::new(),
            position: 0,
            open_line: None,
            next_line: 1,
            finished: false,
        }
    }

    /// Scans one window, invoking `sink` for every line completed within
    /// it. A sink error stops the scan immediately and propagates.
    pub fn add(
        &mut self,
        buf: &[u8],
        is_final: bool,
        sink: &mut dyn LineSink,
    ) -> anyhow::Result<()> {
        assert!(!self.finished, "add called after the final window");

        // Start of the open line's bytes within this window: 0 while the
        // line carried over, updated when a new line opens.
        let mut line_from = 0;
        for (i, &byte) in buf.iter().enumerate() {
            let start = match self.open_line {
                Some(start) => start,
                None => {
                    let start = self.position + i as u64;
                    self.offsets.push(start);
                    self.open_line = Some(start);
                    line_from = i;
                    start
                }
            };
            if byte == b'\n' {
                if self.partial.is_empty() {
                    sink.on_line(self.next_line, start, &buf[line_from..i])?;
                } else {
                    self.partial.extend_from_slice(&buf[line_from..i]);
                    sink.on_line(self.next_line, start, &self.partial)?;
                    self.partial.clear();
                }
                self.next_line += 1;
                self.open_line = None;
            }
        }
        if self.open_line.is_some() {
            self.partial.extend_from_slice(&buf[line_from..]);
        }
        self.position += buf.len() as u64;

        if is_final {
            self.finished = true;
            if let Some(start) = self.open_line.take() {
                let partial = std::mem::take(&mut self.partial);
                sink.on_line(self.next_line, start, &partial)?;
                self.next_line += 1;
            }
            self.offsets.push(self.position);
        }
        Ok(())
    }

    /// Line-start offsets, with the terminal sentinel appended once the
    /// final window has been seen.
    pub fn line_offsets(&self) -> &[u64] {
        &self.offsets
    }

    /// Number of complete lines emitted so far.
    pub fn line_count(&self) -> u64 {
        self.next_line - 1
    }

    /// Total bytes scanned.
    pub fn total_bytes(&self) -> u64 {
        self.position
    }
}

impl Default for LineFinder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
