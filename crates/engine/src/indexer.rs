//! The line-indexer contract and the two stock indexers.
//!
//! A line indexer examines one line and emits zero or more keys for it
//! through an [`IndexSink`]. How the keys are persisted (text vs. integer,
//! unique or not) is the handler's concern, not the indexer's.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use anyhow::{bail, Context};

/// Receives the keys an indexer extracts from one line.
pub trait IndexSink {
    /// `offset` is indexer-defined; the stock indexers pass the key's byte
    /// offset within the line, or 0 when the position is unknown.
    fn add(&mut self, key: &[u8], offset: u64) -> anyhow::Result<()>;
}

/// Examines one line and emits zero or more keys for it.
///
/// Errors abort the build, wrapped with the offending line's number and
/// text.
pub trait LineIndexer {
    fn index(&mut self, sink: &mut dyn IndexSink, line: &[u8]) -> anyhow::Result<()>;
}

/// Emits one delimiter-separated field of each line, selected by 1-based
/// field number. Lines without that field, or with it empty, contribute no
/// key.
pub struct FieldIndexer {
    delimiter: u8,
    field: usize,
}

impl FieldIndexer {
    pub fn new(delimiter: u8, field: usize) -> Self {
        assert!(field >= 1, "field numbers are 1-based");
        Self { delimiter, field }
    }
}

impl LineIndexer for FieldIndexer {
    fn index(&mut self, sink: &mut dyn IndexSink, line: &[u8]) -> anyhow::Result<()> {
        let mut start = 0u64;
        for (n, part) in line.split(|&b| b == self.delimiter).enumerate() {
            if n + 1 == self.field {
                if !part.is_empty() {
                    sink.add(part, start)?;
                }
                break;
            }
            start += part.len() as u64 + 1;
        }
        Ok(())
    }
}

/// Delegates key extraction to a child process.
///
/// The command is spawned once per build via `sh -c`. Each line is written
/// to the child's stdin followed by a newline, and the child must answer
/// with exactly one line on stdout: its keys separated by the delimiter,
/// or an empty line for no keys. The child exiting mid-build is an error.
pub struct ExternalIndexer {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    delimiter: u8,
}

impl ExternalIndexer {
    pub fn new(command: &str, delimiter: u8) -> anyhow::Result<Self> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("could not spawn indexer command '{command}'"))?;
        let stdin = child.stdin.take().context("child stdin not captured")?;
        let stdout = child.stdout.take().context("child stdout not captured")?;
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            delimiter,
        })
    }
}

impl LineIndexer for ExternalIndexer {
    fn index(&mut self, sink: &mut dyn IndexSink, line: &[u8]) -> anyhow::Result<()> {
        self.stdin.write_all(line)?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()?;

        let mut response = Vec::new();
        if self.stdout.read_until(b'\n', &mut response)? == 0 {
            bail!("external indexer exited before answering");
        }
        if response.last() == Some(&b'\n') {
            response.pop();
        }
        for key in response.split(|&b| b == self.delimiter) {
            if !key.is_empty() {
                // The child protocol carries no byte positions.
                sink.add(key, 0)?;
            }
        }
        Ok(())
    }
}

impl Drop for ExternalIndexer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
