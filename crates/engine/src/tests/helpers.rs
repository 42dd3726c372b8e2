use std::fs::File;
use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use linefind::LineSink;

use crate::{Index, IndexBuilder};

pub fn write_gzip(path: &Path, data: &[u8]) {
    let mut enc = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap();
}

/// Gzip with a sync flush every `flush_every` input bytes, forcing block
/// boundaries at predictable spacing.
pub fn write_gzip_flushed(path: &Path, data: &[u8], flush_every: usize) {
    let mut enc = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    for chunk in data.chunks(flush_every) {
        enc.write_all(chunk).unwrap();
        enc.flush().unwrap();
    }
    enc.finish().unwrap();
}

/// `line-1\n` .. `line-n\n`.
pub fn numbered_lines(n: usize) -> Vec<u8> {
    let mut data = Vec::new();
    for i in 1..=n {
        data.extend_from_slice(format!("line-{i}\n").as_bytes());
    }
    data
}

pub fn build(source: &Path, sidecar: &Path, index_every: u64) {
    IndexBuilder::new(source, sidecar)
        .unwrap()
        .index_every(index_every)
        .build()
        .unwrap();
}

pub fn load(source: &Path, sidecar: &Path) -> Index {
    Index::load(source, sidecar, false).unwrap()
}

/// Collects `(line_no, offset, bytes)` triples delivered to the sink.
#[derive(Default)]
pub struct Collect {
    pub lines: Vec<(u64, u64, Vec<u8>)>,
}

impl LineSink for Collect {
    fn on_line(&mut self, line_no: u64, offset: u64, line: &[u8]) -> anyhow::Result<()> {
        self.lines.push((line_no, offset, line.to_vec()));
        Ok(())
    }
}

/// Fetches one line's bytes, or `None` if the line does not exist.
pub fn fetch(index: &mut Index, line: u64) -> Option<Vec<u8>> {
    let mut sink = Collect::default();
    index.get_line(line, &mut sink).unwrap();
    sink.lines.pop().map(|(_, _, bytes)| bytes)
}
