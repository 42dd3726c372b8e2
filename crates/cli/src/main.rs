//! # zipline — random, line-addressed access into DEFLATE-compressed files
//!
//! Builds and queries a sidecar index that makes any line of a gzip or
//! zlib compressed text file reachable in constant time.
//!
//! ## Commands
//!
//! ```text
//! zipline build <FILE> [--index-every N] [--skip-first N]
//!               [--field N | --external CMD] [--delimiter C]
//!               [--name NAME] [--numeric] [--unique]
//! zipline line <FILE> <N>...              Print lines by 1-based number
//! zipline query <FILE> <INDEX> <KEY>...   Print lines matching keys
//! zipline metadata <FILE>                 Dump sidecar metadata
//! ```
//!
//! The sidecar lives next to the source as `<FILE>.zipline` unless
//! `--index-file` says otherwise. Matched lines go to stdout; diagnostics
//! go to stderr (filter with `RUST_LOG`, default `info`).
//!
//! ## Example
//!
//! ```text
//! $ zipline build app.log.gz --field 2 --numeric --name reqid
//! $ zipline query app.log.gz reqid 831991
//! 2026-07-12T09:14:55Z 831991 GET /health 200
//! $ zipline line app.log.gz 1000000
//! 2026-07-12T09:15:02Z 832007 GET /orders 500
//! ```
//!
//! Exit status is non-zero on any fatal error and zero otherwise,
//! including lookups that match nothing.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Result};
use clap::{Parser, Subcommand};
use engine::{ExternalIndexer, FieldIndexer, Index, IndexBuilder, LineSink};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "zipline",
    about = "Random, line-addressed access into DEFLATE-compressed files",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the sidecar index for a compressed file
    Build {
        /// Compressed source (gzip or zlib)
        file: PathBuf,
        /// Sidecar path (default: <FILE>.zipline)
        #[arg(long)]
        index_file: Option<PathBuf>,
        /// Decompressed bytes between checkpoints
        #[arg(long, value_name = "BYTES", default_value_t = engine::DEFAULT_INDEX_EVERY)]
        index_every: u64,
        /// Leave the first N lines out of secondary indexes
        #[arg(long, value_name = "N", default_value_t = 0)]
        skip_first: u64,
        /// Index the Nth delimiter-separated field of each line (1-based)
        #[arg(long, value_name = "N")]
        field: Option<usize>,
        /// Pipe each line to CMD; one stdout line of keys per input line
        #[arg(long, value_name = "CMD", conflicts_with = "field")]
        external: Option<String>,
        /// Field and key delimiter
        #[arg(long, value_name = "CHAR", default_value_t = ' ')]
        delimiter: char,
        /// Name of the secondary index
        #[arg(long, default_value = "default")]
        name: String,
        /// Parse keys as signed integers
        #[arg(long)]
        numeric: bool,
        /// Declare keys unique (primary key)
        #[arg(long)]
        unique: bool,
    },
    /// Print lines by 1-based line number
    Line {
        /// Compressed source (gzip or zlib)
        file: PathBuf,
        /// Sidecar path (default: <FILE>.zipline)
        #[arg(long)]
        index_file: Option<PathBuf>,
        /// Load even if the source no longer matches the sidecar
        #[arg(long)]
        force: bool,
        /// Line numbers to print
        #[arg(required = true)]
        lines: Vec<u64>,
    },
    /// Print lines matching keys in a secondary index
    Query {
        /// Compressed source (gzip or zlib)
        file: PathBuf,
        /// Name of the index to search
        index: String,
        /// Sidecar path (default: <FILE>.zipline)
        #[arg(long)]
        index_file: Option<PathBuf>,
        /// Load even if the source no longer matches the sidecar
        #[arg(long)]
        force: bool,
        /// Keys to look up
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Dump the sidecar's metadata
    Metadata {
        /// Compressed source (gzip or zlib)
        file: PathBuf,
        /// Sidecar path (default: <FILE>.zipline)
        #[arg(long)]
        index_file: Option<PathBuf>,
    },
}

/// Writes each fetched line to stdout, newline-terminated.
struct StdoutSink;

impl LineSink for StdoutSink {
    fn on_line(&mut self, _line_no: u64, _offset: u64, line: &[u8]) -> Result<()> {
        let mut out = std::io::stdout().lock();
        out.write_all(line)?;
        out.write_all(b"\n")?;
        Ok(())
    }
}

fn sidecar_path(file: &Path, index_file: Option<PathBuf>) -> PathBuf {
    index_file.unwrap_or_else(|| {
        let mut os = file.as_os_str().to_owned();
        os.push(".zipline");
        PathBuf::from(os)
    })
}

fn build(
    file: &Path,
    index_file: Option<PathBuf>,
    index_every: u64,
    skip_first: u64,
    field: Option<usize>,
    external: Option<String>,
    delimiter: char,
    name: &str,
    numeric: bool,
    unique: bool,
) -> Result<()> {
    let sidecar = sidecar_path(file, index_file);
    let mut builder = IndexBuilder::new(file, &sidecar)?
        .index_every(index_every)
        .skip_first(skip_first);

    let delimiter =
        u8::try_from(delimiter).map_err(|_| anyhow::anyhow!("delimiter must be ASCII"))?;
    if let Some(field) = field {
        ensure!(field >= 1, "field numbers are 1-based");
        let creation = format!("field {field} delimiter '{}'", delimiter as char);
        builder.add_indexer(
            name,
            &creation,
            numeric,
            unique,
            Box::new(FieldIndexer::new(delimiter, field)),
        )?;
    } else if let Some(command) = external {
        builder.add_indexer(
            name,
            &command,
            numeric,
            unique,
            Box::new(ExternalIndexer::new(&command, delimiter)?),
        )?;
    }
    builder.build()?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Build {
            file,
            index_file,
            index_every,
            skip_first,
            field,
            external,
            delimiter,
            name,
            numeric,
            unique,
        } => build(
            &file, index_file, index_every, skip_first, field, external, delimiter, &name, numeric,
            unique,
        ),
        Commands::Line {
            file,
            index_file,
            force,
            lines,
        } => {
            let mut index = Index::load(&file, &sidecar_path(&file, index_file), force)?;
            index.get_lines(&lines, &mut StdoutSink)?;
            Ok(())
        }
        Commands::Query {
            file,
            index,
            index_file,
            force,
            keys,
        } => {
            let mut idx = Index::load(&file, &sidecar_path(&file, index_file), force)?;
            let lines = idx.query_index_multi(&index, &keys)?;
            idx.get_lines(&lines, &mut StdoutSink)?;
            Ok(())
        }
        Commands::Metadata { file, index_file } => {
            let index = Index::load(&file, &sidecar_path(&file, index_file), true)?;
            for (key, value) in index.metadata() {
                println!("{key} = {value}");
            }
            Ok(())
        }
    }
}
