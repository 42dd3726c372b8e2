//! # zstream — stateful DEFLATE inflation with block-boundary visibility
//!
//! A thin safe wrapper over zlib (via `libz-sys`) exposing the handful of
//! entry points that random-access decompression needs and that pure-Rust
//! inflaters do not surface:
//!
//! - [`Inflater::inflate_block`] — one `inflate(Z_BLOCK)` step. zlib stops
//!   at every DEFLATE block boundary (and, for zlib/gzip input, immediately
//!   after the header) and reports in `data_type`:
//!
//!   ```text
//!   bit 7 (0x80)   stopped at a block boundary / end of header
//!   bit 6 (0x40)   the block being decoded is the last in the stream
//!   bits 0-2       unused bits in the last input byte consumed, i.e. how
//!                  many bits of that byte belong to the NEXT block
//!   ```
//!
//!   These three fields are exactly what a decoder checkpoint must record
//!   to later resume mid-stream.
//! - [`Inflater::prime`] — feed the leading bits of a checkpoint that does
//!   not fall on a byte boundary (`inflatePrime`).
//! - [`Inflater::set_dictionary`] — install a saved 32 KiB sliding window
//!   before resuming (`inflateSetDictionary`).
//!
//! The [`window`] module is the checkpoint codec: it rotates the builder's
//! output buffer into chronological order and compresses the resulting
//! 32 KiB window at maximum ratio (one-shot zlib format via `flate2`).
//! On load, anything that does not inflate back to exactly 32 KiB is
//! corruption.

mod inflate;
mod window;

pub use inflate::{Format, Inflater, Step};
pub use window::{compress_window, decompress_window, make_window, WINDOW_SIZE};

use thiserror::Error;

/// Errors surfaced by the inflater and the window codec.
#[derive(Debug, Error)]
pub enum ZlibError {
    /// The compressed data is not a valid DEFLATE/zlib/gzip stream, or the
    /// stream ended before it should have.
    #[error("corrupt deflate data: {0}")]
    Data(String),

    /// The stream asked for a preset dictionary. Indexable sources must be
    /// self-contained, so this is treated as corruption.
    #[error("deflate stream requires an external dictionary")]
    DictionaryRequired,

    /// zlib could not allocate internal state.
    #[error("zlib out of memory")]
    Memory,

    /// The inflater was driven in an invalid state (a bug, not bad data).
    #[error("zlib stream state error")]
    Stream,

    /// A stored checkpoint window decompressed to the wrong size.
    #[error("checkpoint window inflated to {got} bytes, expected {expected}")]
    WindowSize { got: usize, expected: usize },

    /// The window blob could not be produced.
    #[error("window compression failed: {0}")]
    Compress(String),

    /// A zlib return code outside the documented set.
    #[error("unexpected zlib error code {0}")]
    Unexpected(i32),
}
