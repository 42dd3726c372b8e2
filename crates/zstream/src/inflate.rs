use std::ffi::CStr;
use std::os::raw::c_int;

use libz_sys as ffi;

use crate::ZlibError;

/// Header handling for a new [`Inflater`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// Auto-detect a zlib or gzip header (`windowBits` 47).
    ZlibOrGzip,
    /// Headerless DEFLATE (`windowBits` -15), used when resuming from a
    /// checkpoint mid-stream.
    Raw,
}

impl Format {
    fn window_bits(self) -> c_int {
        match self {
            Format::ZlibOrGzip => 47,
            Format::Raw => -15,
        }
    }
}

/// Outcome of one inflate step.
#[derive(Clone, Copy, Debug, Default)]
pub struct Step {
    /// Input bytes consumed by this step.
    pub consumed: usize,
    /// Output bytes produced by this step.
    pub produced: usize,
    /// The end of the compressed stream was reached.
    pub stream_end: bool,
    /// The step stopped at a DEFLATE block boundary (or end of header).
    pub end_of_block: bool,
    /// The block being decoded is the final block of the stream.
    pub last_block: bool,
    /// How many bits of the last consumed byte belong to the next block
    /// (0 when the boundary is byte-aligned).
    pub bit_offset: u8,
}

/// A stateful zlib inflater.
///
/// Inflation state lives in zlib; each call to [`inflate`](Self::inflate) or
/// [`inflate_block`](Self::inflate_block) passes the currently available
/// input and output slices and reports how far each advanced. The caller
/// owns all buffering policy.
pub struct Inflater {
    strm: Box<ffi::z_stream>,
}

impl Inflater {
    pub fn new(format: Format) -> Result<Self, ZlibError> {
        // zlib requires the stream struct zeroed before init; this is the
        // same construction flate2's zlib backend uses.
        let mut strm: Box<ffi::z_stream> = Box::new(unsafe { std::mem::zeroed() });
        let ret = unsafe {
            ffi::inflateInit2_(
                &mut *strm,
                format.window_bits(),
                ffi::zlibVersion(),
                std::mem::size_of::<ffi::z_stream>() as c_int,
            )
        };
        if ret != ffi::Z_OK {
            return Err(error_from(ret, &strm));
        }
        Ok(Self { strm })
    }

    /// One `inflate(Z_BLOCK)` step: stops at the next DEFLATE block
    /// boundary so the caller can decide whether to checkpoint there.
    pub fn inflate_block(&mut self, input: &[u8], output: &mut [u8]) -> Result<Step, ZlibError> {
        self.step(input, output, ffi::Z_BLOCK)
    }

    /// One plain `inflate(Z_NO_FLUSH)` step.
    pub fn inflate(&mut self, input: &[u8], output: &mut [u8]) -> Result<Step, ZlibError> {
        self.step(input, output, ffi::Z_NO_FLUSH)
    }

    /// Feeds `bits` (1..=7) leading bits of the next block into the
    /// inflater. `value` must hold them in its low bits.
    pub fn prime(&mut self, bits: u8, value: u8) -> Result<(), ZlibError> {
        let ret = unsafe { ffi::inflatePrime(&mut *self.strm, bits as c_int, value as c_int) };
        if ret != ffi::Z_OK {
            return Err(error_from(ret, &self.strm));
        }
        Ok(())
    }

    /// Installs a saved sliding window as the back-reference dictionary.
    /// Must be called before the first inflate step on a raw stream.
    pub fn set_dictionary(&mut self, dictionary: &[u8]) -> Result<(), ZlibError> {
        let ret = unsafe {
            ffi::inflateSetDictionary(
                &mut *self.strm,
                dictionary.as_ptr(),
                dictionary.len() as ffi::uInt,
            )
        };
        if ret != ffi::Z_OK {
            return Err(error_from(ret, &self.strm));
        }
        Ok(())
    }

    fn step(&mut self, input: &[u8], output: &mut [u8], flush: c_int) -> Result<Step, ZlibError> {
        let strm = &mut *self.strm;
        strm.next_in = input.as_ptr() as *mut u8;
        strm.avail_in = input.len().min(ffi::uInt::MAX as usize) as ffi::uInt;
        strm.next_out = output.as_mut_ptr();
        strm.avail_out = output.len().min(ffi::uInt::MAX as usize) as ffi::uInt;

        let in_before = strm.avail_in;
        let out_before = strm.avail_out;
        let ret = unsafe { ffi::inflate(strm, flush) };
        match ret {
            // Z_BUF_ERROR just means no progress was possible with the
            // buffers given; the caller refills and retries.
            ffi::Z_OK | ffi::Z_STREAM_END | ffi::Z_BUF_ERROR => {}
            code => return Err(error_from(code, strm)),
        }

        Ok(Step {
            consumed: (in_before - strm.avail_in) as usize,
            produced: (out_before - strm.avail_out) as usize,
            stream_end: ret == ffi::Z_STREAM_END,
            end_of_block: strm.data_type & 0x80 != 0,
            last_block: strm.data_type & 0x40 != 0,
            bit_offset: (strm.data_type & 0x07) as u8,
        })
    }
}

impl Drop for Inflater {
    fn drop(&mut self) {
        unsafe {
            ffi::inflateEnd(&mut *self.strm);
        }
    }
}

fn error_from(code: c_int, strm: &ffi::z_stream) -> ZlibError {
    match code {
        ffi::Z_NEED_DICT => ZlibError::DictionaryRequired,
        ffi::Z_DATA_ERROR => ZlibError::Data(stream_msg(strm)),
        ffi::Z_MEM_ERROR => ZlibError::Memory,
        ffi::Z_STREAM_ERROR => ZlibError::Stream,
        other => ZlibError::Unexpected(other),
    }
}

fn stream_msg(strm: &ffi::z_stream) -> String {
    if strm.msg.is_null() {
        "invalid deflate data".to_owned()
    } else {
        unsafe { CStr::from_ptr(strm.msg) }
            .to_string_lossy()
            .into_owned()
    }
}
