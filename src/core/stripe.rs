//! Byte-interleaving stripe codec
//!
//! A file is cut into `chunk_bytes`-sized chunks. Stripe `i` of `n` holds
//! chunks `i, i + n, i + 2n, ...`. Reading every stripe's first chunk in
//! index order, then every stripe's second chunk, and so on, yields the
//! original bytes.

use crate::error::{IoResultExt, Result, StripeCopyError};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Largest chunk a stripe may use; producers allocate one chunk per read
pub const MAX_CHUNK_BYTES: usize = 64 * 1024 * 1024;

/// One interleaved partition of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeDescriptor {
    num_slices: usize,
    slice_index: usize,
    chunk_bytes: usize,
}

impl StripeDescriptor {
    /// Validate and build a descriptor
    pub fn new(num_slices: usize, slice_index: usize, chunk_bytes: usize) -> Result<Self> {
        if num_slices == 0 {
            return Err(StripeCopyError::InvalidStripe(
                "slice count must be positive".to_string(),
            ));
        }
        if chunk_bytes == 0 {
            return Err(StripeCopyError::InvalidStripe(
                "chunk size must be positive".to_string(),
            ));
        }
        if chunk_bytes > MAX_CHUNK_BYTES {
            return Err(StripeCopyError::InvalidStripe(format!(
                "chunk size {} exceeds the {} byte limit",
                chunk_bytes, MAX_CHUNK_BYTES
            )));
        }
        if slice_index >= num_slices {
            return Err(StripeCopyError::InvalidStripe(format!(
                "slice index {} out of range for {} slices",
                slice_index, num_slices
            )));
        }

        Ok(Self {
            num_slices,
            slice_index,
            chunk_bytes,
        })
    }

    /// All descriptors of an `num_slices`-way split, in reassembly order
    pub fn all(num_slices: usize, chunk_bytes: usize) -> Result<Vec<Self>> {
        if num_slices == 0 {
            return Err(StripeCopyError::InvalidStripe(
                "slice count must be positive".to_string(),
            ));
        }
        (0..num_slices)
            .map(|index| Self::new(num_slices, index, chunk_bytes))
            .collect()
    }

    /// Number of stripes in the split
    pub fn num_slices(&self) -> usize {
        self.num_slices
    }

    /// Position of this stripe in the round-robin order
    pub fn slice_index(&self) -> usize {
        self.slice_index
    }

    /// Size of every chunk except possibly the file's last one
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    /// Offset of this stripe's first chunk
    pub fn start_offset(&self) -> u64 {
        self.slice_index as u64 * self.chunk_bytes as u64
    }

    /// Bytes skipped after each chunk to reach the next one of this stripe
    pub fn gap_bytes(&self) -> u64 {
        (self.num_slices as u64 - 1) * self.chunk_bytes as u64
    }

    /// Number of bytes this stripe carries for a file of `file_len` bytes
    pub fn stripe_len(&self, file_len: u64) -> u64 {
        let chunk = self.chunk_bytes as u64;
        let cycle = chunk * self.num_slices as u64;
        let full_cycles = file_len / cycle;
        let tail = file_len % cycle;
        let tail_share = tail.saturating_sub(self.start_offset()).min(chunk);

        full_cycles * chunk + tail_share
    }

    /// Lazily read this stripe's chunks from `reader`
    pub fn iter<R: Read + Seek>(&self, reader: R) -> StripeIter<R> {
        StripeIter {
            reader,
            stripe: *self,
            started: false,
            done: false,
        }
    }
}

/// Finite, non-restartable sequence of one stripe's chunks
///
/// Consumes the reader's cursor. The final chunk may be shorter than
/// `chunk_bytes` when the file length is not a multiple of it.
pub struct StripeIter<R> {
    reader: R,
    stripe: StripeDescriptor,
    started: bool,
    done: bool,
}

impl<R: Read + Seek> StripeIter<R> {
    fn read_chunk(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }

        if self.started {
            self.reader
                .seek(SeekFrom::Current(self.stripe.gap_bytes() as i64))?;
        } else {
            self.reader
                .seek(SeekFrom::Start(self.stripe.start_offset()))?;
            self.started = true;
        }

        let mut buf = vec![0u8; self.stripe.chunk_bytes];
        let n = read_full(&mut self.reader, &mut buf)?;

        if n < buf.len() {
            self.done = true;
        }
        if n == 0 {
            return Ok(None);
        }

        buf.truncate(n);
        Ok(Some(buf))
    }
}

impl<R: Read + Seek> Iterator for StripeIter<R> {
    type Item = std::io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Read until `buf` is full or the reader is exhausted
///
/// Pipes hand out partial reads; stripe reassembly depends on every chunk
/// except the last being exactly `buf.len()` bytes.
pub fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;

    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(filled)
}

/// Write one stripe of `source` to `out`, returning the bytes written
pub fn emit_stripe<W: Write>(source: &Path, stripe: StripeDescriptor, out: W) -> Result<u64> {
    let file = File::open(source).with_path(source)?;
    let mut out = BufWriter::with_capacity(stripe.chunk_bytes().max(8 * 1024), out);
    let mut written = 0u64;

    for chunk in stripe.iter(file) {
        let chunk = chunk.with_path(source)?;
        out.write_all(&chunk)
            .map_err(|e| StripeCopyError::RemoteTransferError(e.to_string()))?;
        written += chunk.len() as u64;
    }

    out.flush()
        .map_err(|e| StripeCopyError::RemoteTransferError(e.to_string()))?;

    Ok(written)
}
