use flate2::{Decompress, FlushDecompress, Status};

use crate::io::Storage;
use crate::progress::Progress;
use crate::{Error, Result};

use super::archive::{Archive, DEFAULT_CHUNK_SIZE};
use super::entry::Entry;
use super::structures::{CompressionMethod, LocalFileHeader};

/// Options for [`Archive::extract`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Upper bound on the bytes read and delivered per step.
    pub chunk_size: usize,
    /// Skip the final CRC-32 comparison.
    pub skip_crc32: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            skip_crc32: false,
        }
    }
}

impl ExtractOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn skip_crc32(mut self, skip: bool) -> Self {
        self.skip_crc32 = skip;
        self
    }
}

/// Running state of one extraction: checksum, progress and consumer.
struct Sink<'p, F> {
    consumer: F,
    hasher: crc32fast::Hasher,
    progress: &'p Progress,
    delivered: bool,
}

impl<F: FnMut(&[u8]) -> Result<()>> Sink<'_, F> {
    fn deliver(&mut self, chunk: &[u8]) -> Result<()> {
        self.progress.check()?;
        (self.consumer)(chunk)?;
        self.hasher.update(chunk);
        self.progress.advance(chunk.len() as u64);
        self.delivered = true;
        Ok(())
    }
}

impl<S: Storage> Archive<S> {
    /// Stream an entry's uncompressed bytes into `consumer`.
    ///
    /// Chunks are at most `options.chunk_size` bytes. A zero-length entry
    /// calls `consumer` once with an empty slice. Returns the CRC-32 of the
    /// delivered bytes, which must match the entry's declared checksum unless
    /// `options.skip_crc32` is set.
    ///
    /// Cancellation through `progress` is checked before each chunk is
    /// delivered and reported as [`Error::Cancelled`].
    pub fn extract<F>(
        &mut self,
        entry: &Entry,
        options: &ExtractOptions,
        progress: Option<&Progress>,
        consumer: F,
    ) -> Result<u32>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        if options.chunk_size == 0 {
            return Err(Error::InvalidChunkSize);
        }
        let method = entry.compression_method();
        if let CompressionMethod::Unknown(id) = method {
            return Err(Error::InvalidCompressionMethod(id));
        }

        let fallback = Progress::new();
        let progress = progress.unwrap_or(&fallback);
        progress.start(entry.uncompressed_size());

        let data_offset = self.data_offset(entry)?;
        self.storage.seek(data_offset)?;

        let mut sink = Sink {
            consumer,
            hasher: crc32fast::Hasher::new(),
            progress,
            delivered: false,
        };
        match method {
            CompressionMethod::Deflate => {
                inflate(&mut self.storage, entry.compressed_size(), options.chunk_size, &mut sink)?
            }
            _ => copy_stored(&mut self.storage, entry.compressed_size(), options.chunk_size, &mut sink)?,
        }
        if !sink.delivered {
            sink.deliver(&[])?;
        }

        let actual = sink.hasher.finalize();
        if !options.skip_crc32 && actual != entry.crc32() {
            return Err(Error::ChecksumMismatch {
                expected: entry.crc32(),
                actual,
            });
        }
        Ok(actual)
    }

    /// Extract an entry into memory with checksum verification.
    pub fn extract_to_vec(&mut self, entry: &Entry) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.extract(entry, &ExtractOptions::default(), None, |chunk| {
            out.extend_from_slice(chunk);
            Ok(())
        })?;
        Ok(out)
    }

    /// Offset of the first payload byte, past the local header's name and
    /// extra field.
    fn data_offset(&mut self, entry: &Entry) -> Result<u64> {
        let offset = entry.local_header_offset();
        let fixed = self.storage.read_at(offset, LocalFileHeader::SIZE)?;
        let variable_len = LocalFileHeader::variable_len(&fixed)?;
        offset
            .checked_add((LocalFileHeader::SIZE + variable_len) as u64)
            .ok_or(Error::InvalidLocalHeaderSize)
    }
}

fn read_chunk<S: Storage>(storage: &mut S, remaining: u64, chunk_size: usize) -> Result<Vec<u8>> {
    let want = remaining.min(chunk_size as u64) as usize;
    let chunk = storage.read(want)?;
    if chunk.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "entry data ends before its declared size",
        )
        .into());
    }
    Ok(chunk)
}

fn copy_stored<S, F>(storage: &mut S, size: u64, chunk_size: usize, sink: &mut Sink<'_, F>) -> Result<()>
where
    S: Storage,
    F: FnMut(&[u8]) -> Result<()>,
{
    let mut remaining = size;
    while remaining > 0 {
        sink.progress.check()?;
        let chunk = read_chunk(storage, remaining, chunk_size)?;
        remaining -= chunk.len() as u64;
        sink.deliver(&chunk)?;
    }
    Ok(())
}

fn inflate<S, F>(storage: &mut S, compressed_size: u64, chunk_size: usize, sink: &mut Sink<'_, F>) -> Result<()>
where
    S: Storage,
    F: FnMut(&[u8]) -> Result<()>,
{
    let mut inflater = Decompress::new(false);
    let mut remaining = compressed_size;
    let mut input = Vec::new();
    let mut input_pos = 0;
    let mut output = vec![0u8; chunk_size];

    loop {
        if input_pos == input.len() && remaining > 0 {
            sink.progress.check()?;
            input = read_chunk(storage, remaining, chunk_size)?;
            remaining -= input.len() as u64;
            input_pos = 0;
        }

        let before_in = inflater.total_in();
        let before_out = inflater.total_out();
        let status = inflater
            .decompress(&input[input_pos..], &mut output, FlushDecompress::None)
            .map_err(|_| Error::CorruptedData)?;
        let consumed = (inflater.total_in() - before_in) as usize;
        let produced = (inflater.total_out() - before_out) as usize;
        input_pos += consumed;

        if produced > 0 {
            sink.deliver(&output[..produced])?;
        }
        if status == Status::StreamEnd {
            return Ok(());
        }
        // No progress with nothing left to feed means a truncated stream.
        if consumed == 0 && produced == 0 && (input_pos < input.len() || remaining == 0) {
            return Err(Error::CorruptedData);
        }
    }
}
