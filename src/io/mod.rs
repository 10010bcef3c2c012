//! Byte-range storage backings.
//!
//! Every archive sits on top of a [`Storage`]: a seekable byte range that can be
//! read, written, truncated and synchronized. The engines in [`crate::zip`] are
//! generic over this trait and never branch on which backing is active.

#[cfg(feature = "http")]
mod http;
mod local;
mod memory;

#[cfg(feature = "http")]
pub use http::HttpStorage;
pub use local::FileStorage;
pub use memory::MemoryStorage;

use std::io::ErrorKind;

use crate::{Error, Result};

/// Capabilities a byte range was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    /// Writes and truncation are allowed.
    pub write: bool,
    /// Every write implicitly seeks to the end first.
    pub append: bool,
}

impl OpenFlags {
    /// Read-only access (`rb`).
    pub const READ: Self = Self {
        write: false,
        append: false,
    };

    /// Read and write access (`rb+`, `wb+`).
    pub const UPDATE: Self = Self {
        write: true,
        append: false,
    };

    /// Read and append access (`ab+`).
    pub const APPEND: Self = Self {
        write: true,
        append: true,
    };

    pub(crate) fn ensure_writable(self) -> Result<()> {
        if self.write {
            Ok(())
        } else {
            Err(Error::NotWritable)
        }
    }
}

/// Uniform seek/read/write access to a byte range.
pub trait Storage {
    /// Move the cursor to an absolute offset.
    fn seek(&mut self, offset: u64) -> Result<()>;

    /// Current cursor offset.
    fn offset(&mut self) -> Result<u64>;

    /// Move the cursor to the end and return the total length.
    fn seek_to_end(&mut self) -> Result<u64>;

    /// Read up to `up_to` bytes at the cursor. Returns an empty vector at the end.
    fn read(&mut self, up_to: usize) -> Result<Vec<u8>>;

    /// Read everything from the cursor to the end.
    fn read_to_end(&mut self) -> Result<Vec<u8>>;

    /// Write at the cursor, or at the end when opened in append mode.
    ///
    /// Fails with [`Error::NotWritable`] without write capability.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Cut the byte range at `offset`.
    ///
    /// Fails with [`Error::NotWritable`] without write capability.
    fn truncate(&mut self, offset: u64) -> Result<()>;

    /// Flush buffered writes to durable storage.
    fn synchronize(&mut self) -> Result<()>;

    /// Release the backing resource.
    fn close(&mut self) -> Result<()>;

    /// Capabilities this range was opened with.
    fn flags(&self) -> OpenFlags;

    /// Create an empty, writable range of the same kind, used to build a
    /// replacement archive.
    fn create_replacement(&self) -> Result<Self>
    where
        Self: Sized;

    /// Atomically swap this range's contents for a replacement created by
    /// [`Storage::create_replacement`]. The cursor is left at offset 0.
    fn commit_replacement(&mut self, replacement: Self) -> Result<()>
    where
        Self: Sized;

    /// Read exactly `len` bytes at the cursor.
    fn read_exact_len(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let chunk = self.read(len - out.len())?;
            if chunk.is_empty() {
                return Err(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "byte range ended before the requested length",
                )
                .into());
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Seek to `offset` and read exactly `len` bytes.
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.seek(offset)?;
        self.read_exact_len(len)
    }
}

/// Convert a 64-bit quantity into an in-memory length.
pub(crate) fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| {
        Error::Io(std::io::Error::new(
            ErrorKind::InvalidInput,
            "length exceeds addressable memory",
        ))
    })
}
