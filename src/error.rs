//! Error types for archive operations.
//!
//! Every fallible operation in this crate returns [`Result<T>`]. None of these
//! conditions are retried internally. An error raised after
//! [`Archive::add_entry`](crate::Archive::add_entry) started writing, such as
//! [`Error::Cancelled`], is reported only after the archive has been restored
//! to its previous bytes.

use thiserror::Error;

/// Errors that can occur when reading or mutating a ZIP archive.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying byte range.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error.
    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The end of central directory or its ZIP64 extension is missing or inconsistent.
    #[error("malformed archive: {0}")]
    MalformedArchive(&'static str),

    /// A single header failed signature or length validation.
    #[error("malformed {record} record")]
    MalformedRecord { record: &'static str },

    /// The central directory would grow beyond what ZIP64 can describe.
    #[error("invalid central directory size")]
    InvalidCentralDirectorySize,

    /// The entry count would grow beyond what ZIP64 can describe.
    #[error("invalid central directory entry count")]
    InvalidCentralDirectoryEntryCount,

    /// The central directory starts beyond the addressable range.
    #[error("invalid central directory offset")]
    InvalidCentralDirectoryOffset,

    /// The local data region of an entry is not representable.
    #[error("invalid local header size")]
    InvalidLocalHeaderSize,

    /// A member path or symlink target failed sanitization.
    #[error("invalid entry path: {0}")]
    InvalidEntryPath(String),

    /// Compression method other than store or deflate.
    #[error("unsupported compression method: {0}")]
    InvalidCompressionMethod(u16),

    /// A chunk size of zero was requested.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    /// Mutation attempted on an archive opened for reading.
    #[error("archive is not writable")]
    NotWritable,

    /// The decompressor rejected the entry's byte stream.
    #[error("corrupted entry data")]
    CorruptedData,

    /// Extracted bytes do not match the declared CRC-32.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Cooperative cancellation was observed mid-operation.
    #[error("operation cancelled")]
    Cancelled,

    /// No entry with the given path.
    #[error("entry not found: {0}")]
    EntryNotFound(String),
}

impl Error {
    /// Returns true if this error reports a cancelled operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;
