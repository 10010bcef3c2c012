//! ZIP archive reading, creation and incremental mutation.
//!
//! This module supports the standard ZIP format and the ZIP64 extensions for
//! archives and entries beyond the 32-bit limits.
//!
//! ## Architecture
//!
//! - [`structures`]: byte-exact codecs for every on-disk record
//! - `parser`: locates the directory end and walks the central directory
//! - `entry`: the decoded, immutable view of one member
//! - `extractor`: streams entry data out, verifying CRC-32
//! - `writer`: appends and removes entries, rolling back cancelled adds
//! - `archive`: the [`Archive`] aggregate tying them to a byte range
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! New entries are written where the central directory used to start; the
//! old directory is then rewritten after the new data, followed by a fresh
//! directory end.
//!
//! ## Limitations
//!
//! - No encryption support; encrypted entries are not listed
//! - No multi-disk archive support
//! - Only STORED and DEFLATE compression methods

mod archive;
mod cp437;
mod entry;
mod extractor;
mod parser;
pub mod structures;
mod writer;

pub use archive::{AccessMode, Archive, ArchiveOptions, DEFAULT_CHUNK_SIZE};
pub use entry::{
    DEFAULT_DIRECTORY_PERMISSIONS, DEFAULT_FILE_PERMISSIONS, DosDateTime, Entry, EntryType,
    PathEncoding,
};
pub use extractor::ExtractOptions;
pub use parser::Entries;
pub use structures::{CompressionMethod, Limits};
pub use writer::{AddOptions, RemoveOptions};
