//! # rezip
//!
//! Read, create and incrementally mutate ZIP archives, including ZIP64.
//!
//! An [`Archive`] sits on top of a byte range ([`io::Storage`]): a local file,
//! an in-memory buffer, or (read-only) a remote file fetched with HTTP Range
//! requests. Entries can be listed lazily, streamed out with CRC-32
//! verification, appended, and removed. Every chunked operation accepts a
//! [`Progress`] handle for cooperative cancellation; a cancelled append
//! leaves the archive byte-identical to its previous state.
//!
//! ## Features
//!
//! - STORED and DEFLATE entries, files, directories and symlinks
//! - ZIP64 promotion whenever a size, offset or count outgrows its field
//! - Remote archives over HTTP/HTTPS (feature `http`)
//!
//! ## Example
//!
//! ```no_run
//! use rezip::{AccessMode, AddOptions, Archive, CompressionMethod};
//!
//! fn main() -> rezip::Result<()> {
//!     let mut archive = Archive::open("notes.zip", AccessMode::Create)?;
//!     let options = AddOptions::new().compression(CompressionMethod::Deflate);
//!     archive.add_bytes("hello.txt", b"Hello, world!", &options)?;
//!
//!     for entry in archive.entries() {
//!         let entry = entry?;
//!         println!("{} ({} bytes)", entry.path(), entry.uncompressed_size());
//!     }
//!
//!     let entry = archive.get("hello.txt")?.expect("just added");
//!     assert_eq!(archive.extract_to_vec(&entry)?, b"Hello, world!");
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod progress;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, Result};
#[cfg(feature = "http")]
pub use io::HttpStorage;
pub use io::{FileStorage, MemoryStorage, OpenFlags, Storage};
pub use progress::Progress;
pub use zip::{
    AccessMode, AddOptions, Archive, ArchiveOptions, CompressionMethod, DosDateTime, Entries,
    Entry, EntryType, ExtractOptions, Limits, PathEncoding, RemoveOptions,
};
