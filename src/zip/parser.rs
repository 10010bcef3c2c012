//! Archive index: locating and walking the central directory.
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the byte range's end
//! 2. If its fields hold sentinels, read the ZIP64 locator and record
//! 3. Walk the Central Directory one header at a time
//!
//! The directory is fetched in read-ahead blocks rather than all at once, so
//! traversal never needs the whole archive in memory and a remote archive
//! costs a handful of range requests.

use crate::io::{Storage, to_usize};
use crate::{Error, Result};

use super::entry::{Entry, PathEncoding};
use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Bytes fetched per central directory read.
const DIRECTORY_READ_AHEAD: usize = 64 * 1024;

/// Find and parse the End of Central Directory record.
///
/// Handles both the simple case (no comment) and archives with comments by
/// searching backwards for the signature. Returns the record and its offset.
fn find_eocd<S: Storage>(storage: &mut S) -> Result<(EndOfCentralDirectory, u64)> {
    let size = storage.seek_to_end()?;

    // Try the common case of an archive without a comment first.
    if size >= EndOfCentralDirectory::SIZE as u64 {
        let offset = size - EndOfCentralDirectory::SIZE as u64;
        let buf = storage.read_at(offset, EndOfCentralDirectory::SIZE)?;
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && buf[20..22] == [0, 0] {
            return Ok((EndOfCentralDirectory::from_bytes(&buf)?, offset));
        }
    }

    let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(size);
    if search_size < EndOfCentralDirectory::SIZE as u64 {
        return Err(Error::MalformedArchive("end of central directory not found"));
    }
    let search_start = size - search_size;
    let buf = storage.read_at(search_start, to_usize(search_size)?)?;

    // Search backwards for the signature; a candidate is only accepted when
    // its declared comment length reaches exactly to the end.
    for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
        if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                let eocd = EndOfCentralDirectory::from_bytes(&buf[i..])?;
                return Ok((eocd, search_start + i as u64));
            }
        }
    }

    Err(Error::MalformedArchive("end of central directory not found"))
}

/// Read the ZIP64 locator directly before the EOCD and the record it names.
fn read_zip64_end<S: Storage>(storage: &mut S, eocd_offset: u64) -> Result<Zip64End> {
    let locator_offset = eocd_offset
        .checked_sub(Zip64EOCDLocator::SIZE as u64)
        .ok_or(Error::MalformedArchive("missing ZIP64 end of central directory locator"))?;
    let locator_buf = storage.read_at(locator_offset, Zip64EOCDLocator::SIZE)?;
    if &locator_buf[0..4] != Zip64EOCDLocator::SIGNATURE {
        return Err(Error::MalformedArchive(
            "missing ZIP64 end of central directory locator",
        ));
    }
    let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

    if locator.eocd64_offset > locator_offset {
        return Err(Error::MalformedArchive(
            "ZIP64 end of central directory lies past its locator",
        ));
    }
    let available = locator_offset - locator.eocd64_offset;
    if available < Zip64EOCD::MIN_SIZE as u64 {
        return Err(Error::MalformedArchive(
            "ZIP64 end of central directory is truncated",
        ));
    }
    let mut record_buf = storage.read_at(locator.eocd64_offset, Zip64EOCD::MIN_SIZE)?;
    if &record_buf[0..4] != Zip64EOCD::SIGNATURE {
        return Err(Error::MalformedArchive(
            "missing ZIP64 end of central directory record",
        ));
    }

    // Extensible data is read only as far as declared, and never past the locator.
    let declared = u64::from_le_bytes(record_buf[4..12].try_into().map_err(|_| {
        Error::MalformedArchive("ZIP64 end of central directory is truncated")
    })?);
    let extensible = declared
        .saturating_sub((Zip64EOCD::MIN_SIZE - 12) as u64)
        .min(available - Zip64EOCD::MIN_SIZE as u64);
    if extensible > 0 {
        record_buf.extend(storage.read_exact_len(to_usize(extensible)?)?);
    }
    let record = Zip64EOCD::from_bytes(&record_buf)?;

    Ok(Zip64End { record, locator })
}

/// Locate the trailing structures of an archive.
pub(crate) fn read_directory_end<S: Storage>(storage: &mut S) -> Result<DirectoryEnd> {
    let (record, eocd_offset) = find_eocd(storage)?;
    let zip64 = if record.is_zip64() {
        Some(read_zip64_end(storage, eocd_offset)?)
    } else {
        None
    };
    let end = DirectoryEnd { record, zip64 };

    // The directory must end before the trailing records begin.
    let trailer_start = end
        .zip64
        .as_ref()
        .map_or(eocd_offset, |z| z.locator.eocd64_offset);
    match end.cd_offset().checked_add(end.cd_size()) {
        Some(cd_end) if cd_end <= trailer_start => {}
        _ => {
            return Err(Error::MalformedArchive(
                "central directory extends past its end record",
            ));
        }
    }

    log::debug!(
        "Found central directory: {} entries, {} bytes at offset {}{}",
        end.entry_count(),
        end.cd_size(),
        end.cd_offset(),
        if end.zip64.is_some() { " (ZIP64)" } else { "" }
    );

    Ok(end)
}

/// Sequential reader of raw central directory headers.
///
/// Yields every header, encrypted ones included, and stops after the
/// declared entry count. A decode failure ends the sequence.
pub(crate) struct DirectoryReader<'a, S: Storage> {
    storage: &'a mut S,
    next: u64,
    end: u64,
    remaining: u64,
    buffer: Vec<u8>,
    buffer_start: u64,
    failed: bool,
}

impl<'a, S: Storage> DirectoryReader<'a, S> {
    pub(crate) fn new(storage: &'a mut S, end: &DirectoryEnd) -> Self {
        let start = end.cd_offset();
        Self {
            storage,
            next: start,
            end: start.saturating_add(end.cd_size()),
            remaining: end.entry_count(),
            buffer: Vec::new(),
            buffer_start: start,
            failed: false,
        }
    }

    fn bytes_at(&mut self, offset: u64, len: usize) -> Result<&[u8]> {
        let overrun = || Error::MalformedRecord {
            record: "central directory header",
        };
        let wanted_end = offset.checked_add(len as u64).ok_or_else(overrun)?;
        let buffer_end = self.buffer_start + self.buffer.len() as u64;
        if offset < self.buffer_start || wanted_end > buffer_end {
            let available = self.end.saturating_sub(offset);
            if len as u64 > available {
                return Err(overrun());
            }
            let want = (len.max(DIRECTORY_READ_AHEAD) as u64).min(available);
            self.buffer = self.storage.read_at(offset, to_usize(want)?)?;
            self.buffer_start = offset;
        }
        let start = (offset - self.buffer_start) as usize;
        Ok(&self.buffer[start..start + len])
    }

    fn next_header(&mut self) -> Result<CentralDirectoryHeader> {
        let offset = self.next;
        let fixed = self.bytes_at(offset, CentralDirectoryHeader::SIZE)?;
        let total = CentralDirectoryHeader::SIZE + CentralDirectoryHeader::variable_len(fixed)?;
        let header = CentralDirectoryHeader::from_bytes(self.bytes_at(offset, total)?)?;
        self.next = offset
            .checked_add(total as u64)
            .ok_or(Error::MalformedRecord {
                record: "central directory header",
            })?;
        Ok(header)
    }
}

impl<S: Storage> Iterator for DirectoryReader<'_, S> {
    type Item = Result<CentralDirectoryHeader>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let header = self.next_header();
        if header.is_err() {
            self.failed = true;
        }
        Some(header)
    }
}

/// Lazy iterator over the entries of an archive, in directory order.
///
/// Created by [`Archive::entries`](super::Archive::entries); every call starts
/// over at the beginning of the central directory. Encrypted entries are not
/// yielded.
pub struct Entries<'a, S: Storage> {
    reader: DirectoryReader<'a, S>,
    encoding: PathEncoding,
}

impl<'a, S: Storage> Entries<'a, S> {
    pub(crate) fn new(storage: &'a mut S, end: &DirectoryEnd, encoding: PathEncoding) -> Self {
        Self {
            reader: DirectoryReader::new(storage, end),
            encoding,
        }
    }
}

impl<S: Storage> Iterator for Entries<'_, S> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.reader.next()? {
                Ok(header) if header.is_encrypted() => {
                    log::debug!(
                        "Skipping encrypted entry {}",
                        String::from_utf8_lossy(&header.file_name)
                    );
                }
                Ok(header) => return Some(Ok(Entry::from_header(header, self.encoding))),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
