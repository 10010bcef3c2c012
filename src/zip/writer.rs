use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::time::SystemTime;

use flate2::Compression;
use flate2::write::DeflateEncoder;

use crate::io::{Storage, to_usize};
use crate::progress::Progress;
use crate::{Error, Result};

use super::archive::{AccessMode, Archive, DEFAULT_CHUNK_SIZE};
use super::entry::{DOS_DIRECTORY, DosDateTime, Entry, EntryType};
use super::parser::DirectoryReader;
use super::structures::*;

/// Options for adding an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOptions {
    /// Method for regular files; directories and symlinks are always stored.
    pub compression: CompressionMethod,
    /// Deflate level, 0 to 9.
    pub compression_level: u32,
    /// Bytes requested from the provider per step.
    pub chunk_size: usize,
    /// Modification time; the current time when unset.
    pub modified: Option<DosDateTime>,
    /// POSIX permission bits; 0o644 or 0o755 when unset.
    pub permissions: Option<u32>,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Stored,
            compression_level: 6,
            chunk_size: DEFAULT_CHUNK_SIZE,
            modified: None,
            permissions: None,
        }
    }
}

impl AddOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method;
        self
    }

    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn modified(mut self, modified: impl Into<DosDateTime>) -> Self {
        self.modified = Some(modified.into());
        self
    }

    pub fn permissions(mut self, mode: u32) -> Self {
        self.permissions = Some(mode);
        self
    }
}

/// Options for [`Archive::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Bytes copied per step.
    pub chunk_size: usize,
}

impl Default for RemoveOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Everything known about a new entry before its payload is written.
struct EntryDraft {
    name: String,
    entry_type: EntryType,
    method: CompressionMethod,
    size: u64,
    modified: DosDateTime,
    permissions: u32,
}

impl EntryDraft {
    fn flags(&self) -> u16 {
        if self.name.is_ascii() { 0 } else { FLAG_UTF8 }
    }

    fn external_attrs(&self) -> u32 {
        let dos = if self.entry_type == EntryType::Directory {
            DOS_DIRECTORY
        } else {
            0
        };
        ((self.entry_type.mode_bits() | self.permissions) << 16) | dos
    }
}

/// Worst-case deflate output size for `n` input bytes.
fn deflate_bound(n: u64) -> u64 {
    n.saturating_add(n >> 12)
        .saturating_add(n >> 14)
        .saturating_add(n >> 25)
        .saturating_add(13)
}

fn zip64_sizes_extra(uncompressed: u64, compressed: u64) -> Result<Vec<u8>> {
    let mut extra = Vec::with_capacity(20);
    Zip64ExtendedInfo {
        uncompressed_size: Some(uncompressed),
        compressed_size: Some(compressed),
        ..Default::default()
    }
    .write_to(&mut extra)?;
    Ok(extra)
}

/// Validate a member path for writing. Directories get a trailing `/`.
fn member_name(path: &str, entry_type: EntryType) -> Result<String> {
    let invalid = || Error::InvalidEntryPath(path.to_string());
    if path.is_empty()
        || path.starts_with('/')
        || path.contains('\0')
        || path.split('/').any(|c| c == "..")
    {
        return Err(invalid());
    }

    let mut name = path.to_string();
    if entry_type == EntryType::Directory && !name.ends_with('/') {
        name.push('/');
    }
    if name.len() > u16::MAX as usize {
        return Err(invalid());
    }
    Ok(name)
}

/// Build the directory end for a central directory, promoting to ZIP64 when
/// any quantity reaches its limit.
pub(crate) fn build_directory_end(
    entry_count: u64,
    cd_size: u64,
    cd_offset: u64,
    comment: Vec<u8>,
    limits: &Limits,
) -> Result<DirectoryEnd> {
    if cd_offset > i64::MAX as u64 {
        return Err(Error::InvalidCentralDirectoryOffset);
    }

    let count = Slot::new16(entry_count, limits.max_entry_count);
    let size = Slot::new32(cd_size, limits.max_size);
    let offset = Slot::new32(cd_offset, limits.max_offset);

    if !(count.is_zip64() || size.is_zip64() || offset.is_zip64()) {
        return Ok(DirectoryEnd {
            record: EndOfCentralDirectory {
                disk_number: 0,
                disk_with_cd: 0,
                disk_entries: count.narrow16(),
                total_entries: count.narrow16(),
                cd_size: size.narrow32(),
                cd_offset: offset.narrow32(),
                comment,
            },
            zip64: None,
        });
    }

    let record_offset = cd_offset
        .checked_add(cd_size)
        .ok_or(Error::InvalidCentralDirectoryOffset)?;

    Ok(DirectoryEnd {
        record: EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: u16::MAX,
            total_entries: u16::MAX,
            cd_size: u32::MAX,
            cd_offset: u32::MAX,
            comment,
        },
        zip64: Some(Zip64End {
            record: Zip64EOCD {
                version_made_by: VERSION_MADE_BY,
                version_needed: VERSION_ZIP64,
                disk_number: 0,
                disk_with_cd: 0,
                disk_entries: entry_count,
                total_entries: entry_count,
                cd_size,
                cd_offset,
                extensible_data: Vec::new(),
            },
            locator: Zip64EOCDLocator {
                disk_with_eocd64: 0,
                eocd64_offset: record_offset,
                total_disks: 1,
            },
        }),
    })
}

/// Length of an entry's local region: header, payload and data descriptor.
pub(crate) fn local_size<S: Storage>(storage: &mut S, header: &CentralDirectoryHeader) -> Result<u64> {
    let offset = header.local_header_offset.value();
    let fixed = storage.read_at(offset, LocalFileHeader::SIZE)?;
    let header_len = (LocalFileHeader::SIZE + LocalFileHeader::variable_len(&fixed)?) as u64;

    let mut size = header_len
        .checked_add(header.compressed_size.value())
        .ok_or(Error::InvalidLocalHeaderSize)?;

    if header.has_data_descriptor() {
        let descriptor_offset = offset
            .checked_add(size)
            .ok_or(Error::InvalidLocalHeaderSize)?;
        storage.seek(descriptor_offset)?;
        let bytes = storage.read(DataDescriptor::MAX_SIZE)?;
        let zip64 = header.compressed_size.is_zip64() || header.uncompressed_size.is_zip64();
        let descriptor = DataDescriptor::from_bytes(&bytes, zip64)?;
        size = size
            .checked_add(descriptor.encoded_len() as u64)
            .ok_or(Error::InvalidLocalHeaderSize)?;
    }

    if size > i64::MAX as u64 {
        return Err(Error::InvalidLocalHeaderSize);
    }
    Ok(size)
}

/// Provider serving consecutive slices of an in-memory buffer.
fn slice_provider(data: &[u8]) -> impl FnMut(u64, usize) -> Result<Vec<u8>> + '_ {
    move |position, len| {
        let start = to_usize(position)?;
        let end = start.saturating_add(len).min(data.len());
        Ok(data.get(start..end).unwrap_or_default().to_vec())
    }
}

#[cfg(unix)]
fn fs_permissions(metadata: &fs::Metadata, _entry_type: EntryType) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn fs_permissions(_metadata: &fs::Metadata, entry_type: EntryType) -> u32 {
    entry_type.default_permissions()
}

#[cfg(unix)]
fn link_target_bytes(target: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    target.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn link_target_bytes(target: &Path) -> Vec<u8> {
    target.to_string_lossy().replace('\\', "/").into_bytes()
}

impl<S: Storage> Archive<S> {
    fn ensure_writable(&self) -> Result<()> {
        if self.mode == AccessMode::Read {
            return Err(Error::NotWritable);
        }
        self.storage.flags().ensure_writable()
    }

    /// Append a new entry whose payload comes from `provider`.
    ///
    /// `provider(offset, len)` returns the next `len` bytes of the payload
    /// starting at `offset`; it is never called for directories. The entry's
    /// local header is written where the central directory started, and the
    /// old directory is rewritten after the new payload.
    ///
    /// Cancellation is checked after each chunk is written. When it is
    /// observed, or any other step fails after writing began, the archive is
    /// restored to its previous bytes before the error is returned.
    pub fn add_entry<P>(
        &mut self,
        path: &str,
        entry_type: EntryType,
        uncompressed_size: u64,
        options: &AddOptions,
        progress: Option<&Progress>,
        mut provider: P,
    ) -> Result<Entry>
    where
        P: FnMut(u64, usize) -> Result<Vec<u8>>,
    {
        self.ensure_writable()?;
        if options.chunk_size == 0 {
            return Err(Error::InvalidChunkSize);
        }
        let method = match entry_type {
            EntryType::File => options.compression,
            EntryType::Directory | EntryType::Symlink => CompressionMethod::Stored,
        };
        if let CompressionMethod::Unknown(id) = method {
            return Err(Error::InvalidCompressionMethod(id));
        }
        let size = if entry_type == EntryType::Directory {
            0
        } else {
            uncompressed_size
        };
        if size > i64::MAX as u64 {
            return Err(Error::InvalidLocalHeaderSize);
        }

        let draft = EntryDraft {
            name: member_name(path, entry_type)?,
            entry_type,
            method,
            size,
            modified: options
                .modified
                .unwrap_or_else(|| SystemTime::now().into()),
            permissions: options
                .permissions
                .unwrap_or_else(|| entry_type.default_permissions())
                & 0o7777,
        };

        let fallback = Progress::new();
        let progress = progress.unwrap_or(&fallback);
        progress.start(if entry_type == EntryType::Directory { 1 } else { size });

        let previous_end = self.end.clone();
        let header_start = previous_end.cd_offset();
        let held_directory = self
            .storage
            .read_at(header_start, to_usize(previous_end.cd_size())?)?;
        self.storage.seek(header_start)?;
        log::debug!("Adding {} at offset {}", draft.name, header_start);

        match self.write_entry(&draft, header_start, &held_directory, &previous_end, options, progress, &mut provider) {
            Ok(entry) => {
                log::info!(
                    "Added {} ({} bytes, {} compressed)",
                    entry.path(),
                    entry.uncompressed_size(),
                    entry.compressed_size()
                );
                Ok(entry)
            }
            Err(err) => {
                log::warn!("Rolling back add of {}: {}", draft.name, err);
                self.rollback(header_start, &held_directory, &previous_end)?;
                Err(err)
            }
        }
    }

    /// Add a regular file from an in-memory buffer.
    pub fn add_bytes(&mut self, path: &str, data: &[u8], options: &AddOptions) -> Result<Entry> {
        self.add_entry(
            path,
            EntryType::File,
            data.len() as u64,
            options,
            None,
            slice_provider(data),
        )
    }

    /// Add a file, directory or symlink from the filesystem under `name`.
    ///
    /// Symlinks are stored as links, not followed. Modification time and
    /// permissions come from the filesystem unless set in `options`.
    pub fn add_path(
        &mut self,
        name: &str,
        fs_path: impl AsRef<Path>,
        options: &AddOptions,
        progress: Option<&Progress>,
    ) -> Result<Entry> {
        let fs_path = fs_path.as_ref();
        let metadata = fs::symlink_metadata(fs_path)?;
        let file_type = metadata.file_type();
        let entry_type = if file_type.is_symlink() {
            EntryType::Symlink
        } else if file_type.is_dir() {
            EntryType::Directory
        } else {
            EntryType::File
        };

        let mut options = *options;
        if options.modified.is_none() {
            options.modified = Some(metadata.modified()?.into());
        }
        if options.permissions.is_none() {
            options.permissions = Some(fs_permissions(&metadata, entry_type));
        }

        match entry_type {
            EntryType::Directory => {
                self.add_entry(name, entry_type, 0, &options, progress, |_, _| Ok(Vec::new()))
            }
            EntryType::Symlink => {
                let target = link_target_bytes(&fs::read_link(fs_path)?);
                self.add_entry(
                    name,
                    entry_type,
                    target.len() as u64,
                    &options,
                    progress,
                    slice_provider(&target),
                )
            }
            EntryType::File => {
                let mut file = File::open(fs_path)?;
                self.add_entry(name, entry_type, metadata.len(), &options, progress, |_, len| {
                    let mut buf = Vec::with_capacity(len);
                    (&mut file).take(len as u64).read_to_end(&mut buf)?;
                    Ok(buf)
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_entry<P>(
        &mut self,
        draft: &EntryDraft,
        header_start: u64,
        held_directory: &[u8],
        previous_end: &DirectoryEnd,
        options: &AddOptions,
        progress: &Progress,
        provider: &mut P,
    ) -> Result<Entry>
    where
        P: FnMut(u64, usize) -> Result<Vec<u8>>,
    {
        let limits = self.options.limits;
        // Reserve room for 64-bit sizes up front so both header passes
        // have the same length.
        let reserve_zip64 = deflate_bound(draft.size) >= limits.max_size;

        let mut local = LocalFileHeader {
            version_needed: if reserve_zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT },
            flags: draft.flags(),
            compression_method: draft.method.as_u16(),
            last_mod_time: draft.modified.time,
            last_mod_date: draft.modified.date,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            file_name: draft.name.as_bytes().to_vec(),
            extra_field: Vec::new(),
        };
        if reserve_zip64 {
            local.compressed_size = u32::MAX;
            local.uncompressed_size = u32::MAX;
            local.extra_field = zip64_sizes_extra(0, 0)?;
        }
        let provisional_len = local.encoded_len();
        self.storage.write(&local.to_bytes()?)?;

        let (crc32, compressed_size) = match draft.entry_type {
            EntryType::Directory => {
                progress.advance(1);
                (0, 0)
            }
            EntryType::File | EntryType::Symlink => {
                self.write_payload(draft, options, progress, provider)?
            }
        };
        let data_end = self.storage.offset()?;

        local.crc32 = crc32;
        if reserve_zip64 {
            local.extra_field = zip64_sizes_extra(draft.size, compressed_size)?;
        } else {
            if compressed_size >= limits.max_size.min(u32::MAX as u64) {
                return Err(Error::InvalidLocalHeaderSize);
            }
            local.compressed_size = compressed_size as u32;
            local.uncompressed_size = draft.size as u32;
        }
        if local.encoded_len() != provisional_len {
            return Err(Error::InvalidLocalHeaderSize);
        }
        self.storage.seek(header_start)?;
        self.storage.write(&local.to_bytes()?)?;
        self.storage.seek(data_end)?;

        let mut header = CentralDirectoryHeader {
            version_made_by: VERSION_MADE_BY,
            version_needed: VERSION_DEFAULT,
            flags: draft.flags(),
            compression_method: draft.method.as_u16(),
            last_mod_time: draft.modified.time,
            last_mod_date: draft.modified.date,
            crc32,
            compressed_size: Slot::new32(compressed_size, limits.max_size),
            uncompressed_size: Slot::new32(draft.size, limits.max_size),
            disk_start: Slot::Inline(0),
            internal_attrs: 0,
            external_attrs: draft.external_attrs(),
            local_header_offset: Slot::new32(header_start, limits.max_offset),
            file_name: local.file_name.clone(),
            extra_field: Vec::new(),
            comment: Vec::new(),
        };
        if reserve_zip64 || header.is_zip64() {
            header.version_needed = VERSION_ZIP64;
        }
        let header_bytes = header.to_bytes()?;

        let entry_count = previous_end
            .entry_count()
            .checked_add(1)
            .ok_or(Error::InvalidCentralDirectoryEntryCount)?;
        let cd_size = previous_end
            .cd_size()
            .checked_add(header_bytes.len() as u64)
            .ok_or(Error::InvalidCentralDirectorySize)?;
        let end = build_directory_end(
            entry_count,
            cd_size,
            data_end,
            previous_end.record.comment.clone(),
            &limits,
        )?;

        self.storage.write(held_directory)?;
        self.storage.write(&header_bytes)?;
        self.storage.write(&end.to_bytes()?)?;
        self.storage.synchronize()?;

        self.end = end;
        Ok(Entry::from_header(header, self.options.encoding))
    }

    /// Stream the payload, returning its CRC-32 and compressed length.
    fn write_payload<P>(
        &mut self,
        draft: &EntryDraft,
        options: &AddOptions,
        progress: &Progress,
        provider: &mut P,
    ) -> Result<(u32, u64)>
    where
        P: FnMut(u64, usize) -> Result<Vec<u8>>,
    {
        let mut hasher = crc32fast::Hasher::new();
        let mut encoder = match draft.method {
            CompressionMethod::Deflate => Some(DeflateEncoder::new(
                Vec::new(),
                Compression::new(options.compression_level.min(9)),
            )),
            _ => None,
        };
        let mut compressed: u64 = 0;
        let mut position: u64 = 0;

        while position < draft.size {
            let requested = (draft.size - position).min(options.chunk_size as u64) as usize;
            let chunk = provider(position, requested)?;
            if chunk.is_empty() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "provider ran out of data before the declared size",
                )
                .into());
            }
            let data = &chunk[..chunk.len().min(requested)];
            hasher.update(data);

            match encoder.as_mut() {
                Some(encoder) => {
                    encoder.write_all(data)?;
                    let out = std::mem::take(encoder.get_mut());
                    compressed += out.len() as u64;
                    self.storage.write(&out)?;
                }
                None => {
                    compressed += data.len() as u64;
                    self.storage.write(data)?;
                }
            }

            position += data.len() as u64;
            progress.advance(data.len() as u64);
            progress.check()?;
        }

        if let Some(encoder) = encoder {
            let out = encoder.finish()?;
            compressed += out.len() as u64;
            self.storage.write(&out)?;
        }

        Ok((hasher.finalize(), compressed))
    }

    /// Restore the bytes that started at `header_start` before an add.
    fn rollback(
        &mut self,
        header_start: u64,
        held_directory: &[u8],
        previous_end: &DirectoryEnd,
    ) -> Result<()> {
        self.storage.synchronize()?;
        self.storage.truncate(header_start)?;
        self.storage.seek(header_start)?;
        self.storage.write(held_directory)?;
        self.storage.write(&previous_end.to_bytes()?)?;
        self.storage.synchronize()?;
        self.end = previous_end.clone();
        Ok(())
    }

    /// Length of an entry's local region in the archive.
    pub fn local_size(&mut self, entry: &Entry) -> Result<u64> {
        local_size(&mut self.storage, &entry.header)
    }

    /// Remove an entry by copying every other record into a replacement
    /// byte range and swapping it in.
    ///
    /// Records are copied raw, encrypted ones included. Cancellation is
    /// checked before each chunk is copied; the original is untouched until
    /// the copy is complete.
    pub fn remove(
        &mut self,
        entry: &Entry,
        options: &RemoveOptions,
        progress: Option<&Progress>,
    ) -> Result<()> {
        self.ensure_writable()?;
        if options.chunk_size == 0 {
            return Err(Error::InvalidChunkSize);
        }
        let fallback = Progress::new();
        let progress = progress.unwrap_or(&fallback);

        let headers =
            DirectoryReader::new(&mut self.storage, &self.end).collect::<Result<Vec<_>>>()?;
        let target = headers
            .iter()
            .position(|h| {
                h.local_header_offset.value() == entry.local_header_offset()
                    && h.file_name == entry.header.file_name
            })
            .ok_or_else(|| Error::EntryNotFound(entry.path().to_string()))?;

        let mut kept = Vec::with_capacity(headers.len().saturating_sub(1));
        let mut total: u64 = 0;
        for (index, header) in headers.into_iter().enumerate() {
            if index == target {
                continue;
            }
            let size = local_size(&mut self.storage, &header)?;
            total = total.saturating_add(size);
            kept.push((header, size));
        }
        progress.start(total);
        log::debug!("Removing {}, copying {} records", entry.path(), kept.len());

        let limits = self.options.limits;
        let mut replacement = self.storage.create_replacement()?;
        let mut directory = Vec::with_capacity(kept.len());
        for (header, size) in &kept {
            let offset = replacement.offset()?;
            self.storage.seek(header.local_header_offset.value())?;
            let mut remaining = *size;
            while remaining > 0 {
                progress.check()?;
                let want = remaining.min(options.chunk_size as u64) as usize;
                let chunk = self.storage.read(want)?;
                if chunk.is_empty() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "entry data ends before its local size",
                    )
                    .into());
                }
                replacement.write(&chunk)?;
                remaining -= chunk.len() as u64;
                progress.advance(chunk.len() as u64);
            }
            directory.push(header.relocated(offset, &limits));
        }

        let cd_offset = replacement.offset()?;
        let mut cd_size: u64 = 0;
        for header in &directory {
            let bytes = header.to_bytes()?;
            cd_size = cd_size
                .checked_add(bytes.len() as u64)
                .ok_or(Error::InvalidCentralDirectorySize)?;
            replacement.write(&bytes)?;
        }
        let end = build_directory_end(
            directory.len() as u64,
            cd_size,
            cd_offset,
            self.end.record.comment.clone(),
            &limits,
        )?;
        replacement.write(&end.to_bytes()?)?;
        replacement.synchronize()?;

        self.storage.commit_replacement(replacement)?;
        self.end = end;
        log::info!("Removed {}", entry.path());
        Ok(())
    }
}
