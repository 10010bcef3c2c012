use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

#[cfg(feature = "http")]
use crate::io::HttpStorage;
use crate::io::{FileStorage, MemoryStorage, OpenFlags, Storage};
use crate::{Error, Result};

use super::entry::{Entry, EntryType, PathEncoding};
use super::extractor::ExtractOptions;
use super::parser::{self, Entries};
use super::structures::{DirectoryEnd, Limits};

/// Chunk size used when an operation does not specify one.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// How an archive is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-only; every mutation fails with [`Error::NotWritable`].
    Read,
    /// Read and mutate an existing archive.
    Update,
    /// Start a new, empty archive, discarding existing content.
    Create,
}

/// Archive-wide configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// Thresholds for ZIP64 promotion.
    pub limits: Limits,
    /// Encoding of member names that lack the UTF-8 flag.
    pub encoding: PathEncoding,
}

impl ArchiveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn encoding(mut self, encoding: PathEncoding) -> Self {
        self.encoding = encoding;
        self
    }
}

/// A ZIP archive on top of a [`Storage`] byte range.
///
/// The archive owns its byte range exclusively. Only the directory end is
/// kept in memory; the central directory is re-read on every traversal.
#[derive(Debug)]
pub struct Archive<S: Storage = FileStorage> {
    pub(super) storage: S,
    pub(super) mode: AccessMode,
    pub(super) end: DirectoryEnd,
    pub(super) options: ArchiveOptions,
}

impl Archive<FileStorage> {
    /// Open an archive file with default options.
    pub fn open(path: impl AsRef<Path>, mode: AccessMode) -> Result<Self> {
        Self::open_with(path, mode, ArchiveOptions::default())
    }

    pub fn open_with(
        path: impl AsRef<Path>,
        mode: AccessMode,
        options: ArchiveOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        let storage = match mode {
            AccessMode::Read => FileStorage::open_read(path)?,
            AccessMode::Update => FileStorage::open_update(path)?,
            AccessMode::Create => FileStorage::create(path)?,
        };
        Self::with_storage(storage, mode, options)
    }
}

impl Archive<MemoryStorage> {
    /// Open an archive held in memory. In create mode `bytes` is discarded.
    pub fn from_bytes(bytes: Vec<u8>, mode: AccessMode, options: ArchiveOptions) -> Result<Self> {
        let flags = match mode {
            AccessMode::Read => OpenFlags::READ,
            AccessMode::Update | AccessMode::Create => OpenFlags::UPDATE,
        };
        Self::with_storage(MemoryStorage::new(bytes, flags), mode, options)
    }

    /// The archive's bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.storage.into_inner()
    }
}

#[cfg(feature = "http")]
impl Archive<HttpStorage> {
    /// Open a remote archive read-only over HTTP Range requests.
    pub fn open_url(url: &str, options: ArchiveOptions) -> Result<Self> {
        let storage = HttpStorage::new(url.to_string())?;
        Self::with_storage(storage, AccessMode::Read, options)
    }
}

impl<S: Storage> Archive<S> {
    /// Wrap a byte range. Create mode truncates it and writes an empty
    /// directory end; the other modes locate the existing one.
    pub fn with_storage(mut storage: S, mode: AccessMode, options: ArchiveOptions) -> Result<Self> {
        let end = match mode {
            AccessMode::Create => {
                storage.flags().ensure_writable()?;
                let end = DirectoryEnd::empty();
                storage.truncate(0)?;
                storage.seek(0)?;
                storage.write(&end.to_bytes()?)?;
                storage.synchronize()?;
                end
            }
            AccessMode::Update => {
                storage.flags().ensure_writable()?;
                parser::read_directory_end(&mut storage)?
            }
            AccessMode::Read => parser::read_directory_end(&mut storage)?,
        };

        Ok(Self {
            storage,
            mode,
            end,
            options,
        })
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Flush and release the byte range.
    pub fn close(mut self) -> Result<()> {
        self.storage.close()
    }

    /// Declared entry count, encrypted entries included.
    pub fn len(&self) -> u64 {
        self.end.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw archive comment.
    pub fn comment(&self) -> &[u8] {
        &self.end.record.comment
    }

    /// True when the directory end uses the ZIP64 record.
    pub fn is_zip64(&self) -> bool {
        self.end.zip64.is_some()
    }

    /// Iterate over entries in directory order.
    ///
    /// Each call starts a fresh pass over the central directory.
    pub fn entries(&mut self) -> Entries<'_, S> {
        Entries::new(&mut self.storage, &self.end, self.options.encoding)
    }

    /// First entry whose path equals `path`.
    pub fn get(&mut self, path: &str) -> Result<Option<Entry>> {
        for entry in self.entries() {
            let entry = entry?;
            if entry.path() == path {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Extract every entry with checksum verification, stopping at the first
    /// failure.
    pub fn check_integrity(&mut self) -> Result<()> {
        let entries = self.entries().collect::<Result<Vec<_>>>()?;
        let options = ExtractOptions::default();
        for entry in &entries {
            self.extract(entry, &options, None, |_| Ok(()))?;
        }
        Ok(())
    }

    /// Write one entry below `root`, restoring its permissions and
    /// modification time. Returns the path that was written.
    ///
    /// Member paths with `..` or absolute components, and symlink targets that
    /// would point outside `root`, fail with [`Error::InvalidEntryPath`].
    pub fn unpack_entry(&mut self, entry: &Entry, root: &Path) -> Result<PathBuf> {
        let relative = sanitize_member_path(entry.path())?;
        let dest = root.join(&relative);

        match entry.entry_type() {
            EntryType::Directory => fs::create_dir_all(&dest)?,
            EntryType::File => {
                create_parent(&dest)?;
                let mut file = File::create(&dest)?;
                self.extract(entry, &ExtractOptions::default(), None, |chunk| {
                    file.write_all(chunk)?;
                    Ok(())
                })?;
                file.sync_all()?;
            }
            EntryType::Symlink => {
                let target = String::from_utf8(self.extract_to_vec(entry)?)
                    .map_err(|_| Error::InvalidEntryPath(entry.path().to_string()))?;
                check_symlink_target(&relative, &target, entry.path())?;
                create_parent(&dest)?;
                if dest.symlink_metadata().is_ok() {
                    fs::remove_file(&dest)?;
                }
                create_symlink(&target, &dest)?;
            }
        }

        let mtime = filetime::FileTime::from_system_time(entry.modified().to_system_time());
        if entry.is_symlink() {
            filetime::set_symlink_file_times(&dest, mtime, mtime)?;
        } else {
            set_permissions(&dest, entry.permissions())?;
            filetime::set_file_mtime(&dest, mtime)?;
        }

        Ok(dest)
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Relative filesystem path of a member, without `.` or empty components.
fn sanitize_member_path(path: &str) -> Result<PathBuf> {
    let invalid = || Error::InvalidEntryPath(path.to_string());
    if path.starts_with('/') || path.starts_with('\\') || path.contains('\0') {
        return Err(invalid());
    }

    let mut out = PathBuf::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => return Err(invalid()),
            c if c.len() >= 2 && c.as_bytes()[1] == b':' && out.as_os_str().is_empty() => {
                return Err(invalid());
            }
            c => out.push(c),
        }
    }

    if out.as_os_str().is_empty() {
        return Err(invalid());
    }
    Ok(out)
}

/// Reject a link target that would resolve outside the extraction root.
fn check_symlink_target(link: &Path, target: &str, member: &str) -> Result<()> {
    let invalid = || Error::InvalidEntryPath(member.to_string());
    if target.is_empty() || target.starts_with('/') || target.starts_with('\\') {
        return Err(invalid());
    }

    let mut depth = link.components().count() as i64 - 1;
    for component in target.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return Err(invalid());
                }
            }
            _ => depth += 1,
        }
    }
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &str, dest: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, dest)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_symlink(target: &str, dest: &Path) -> Result<()> {
    fs::write(dest, target)?;
    Ok(())
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_member_path() {
        assert_eq!(
            sanitize_member_path("docs/./readme.txt").unwrap(),
            PathBuf::from("docs/readme.txt")
        );
        assert_eq!(sanitize_member_path("docs/").unwrap(), PathBuf::from("docs"));
        for bad in ["", "/etc/passwd", "../x", "a/../../x", "C:/windows", "a\0b"] {
            assert!(
                matches!(sanitize_member_path(bad), Err(Error::InvalidEntryPath(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_check_symlink_target() {
        let link = Path::new("docs/link");
        assert!(check_symlink_target(link, "readme.txt", "docs/link").is_ok());
        assert!(check_symlink_target(link, "../top.txt", "docs/link").is_ok());
        assert!(check_symlink_target(link, "../../escape", "docs/link").is_err());
        assert!(check_symlink_target(link, "/etc/passwd", "docs/link").is_err());
        assert!(check_symlink_target(Path::new("link"), "..", "link").is_err());
    }

    #[test]
    fn test_create_mode_writes_empty_directory_end() {
        let archive =
            Archive::from_bytes(b"stale".to_vec(), AccessMode::Create, ArchiveOptions::new())
                .unwrap();
        assert!(archive.is_empty());
        let bytes = archive.into_bytes();
        assert_eq!(bytes.len(), 22);
        assert_eq!(&bytes[0..4], b"PK\x05\x06");
    }

    #[test]
    fn test_update_requires_writable_storage() {
        let empty = DirectoryEnd::empty().to_bytes().unwrap();
        let storage = MemoryStorage::new(empty, OpenFlags::READ);
        assert!(matches!(
            Archive::with_storage(storage, AccessMode::Update, ArchiveOptions::new()),
            Err(Error::NotWritable)
        ));
    }

    #[test]
    fn test_open_rejects_non_archive() {
        assert!(matches!(
            Archive::from_bytes(b"not a zip".to_vec(), AccessMode::Read, ArchiveOptions::new()),
            Err(Error::MalformedArchive(_))
        ));
    }
}
