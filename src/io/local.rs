use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::TempPath;

use super::{OpenFlags, Storage};
use crate::Result;

/// Local file byte range.
///
/// Replacements are created as temporary files next to the original so that
/// committing one is a same-directory rename.
#[derive(Debug)]
pub struct FileStorage {
    file: File,
    path: PathBuf,
    flags: OpenFlags,
    temp: Option<TempPath>,
}

impl FileStorage {
    /// Open an existing file for reading (`rb`).
    pub fn open_read(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::with_file(file, path, OpenFlags::READ))
    }

    /// Open an existing file for reading and writing (`rb+`).
    pub fn open_update(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self::with_file(file, path, OpenFlags::UPDATE))
    }

    /// Create or truncate a file for reading and writing (`wb+`).
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::with_file(file, path, OpenFlags::UPDATE))
    }

    /// Open or create a file for reading and appending (`ab+`).
    pub fn open_append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        Ok(Self::with_file(file, path, OpenFlags::APPEND))
    }

    fn with_file(file: File, path: &Path, flags: OpenFlags) -> Self {
        Self {
            file,
            path: path.to_path_buf(),
            flags,
            temp: None,
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn seek(&mut self, offset: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn offset(&mut self) -> Result<u64> {
        Ok(self.file.stream_position()?)
    }

    fn seek_to_end(&mut self) -> Result<u64> {
        Ok(self.file.seek(SeekFrom::End(0))?)
    }

    fn read(&mut self, up_to: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(up_to.min(1 << 20));
        (&mut self.file).take(up_to as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.flags.ensure_writable()?;
        if self.flags.append {
            self.seek_to_end()?;
        }
        self.file.write_all(data)?;
        Ok(())
    }

    fn truncate(&mut self, offset: u64) -> Result<()> {
        self.flags.ensure_writable()?;
        self.file.set_len(offset)?;
        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        if self.flags.write {
            self.file.sync_all()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.file.flush()?;
        self.synchronize()
    }

    fn flags(&self) -> OpenFlags {
        self.flags
    }

    fn create_replacement(&self) -> Result<Self> {
        self.flags.ensure_writable()?;
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let (file, temp) = tempfile::Builder::new()
            .prefix(".rezip-")
            .tempfile_in(dir)?
            .into_parts();
        Ok(Self {
            file,
            path: temp.to_path_buf(),
            flags: OpenFlags::UPDATE,
            temp: Some(temp),
        })
    }

    fn commit_replacement(&mut self, replacement: Self) -> Result<()> {
        self.flags.ensure_writable()?;
        let FileStorage { file, temp, .. } = replacement;
        // Temporary files are created owner-only; keep the archive's mode.
        file.set_permissions(fs::metadata(&self.path)?.permissions())?;
        file.sync_all()?;
        if let Some(temp) = temp {
            temp.persist(&self.path).map_err(|e| e.error)?;
        }
        // The replacement handle now refers to the renamed file.
        self.file = file;
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}
