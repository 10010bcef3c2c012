use super::{OpenFlags, Storage, to_usize};
use crate::Result;

/// In-memory byte range backed by a growable buffer.
///
/// Writing past the current end fills the gap with zeros, like a sparse file.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Vec<u8>,
    position: usize,
    flags: OpenFlags,
}

impl MemoryStorage {
    pub fn new(data: Vec<u8>, flags: OpenFlags) -> Self {
        Self {
            data,
            position: 0,
            flags,
        }
    }

    /// The current contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the storage and return its buffer.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Storage for MemoryStorage {
    fn seek(&mut self, offset: u64) -> Result<()> {
        self.position = to_usize(offset)?;
        Ok(())
    }

    fn offset(&mut self) -> Result<u64> {
        Ok(self.position as u64)
    }

    fn seek_to_end(&mut self) -> Result<u64> {
        self.position = self.data.len();
        Ok(self.position as u64)
    }

    fn read(&mut self, up_to: usize) -> Result<Vec<u8>> {
        if self.position >= self.data.len() {
            return Ok(Vec::new());
        }
        let end = self.data.len().min(self.position.saturating_add(up_to));
        let chunk = self.data[self.position..end].to_vec();
        self.position = end;
        Ok(chunk)
    }

    fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let remaining = self.data.len().saturating_sub(self.position);
        self.read(remaining)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.flags.ensure_writable()?;
        if self.flags.append {
            self.position = self.data.len();
        }
        let end = self.position + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.position..end].copy_from_slice(data);
        self.position = end;
        Ok(())
    }

    fn truncate(&mut self, offset: u64) -> Result<()> {
        self.flags.ensure_writable()?;
        self.data.resize(to_usize(offset)?, 0);
        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn flags(&self) -> OpenFlags {
        self.flags
    }

    fn create_replacement(&self) -> Result<Self> {
        self.flags.ensure_writable()?;
        Ok(Self::new(Vec::new(), OpenFlags::UPDATE))
    }

    fn commit_replacement(&mut self, replacement: Self) -> Result<()> {
        self.flags.ensure_writable()?;
        self.data = replacement.data;
        self.position = 0;
        Ok(())
    }
}
