use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::{Error, Result};

/// General purpose flag: entry is encrypted.
pub const FLAG_ENCRYPTED: u16 = 1 << 0;
/// General purpose flag: sizes and CRC follow the data in a descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// General purpose flag: name and comment are UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

/// Version needed to extract a plain deflate/store entry (2.0).
pub const VERSION_DEFAULT: u16 = 20;
/// Version needed to extract a ZIP64 entry (4.5).
pub const VERSION_ZIP64: u16 = 45;
/// Version made by: Unix host, specification 4.5.
pub const VERSION_MADE_BY: u16 = (3 << 8) | VERSION_ZIP64;

/// Header ID of the ZIP64 extended information extra field.
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// Thresholds above which quantities are promoted to ZIP64 fields.
///
/// The defaults are the real format limits. Smaller values force the ZIP64
/// paths without multi-gigabyte fixtures; the sentinel written on disk is
/// always the true `0xFFFF`/`0xFFFFFFFF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Entry count limit of the 16-bit EOCD fields.
    pub max_entry_count: u64,
    /// Size limit of the 32-bit size fields, including the central directory size.
    pub max_size: u64,
    /// Offset limit of the 32-bit offset fields.
    pub max_offset: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_entry_count: u16::MAX as u64,
            max_size: u32::MAX as u64,
            max_offset: u32::MAX as u64,
        }
    }
}

/// A header field whose narrow slot may be overridden by a ZIP64 field.
///
/// `Zip64` values are written as the all-ones sentinel in the narrow slot and
/// carried in the ZIP64 structure; `Inline` values always fit the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Inline(u64),
    Zip64(u64),
}

impl Slot {
    /// Classify a value destined for a 32-bit slot.
    pub fn new32(value: u64, limit: u64) -> Self {
        if value >= limit.min(u32::MAX as u64) {
            Slot::Zip64(value)
        } else {
            Slot::Inline(value)
        }
    }

    /// Classify a value destined for a 16-bit slot.
    pub fn new16(value: u64, limit: u64) -> Self {
        if value >= limit.min(u16::MAX as u64) {
            Slot::Zip64(value)
        } else {
            Slot::Inline(value)
        }
    }

    /// The authoritative value.
    pub fn value(self) -> u64 {
        match self {
            Slot::Inline(v) | Slot::Zip64(v) => v,
        }
    }

    pub fn is_zip64(self) -> bool {
        matches!(self, Slot::Zip64(_))
    }

    /// Value for a 32-bit slot.
    pub fn narrow32(self) -> u32 {
        match self {
            Slot::Inline(v) => v as u32,
            Slot::Zip64(_) => u32::MAX,
        }
    }

    /// Value for a 16-bit slot.
    pub fn narrow16(self) -> u16 {
        match self {
            Slot::Inline(v) => v as u16,
            Slot::Zip64(_) => u16::MAX,
        }
    }
}

fn malformed(record: &'static str) -> Error {
    Error::MalformedRecord { record }
}

fn length_u16(len: usize, record: &'static str) -> Result<u16> {
    u16::try_from(len).map_err(|_| malformed(record))
}

fn check_signature(data: &[u8], signature: &[u8], min_size: usize, record: &'static str) -> Result<()> {
    if data.len() < min_size || &data[0..4] != signature {
        return Err(malformed(record));
    }
    Ok(())
}

/// ZIP64 extended information extra field (header ID `0x0001`).
///
/// Only the fields whose narrow slot holds the sentinel are present, in the
/// fixed order: uncompressed size, compressed size, local header offset, disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64ExtendedInfo {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub local_header_offset: Option<u64>,
    pub disk_start: Option<u32>,
}

impl Zip64ExtendedInfo {
    const RECORD: &'static str = "ZIP64 extended information";

    pub fn is_empty(&self) -> bool {
        self.data_len() == 0
    }

    fn data_len(&self) -> usize {
        [
            self.uncompressed_size,
            self.compressed_size,
            self.local_header_offset,
        ]
        .iter()
        .filter(|f| f.is_some())
        .count()
            * 8
            + if self.disk_start.is_some() { 4 } else { 0 }
    }

    /// Encoded length including the 4-byte block header.
    pub fn encoded_len(&self) -> usize {
        if self.is_empty() { 0 } else { 4 + self.data_len() }
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        out.write_u16::<LittleEndian>(ZIP64_EXTRA_ID)?;
        out.write_u16::<LittleEndian>(self.data_len() as u16)?;
        for value in [
            self.uncompressed_size,
            self.compressed_size,
            self.local_header_offset,
        ]
        .into_iter()
        .flatten()
        {
            out.write_u64::<LittleEndian>(value)?;
        }
        if let Some(disk) = self.disk_start {
            out.write_u32::<LittleEndian>(disk)?;
        }
        Ok(())
    }

    /// Parse the ZIP64 block's payload, reading only the requested fields.
    fn parse(data: &[u8], needs: [bool; 4]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let mut read_u64 = |needed: bool| -> Result<Option<u64>> {
            if !needed {
                return Ok(None);
            }
            cursor
                .read_u64::<LittleEndian>()
                .map(Some)
                .map_err(|_| malformed(Self::RECORD))
        };
        let uncompressed_size = read_u64(needs[0])?;
        let compressed_size = read_u64(needs[1])?;
        let local_header_offset = read_u64(needs[2])?;
        let disk_start = if needs[3] {
            Some(
                cursor
                    .read_u32::<LittleEndian>()
                    .map_err(|_| malformed(Self::RECORD))?,
            )
        } else {
            None
        };
        Ok(Self {
            uncompressed_size,
            compressed_size,
            local_header_offset,
            disk_start,
        })
    }
}

/// Split an extra field into its ZIP64 payload and all other blocks.
///
/// Trailing bytes too short to form a block header are kept verbatim.
fn split_extra_field(extra: &[u8]) -> Result<(Option<&[u8]>, Vec<u8>)> {
    let mut zip64 = None;
    let mut other = Vec::new();
    let mut pos = 0;

    while pos + 4 <= extra.len() {
        let header_id = u16::from_le_bytes([extra[pos], extra[pos + 1]]);
        let size = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
        let end = pos + 4 + size;
        if end > extra.len() {
            return Err(malformed("extra field"));
        }
        if header_id == ZIP64_EXTRA_ID && zip64.is_none() {
            zip64 = Some(&extra[pos + 4..end]);
        } else {
            other.extend_from_slice(&extra[pos..end]);
        }
        pos = end;
    }
    other.extend_from_slice(&extra[pos..]);

    Ok((zip64, other))
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;
    const RECORD: &'static str = "end of central directory";

    /// Decode a record, including its trailing comment.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_signature(data, Self::SIGNATURE, Self::SIZE, Self::RECORD)?;

        let mut cursor = Cursor::new(&data[4..]);
        let disk_number = cursor.read_u16::<LittleEndian>()?;
        let disk_with_cd = cursor.read_u16::<LittleEndian>()?;
        let disk_entries = cursor.read_u16::<LittleEndian>()?;
        let total_entries = cursor.read_u16::<LittleEndian>()?;
        let cd_size = cursor.read_u32::<LittleEndian>()?;
        let cd_offset = cursor.read_u32::<LittleEndian>()?;
        let comment_len = cursor.read_u16::<LittleEndian>()? as usize;

        let comment = data
            .get(Self::SIZE..Self::SIZE + comment_len)
            .ok_or_else(|| malformed(Self::RECORD))?
            .to_vec();

        Ok(Self {
            disk_number,
            disk_with_cd,
            disk_entries,
            total_entries,
            cd_size,
            cd_offset,
            comment,
        })
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(Self::SIGNATURE)?;
        out.write_u16::<LittleEndian>(self.disk_number)?;
        out.write_u16::<LittleEndian>(self.disk_with_cd)?;
        out.write_u16::<LittleEndian>(self.disk_entries)?;
        out.write_u16::<LittleEndian>(self.total_entries)?;
        out.write_u32::<LittleEndian>(self.cd_size)?;
        out.write_u32::<LittleEndian>(self.cd_offset)?;
        out.write_u16::<LittleEndian>(length_u16(self.comment.len(), Self::RECORD)?)?;
        out.write_all(&self.comment)?;
        Ok(())
    }

    pub fn encoded_len(&self) -> usize {
        Self::SIZE + self.comment.len()
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_signature(data, Self::SIGNATURE, Self::SIZE, "ZIP64 locator")?;

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(Self::SIGNATURE)?;
        out.write_u32::<LittleEndian>(self.disk_with_eocd64)?;
        out.write_u64::<LittleEndian>(self.eocd64_offset)?;
        out.write_u32::<LittleEndian>(self.total_disks)?;
        Ok(())
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EOCD {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
    pub extensible_data: Vec<u8>,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;
    const RECORD: &'static str = "ZIP64 end of central directory";

    /// Decode a record. Extensible data is kept when `data` covers it.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_signature(data, Self::SIGNATURE, Self::MIN_SIZE, Self::RECORD)?;

        let mut cursor = Cursor::new(&data[4..]);
        let eocd64_size = cursor.read_u64::<LittleEndian>()?;
        if eocd64_size < (Self::MIN_SIZE - 12) as u64 {
            return Err(malformed(Self::RECORD));
        }

        let mut record = Self {
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
            extensible_data: Vec::new(),
        };

        let extensible_len = eocd64_size - (Self::MIN_SIZE - 12) as u64;
        if let Ok(len) = usize::try_from(extensible_len) {
            if let Some(extra) = data.get(Self::MIN_SIZE..Self::MIN_SIZE.saturating_add(len)) {
                record.extensible_data = extra.to_vec();
            }
        }

        Ok(record)
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(Self::SIGNATURE)?;
        out.write_u64::<LittleEndian>(self.encoded_len() as u64 - 12)?;
        out.write_u16::<LittleEndian>(self.version_made_by)?;
        out.write_u16::<LittleEndian>(self.version_needed)?;
        out.write_u32::<LittleEndian>(self.disk_number)?;
        out.write_u32::<LittleEndian>(self.disk_with_cd)?;
        out.write_u64::<LittleEndian>(self.disk_entries)?;
        out.write_u64::<LittleEndian>(self.total_entries)?;
        out.write_u64::<LittleEndian>(self.cd_size)?;
        out.write_u64::<LittleEndian>(self.cd_offset)?;
        out.write_all(&self.extensible_data)?;
        Ok(())
    }

    pub fn encoded_len(&self) -> usize {
        Self::MIN_SIZE + self.extensible_data.len()
    }
}

/// ZIP64 record and the locator that points at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64End {
    pub record: Zip64EOCD,
    pub locator: Zip64EOCDLocator,
}

/// The trailing structures of an archive: the EOCD and its optional ZIP64 pair.
///
/// When the ZIP64 pair is present its 64-bit fields are authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEnd {
    pub record: EndOfCentralDirectory,
    pub zip64: Option<Zip64End>,
}

impl DirectoryEnd {
    /// The trailer of an archive without entries.
    pub fn empty() -> Self {
        Self {
            record: EndOfCentralDirectory {
                disk_number: 0,
                disk_with_cd: 0,
                disk_entries: 0,
                total_entries: 0,
                cd_size: 0,
                cd_offset: 0,
                comment: Vec::new(),
            },
            zip64: None,
        }
    }

    pub fn entry_count(&self) -> u64 {
        match &self.zip64 {
            Some(z) => z.record.total_entries,
            None => self.record.total_entries as u64,
        }
    }

    pub fn cd_size(&self) -> u64 {
        match &self.zip64 {
            Some(z) => z.record.cd_size,
            None => self.record.cd_size as u64,
        }
    }

    pub fn cd_offset(&self) -> u64 {
        match &self.zip64 {
            Some(z) => z.record.cd_offset,
            None => self.record.cd_offset as u64,
        }
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        if let Some(zip64) = &self.zip64 {
            zip64.record.write_to(out)?;
            zip64.locator.write_to(out)?;
        }
        self.record.write_to(out)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(EndOfCentralDirectory::SIZE + 76);
        self.write_to(&mut out)?;
        Ok(out)
    }
}

/// Local File Header (LFH) - 30 bytes plus name and extra field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name: Vec<u8>,
    pub extra_field: Vec<u8>,
}

impl LocalFileHeader {
    pub const SIGNATURE: &'static [u8] = b"PK\x03\x04";
    pub const SIZE: usize = 30;
    const RECORD: &'static str = "local file header";

    /// Length of the name and extra field that follow the fixed part.
    pub fn variable_len(fixed: &[u8]) -> Result<usize> {
        check_signature(fixed, Self::SIGNATURE, Self::SIZE, Self::RECORD)?;
        let name_len = u16::from_le_bytes([fixed[26], fixed[27]]) as usize;
        let extra_len = u16::from_le_bytes([fixed[28], fixed[29]]) as usize;
        Ok(name_len + extra_len)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let variable_len = Self::variable_len(data)?;
        if data.len() < Self::SIZE + variable_len {
            return Err(malformed(Self::RECORD));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let name_len = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_len = cursor.read_u16::<LittleEndian>()? as usize;

        let mut file_name = vec![0u8; name_len];
        cursor.read_exact(&mut file_name)?;
        let mut extra_field = vec![0u8; extra_len];
        cursor.read_exact(&mut extra_field)?;

        Ok(Self {
            version_needed,
            flags,
            compression_method,
            last_mod_time,
            last_mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            file_name,
            extra_field,
        })
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(Self::SIGNATURE)?;
        out.write_u16::<LittleEndian>(self.version_needed)?;
        out.write_u16::<LittleEndian>(self.flags)?;
        out.write_u16::<LittleEndian>(self.compression_method)?;
        out.write_u16::<LittleEndian>(self.last_mod_time)?;
        out.write_u16::<LittleEndian>(self.last_mod_date)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        out.write_u32::<LittleEndian>(self.compressed_size)?;
        out.write_u32::<LittleEndian>(self.uncompressed_size)?;
        out.write_u16::<LittleEndian>(length_u16(self.file_name.len(), Self::RECORD)?)?;
        out.write_u16::<LittleEndian>(length_u16(self.extra_field.len(), Self::RECORD)?)?;
        out.write_all(&self.file_name)?;
        out.write_all(&self.extra_field)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut out)?;
        Ok(out)
    }

    pub fn encoded_len(&self) -> usize {
        Self::SIZE + self.file_name.len() + self.extra_field.len()
    }

    /// Sizes from the ZIP64 extra field, when the narrow slots hold sentinels.
    ///
    /// A local header's ZIP64 field carries both sizes whenever it is present.
    pub fn zip64_sizes(&self) -> Result<Option<(u64, u64)>> {
        if self.uncompressed_size != u32::MAX && self.compressed_size != u32::MAX {
            return Ok(None);
        }
        let (zip64, _) = split_extra_field(&self.extra_field)?;
        let data = zip64.ok_or_else(|| malformed(Zip64ExtendedInfo::RECORD))?;
        let info = Zip64ExtendedInfo::parse(data, [true, true, false, false])?;
        match (info.uncompressed_size, info.compressed_size) {
            (Some(u), Some(c)) => Ok(Some((u, c))),
            _ => Err(malformed(Zip64ExtendedInfo::RECORD)),
        }
    }
}

/// Data Descriptor trailing an entry's payload.
///
/// The signature is optional on disk; decoding sniffs for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    pub has_signature: bool,
    pub zip64: bool,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    pub const SIGNATURE: &'static [u8] = b"PK\x07\x08";
    /// Largest possible encoding: signature, CRC and two 64-bit sizes.
    pub const MAX_SIZE: usize = 24;

    /// Decode a descriptor; `zip64` selects 8-byte size fields.
    pub fn from_bytes(data: &[u8], zip64: bool) -> Result<Self> {
        let has_signature = data.len() >= 4 && &data[0..4] == Self::SIGNATURE;
        let start = if has_signature { 4 } else { 0 };
        let mut cursor = Cursor::new(&data[start..]);
        let fail = |_| malformed("data descriptor");

        let crc32 = cursor.read_u32::<LittleEndian>().map_err(fail)?;
        let (compressed_size, uncompressed_size) = if zip64 {
            (
                cursor.read_u64::<LittleEndian>().map_err(fail)?,
                cursor.read_u64::<LittleEndian>().map_err(fail)?,
            )
        } else {
            (
                cursor.read_u32::<LittleEndian>().map_err(fail)? as u64,
                cursor.read_u32::<LittleEndian>().map_err(fail)? as u64,
            )
        };

        Ok(Self {
            has_signature,
            zip64,
            crc32,
            compressed_size,
            uncompressed_size,
        })
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        if self.has_signature {
            out.write_all(Self::SIGNATURE)?;
        }
        out.write_u32::<LittleEndian>(self.crc32)?;
        if self.zip64 {
            out.write_u64::<LittleEndian>(self.compressed_size)?;
            out.write_u64::<LittleEndian>(self.uncompressed_size)?;
        } else {
            out.write_u32::<LittleEndian>(self.compressed_size as u32)?;
            out.write_u32::<LittleEndian>(self.uncompressed_size as u32)?;
        }
        Ok(())
    }

    pub fn encoded_len(&self) -> usize {
        let sizes = if self.zip64 { 16 } else { 8 };
        if self.has_signature { 8 + sizes } else { 4 + sizes }
    }
}

/// Central Directory File Header (CDFH) - 46 bytes plus name, extra and comment
///
/// Sizes, disk number and offset are [`Slot`]s: the ZIP64 extended information
/// field is derived from them on encode, so a sentinel is written exactly when
/// the ZIP64 field carries the value. `extra_field` holds every other block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: Slot,
    pub uncompressed_size: Slot,
    pub disk_start: Slot,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub local_header_offset: Slot,
    pub file_name: Vec<u8>,
    pub extra_field: Vec<u8>,
    pub comment: Vec<u8>,
}

impl CentralDirectoryHeader {
    pub const SIGNATURE: &'static [u8] = b"PK\x01\x02";
    pub const SIZE: usize = 46;
    const RECORD: &'static str = "central directory header";

    /// Length of the name, extra field and comment that follow the fixed part.
    pub fn variable_len(fixed: &[u8]) -> Result<usize> {
        check_signature(fixed, Self::SIGNATURE, Self::SIZE, Self::RECORD)?;
        let name_len = u16::from_le_bytes([fixed[28], fixed[29]]) as usize;
        let extra_len = u16::from_le_bytes([fixed[30], fixed[31]]) as usize;
        let comment_len = u16::from_le_bytes([fixed[32], fixed[33]]) as usize;
        Ok(name_len + extra_len + comment_len)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let variable_len = Self::variable_len(data)?;
        if data.len() < Self::SIZE + variable_len {
            return Err(malformed(Self::RECORD));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let version_made_by = cursor.read_u16::<LittleEndian>()?;
        let version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let name_len = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_len = cursor.read_u16::<LittleEndian>()? as usize;
        let comment_len = cursor.read_u16::<LittleEndian>()? as usize;
        let disk_start = cursor.read_u16::<LittleEndian>()?;
        let internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let external_attrs = cursor.read_u32::<LittleEndian>()?;
        let local_header_offset = cursor.read_u32::<LittleEndian>()?;

        let mut file_name = vec![0u8; name_len];
        cursor.read_exact(&mut file_name)?;
        let mut raw_extra = vec![0u8; extra_len];
        cursor.read_exact(&mut raw_extra)?;
        let mut comment = vec![0u8; comment_len];
        cursor.read_exact(&mut comment)?;

        let needs = [
            uncompressed_size == u32::MAX,
            compressed_size == u32::MAX,
            local_header_offset == u32::MAX,
            disk_start == u16::MAX,
        ];
        let (zip64, extra_field) = split_extra_field(&raw_extra)?;
        let info = if needs.iter().any(|n| *n) {
            let data = zip64.ok_or_else(|| malformed(Zip64ExtendedInfo::RECORD))?;
            Zip64ExtendedInfo::parse(data, needs)?
        } else {
            Zip64ExtendedInfo::default()
        };

        let slot = |narrow: u64, wide: Option<u64>| match wide {
            Some(v) => Slot::Zip64(v),
            None => Slot::Inline(narrow),
        };

        Ok(Self {
            version_made_by,
            version_needed,
            flags,
            compression_method,
            last_mod_time,
            last_mod_date,
            crc32,
            compressed_size: slot(compressed_size as u64, info.compressed_size),
            uncompressed_size: slot(uncompressed_size as u64, info.uncompressed_size),
            disk_start: slot(disk_start as u64, info.disk_start.map(u64::from)),
            internal_attrs,
            external_attrs,
            local_header_offset: slot(local_header_offset as u64, info.local_header_offset),
            file_name,
            extra_field,
            comment,
        })
    }

    /// The ZIP64 extended information implied by the promoted slots.
    pub fn zip64_info(&self) -> Zip64ExtendedInfo {
        let wide = |slot: Slot| slot.is_zip64().then(|| slot.value());
        Zip64ExtendedInfo {
            uncompressed_size: wide(self.uncompressed_size),
            compressed_size: wide(self.compressed_size),
            local_header_offset: wide(self.local_header_offset),
            disk_start: wide(self.disk_start).map(|d| d as u32),
        }
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let zip64 = self.zip64_info();
        let extra_len = zip64.encoded_len() + self.extra_field.len();

        out.write_all(Self::SIGNATURE)?;
        out.write_u16::<LittleEndian>(self.version_made_by)?;
        out.write_u16::<LittleEndian>(self.version_needed)?;
        out.write_u16::<LittleEndian>(self.flags)?;
        out.write_u16::<LittleEndian>(self.compression_method)?;
        out.write_u16::<LittleEndian>(self.last_mod_time)?;
        out.write_u16::<LittleEndian>(self.last_mod_date)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        out.write_u32::<LittleEndian>(self.compressed_size.narrow32())?;
        out.write_u32::<LittleEndian>(self.uncompressed_size.narrow32())?;
        out.write_u16::<LittleEndian>(length_u16(self.file_name.len(), Self::RECORD)?)?;
        out.write_u16::<LittleEndian>(length_u16(extra_len, Self::RECORD)?)?;
        out.write_u16::<LittleEndian>(length_u16(self.comment.len(), Self::RECORD)?)?;
        out.write_u16::<LittleEndian>(self.disk_start.narrow16())?;
        out.write_u16::<LittleEndian>(self.internal_attrs)?;
        out.write_u32::<LittleEndian>(self.external_attrs)?;
        out.write_u32::<LittleEndian>(self.local_header_offset.narrow32())?;
        out.write_all(&self.file_name)?;
        zip64.write_to(out)?;
        out.write_all(&self.extra_field)?;
        out.write_all(&self.comment)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut out)?;
        Ok(out)
    }

    /// Total encoded length: fixed fields, name, extra and comment.
    pub fn encoded_len(&self) -> usize {
        Self::SIZE
            + self.file_name.len()
            + self.zip64_info().encoded_len()
            + self.extra_field.len()
            + self.comment.len()
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    /// True when any field lives in the ZIP64 extended information.
    pub fn is_zip64(&self) -> bool {
        !self.zip64_info().is_empty()
    }

    /// Copy of this header pointing at a new local header offset.
    pub fn relocated(&self, offset: u64, limits: &Limits) -> Self {
        let mut header = self.clone();
        header.local_header_offset = Slot::new32(offset, limits.max_offset);
        if header.is_zip64() {
            header.version_needed = header.version_needed.max(VERSION_ZIP64);
        }
        header
    }
}
