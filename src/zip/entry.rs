use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::cp437;
use super::structures::{CentralDirectoryHeader, CompressionMethod, FLAG_UTF8};

pub(crate) const S_IFMT: u32 = 0o170000;
pub(crate) const S_IFREG: u32 = 0o100000;
pub(crate) const S_IFDIR: u32 = 0o040000;
pub(crate) const S_IFLNK: u32 = 0o120000;

/// MS-DOS directory attribute bit in the low byte of the external attributes.
pub(crate) const DOS_DIRECTORY: u32 = 0x10;

const HOST_UNIX: u16 = 3;

/// Default mode of files and symlinks.
pub const DEFAULT_FILE_PERMISSIONS: u32 = 0o644;
/// Default mode of directories.
pub const DEFAULT_DIRECTORY_PERMISSIONS: u32 = 0o755;

/// Kind of archive member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    File,
    Directory,
    Symlink,
}

impl EntryType {
    pub(crate) fn mode_bits(self) -> u32 {
        match self {
            EntryType::File => S_IFREG,
            EntryType::Directory => S_IFDIR,
            EntryType::Symlink => S_IFLNK,
        }
    }

    pub(crate) fn default_permissions(self) -> u32 {
        match self {
            EntryType::Directory => DEFAULT_DIRECTORY_PERMISSIONS,
            EntryType::File | EntryType::Symlink => DEFAULT_FILE_PERMISSIONS,
        }
    }
}

/// Text encoding assumed for member names without the UTF-8 flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathEncoding {
    /// UTF-8, falling back to code page 437 for names that are not valid UTF-8.
    #[default]
    Utf8,
    /// Always code page 437.
    Cp437,
}

impl PathEncoding {
    pub(crate) fn decode(self, raw: &[u8], flags: u16) -> String {
        if flags & FLAG_UTF8 != 0 {
            return String::from_utf8_lossy(raw).into_owned();
        }
        match self {
            PathEncoding::Utf8 => match std::str::from_utf8(raw) {
                Ok(s) => s.to_string(),
                Err(_) => cp437::decode(raw),
            },
            PathEncoding::Cp437 => cp437::decode(raw),
        }
    }
}

/// MS-DOS packed date and time, as stored in ZIP headers.
///
/// DOS timestamps carry no zone; this crate reads and writes them as UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DosDateTime {
    pub date: u16,
    pub time: u16,
}

const DOS_EPOCH_SECS: u64 = 315_532_800;
const SECS_PER_DAY: u64 = 86_400;

impl DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable instant.
    pub const MIN: Self = Self {
        date: (1 << 5) | 1,
        time: 0,
    };

    /// 2107-12-31 23:59:58, the latest representable instant.
    pub const MAX: Self = Self {
        date: (127 << 9) | (12 << 5) | 31,
        time: (23 << 11) | (59 << 5) | 29,
    };

    /// Convert a timestamp, clamping to the DOS range. Odd seconds round down.
    pub fn from_system_time(time: SystemTime) -> Self {
        let secs = time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if secs < DOS_EPOCH_SECS {
            return Self::MIN;
        }

        let (year, month, day) = civil_from_days((secs / SECS_PER_DAY) as i64);
        if year > 2107 {
            return Self::MAX;
        }
        let rem = secs % SECS_PER_DAY;
        let (hour, minute, second) = (rem / 3600, (rem % 3600) / 60, rem % 60);

        Self {
            date: (((year - 1980) as u16) << 9) | ((month as u16) << 5) | day as u16,
            time: ((hour as u16) << 11) | ((minute as u16) << 5) | (second as u16 / 2),
        }
    }

    /// Convert to a timestamp. Out-of-range fields are clamped.
    pub fn to_system_time(self) -> SystemTime {
        let (year, month, day) = self.date();
        let (hour, minute, second) = self.time();
        let days = days_from_civil(
            year as i64,
            month.clamp(1, 12) as u32,
            day.clamp(1, 31) as u32,
        );
        let secs = days as u64 * SECS_PER_DAY
            + hour.min(23) as u64 * 3600
            + minute.min(59) as u64 * 60
            + second.min(59) as u64;
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    /// Parse modification date to (year, month, day)
    pub fn date(self) -> (u16, u8, u8) {
        let day = (self.date & 0x1F) as u8;
        let month = ((self.date >> 5) & 0x0F) as u8;
        let year = ((self.date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn time(self) -> (u8, u8, u8) {
        let second = ((self.time & 0x1F) * 2) as u8;
        let minute = ((self.time >> 5) & 0x3F) as u8;
        let hour = ((self.time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }
}

impl From<SystemTime> for DosDateTime {
    fn from(time: SystemTime) -> Self {
        Self::from_system_time(time)
    }
}

// Proleptic Gregorian conversions over days since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = year.div_euclid(400);
    let yoe = year.rem_euclid(400);
    let mp = (if month > 2 { month - 3 } else { month + 9 }) as i64;
    let doy = (153 * mp + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// One archive member, decoded from its central directory header.
///
/// Entries are immutable snapshots: mutating the archive yields new entries
/// and never updates existing values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    path: String,
    entry_type: EntryType,
    permissions: u32,
    pub(crate) header: CentralDirectoryHeader,
}

impl Entry {
    pub(crate) fn from_header(header: CentralDirectoryHeader, encoding: PathEncoding) -> Self {
        let path = encoding.decode(&header.file_name, header.flags);

        let unix_mode = if header.version_made_by >> 8 == HOST_UNIX {
            header.external_attrs >> 16
        } else {
            0
        };
        let entry_type = match unix_mode & S_IFMT {
            S_IFDIR => EntryType::Directory,
            S_IFLNK => EntryType::Symlink,
            _ if header.external_attrs & DOS_DIRECTORY != 0 => EntryType::Directory,
            _ if path.ends_with('/') => EntryType::Directory,
            _ => EntryType::File,
        };
        let permissions = match unix_mode & 0o7777 {
            0 => entry_type.default_permissions(),
            mode => mode,
        };

        Self {
            path,
            entry_type,
            permissions,
            header,
        }
    }

    /// Member path, `/`-separated.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.entry_type == EntryType::Symlink
    }

    pub fn compression_method(&self) -> CompressionMethod {
        CompressionMethod::from_u16(self.header.compression_method)
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.header.uncompressed_size.value()
    }

    pub fn compressed_size(&self) -> u64 {
        self.header.compressed_size.value()
    }

    pub fn crc32(&self) -> u32 {
        self.header.crc32
    }

    pub fn modified(&self) -> DosDateTime {
        DosDateTime {
            date: self.header.last_mod_date,
            time: self.header.last_mod_time,
        }
    }

    /// POSIX permission bits (no file type bits).
    pub fn permissions(&self) -> u32 {
        self.permissions
    }

    pub fn local_header_offset(&self) -> u64 {
        self.header.local_header_offset.value()
    }

    /// Raw member comment.
    pub fn comment(&self) -> &[u8] {
        &self.header.comment
    }

    /// True when any field of this entry lives in a ZIP64 extra field.
    pub fn is_zip64(&self) -> bool {
        self.header.is_zip64()
    }
}
