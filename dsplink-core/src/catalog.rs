//! Entries of the target's remote storage.
//!
//! Paths are forward-slash separated. A leading `/` means absolute from
//! the storage root; directories may carry a trailing `/`.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// One file or directory on the target's storage.
///
/// Immutable once built from a listing or info reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileCatalogEntry {
    path: String,
    timestamp: Option<NaiveDateTime>,
    size_bytes: u64,
    is_directory: bool,
}

impl RemoteFileCatalogEntry {
    pub fn new(
        path: impl Into<String>,
        timestamp: Option<NaiveDateTime>,
        size_bytes: u64,
        is_directory: bool,
    ) -> Self {
        Self {
            path: path.into(),
            timestamp,
            size_bytes,
            is_directory,
        }
    }

    /// Synthetic entry for the storage root. Has no timestamp.
    pub fn root() -> Self {
        Self::new("/", None, 0, true)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamp
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    /// Last path segment; see [`pure_name`].
    pub fn pure_name(&self) -> &str {
        pure_name(&self.path, self.is_directory)
    }

    /// File extension without the dot; empty for directories.
    pub fn extension(&self) -> &str {
        if self.is_directory {
            return "";
        }
        extension(&self.path)
    }

    /// File name without its extension; the full name for directories.
    pub fn basename_without_extension(&self) -> &str {
        if self.is_directory {
            return self.pure_name();
        }
        basename_without_extension(&self.path)
    }
}

/// Last segment of `path`.
///
/// The leading `/` is stripped first, and for directories the trailing
/// `/` as well, so `"/a/b/"` names directory `"b"`.
pub fn pure_name(path: &str, is_directory: bool) -> &str {
    let mut trimmed = path.strip_prefix('/').unwrap_or(path);
    if is_directory {
        trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    }
    match trimmed.rfind('/') {
        Some(slash) => &trimmed[slash + 1..],
        None => trimmed,
    }
}

/// Position of the extension dot in a file name. A dot in first position
/// marks a hidden file, not an extension.
fn extension_dot(name: &str) -> Option<usize> {
    match name.rfind('.') {
        Some(0) | None => None,
        Some(dot) => Some(dot),
    }
}

/// Extension of the file at `path`, without the dot.
pub fn extension(path: &str) -> &str {
    let name = pure_name(path, false);
    match extension_dot(name) {
        Some(dot) => &name[dot + 1..],
        None => "",
    }
}

/// File name at `path` with its extension removed.
pub fn basename_without_extension(path: &str) -> &str {
    let name = pure_name(path, false);
    match extension_dot(name) {
        Some(dot) => &name[..dot],
        None => name,
    }
}

// ── FAT timestamps ───────────────────────────────────────────────

/// Convert a packed FAT date/time pair. `(0, 0)` means "no timestamp".
pub fn from_fat_timestamp(date: u16, time: u16) -> Option<NaiveDateTime> {
    if date == 0 && time == 0 {
        return None;
    }
    let year = 1980 + i32::from(date >> 9);
    let month = u32::from((date >> 5) & 0x0F);
    let day = u32::from(date & 0x1F);
    let hour = u32::from(time >> 11);
    let minute = u32::from((time >> 5) & 0x3F);
    let second = u32::from(time & 0x1F) * 2;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

/// Pack a timestamp as FAT date/time. Years are clamped to 1980..=2107,
/// seconds round down to even.
pub fn to_fat_timestamp(ts: &NaiveDateTime) -> (u16, u16) {
    let year = (ts.year().clamp(1980, 2107) - 1980) as u16;
    let date = (year << 9) | ((ts.month() as u16) << 5) | ts.day() as u16;
    let time = ((ts.hour() as u16) << 11) | ((ts.minute() as u16) << 5) | (ts.second() as u16 / 2);
    (date, time)
}

/// FAT pair for an optional timestamp; `(0, 0)` when absent.
pub fn fat_or_zero(ts: Option<&NaiveDateTime>) -> (u16, u16) {
    ts.map(to_fat_timestamp).unwrap_or((0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_name_of_file_and_directory() {
        assert_eq!(pure_name("/a/b/c.txt", false), "c.txt");
        assert_eq!(pure_name("/a/b/", true), "b");
        assert_eq!(pure_name("top.bin", false), "top.bin");
        assert_eq!(pure_name("/", true), "");
    }

    #[test]
    fn extension_rules() {
        assert_eq!(extension("/a/b/c.txt"), "txt");
        assert_eq!(extension("/a/.hidden"), "");
        assert_eq!(extension("/a/archive.tar.gz"), "gz");
        assert_eq!(extension("/a/noext"), "");
    }

    #[test]
    fn basename_rules() {
        assert_eq!(basename_without_extension("/a/b/c.txt"), "c");
        assert_eq!(basename_without_extension("/a/.hidden"), ".hidden");
    }

    #[test]
    fn directory_entries_have_no_extension() {
        let dir = RemoteFileCatalogEntry::new("/patches.d/", None, 0, true);
        assert_eq!(dir.extension(), "");
        assert_eq!(dir.pure_name(), "patches.d");
        assert_eq!(dir.basename_without_extension(), "patches.d");
    }

    #[test]
    fn root_has_no_timestamp() {
        let root = RemoteFileCatalogEntry::root();
        assert!(root.is_directory());
        assert!(root.timestamp().is_none());
    }

    #[test]
    fn fat_timestamp_conversion() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 17)
            .unwrap()
            .and_hms_opt(14, 30, 42)
            .unwrap();
        let (date, time) = to_fat_timestamp(&ts);
        assert_eq!(from_fat_timestamp(date, time), Some(ts));
        assert_eq!(from_fat_timestamp(0, 0), None);
    }

    #[test]
    fn fat_timestamp_rounds_odd_seconds_down() {
        let ts = NaiveDate::from_ymd_opt(2001, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 59)
            .unwrap();
        let (date, time) = to_fat_timestamp(&ts);
        let back = from_fat_timestamp(date, time).unwrap();
        assert_eq!(back.second(), 58);
    }
}
