//! Remote storage protocol: payloads, result codes, transfer state.
//!
//! # Wire Protocol
//!
//! ## Upload
//! ```text
//! Host   ──[CreateFile]─────────────► Target   CreateFileRequest (bincode)
//! Target ──[Ack(CreateFile)]────────► Host
//! Host   ──[AppendFile]─────────────► Target   raw chunk (repeated)
//! Target ──[Ack(AppendFile)]────────► Host
//! Host   ──[CloseFile]──────────────► Target   CloseFileRequest (bincode)
//! Target ──[Ack(CloseFile)]─────────► Host
//! ```
//!
//! ## One-shot requests
//! ```text
//! Host   ──[CreateDirectory | ChangeWorkingDirectory | DeleteFile]──► Target
//! Target ──[FileResult]──────────────────────────────────────────────► Host
//!
//! Host   ──[GetFileInfo]──► Target
//! Target ──[FileInfo]─────► Host        Option<FileEntryWire>
//!
//! Host   ──[GetFileList]──► Target
//! Target ──[FileListEntry]► Host        (repeated, device order)
//! Target ──[FileListEnd]──► Host
//! ```

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::catalog::{RemoteFileCatalogEntry, fat_or_zero, from_fat_timestamp};
use crate::error::LinkError;

/// Default chunk size for `AppendFile` (16 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

// ── Requests ─────────────────────────────────────────────────────

/// Opens a new file on the target's storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateFileRequest {
    pub path: String,
    /// Announced total size so the target can preallocate.
    pub size: u64,
    pub fat_date: u16,
    pub fat_time: u16,
}

impl CreateFileRequest {
    pub fn new(path: impl Into<String>, size: u64, timestamp: Option<&NaiveDateTime>) -> Self {
        let (fat_date, fat_time) = fat_or_zero(timestamp);
        Self {
            path: path.into(),
            size,
            fat_date,
            fat_time,
        }
    }
}

/// Closes the open file and stamps it; also used for `CreateDirectory`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StampedPathRequest {
    pub path: String,
    pub fat_date: u16,
    pub fat_time: u16,
}

impl StampedPathRequest {
    pub fn new(path: impl Into<String>, timestamp: Option<&NaiveDateTime>) -> Self {
        let (fat_date, fat_time) = fat_or_zero(timestamp);
        Self {
            path: path.into(),
            fat_date,
            fat_time,
        }
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        from_fat_timestamp(self.fat_date, self.fat_time)
    }
}

/// Path-only request: `ChangeWorkingDirectory`, `DeleteFile`, `GetFileInfo`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathRequest {
    pub path: String,
}

// ── Replies ──────────────────────────────────────────────────────

/// One catalog entry as carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntryWire {
    pub path: String,
    pub size: u64,
    pub fat_date: u16,
    pub fat_time: u16,
    pub is_directory: bool,
}

impl From<FileEntryWire> for RemoteFileCatalogEntry {
    fn from(wire: FileEntryWire) -> Self {
        RemoteFileCatalogEntry::new(
            wire.path,
            from_fat_timestamp(wire.fat_date, wire.fat_time),
            wire.size,
            wire.is_directory,
        )
    }
}

impl From<&RemoteFileCatalogEntry> for FileEntryWire {
    fn from(entry: &RemoteFileCatalogEntry) -> Self {
        let (fat_date, fat_time) = fat_or_zero(entry.timestamp().as_ref());
        Self {
            path: entry.path().to_string(),
            size: entry.size_bytes(),
            fat_date,
            fat_time,
            is_directory: entry.is_directory(),
        }
    }
}

/// Result code of a one-shot storage operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStatus {
    Ok,
    NotFound,
    Exists,
    Denied,
    NoStorage,
    /// Any other firmware error code.
    Failed(u8),
}

impl FileStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, FileStatus::Ok)
    }

    pub fn code(&self) -> u8 {
        match self {
            FileStatus::Ok => 0,
            FileStatus::NotFound => 1,
            FileStatus::Exists => 2,
            FileStatus::Denied => 3,
            FileStatus::NoStorage => 4,
            FileStatus::Failed(code) => *code,
        }
    }
}

impl From<u8> for FileStatus {
    fn from(code: u8) -> Self {
        match code {
            0 => FileStatus::Ok,
            1 => FileStatus::NotFound,
            2 => FileStatus::Exists,
            3 => FileStatus::Denied,
            4 => FileStatus::NoStorage,
            other => FileStatus::Failed(other),
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStatus::Ok => write!(f, "ok"),
            FileStatus::NotFound => write!(f, "not found"),
            FileStatus::Exists => write!(f, "already exists"),
            FileStatus::Denied => write!(f, "access denied"),
            FileStatus::NoStorage => write!(f, "no storage mounted"),
            FileStatus::Failed(code) => write!(f, "failed with code {code}"),
        }
    }
}

/// Payload of a `FileResult` reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileResultWire {
    /// The storage opcode this result answers.
    pub opcode: u16,
    pub code: u8,
}

// ── Transfer state ───────────────────────────────────────────────

/// Per-transfer state of a Create/Append/Close upload.
///
/// ```text
///  Idle ──CreateFile──► Open ──AppendFile──► Open ──CloseFile──► Idle
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FileTransfer {
    #[default]
    Idle,
    Open {
        path: String,
        announced: u64,
        written: u64,
    },
}

impl FileTransfer {
    pub fn is_open(&self) -> bool {
        matches!(self, FileTransfer::Open { .. })
    }

    /// Transition to `Open`.
    ///
    /// Valid from: `Idle`.
    pub fn begin(&mut self, path: &str, announced: u64) -> Result<(), LinkError> {
        let was_open = self.is_open();
        *self = FileTransfer::Open {
            path: path.to_string(),
            announced,
            written: 0,
        };
        if was_open {
            return Err(LinkError::ProtocolViolation(
                "create file while another transfer is open",
            ));
        }
        Ok(())
    }

    /// Account for one appended chunk.
    ///
    /// Valid from: `Open`.
    pub fn append(&mut self, len: usize) -> Result<(), LinkError> {
        match self {
            FileTransfer::Open { written, .. } => {
                *written += len as u64;
                Ok(())
            }
            FileTransfer::Idle => Err(LinkError::ProtocolViolation(
                "append without an open transfer",
            )),
        }
    }

    /// Transition back to `Idle`, returning the bytes written.
    ///
    /// Valid from: `Open`.
    pub fn finish(&mut self) -> Result<u64, LinkError> {
        match std::mem::take(self) {
            FileTransfer::Open { written, .. } => Ok(written),
            FileTransfer::Idle => Err(LinkError::ProtocolViolation(
                "close without an open transfer",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn wire_entry_converts_to_catalog_entry() {
        let ts = NaiveDate::from_ymd_opt(2023, 11, 5)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap();
        let entry = RemoteFileCatalogEntry::new("/patches/p1.bin", Some(ts), 4096, false);
        let wire = FileEntryWire::from(&entry);
        assert_eq!(RemoteFileCatalogEntry::from(wire), entry);
    }

    #[test]
    fn status_codes() {
        assert_eq!(FileStatus::from(0), FileStatus::Ok);
        assert_eq!(FileStatus::from(2), FileStatus::Exists);
        assert_eq!(FileStatus::from(77), FileStatus::Failed(77));
        assert_eq!(FileStatus::Failed(77).code(), 77);
        assert!(FileStatus::Ok.is_ok());
        assert!(!FileStatus::Denied.is_ok());
    }

    #[test]
    fn transfer_happy_path() {
        let mut t = FileTransfer::default();
        t.begin("/patches/p1.bin", 8).unwrap();
        t.append(4).unwrap();
        t.append(4).unwrap();
        assert_eq!(t.finish().unwrap(), 8);
        assert_eq!(t, FileTransfer::Idle);
    }

    #[test]
    fn transfer_rejects_append_when_idle() {
        let mut t = FileTransfer::default();
        assert!(t.append(1).is_err());
        assert!(t.finish().is_err());
    }

    #[test]
    fn transfer_restart_reports_violation_but_opens() {
        let mut t = FileTransfer::default();
        t.begin("/a", 1).unwrap();
        assert!(t.begin("/b", 2).is_err());
        assert!(matches!(t, FileTransfer::Open { ref path, .. } if path == "/b"));
    }
}
