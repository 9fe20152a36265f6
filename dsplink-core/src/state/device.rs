//! Cached device state, written by the dispatcher thread only.
//!
//! Each reply overwrites the matching slot. Readers observe the gate the
//! reply is correlated with before reading the slot.

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::catalog::RemoteFileCatalogEntry;
use crate::flags::ConnectionFlags;
use crate::message::Opcode;
use crate::protocol::file::{FileStatus, FileTransfer};
use crate::protocol::memory::{DspCosts, FirmwareVersion};
use crate::protocol::response::DeviceResponse;

/// What the target is and where patches go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetProfile {
    pub model: String,
    pub patch_base_address: u32,
    pub patch_max_size: u32,
    /// Last version the target reported.
    pub firmware: Option<FirmwareVersion>,
}

impl Default for TargetProfile {
    fn default() -> Self {
        Self {
            model: "generic".to_string(),
            patch_base_address: 0x2001_1000,
            patch_max_size: 0x0001_0000,
            firmware: None,
        }
    }
}

/// Which gate, if any, a reply releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    None,
    WriteAck,
    ReadAck,
    /// A status snapshot; both status channels get the new values.
    Status {
        flags: ConnectionFlags,
        storage_present: bool,
    },
}

#[derive(Debug, Clone, Default)]
pub struct DeviceCache {
    pub flags: ConnectionFlags,
    pub storage_present: bool,
    pub dsp_load_percent: u8,
    pub profile: TargetProfile,
    pub memory_address: u32,
    pub memory: Bytes,
    pub word_address: u32,
    pub word: u32,
    /// Listing published by the last `FileListEnd`, in device order.
    pub file_list: Vec<RemoteFileCatalogEntry>,
    pending_list: Vec<RemoteFileCatalogEntry>,
    pub file_info: Option<RemoteFileCatalogEntry>,
    pub file_status: Option<FileStatus>,
    pub spilink_synced: bool,
    pub costs: DspCosts,
    pub last_ack: Option<u16>,
    pub transfer: FileTransfer,
}

impl DeviceCache {
    pub fn new(profile: TargetProfile) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }

    /// Forget everything learned from the previous session.
    pub fn reset(&mut self) {
        let profile = TargetProfile {
            firmware: None,
            ..self.profile.clone()
        };
        *self = Self::new(profile);
    }

    /// Store `response` and report which gate it releases.
    pub fn apply(&mut self, response: DeviceResponse) -> Correlation {
        match response {
            DeviceResponse::Ack { opcode } => {
                self.last_ack = Some(opcode);
                Correlation::WriteAck
            }
            DeviceResponse::Status(status) => {
                let flags = status.connection_flags();
                self.flags = flags;
                self.storage_present = status.storage_present;
                self.dsp_load_percent = status.dsp_load_percent;
                Correlation::Status {
                    flags,
                    storage_present: status.storage_present,
                }
            }
            DeviceResponse::Log(text) => {
                info!(target: "dsplink::device", "{}", text.trim_end());
                Correlation::None
            }
            DeviceResponse::FileResult { opcode, status } => {
                if !status.is_ok() {
                    let opcode = Opcode::try_from(opcode)
                        .map(|op| op.to_string())
                        .unwrap_or_else(|_| format!("{opcode:#06x}"));
                    debug!(%opcode, %status, "storage operation failed on target");
                }
                self.file_status = Some(status);
                Correlation::ReadAck
            }
            DeviceResponse::FileInfo(entry) => {
                self.file_info = entry;
                Correlation::ReadAck
            }
            DeviceResponse::FileListEntry(entry) => {
                self.pending_list.push(entry);
                Correlation::None
            }
            DeviceResponse::FileListEnd => {
                self.file_list = std::mem::take(&mut self.pending_list);
                Correlation::ReadAck
            }
            DeviceResponse::MemoryData { address, data } => {
                self.memory_address = address;
                self.memory = data;
                Correlation::ReadAck
            }
            DeviceResponse::Word { address, value } => {
                self.word_address = address;
                self.word = value;
                Correlation::ReadAck
            }
            DeviceResponse::FirmwareVersion(version) => {
                self.profile.firmware = Some(version);
                Correlation::ReadAck
            }
            DeviceResponse::SpilinkSynced(synced) => {
                self.spilink_synced = synced;
                Correlation::ReadAck
            }
            DeviceResponse::Costs(costs) => {
                self.costs = costs;
                Correlation::ReadAck
            }
        }
    }

    /// Track a written storage command against the open transfer.
    ///
    /// Violations are logged; the target is the authority on whether the
    /// command succeeds.
    pub fn track_transfer(&mut self, opcode: Opcode, path: Option<&str>, len: usize, size: u64) {
        let result = match opcode {
            Opcode::CreateFile => self.transfer.begin(path.unwrap_or_default(), size),
            Opcode::AppendFile => self.transfer.append(len),
            Opcode::CloseFile => self.transfer.finish().map(|written| {
                debug!(written, "file transfer closed");
            }),
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!(%opcode, error = %e, "file transfer out of sequence");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::realtime::DeviceStatus;

    #[test]
    fn listing_is_published_on_end() {
        let mut cache = DeviceCache::default();
        let a = RemoteFileCatalogEntry::new("/b.bin", None, 1, false);
        let b = RemoteFileCatalogEntry::new("/a.bin", None, 2, false);
        assert_eq!(
            cache.apply(DeviceResponse::FileListEntry(a.clone())),
            Correlation::None
        );
        cache.apply(DeviceResponse::FileListEntry(b.clone()));
        assert!(cache.file_list.is_empty());
        assert_eq!(cache.apply(DeviceResponse::FileListEnd), Correlation::ReadAck);
        // Device order, not sorted.
        assert_eq!(cache.file_list, vec![a, b]);
    }

    #[test]
    fn status_updates_flags_and_storage() {
        let mut cache = DeviceCache::default();
        let corr = cache.apply(DeviceResponse::Status(DeviceStatus {
            flags: ConnectionFlags::DSP_RUNNING.bits(),
            storage_present: true,
            dsp_load_percent: 40,
        }));
        assert_eq!(
            corr,
            Correlation::Status {
                flags: ConnectionFlags::DSP_RUNNING,
                storage_present: true
            }
        );
        assert!(cache.storage_present);
        assert_eq!(cache.dsp_load_percent, 40);
    }

    #[test]
    fn ack_releases_write_gate() {
        let mut cache = DeviceCache::default();
        assert_eq!(
            cache.apply(DeviceResponse::ack(Opcode::AppendFile)),
            Correlation::WriteAck
        );
        assert_eq!(cache.last_ack, Some(Opcode::AppendFile as u16));
    }

    #[test]
    fn memory_read_overwrites_buffer() {
        let mut cache = DeviceCache::default();
        cache.apply(DeviceResponse::MemoryData {
            address: 0x10,
            data: Bytes::from_static(&[1, 2]),
        });
        cache.apply(DeviceResponse::MemoryData {
            address: 0x20,
            data: Bytes::from_static(&[3]),
        });
        assert_eq!(cache.memory_address, 0x20);
        assert_eq!(&cache.memory[..], &[3]);
    }

    #[test]
    fn reset_keeps_configured_profile() {
        let mut cache = DeviceCache::new(TargetProfile {
            model: "axo".into(),
            ..TargetProfile::default()
        });
        cache.apply(DeviceResponse::FirmwareVersion(FirmwareVersion::default()));
        cache.storage_present = true;
        cache.reset();
        assert_eq!(cache.profile.model, "axo");
        assert!(cache.profile.firmware.is_none());
        assert!(!cache.storage_present);
    }

    #[test]
    fn transfer_tracking_follows_commands() {
        let mut cache = DeviceCache::default();
        cache.track_transfer(Opcode::CreateFile, Some("/x"), 0, 4);
        cache.track_transfer(Opcode::AppendFile, None, 4, 0);
        assert!(cache.transfer.is_open());
        cache.track_transfer(Opcode::CloseFile, Some("/x"), 0, 0);
        assert!(!cache.transfer.is_open());
    }
}
