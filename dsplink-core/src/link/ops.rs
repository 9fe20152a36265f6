//! Transmit operations.
//!
//! Each call queues one command and returns as soon as the dispatcher has
//! accepted it: `Ok(())` is accepted and queued, otherwise the
//! [`QueueError`] says why not. Replies arrive later through the gates.

use bytes::Bytes;
use chrono::NaiveDateTime;

use crate::error::QueueError;
use crate::link::Link;
use crate::protocol::realtime::MidiMessage;
use crate::task::CommandTask;

impl Link {
    // ── Lifecycle ────────────────────────────────────────────────

    /// Liveness probe; the reply refreshes storage and flag status.
    pub fn transmit_ping(&self) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::Ping)
    }

    pub fn transmit_start(&self) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::Start)
    }

    pub fn transmit_stop(&self) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::Stop)
    }

    // ── Storage ──────────────────────────────────────────────────

    /// List the working directory; read-ack when the listing is complete.
    pub fn transmit_get_file_list(&self) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::GetFileList)
    }

    pub fn transmit_get_file_info(&self, path: &str) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::GetFileInfo {
            path: path.to_string(),
        })
    }

    pub fn transmit_create_file(
        &self,
        path: &str,
        size: u64,
        timestamp: Option<NaiveDateTime>,
    ) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::CreateFile {
            path: path.to_string(),
            size,
            timestamp,
        })
    }

    pub fn transmit_append_file(&self, data: impl Into<Bytes>) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::AppendFile { data: data.into() })
    }

    pub fn transmit_close_file(
        &self,
        path: &str,
        timestamp: Option<NaiveDateTime>,
    ) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::CloseFile {
            path: path.to_string(),
            timestamp,
        })
    }

    pub fn transmit_create_directory(
        &self,
        path: &str,
        timestamp: Option<NaiveDateTime>,
    ) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::CreateDirectory {
            path: path.to_string(),
            timestamp,
        })
    }

    pub fn transmit_change_working_directory(&self, path: &str) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::ChangeWorkingDirectory {
            path: path.to_string(),
        })
    }

    pub fn transmit_delete_file(&self, path: &str) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::DeleteFile {
            path: path.to_string(),
        })
    }

    /// Write one chunk of a larger payload at `offset` from the patch base.
    pub fn upload_fragment(&self, buffer: &[u8], offset: u32) -> Result<(), QueueError> {
        let base = self.shared.device.read().profile.patch_base_address;
        self.append_to_queue(CommandTask::UploadFragment {
            address: base.wrapping_add(offset),
            data: Bytes::copy_from_slice(buffer),
        })
    }

    // ── Memory / firmware ────────────────────────────────────────

    pub fn transmit_memory_read(&self, address: u32, length: u32) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::MemoryRead { address, length })
    }

    pub fn transmit_memory_read_1word(&self, address: u32) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::MemoryRead1Word { address })
    }

    pub fn transmit_get_fw_version(&self) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::GetFwVersion)
    }

    pub fn transmit_get_spilink_synced(&self) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::GetSpilinkSynced)
    }

    pub fn transmit_costs(&self) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::Costs)
    }

    /// Persist the RAM image. Nothing queued after it is written until the
    /// target acknowledges the flash write.
    pub fn transmit_copy_to_flash(&self) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::CopyToFlash)
    }

    /// Reboot the target into firmware-update mode. The link disconnects
    /// once the command is written.
    pub fn transmit_bring_to_dfu(&self) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::BringToDfu)
    }

    // ── Real-time ────────────────────────────────────────────────

    pub fn transmit_recall_preset(&self, index: u16) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::RecallPreset { index })
    }

    pub fn transmit_updated_preset(&self, data: impl Into<Bytes>) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::UpdatedPreset { data: data.into() })
    }

    /// Forward one MIDI message; bytes are sent exactly as given.
    pub fn transmit_midi(&self, m0: u8, m1: u8, m2: u8) -> Result<(), QueueError> {
        self.append_to_queue(CommandTask::Midi(MidiMessage::new(m0, m1, m2)))
    }
}
