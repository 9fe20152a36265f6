//! Blocking request/reply workflows built on the transmit operations.
//!
//! Each step arms the gate its reply releases, queues the command, then
//! waits up to the configured response timeout. Workflows hold the link's
//! workflow lock, so two of them never share a gate.

use std::time::Duration;

use bytes::Bytes;
use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::catalog::RemoteFileCatalogEntry;
use crate::error::LinkError;
use crate::link::{outcome_to_result, Link};
use crate::protocol::file::FileStatus;
use crate::protocol::memory::{DspCosts, FirmwareVersion};
use crate::protocol::realtime::DeviceStatus;
use crate::state::SyncGate;
use crate::task::CommandTask;

impl Link {
    fn response_timeout(&self) -> Duration {
        self.config.response_timeout()
    }

    fn await_gate(&self, gate: &SyncGate, task: CommandTask) -> Result<(), LinkError> {
        let timeout = self.response_timeout();
        gate.clear();
        self.append_to_queue(task)?;
        outcome_to_result(gate.wait_outcome(Some(timeout)), timeout)
    }

    fn await_write_ack(&self, task: CommandTask) -> Result<(), LinkError> {
        self.await_gate(&self.shared.write_gate, task)
    }

    fn await_read_ack(&self, task: CommandTask) -> Result<(), LinkError> {
        self.await_gate(&self.shared.read_gate, task)
    }

    /// Run a storage command answered by a file status and fail on any
    /// status other than `Ok`.
    fn storage_request(&self, path: &str, task: CommandTask) -> Result<(), LinkError> {
        self.await_read_ack(task)?;
        match self.last_file_status() {
            Some(FileStatus::Ok) => Ok(()),
            Some(status) => Err(LinkError::FileOperation {
                path: path.to_string(),
                status,
            }),
            None => Err(LinkError::ProtocolViolation("storage reply without status")),
        }
    }

    // ── Acknowledged commands ────────────────────────────────────

    /// Send `task` and wait for the target's ack.
    pub fn request_ack(&self, task: CommandTask) -> Result<(), LinkError> {
        let _workflow = self.workflow.lock();
        self.await_write_ack(task)
    }

    /// Probe the target and return the status it reports.
    pub fn ping_device(&self) -> Result<DeviceStatus, LinkError> {
        let _workflow = self.workflow.lock();
        self.await_gate(&self.shared.status_gate, CommandTask::Ping)?;
        let device = self.shared.device.read();
        Ok(DeviceStatus {
            flags: device.flags.bits(),
            storage_present: device.storage_present,
            dsp_load_percent: device.dsp_load_percent,
        })
    }

    // ── Storage ──────────────────────────────────────────────────

    /// Write `data` to `remote_path` as create, appends, close.
    ///
    /// Every command waits for its ack before the next is queued. An
    /// empty file is just created and closed.
    pub fn upload_file(
        &self,
        remote_path: &str,
        data: &[u8],
        timestamp: Option<NaiveDateTime>,
    ) -> Result<(), LinkError> {
        let _workflow = self.workflow.lock();
        let chunk_size = self.config.chunk_size();

        self.await_write_ack(CommandTask::CreateFile {
            path: remote_path.to_string(),
            size: data.len() as u64,
            timestamp,
        })?;
        for (index, chunk) in data.chunks(chunk_size).enumerate() {
            self.await_write_ack(CommandTask::AppendFile {
                data: Bytes::copy_from_slice(chunk),
            })?;
            debug!(path = remote_path, chunk = index, len = chunk.len(), "chunk acknowledged");
        }
        self.await_write_ack(CommandTask::CloseFile {
            path: remote_path.to_string(),
            timestamp,
        })?;

        info!(path = remote_path, bytes = data.len(), "upload complete");
        Ok(())
    }

    /// List `dir` (or the working directory when `None`).
    pub fn file_list(&self, dir: Option<&str>) -> Result<Vec<RemoteFileCatalogEntry>, LinkError> {
        let _workflow = self.workflow.lock();
        if let Some(dir) = dir {
            self.storage_request(
                dir,
                CommandTask::ChangeWorkingDirectory {
                    path: dir.to_string(),
                },
            )?;
        }
        self.await_read_ack(CommandTask::GetFileList)?;
        Ok(self.last_file_list())
    }

    /// Catalog entry for `path`, or `None` when the target has no such file.
    pub fn file_info(&self, path: &str) -> Result<Option<RemoteFileCatalogEntry>, LinkError> {
        let _workflow = self.workflow.lock();
        self.await_read_ack(CommandTask::GetFileInfo {
            path: path.to_string(),
        })?;
        Ok(self.last_file_info())
    }

    pub fn change_directory(&self, path: &str) -> Result<(), LinkError> {
        let _workflow = self.workflow.lock();
        self.storage_request(
            path,
            CommandTask::ChangeWorkingDirectory {
                path: path.to_string(),
            },
        )
    }

    pub fn create_directory(
        &self,
        path: &str,
        timestamp: Option<NaiveDateTime>,
    ) -> Result<(), LinkError> {
        let _workflow = self.workflow.lock();
        self.storage_request(
            path,
            CommandTask::CreateDirectory {
                path: path.to_string(),
                timestamp,
            },
        )
    }

    pub fn delete_file(&self, path: &str) -> Result<(), LinkError> {
        let _workflow = self.workflow.lock();
        self.storage_request(
            path,
            CommandTask::DeleteFile {
                path: path.to_string(),
            },
        )
    }

    // ── Memory / firmware ────────────────────────────────────────

    /// Write a patch image into target RAM starting at the patch base.
    pub fn upload_patch(&self, image: &[u8]) -> Result<(), LinkError> {
        let _workflow = self.workflow.lock();
        let profile = self.target_profile();
        if image.len() > profile.patch_max_size as usize {
            return Err(LinkError::PayloadTooLarge {
                size: image.len(),
                max: profile.patch_max_size as usize,
            });
        }

        let chunk_size = self.config.chunk_size();
        for (index, chunk) in image.chunks(chunk_size).enumerate() {
            // Bounded by patch_max_size, so the offset fits.
            let offset = (index * chunk_size) as u32;
            let timeout = self.response_timeout();
            self.clear_sync();
            self.upload_fragment(chunk, offset)?;
            outcome_to_result(self.wait_sync_outcome(Some(timeout)), timeout)?;
        }

        info!(bytes = image.len(), base = profile.patch_base_address, "patch uploaded");
        Ok(())
    }

    /// Read `length` bytes of target memory.
    pub fn read_memory(&self, address: u32, length: u32) -> Result<Bytes, LinkError> {
        let _workflow = self.workflow.lock();
        self.await_read_ack(CommandTask::MemoryRead { address, length })?;
        let (replied_at, data) = self.memory_buffer();
        if replied_at != address {
            return Err(LinkError::ProtocolViolation("memory reply for another address"));
        }
        Ok(data)
    }

    pub fn read_word(&self, address: u32) -> Result<u32, LinkError> {
        let _workflow = self.workflow.lock();
        self.await_read_ack(CommandTask::MemoryRead1Word { address })?;
        let (replied_at, value) = self.word_register();
        if replied_at != address {
            return Err(LinkError::ProtocolViolation("word reply for another address"));
        }
        Ok(value)
    }

    /// Query the firmware version and record it in the target profile.
    pub fn firmware_version(&self) -> Result<FirmwareVersion, LinkError> {
        let _workflow = self.workflow.lock();
        self.await_read_ack(CommandTask::GetFwVersion)?;
        self.target_profile()
            .firmware
            .ok_or(LinkError::ProtocolViolation("read ack without firmware version"))
    }

    pub fn query_spilink_synced(&self) -> Result<bool, LinkError> {
        let _workflow = self.workflow.lock();
        self.await_read_ack(CommandTask::GetSpilinkSynced)?;
        Ok(self.spilink_synced())
    }

    pub fn query_costs(&self) -> Result<DspCosts, LinkError> {
        let _workflow = self.workflow.lock();
        self.await_read_ack(CommandTask::Costs)?;
        Ok(self.dsp_costs())
    }
}
