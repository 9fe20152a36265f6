//! Frame opcodes.
//!
//! Uses a proper enum with `TryFrom`; unknown values are errors, not panics.

use crate::error::LinkError;
use std::fmt;

/// Every opcode understood by the link protocol.
///
/// Organized by category:
/// - `0x0001..0x00FF` – Lifecycle (ping, DSP run state)
/// - `0x0100..0x01FF` – Remote storage
/// - `0x0200..0x02FF` – Memory and firmware
/// - `0x0300..0x03FF` – Real-time control
/// - `0x8000..`       – Replies sent by the target
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ── Lifecycle (0x00xx) ───────────────────────────────────────
    /// Liveness probe; answered with a status reply.
    Ping = 0x0001,
    /// Start the DSP loop.
    Start = 0x0002,
    /// Stop the DSP loop.
    Stop = 0x0003,

    // ── Storage (0x01xx) ─────────────────────────────────────────
    /// Enumerate the current working directory.
    GetFileList = 0x0101,
    /// Describe a single path.
    GetFileInfo = 0x0102,
    /// Open a new file for writing.
    CreateFile = 0x0103,
    /// Append a chunk to the open file.
    AppendFile = 0x0104,
    /// Close the open file and stamp it.
    CloseFile = 0x0105,
    /// Create a directory.
    CreateDirectory = 0x0106,
    /// Change the working directory.
    ChangeWorkingDirectory = 0x0107,
    /// Delete a file or empty directory.
    DeleteFile = 0x0108,

    // ── Memory / firmware (0x02xx) ───────────────────────────────
    /// Read a block of target memory.
    MemoryRead = 0x0201,
    /// Read one 32-bit word of target memory.
    MemoryRead1Word = 0x0202,
    /// Write a block of target memory.
    MemoryWrite = 0x0203,
    /// Query the firmware version.
    GetFwVersion = 0x0204,
    /// Query whether the SPI link to a companion board is in sync.
    GetSpilinkSynced = 0x0205,
    /// Query DSP load figures.
    Costs = 0x0206,
    /// Persist the in-RAM patch image to flash.
    CopyToFlash = 0x0207,
    /// Reboot into firmware-update mode.
    BringToDfu = 0x0208,

    // ── Real-time (0x03xx) ───────────────────────────────────────
    /// Select a stored preset.
    RecallPreset = 0x0301,
    /// Push a modified preset payload.
    UpdatedPreset = 0x0302,
    /// Forward one 3-byte MIDI message.
    Midi = 0x0303,

    // ── Replies (0x8xxx) ─────────────────────────────────────────
    /// Write acknowledgement, payload is the acknowledged opcode.
    Ack = 0x8001,
    /// Status snapshot (flags, storage, DSP load).
    Status = 0x8002,
    /// Free-form text printed by the firmware.
    Log = 0x8003,
    /// Result code of a one-shot storage operation.
    FileResult = 0x8101,
    /// Reply to `GetFileInfo`.
    FileInfo = 0x8102,
    /// One entry of a directory listing.
    FileListEntry = 0x8103,
    /// End of a directory listing.
    FileListEnd = 0x8104,
    /// Reply to `MemoryRead`.
    MemoryData = 0x8201,
    /// Reply to `MemoryRead1Word`.
    Word = 0x8202,
    /// Reply to `GetFwVersion`.
    FirmwareVersion = 0x8203,
    /// Reply to `GetSpilinkSynced`.
    SpilinkSynced = 0x8204,
    /// Reply to `Costs`.
    DspCosts = 0x8206,
}

impl TryFrom<u16> for Opcode {
    type Error = LinkError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Opcode::Ping),
            0x0002 => Ok(Opcode::Start),
            0x0003 => Ok(Opcode::Stop),

            0x0101 => Ok(Opcode::GetFileList),
            0x0102 => Ok(Opcode::GetFileInfo),
            0x0103 => Ok(Opcode::CreateFile),
            0x0104 => Ok(Opcode::AppendFile),
            0x0105 => Ok(Opcode::CloseFile),
            0x0106 => Ok(Opcode::CreateDirectory),
            0x0107 => Ok(Opcode::ChangeWorkingDirectory),
            0x0108 => Ok(Opcode::DeleteFile),

            0x0201 => Ok(Opcode::MemoryRead),
            0x0202 => Ok(Opcode::MemoryRead1Word),
            0x0203 => Ok(Opcode::MemoryWrite),
            0x0204 => Ok(Opcode::GetFwVersion),
            0x0205 => Ok(Opcode::GetSpilinkSynced),
            0x0206 => Ok(Opcode::Costs),
            0x0207 => Ok(Opcode::CopyToFlash),
            0x0208 => Ok(Opcode::BringToDfu),

            0x0301 => Ok(Opcode::RecallPreset),
            0x0302 => Ok(Opcode::UpdatedPreset),
            0x0303 => Ok(Opcode::Midi),

            0x8001 => Ok(Opcode::Ack),
            0x8002 => Ok(Opcode::Status),
            0x8003 => Ok(Opcode::Log),
            0x8101 => Ok(Opcode::FileResult),
            0x8102 => Ok(Opcode::FileInfo),
            0x8103 => Ok(Opcode::FileListEntry),
            0x8104 => Ok(Opcode::FileListEnd),
            0x8201 => Ok(Opcode::MemoryData),
            0x8202 => Ok(Opcode::Word),
            0x8203 => Ok(Opcode::FirmwareVersion),
            0x8204 => Ok(Opcode::SpilinkSynced),
            0x8206 => Ok(Opcode::DspCosts),

            _ => Err(LinkError::UnknownVariant {
                type_name: "Opcode",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Opcode {
    /// Returns `true` for opcodes sent by the target.
    pub fn is_reply(&self) -> bool {
        (*self as u16) & 0x8000 != 0
    }
}
