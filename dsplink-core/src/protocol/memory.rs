//! Memory access and firmware metadata payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Request for `length` bytes starting at `address`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryReadRequest {
    pub address: u32,
    pub length: u32,
}

/// Request for the 32-bit word at `address`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WordReadRequest {
    pub address: u32,
}

/// A block of target memory, written by `MemoryWrite` and returned
/// by `MemoryData`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryBlock {
    pub address: u32,
    pub data: Vec<u8>,
}

/// Reply to a single-word read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WordValue {
    pub address: u32,
    pub value: u32,
}

/// Firmware version reported by the target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub build: u8,
    /// CRC of the running firmware image.
    pub crc: u32,
    /// Address the firmware jumps to when starting a patch.
    pub patch_entry_address: u32,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{} (crc {:08x})",
            self.major, self.minor, self.patch, self.build, self.crc
        )
    }
}

/// DSP load figures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DspCosts {
    pub dsp_load_percent: u8,
    pub cycles_per_frame: u32,
}
