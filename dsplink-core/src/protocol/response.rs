//! Replies sent by the target, decoded from frames.

use bytes::Bytes;

use crate::catalog::RemoteFileCatalogEntry;
use crate::error::LinkError;
use crate::message::Opcode;
use crate::packet::Frame;
use crate::protocol::file::{FileEntryWire, FileResultWire, FileStatus};
use crate::protocol::memory::{DspCosts, FirmwareVersion, MemoryBlock, WordValue};
use crate::protocol::realtime::DeviceStatus;

/// One decoded device reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceResponse {
    /// Write acknowledgement for `opcode`.
    Ack { opcode: u16 },
    Status(DeviceStatus),
    Log(String),
    FileResult { opcode: u16, status: FileStatus },
    /// `None` when the path does not exist.
    FileInfo(Option<RemoteFileCatalogEntry>),
    FileListEntry(RemoteFileCatalogEntry),
    FileListEnd,
    MemoryData { address: u32, data: Bytes },
    Word { address: u32, value: u32 },
    FirmwareVersion(FirmwareVersion),
    SpilinkSynced(bool),
    Costs(DspCosts),
}

impl DeviceResponse {
    pub fn ack(opcode: Opcode) -> Self {
        DeviceResponse::Ack {
            opcode: opcode as u16,
        }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            DeviceResponse::Ack { .. } => Opcode::Ack,
            DeviceResponse::Status(_) => Opcode::Status,
            DeviceResponse::Log(_) => Opcode::Log,
            DeviceResponse::FileResult { .. } => Opcode::FileResult,
            DeviceResponse::FileInfo(_) => Opcode::FileInfo,
            DeviceResponse::FileListEntry(_) => Opcode::FileListEntry,
            DeviceResponse::FileListEnd => Opcode::FileListEnd,
            DeviceResponse::MemoryData { .. } => Opcode::MemoryData,
            DeviceResponse::Word { .. } => Opcode::Word,
            DeviceResponse::FirmwareVersion(_) => Opcode::FirmwareVersion,
            DeviceResponse::SpilinkSynced(_) => Opcode::SpilinkSynced,
            DeviceResponse::Costs(_) => Opcode::DspCosts,
        }
    }

    /// Decode a reply frame. Request opcodes are a protocol violation.
    pub fn from_frame(frame: &Frame) -> Result<Self, LinkError> {
        let response = match frame.opcode()? {
            Opcode::Ack => match frame.payload() {
                [lo, hi] => DeviceResponse::Ack {
                    opcode: u16::from_le_bytes([*lo, *hi]),
                },
                _ => return Err(LinkError::ProtocolViolation("ack payload must be 2 bytes")),
            },
            Opcode::Status => DeviceResponse::Status(frame.decode_body()?),
            Opcode::Log => {
                DeviceResponse::Log(String::from_utf8_lossy(frame.payload()).into_owned())
            }
            Opcode::FileResult => {
                let wire: FileResultWire = frame.decode_body()?;
                DeviceResponse::FileResult {
                    opcode: wire.opcode,
                    status: FileStatus::from(wire.code),
                }
            }
            Opcode::FileInfo => {
                let wire: Option<FileEntryWire> = frame.decode_body()?;
                DeviceResponse::FileInfo(wire.map(RemoteFileCatalogEntry::from))
            }
            Opcode::FileListEntry => {
                let wire: FileEntryWire = frame.decode_body()?;
                DeviceResponse::FileListEntry(wire.into())
            }
            Opcode::FileListEnd => DeviceResponse::FileListEnd,
            Opcode::MemoryData => {
                let block: MemoryBlock = frame.decode_body()?;
                DeviceResponse::MemoryData {
                    address: block.address,
                    data: Bytes::from(block.data),
                }
            }
            Opcode::Word => {
                let word: WordValue = frame.decode_body()?;
                DeviceResponse::Word {
                    address: word.address,
                    value: word.value,
                }
            }
            Opcode::FirmwareVersion => DeviceResponse::FirmwareVersion(frame.decode_body()?),
            Opcode::SpilinkSynced => DeviceResponse::SpilinkSynced(frame.decode_body()?),
            Opcode::DspCosts => DeviceResponse::Costs(frame.decode_body()?),
            _ => {
                return Err(LinkError::ProtocolViolation(
                    "target sent a request opcode",
                ));
            }
        };
        Ok(response)
    }

    /// Encode as a frame, the way the target would send it.
    pub fn to_frame(&self) -> Result<Frame, LinkError> {
        let opcode = self.opcode();
        match self {
            DeviceResponse::Ack { opcode: acked } => {
                Frame::new(opcode, acked.to_le_bytes().to_vec())
            }
            DeviceResponse::Status(status) => Frame::encode(opcode, status),
            DeviceResponse::Log(text) => Frame::new(opcode, text.clone().into_bytes()),
            DeviceResponse::FileResult { opcode: answered, status } => Frame::encode(
                opcode,
                &FileResultWire {
                    opcode: *answered,
                    code: status.code(),
                },
            ),
            DeviceResponse::FileInfo(entry) => {
                let wire = entry.as_ref().map(FileEntryWire::from);
                Frame::encode(opcode, &wire)
            }
            DeviceResponse::FileListEntry(entry) => {
                Frame::encode(opcode, &FileEntryWire::from(entry))
            }
            DeviceResponse::FileListEnd => Ok(Frame::empty(opcode)),
            DeviceResponse::MemoryData { address, data } => Frame::encode(
                opcode,
                &MemoryBlock {
                    address: *address,
                    data: data.to_vec(),
                },
            ),
            DeviceResponse::Word { address, value } => Frame::encode(
                opcode,
                &WordValue {
                    address: *address,
                    value: *value,
                },
            ),
            DeviceResponse::FirmwareVersion(version) => Frame::encode(opcode, version),
            DeviceResponse::SpilinkSynced(synced) => Frame::encode(opcode, synced),
            DeviceResponse::Costs(costs) => Frame::encode(opcode, costs),
        }
    }
}
