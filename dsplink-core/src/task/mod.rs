//! Commands queued for the dispatcher thread.
//!
//! A [`CommandTask`] is owned by the caller until it is enqueued, then by
//! the [`CommandQueue`], then dropped once the dispatcher has written it.

pub mod dispatcher;
pub mod queue;

use bytes::Bytes;
use chrono::NaiveDateTime;

use crate::catalog::from_fat_timestamp;
use crate::error::LinkError;
use crate::message::Opcode;
use crate::packet::Frame;
use crate::protocol::file::{CreateFileRequest, PathRequest, StampedPathRequest};
use crate::protocol::memory::{MemoryBlock, MemoryReadRequest, WordReadRequest};
use crate::protocol::realtime::{MidiMessage, PresetRecall};

pub use dispatcher::{
    Dispatcher, DispatcherSettings, ExitReason, ExitReport, Executor, Flow, QueueHandle,
};
pub use queue::{CommandQueue, Popped};

/// One unit of work for the dispatcher: every transmit kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandTask {
    // ── Lifecycle ────────────────────────────────────────────────
    Ping,
    Start,
    Stop,

    // ── Storage ──────────────────────────────────────────────────
    GetFileList,
    GetFileInfo {
        path: String,
    },
    CreateFile {
        path: String,
        size: u64,
        timestamp: Option<NaiveDateTime>,
    },
    AppendFile {
        data: Bytes,
    },
    CloseFile {
        path: String,
        timestamp: Option<NaiveDateTime>,
    },
    CreateDirectory {
        path: String,
        timestamp: Option<NaiveDateTime>,
    },
    ChangeWorkingDirectory {
        path: String,
    },
    DeleteFile {
        path: String,
    },

    // ── Memory / firmware ────────────────────────────────────────
    /// One chunk of a larger payload, written at an absolute address.
    UploadFragment {
        address: u32,
        data: Bytes,
    },
    MemoryRead {
        address: u32,
        length: u32,
    },
    MemoryRead1Word {
        address: u32,
    },
    GetFwVersion,
    GetSpilinkSynced,
    Costs,
    CopyToFlash,
    BringToDfu,

    // ── Real-time ────────────────────────────────────────────────
    RecallPreset {
        index: u16,
    },
    UpdatedPreset {
        data: Bytes,
    },
    Midi(MidiMessage),
}

impl CommandTask {
    pub fn opcode(&self) -> Opcode {
        match self {
            CommandTask::Ping => Opcode::Ping,
            CommandTask::Start => Opcode::Start,
            CommandTask::Stop => Opcode::Stop,
            CommandTask::GetFileList => Opcode::GetFileList,
            CommandTask::GetFileInfo { .. } => Opcode::GetFileInfo,
            CommandTask::CreateFile { .. } => Opcode::CreateFile,
            CommandTask::AppendFile { .. } => Opcode::AppendFile,
            CommandTask::CloseFile { .. } => Opcode::CloseFile,
            CommandTask::CreateDirectory { .. } => Opcode::CreateDirectory,
            CommandTask::ChangeWorkingDirectory { .. } => Opcode::ChangeWorkingDirectory,
            CommandTask::DeleteFile { .. } => Opcode::DeleteFile,
            CommandTask::UploadFragment { .. } => Opcode::MemoryWrite,
            CommandTask::MemoryRead { .. } => Opcode::MemoryRead,
            CommandTask::MemoryRead1Word { .. } => Opcode::MemoryRead1Word,
            CommandTask::GetFwVersion => Opcode::GetFwVersion,
            CommandTask::GetSpilinkSynced => Opcode::GetSpilinkSynced,
            CommandTask::Costs => Opcode::Costs,
            CommandTask::CopyToFlash => Opcode::CopyToFlash,
            CommandTask::BringToDfu => Opcode::BringToDfu,
            CommandTask::RecallPreset { .. } => Opcode::RecallPreset,
            CommandTask::UpdatedPreset { .. } => Opcode::UpdatedPreset,
            CommandTask::Midi(_) => Opcode::Midi,
        }
    }

    /// The dispatcher holds at a barrier until the target acknowledges it.
    pub fn is_barrier(&self) -> bool {
        matches!(self, CommandTask::CopyToFlash)
    }

    /// The target leaves the link once this is written.
    pub fn ends_connection(&self) -> bool {
        matches!(self, CommandTask::BringToDfu)
    }

    /// Encode as a wire frame.
    pub fn to_frame(&self) -> Result<Frame, LinkError> {
        let opcode = self.opcode();
        match self {
            CommandTask::Ping
            | CommandTask::Start
            | CommandTask::Stop
            | CommandTask::GetFileList
            | CommandTask::GetFwVersion
            | CommandTask::GetSpilinkSynced
            | CommandTask::Costs
            | CommandTask::CopyToFlash
            | CommandTask::BringToDfu => Ok(Frame::empty(opcode)),

            CommandTask::GetFileInfo { path }
            | CommandTask::ChangeWorkingDirectory { path }
            | CommandTask::DeleteFile { path } => {
                Frame::encode(opcode, &PathRequest { path: path.clone() })
            }
            CommandTask::CreateFile {
                path,
                size,
                timestamp,
            } => Frame::encode(
                opcode,
                &CreateFileRequest::new(path.clone(), *size, timestamp.as_ref()),
            ),
            CommandTask::CloseFile { path, timestamp }
            | CommandTask::CreateDirectory { path, timestamp } => Frame::encode(
                opcode,
                &StampedPathRequest::new(path.clone(), timestamp.as_ref()),
            ),
            CommandTask::AppendFile { data } | CommandTask::UpdatedPreset { data } => {
                Frame::new(opcode, data.clone())
            }
            CommandTask::UploadFragment { address, data } => Frame::encode(
                opcode,
                &MemoryBlock {
                    address: *address,
                    data: data.to_vec(),
                },
            ),
            CommandTask::MemoryRead { address, length } => Frame::encode(
                opcode,
                &MemoryReadRequest {
                    address: *address,
                    length: *length,
                },
            ),
            CommandTask::MemoryRead1Word { address } => {
                Frame::encode(opcode, &WordReadRequest { address: *address })
            }
            CommandTask::RecallPreset { index } => {
                Frame::encode(opcode, &PresetRecall { index: *index })
            }
            CommandTask::Midi(msg) => Frame::new(opcode, msg.bytes().to_vec()),
        }
    }

    /// Decode a request frame, the way the target reads it.
    pub fn from_frame(frame: &Frame) -> Result<Self, LinkError> {
        let task = match frame.opcode()? {
            Opcode::Ping => CommandTask::Ping,
            Opcode::Start => CommandTask::Start,
            Opcode::Stop => CommandTask::Stop,
            Opcode::GetFileList => CommandTask::GetFileList,
            Opcode::GetFileInfo => CommandTask::GetFileInfo {
                path: frame.decode_body::<PathRequest>()?.path,
            },
            Opcode::CreateFile => {
                let req: CreateFileRequest = frame.decode_body()?;
                CommandTask::CreateFile {
                    path: req.path,
                    size: req.size,
                    timestamp: from_fat_timestamp(req.fat_date, req.fat_time),
                }
            }
            Opcode::AppendFile => CommandTask::AppendFile {
                data: frame.payload_bytes(),
            },
            Opcode::CloseFile => {
                let req: StampedPathRequest = frame.decode_body()?;
                CommandTask::CloseFile {
                    timestamp: req.timestamp(),
                    path: req.path,
                }
            }
            Opcode::CreateDirectory => {
                let req: StampedPathRequest = frame.decode_body()?;
                CommandTask::CreateDirectory {
                    timestamp: req.timestamp(),
                    path: req.path,
                }
            }
            Opcode::ChangeWorkingDirectory => CommandTask::ChangeWorkingDirectory {
                path: frame.decode_body::<PathRequest>()?.path,
            },
            Opcode::DeleteFile => CommandTask::DeleteFile {
                path: frame.decode_body::<PathRequest>()?.path,
            },
            Opcode::MemoryWrite => {
                let block: MemoryBlock = frame.decode_body()?;
                CommandTask::UploadFragment {
                    address: block.address,
                    data: Bytes::from(block.data),
                }
            }
            Opcode::MemoryRead => {
                let req: MemoryReadRequest = frame.decode_body()?;
                CommandTask::MemoryRead {
                    address: req.address,
                    length: req.length,
                }
            }
            Opcode::MemoryRead1Word => CommandTask::MemoryRead1Word {
                address: frame.decode_body::<WordReadRequest>()?.address,
            },
            Opcode::GetFwVersion => CommandTask::GetFwVersion,
            Opcode::GetSpilinkSynced => CommandTask::GetSpilinkSynced,
            Opcode::Costs => CommandTask::Costs,
            Opcode::CopyToFlash => CommandTask::CopyToFlash,
            Opcode::BringToDfu => CommandTask::BringToDfu,
            Opcode::RecallPreset => CommandTask::RecallPreset {
                index: frame.decode_body::<PresetRecall>()?.index,
            },
            Opcode::UpdatedPreset => CommandTask::UpdatedPreset {
                data: frame.payload_bytes(),
            },
            Opcode::Midi => CommandTask::Midi(MidiMessage::from_payload(frame.payload())?),
            _ => {
                return Err(LinkError::ProtocolViolation(
                    "host received a reply opcode as a request",
                ));
            }
        };
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn midi_frame_is_raw_three_bytes() {
        let frame = CommandTask::Midi(MidiMessage::new(0xB0, 7, 100))
            .to_frame()
            .unwrap();
        assert_eq!(frame.opcode().unwrap(), Opcode::Midi);
        assert_eq!(frame.payload(), &[0xB0, 7, 100]);
    }

    #[test]
    fn append_payload_is_raw() {
        let frame = CommandTask::AppendFile {
            data: Bytes::from_static(b"chunk"),
        }
        .to_frame()
        .unwrap();
        assert_eq!(frame.payload(), b"chunk");
    }

    #[test]
    fn requests_decode_back() {
        let ts = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let tasks = [
            CommandTask::CreateFile {
                path: "/p.bin".into(),
                size: 10,
                timestamp: Some(ts),
            },
            CommandTask::CloseFile {
                path: "/p.bin".into(),
                timestamp: Some(ts),
            },
            CommandTask::UploadFragment {
                address: 0x2000_0000,
                data: Bytes::from_static(&[1, 2, 3]),
            },
            CommandTask::RecallPreset { index: 3 },
            CommandTask::BringToDfu,
        ];
        for task in tasks {
            let frame = task.to_frame().unwrap();
            assert_eq!(CommandTask::from_frame(&frame).unwrap(), task);
        }
    }

    #[test]
    fn fragment_uses_memory_write() {
        let task = CommandTask::UploadFragment {
            address: 0,
            data: Bytes::new(),
        };
        assert_eq!(task.opcode(), Opcode::MemoryWrite);
    }

    #[test]
    fn barrier_and_terminal_commands() {
        assert!(CommandTask::CopyToFlash.is_barrier());
        assert!(!CommandTask::Ping.is_barrier());
        assert!(CommandTask::BringToDfu.ends_connection());
        assert!(!CommandTask::CopyToFlash.ends_connection());
    }
}
