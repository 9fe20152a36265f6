//! Payload definitions for the link protocol.
//!
//! Each sub-module defines the request/reply payloads for one protocol
//! domain (storage, memory and firmware, real-time control). Structured
//! payloads are serialized with `serde` + `bincode` and carried inside
//! [`Frame`] bodies.
//!
//! [`Frame`]: crate::packet::Frame

pub mod file;
pub mod memory;
pub mod realtime;
pub mod response;

pub use file::{
    CreateFileRequest, FileEntryWire, FileResultWire, FileStatus, FileTransfer, PathRequest,
    StampedPathRequest,
};
pub use memory::{DspCosts, FirmwareVersion, MemoryBlock, MemoryReadRequest, WordReadRequest, WordValue};
pub use realtime::{DeviceStatus, MidiMessage, PresetRecall};
pub use response::DeviceResponse;
