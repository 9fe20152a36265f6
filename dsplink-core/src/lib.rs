//! # dsplink-core
//!
//! Host-side link layer for an embedded audio DSP reached over a serial port.
//!
//! This crate contains:
//! - **Protocol types**: `FrameHeader`, `Frame`, `Opcode`, `ConnectionFlags`
//! - **Protocol payloads**: request/reply types for storage, memory, firmware and real-time control
//! - **Codec**: `LinkCodec` for framed byte-stream I/O via `tokio_util`
//! - **Transport**: the `Transport` trait, a serial port backend and a scriptable fake target
//! - **Task**: `CommandTask` plus the bounded FIFO `Dispatcher` that runs them in order
//! - **State**: connection state machine, device cache and the `SyncGate` reply gates
//! - **Link**: `Link`, the connection lifecycle with its transmit operations and workflows
//! - **Events**: `EventBroadcaster` for connection, storage and flag listeners
//! - **Error**: `LinkError`, a typed, `thiserror`-based error hierarchy

pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod flags;
pub mod header;
pub mod link;
pub mod message;
pub mod packet;
pub mod protocol;
pub mod state;
pub mod task;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use catalog::RemoteFileCatalogEntry;
pub use codec::LinkCodec;
pub use config::LinkConfig;
pub use error::{LinkError, QueueError, TransportError};
pub use events::{EventBroadcaster, EventChannel, ListenerId};
pub use flags::ConnectionFlags;
pub use header::{FrameHeader, HEADER_LENGTH, MAGIC};
pub use link::Link;
pub use message::Opcode;
pub use packet::{Frame, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE};
pub use protocol::{DeviceResponse, DeviceStatus, FileStatus, FirmwareVersion, MidiMessage};
pub use state::{ConnectionState, SyncGate, TargetProfile, WaitOutcome};
pub use task::{CommandTask, Dispatcher, DispatcherSettings};
pub use transport::{FakeDevice, FakeTransport, Transport};
#[cfg(feature = "serial")]
pub use transport::{PortInfo, SerialTransport, list_ports};
