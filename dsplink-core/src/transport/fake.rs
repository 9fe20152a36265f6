//! In-memory transport backed by a scripted device.
//!
//! [`FakeDevice`] is a cloneable handle: give one clone to a
//! [`FakeTransport`] and keep another to script replies, inject frames,
//! slow down or break the link, and inspect what the host wrote.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::catalog::RemoteFileCatalogEntry;
use crate::codec::LinkCodec;
use crate::error::TransportError;
use crate::flags::ConnectionFlags;
use crate::message::Opcode;
use crate::packet::{Frame, MAX_PAYLOAD_SIZE};
use crate::protocol::file::FileStatus;
use crate::protocol::memory::{DspCosts, FirmwareVersion};
use crate::protocol::realtime::DeviceStatus;
use crate::protocol::response::DeviceResponse;
use crate::task::CommandTask;
use crate::transport::Transport;

/// How long an empty read blocks, standing in for a serial read timeout.
const IDLE_READ: Duration = Duration::from_millis(1);

/// Longest memory read answered, leaving room for the reply's envelope.
const MAX_MEMORY_READ: u32 = (MAX_PAYLOAD_SIZE - 64) as u32;

#[derive(Debug, Clone)]
struct StoredFile {
    data: Vec<u8>,
    timestamp: Option<NaiveDateTime>,
    is_directory: bool,
}

#[derive(Debug)]
struct OpenFile {
    path: String,
    data: Vec<u8>,
}

#[derive(Debug)]
struct DeviceModel {
    // Link
    codec: LinkCodec,
    inbound: BytesMut,
    outbound: VecDeque<u8>,
    written: Vec<Frame>,
    open_port: Option<String>,
    opens: usize,

    // Failure injection
    write_delay: Duration,
    fail_open: bool,
    fail_io: bool,
    auto_reply: bool,
    silenced: HashSet<Opcode>,

    // Simulated target
    files: BTreeMap<String, StoredFile>,
    cwd: String,
    open_file: Option<OpenFile>,
    memory: BTreeMap<u32, u8>,
    status: DeviceStatus,
    firmware: FirmwareVersion,
    spilink_synced: bool,
    costs: DspCosts,
}

impl Default for DeviceModel {
    fn default() -> Self {
        Self {
            codec: LinkCodec::new(),
            inbound: BytesMut::new(),
            outbound: VecDeque::new(),
            written: Vec::new(),
            open_port: None,
            opens: 0,
            write_delay: Duration::ZERO,
            fail_open: false,
            fail_io: false,
            auto_reply: true,
            silenced: HashSet::new(),
            files: BTreeMap::new(),
            cwd: "/".to_string(),
            open_file: None,
            memory: BTreeMap::new(),
            status: DeviceStatus {
                flags: 0,
                storage_present: true,
                dsp_load_percent: 0,
            },
            firmware: FirmwareVersion {
                major: 1,
                minor: 0,
                patch: 12,
                build: 0,
                crc: 0x5EED_F00D,
                patch_entry_address: 0x2001_1000,
            },
            spilink_synced: true,
            costs: DspCosts::default(),
        }
    }
}

/// Shared handle to the simulated target.
#[derive(Debug, Clone, Default)]
pub struct FakeDevice {
    model: Arc<Mutex<DeviceModel>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Scripting ────────────────────────────────────────────────

    /// Delay every host write by `delay`, as a slow link would.
    pub fn set_write_delay(&self, delay: Duration) {
        self.model.lock().write_delay = delay;
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.model.lock().fail_open = fail;
    }

    /// Make every read and write fail until cleared.
    pub fn set_fail_io(&self, fail: bool) {
        self.model.lock().fail_io = fail;
    }

    /// Turn the simulated firmware on or off; off records writes only.
    pub fn set_auto_reply(&self, on: bool) {
        self.model.lock().auto_reply = on;
    }

    /// Never answer `opcode`.
    pub fn silence(&self, opcode: Opcode) {
        self.model.lock().silenced.insert(opcode);
    }

    pub fn set_status(&self, status: DeviceStatus) {
        self.model.lock().status = status;
    }

    pub fn set_firmware(&self, firmware: FirmwareVersion) {
        self.model.lock().firmware = firmware;
    }

    /// Queue a reply for the host as if the target sent it.
    pub fn inject(&self, response: &DeviceResponse) {
        match response.to_frame() {
            Ok(frame) => self.inject_frame(frame),
            Err(e) => warn!(error = %e, "cannot encode injected response"),
        }
    }

    /// Queue raw bytes for the host, framed or not.
    pub fn inject_raw(&self, bytes: &[u8]) {
        self.model.lock().outbound.extend(bytes.iter().copied());
    }

    fn inject_frame(&self, frame: Frame) {
        self.model.lock().push_frame(frame);
    }

    /// Add a file to the simulated storage.
    pub fn add_file(&self, path: &str, data: &[u8], timestamp: Option<NaiveDateTime>) {
        self.model.lock().files.insert(
            normalize(path),
            StoredFile {
                data: data.to_vec(),
                timestamp,
                is_directory: false,
            },
        );
    }

    pub fn add_directory(&self, path: &str) {
        self.model.lock().files.insert(
            normalize(path),
            StoredFile {
                data: Vec::new(),
                timestamp: None,
                is_directory: true,
            },
        );
    }

    /// Write `data` into simulated memory at `address`.
    pub fn poke(&self, address: u32, data: &[u8]) {
        self.model.lock().write_memory(address, data);
    }

    // ── Inspection ───────────────────────────────────────────────

    /// Every frame the host wrote, in order.
    pub fn written_frames(&self) -> Vec<Frame> {
        self.model.lock().written.clone()
    }

    /// Every decodable command the host wrote, in order.
    pub fn written_tasks(&self) -> Vec<CommandTask> {
        self.written_frames()
            .iter()
            .filter_map(|f| CommandTask::from_frame(f).ok())
            .collect()
    }

    pub fn clear_written(&self) {
        self.model.lock().written.clear();
    }

    pub fn open_port(&self) -> Option<String> {
        self.model.lock().open_port.clone()
    }

    /// How many times the transport was opened.
    pub fn open_count(&self) -> usize {
        self.model.lock().opens
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.model
            .lock()
            .files
            .get(&normalize(path))
            .filter(|f| !f.is_directory)
            .map(|f| f.data.clone())
    }

    pub fn file_timestamp(&self, path: &str) -> Option<NaiveDateTime> {
        self.model
            .lock()
            .files
            .get(&normalize(path))
            .and_then(|f| f.timestamp)
    }

    pub fn peek(&self, address: u32, length: u32) -> Vec<u8> {
        self.model.lock().read_memory(address, length)
    }

    pub fn is_running(&self) -> bool {
        self.model.lock().status.connection_flags().contains(ConnectionFlags::DSP_RUNNING)
    }
}

// ── Simulated firmware ───────────────────────────────────────────

impl DeviceModel {
    fn push_frame(&mut self, frame: Frame) {
        let mut buf = BytesMut::new();
        if let Err(e) = self.codec.encode(frame, &mut buf) {
            warn!(error = %e, "fake device failed to encode reply");
            return;
        }
        self.outbound.extend(buf.iter().copied());
    }

    fn reply(&mut self, response: DeviceResponse) {
        match response.to_frame() {
            Ok(frame) => self.push_frame(frame),
            Err(e) => warn!(error = %e, "fake device failed to encode reply"),
        }
    }

    /// Parse host bytes and answer every complete command.
    fn receive(&mut self, bytes: &[u8]) {
        self.inbound.extend_from_slice(bytes);
        loop {
            let frame = match self.codec.decode(&mut self.inbound) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "fake device dropped undecodable input");
                    self.inbound.clear();
                    break;
                }
            };
            self.written.push(frame.clone());
            let Ok(opcode) = frame.opcode() else {
                continue;
            };
            if !self.auto_reply || self.silenced.contains(&opcode) {
                continue;
            }
            match CommandTask::from_frame(&frame) {
                Ok(task) => self.execute(task),
                Err(e) => debug!(%opcode, error = %e, "fake device ignored malformed command"),
            }
        }
    }

    fn execute(&mut self, task: CommandTask) {
        let opcode = task.opcode();
        match task {
            CommandTask::Ping => self.reply(DeviceResponse::Status(self.status)),
            CommandTask::Start | CommandTask::Stop => {
                let mut flags = self.status.connection_flags();
                flags.set(ConnectionFlags::DSP_RUNNING, opcode == Opcode::Start);
                self.status.flags = flags.bits();
                self.reply(DeviceResponse::ack(opcode));
            }
            CommandTask::GetFileList => {
                let cwd = self.cwd.clone();
                let entries: Vec<RemoteFileCatalogEntry> = self
                    .files
                    .iter()
                    .filter(|(path, _)| parent(path) == cwd && path.as_str() != "/")
                    .map(|(path, f)| entry_for(path, f))
                    .collect();
                for entry in entries {
                    self.reply(DeviceResponse::FileListEntry(entry));
                }
                self.reply(DeviceResponse::FileListEnd);
            }
            CommandTask::GetFileInfo { path } => {
                let path = self.resolve(&path);
                let entry = self.files.get(&path).map(|f| entry_for(&path, f));
                self.reply(DeviceResponse::FileInfo(entry));
            }
            CommandTask::CreateFile { path, .. } => {
                let path = self.resolve(&path);
                self.open_file = Some(OpenFile {
                    path,
                    data: Vec::new(),
                });
                self.reply(DeviceResponse::ack(opcode));
            }
            CommandTask::AppendFile { data } => {
                if let Some(open) = self.open_file.as_mut() {
                    open.data.extend_from_slice(&data);
                }
                self.reply(DeviceResponse::ack(opcode));
            }
            CommandTask::CloseFile { timestamp, .. } => {
                if let Some(open) = self.open_file.take() {
                    self.files.insert(
                        open.path,
                        StoredFile {
                            data: open.data,
                            timestamp,
                            is_directory: false,
                        },
                    );
                }
                self.reply(DeviceResponse::ack(opcode));
            }
            CommandTask::CreateDirectory { path, timestamp } => {
                let path = self.resolve(&path);
                let status = if !self.status.storage_present {
                    FileStatus::NoStorage
                } else if self.files.contains_key(&path) {
                    FileStatus::Exists
                } else {
                    self.files.insert(
                        path,
                        StoredFile {
                            data: Vec::new(),
                            timestamp,
                            is_directory: true,
                        },
                    );
                    FileStatus::Ok
                };
                self.file_result(opcode, status);
            }
            CommandTask::ChangeWorkingDirectory { path } => {
                let path = self.resolve(&path);
                let status = match self.files.get(&path) {
                    _ if path == "/" => FileStatus::Ok,
                    Some(f) if f.is_directory => FileStatus::Ok,
                    Some(_) => FileStatus::Denied,
                    None => FileStatus::NotFound,
                };
                if status.is_ok() {
                    self.cwd = path;
                }
                self.file_result(opcode, status);
            }
            CommandTask::DeleteFile { path } => {
                let path = self.resolve(&path);
                let has_children = self.files.keys().any(|k| parent(k) == path && k != &path);
                let status = match self.files.get(&path) {
                    None => FileStatus::NotFound,
                    Some(f) if f.is_directory && has_children => FileStatus::Denied,
                    Some(_) => {
                        self.files.remove(&path);
                        FileStatus::Ok
                    }
                };
                self.file_result(opcode, status);
            }
            CommandTask::UploadFragment { address, data } => {
                self.write_memory(address, &data);
                self.reply(DeviceResponse::ack(opcode));
            }
            CommandTask::MemoryRead { address, length } => {
                let data = Bytes::from(self.read_memory(address, length));
                self.reply(DeviceResponse::MemoryData { address, data });
            }
            CommandTask::MemoryRead1Word { address } => {
                let bytes = self.read_memory(address, 4);
                let value = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                self.reply(DeviceResponse::Word { address, value });
            }
            CommandTask::GetFwVersion => self.reply(DeviceResponse::FirmwareVersion(self.firmware)),
            CommandTask::GetSpilinkSynced => {
                self.reply(DeviceResponse::SpilinkSynced(self.spilink_synced))
            }
            CommandTask::Costs => self.reply(DeviceResponse::Costs(self.costs)),
            CommandTask::CopyToFlash
            | CommandTask::RecallPreset { .. }
            | CommandTask::UpdatedPreset { .. } => self.reply(DeviceResponse::ack(opcode)),
            // The target reboots without answering.
            CommandTask::BringToDfu => {}
            CommandTask::Midi(_) => {}
        }
    }

    fn file_result(&mut self, opcode: Opcode, status: FileStatus) {
        self.reply(DeviceResponse::FileResult {
            opcode: opcode as u16,
            status,
        });
    }

    fn resolve(&self, path: &str) -> String {
        if path.starts_with('/') {
            normalize(path)
        } else if self.cwd == "/" {
            normalize(&format!("/{path}"))
        } else {
            normalize(&format!("{}/{path}", self.cwd))
        }
    }

    fn write_memory(&mut self, address: u32, data: &[u8]) {
        for (offset, byte) in data.iter().enumerate() {
            self.memory
                .insert(address.wrapping_add(offset as u32), *byte);
        }
    }

    /// Reads past [`MAX_MEMORY_READ`] are cut short.
    fn read_memory(&self, address: u32, length: u32) -> Vec<u8> {
        (0..length.min(MAX_MEMORY_READ))
            .map(|offset| {
                self.memory
                    .get(&address.wrapping_add(offset))
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }
}

/// Absolute path without a trailing slash; the root stays `/`.
fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed {
        "" => "/".to_string(),
        p if p.starts_with('/') => p.to_string(),
        p => format!("/{p}"),
    }
}

fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(slash) => &path[..slash],
    }
}

fn entry_for(path: &str, file: &StoredFile) -> RemoteFileCatalogEntry {
    if file.is_directory {
        RemoteFileCatalogEntry::new(format!("{path}/"), file.timestamp, 0, true)
    } else {
        RemoteFileCatalogEntry::new(path, file.timestamp, file.data.len() as u64, false)
    }
}

// ── Transport ────────────────────────────────────────────────────

/// Transport end of a [`FakeDevice`].
#[derive(Debug)]
pub struct FakeTransport {
    device: FakeDevice,
    open: bool,
}

impl FakeTransport {
    pub fn new(device: FakeDevice) -> Self {
        Self {
            device,
            open: false,
        }
    }

    pub fn device(&self) -> &FakeDevice {
        &self.device
    }

    fn check_io(&self) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        if self.device.model.lock().fail_io {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated link failure",
            )));
        }
        Ok(())
    }
}

impl Transport for FakeTransport {
    fn open(&mut self, port: &str) -> Result<(), TransportError> {
        let mut model = self.device.model.lock();
        if model.fail_open {
            return Err(TransportError::Open {
                port: port.to_string(),
                reason: "simulated open failure".to_string(),
            });
        }
        model.open_port = Some(port.to_string());
        model.opens += 1;
        model.inbound.clear();
        model.outbound.clear();
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.device.model.lock().open_port = None;
            self.open = false;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.check_io()?;
        let delay = self.device.model.lock().write_delay;
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.device.model.lock().receive(bytes);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.check_io()?;
        let n = {
            let mut model = self.device.model.lock();
            let n = buf.len().min(model.outbound.len());
            for (slot, byte) in buf.iter_mut().zip(model.outbound.drain(..n)) {
                *slot = byte;
            }
            n
        };
        if n == 0 {
            thread::sleep(IDLE_READ);
        }
        Ok(n)
    }
}
