//! The host-side link to one target.
//!
//! ```text
//!  caller threads                         dispatcher thread
//!  ──────────────                         ─────────────────
//!  transmit_*  ──► CommandQueue ──────►   LinkWorker ──► Transport
//!  wait_sync   ◄── write/read gates ◄──   replies    ◄──
//!  listeners   ◄── EventBroadcaster ◄──   status changes
//! ```
//!
//! The transport is parked in the link while disconnected and moved onto
//! the dispatcher thread for the length of a session.

mod ops;
mod worker;
mod workflow;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::catalog::RemoteFileCatalogEntry;
use crate::config::LinkConfig;
use crate::error::{LinkError, QueueError};
use crate::events::EventBroadcaster;
use crate::flags::ConnectionFlags;
use crate::protocol::file::FileStatus;
use crate::protocol::memory::DspCosts;
use crate::state::{ConnectionState, DeviceCache, SyncGate, TargetProfile, WaitOutcome};
use crate::task::{CommandTask, Dispatcher, QueueHandle};
use crate::transport::Transport;

use worker::LinkWorker;

const DISPATCHER_THREAD: &str = "dsplink-dispatcher";

/// State shared between the link and its dispatcher thread.
pub(crate) struct Shared {
    pub(crate) state: RwLock<ConnectionState>,
    pub(crate) write_gate: SyncGate,
    pub(crate) read_gate: SyncGate,
    /// Set by every status reply; only used by `ping_device`.
    pub(crate) status_gate: SyncGate,
    pub(crate) device: RwLock<DeviceCache>,
    pub(crate) events: EventBroadcaster,
    /// Raised by `disconnect` so the worker gives up waiting early.
    pub(crate) stopping: AtomicBool,
}

impl Shared {
    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    fn set_state(&self, next: ConnectionState) {
        *self.state.write() = next;
        self.events.connection.publish(next);
    }

    /// Move a live session to `Disconnected`. Returns `false` when the
    /// link had already left `Connected`.
    pub(crate) fn set_disconnected(&self) -> bool {
        let changed = {
            let mut state = self.state.write();
            let was_connected = state.is_connected();
            if was_connected {
                state.force_disconnect();
            }
            was_connected
        };
        if changed {
            self.events.connection.publish(ConnectionState::Disconnected);
        }
        changed
    }

    pub(crate) fn set_faulted(&self) {
        let changed = self.state.write().fault();
        if changed {
            self.events.connection.publish(ConnectionState::Faulted);
        }
    }

    /// Wake every gate waiter and forget live status.
    pub(crate) fn end_session(&self) {
        self.write_gate.abort();
        self.read_gate.abort();
        self.status_gate.abort();
        {
            let mut device = self.device.write();
            device.storage_present = false;
            device.flags = ConnectionFlags::empty();
        }
        if self.events.storage.current() {
            self.events.storage.publish(false);
        }
        if !self.events.flags.current().is_empty() {
            self.events.flags.publish(ConnectionFlags::empty());
        }
    }
}

/// A link to one target over one transport.
pub struct Link {
    config: LinkConfig,
    shared: Arc<Shared>,
    port: Mutex<Option<String>>,
    /// Parked here while disconnected.
    transport: Mutex<Option<Box<dyn Transport>>>,
    runtime: Mutex<Option<Dispatcher<Box<dyn Transport>>>>,
    /// Serializes connect and disconnect.
    lifecycle: Mutex<()>,
    /// Serializes the blocking workflows that share the gates.
    workflow: Mutex<()>,
}

impl Link {
    pub fn new<T: Transport + 'static>(transport: T, config: LinkConfig) -> Self {
        let port = Some(config.transport.port.clone()).filter(|p| !p.is_empty());
        let profile = config.target.to_profile();
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(ConnectionState::Disconnected),
                write_gate: SyncGate::new(),
                read_gate: SyncGate::new(),
                status_gate: SyncGate::new(),
                device: RwLock::new(DeviceCache::new(profile)),
                events: EventBroadcaster::new(),
                stopping: AtomicBool::new(false),
            }),
            config,
            port: Mutex::new(port),
            transport: Mutex::new(Some(Box::new(transport))),
            runtime: Mutex::new(None),
            lifecycle: Mutex::new(()),
            workflow: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Choose the endpoint the next [`connect`](Self::connect) opens.
    /// Ignored while connected; returns whether the port was taken.
    pub fn select_port(&self, port: &str) -> bool {
        if self.is_connected() {
            debug!(port, "ignoring port selection while connected");
            return false;
        }
        *self.port.lock() = Some(port.to_string());
        true
    }

    pub fn selected_port(&self) -> Option<String> {
        self.port.lock().clone()
    }

    /// Open the selected port and start the dispatcher.
    ///
    /// Connecting a connected link does nothing. A faulted link refuses
    /// until [`disconnect`](Self::disconnect) is called.
    pub fn connect(&self) -> Result<(), LinkError> {
        let _lifecycle = self.lifecycle.lock();
        self.reap();

        {
            let mut state = self.shared.state.write();
            if state.is_connected() {
                return Ok(());
            }
            state.begin_connect()?;
        }
        self.shared.events.connection.publish(ConnectionState::Connecting);

        let Some(port) = self.selected_port() else {
            self.shared.set_state(ConnectionState::Disconnected);
            return Err(LinkError::NoPortSelected);
        };
        let Some(mut transport) = self.transport.lock().take() else {
            self.shared.set_state(ConnectionState::Disconnected);
            return Err(LinkError::Other("transport is unavailable".into()));
        };

        if let Err(e) = transport.open(&port) {
            warn!(port = %port, error = %e, "connect failed");
            *self.transport.lock() = Some(transport);
            self.shared.set_state(ConnectionState::Disconnected);
            return Err(e.into());
        }

        self.shared.write_gate.clear();
        self.shared.read_gate.clear();
        self.shared.status_gate.clear();
        self.shared.device.write().reset();
        // Published before the thread exists, so a fault can only follow it.
        self.shared.state.write().complete_connect()?;
        self.shared.events.connection.publish(ConnectionState::Connected);

        self.shared.stopping.store(false, Ordering::Release);
        let worker = LinkWorker::new(transport, self.shared.clone(), &self.config);
        let dispatcher =
            match Dispatcher::spawn(DISPATCHER_THREAD, self.config.dispatcher_settings(), worker) {
                Ok(dispatcher) => dispatcher,
                Err(e) => {
                    error!(error = %e, "could not start dispatcher");
                    self.shared.set_state(ConnectionState::Disconnected);
                    return Err(e);
                }
            };
        if self.config.queue.probe_on_connect {
            if let Err(e) = dispatcher.queue().append(CommandTask::Ping) {
                debug!(error = %e, "connect probe not queued");
            }
        }
        *self.runtime.lock() = Some(dispatcher);
        info!(port = %port, "connected");
        Ok(())
    }

    /// Stop the dispatcher, abandon queued commands and close the port.
    ///
    /// Every caller blocked on a gate returns with a failure. Always
    /// broadcasts `Disconnected`, even when already disconnected.
    pub fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock();
        let runtime = self.runtime.lock().take();
        if let Some(dispatcher) = &runtime {
            self.shared.stopping.store(true, Ordering::Release);
            dispatcher.close_queue();
        }
        self.shared.end_session();
        if let Some(dispatcher) = runtime {
            match dispatcher.shutdown() {
                Some(transport) => self.park(transport),
                None => error!("dispatcher did not return the transport"),
            }
        }
        self.shared.set_state(ConnectionState::Disconnected);
        info!("disconnected");
    }

    /// Collect the transport from a dispatcher that stopped on its own.
    ///
    /// The worker leaves `Connected` just before its thread exits, so a
    /// dispatcher of a link that is no longer connected is joined here.
    fn reap(&self) {
        let finished = {
            let mut runtime = self.runtime.lock();
            match runtime.as_ref() {
                Some(d) if d.is_finished() || !self.is_connected() => runtime.take(),
                _ => None,
            }
        };
        if let Some(transport) = finished.and_then(|d| d.shutdown()) {
            self.park(transport);
        }
    }

    fn park(&self, mut transport: Box<dyn Transport>) {
        transport.close();
        *self.transport.lock() = Some(transport);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.read().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    // ── Capabilities (cached) ────────────────────────────────────

    pub fn sd_card_present(&self) -> bool {
        self.shared.device.read().storage_present
    }

    pub fn connection_flags(&self) -> ConnectionFlags {
        self.shared.device.read().flags
    }

    pub fn target_profile(&self) -> TargetProfile {
        self.shared.device.read().profile.clone()
    }

    pub fn dsp_load_percent(&self) -> u8 {
        self.shared.device.read().dsp_load_percent
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.shared.events
    }

    // ── Queue ────────────────────────────────────────────────────

    fn queue(&self) -> Result<QueueHandle, QueueError> {
        self.runtime
            .lock()
            .as_ref()
            .map(|d| d.queue().clone())
            .ok_or(QueueError::NotConnected)
    }

    /// Enqueue `task`. `Ok(())` means accepted and queued.
    pub fn append_to_queue(&self, task: CommandTask) -> Result<(), QueueError> {
        if !self.is_connected() {
            return Err(QueueError::NotConnected);
        }
        // The runtime lock is released before a possibly blocking push.
        self.queue()?.append(task)
    }

    /// Commands waiting for the dispatcher.
    pub fn pending(&self) -> usize {
        self.queue().map(|q| q.pending()).unwrap_or(0)
    }

    // ── Gates ────────────────────────────────────────────────────

    /// Arm the write-ack gate. Call before sending the request.
    pub fn clear_sync(&self) {
        self.shared.write_gate.clear();
    }

    /// Wait for a write ack. `None` waits until one arrives or the link
    /// goes down.
    pub fn wait_sync(&self, timeout: Option<Duration>) -> bool {
        self.shared.write_gate.wait(timeout)
    }

    pub fn wait_sync_outcome(&self, timeout: Option<Duration>) -> WaitOutcome {
        self.shared.write_gate.wait_outcome(timeout)
    }

    /// Arm the read-ack gate. Call before sending the request.
    pub fn clear_read_sync(&self) {
        self.shared.read_gate.clear();
    }

    pub fn wait_read_sync(&self, timeout: Option<Duration>) -> bool {
        self.shared.read_gate.wait(timeout)
    }

    pub fn wait_read_sync_outcome(&self, timeout: Option<Duration>) -> WaitOutcome {
        self.shared.read_gate.wait_outcome(timeout)
    }

    // ── Results ──────────────────────────────────────────────────
    //
    // Read these only after the read-ack gate for the request was set.

    /// Address and contents of the last memory read.
    pub fn memory_buffer(&self) -> (u32, Bytes) {
        let device = self.shared.device.read();
        (device.memory_address, device.memory.clone())
    }

    /// Address and value of the last single-word read.
    pub fn word_register(&self) -> (u32, u32) {
        let device = self.shared.device.read();
        (device.word_address, device.word)
    }

    pub fn last_file_list(&self) -> Vec<RemoteFileCatalogEntry> {
        self.shared.device.read().file_list.clone()
    }

    pub fn last_file_info(&self) -> Option<RemoteFileCatalogEntry> {
        self.shared.device.read().file_info.clone()
    }

    pub fn last_file_status(&self) -> Option<FileStatus> {
        self.shared.device.read().file_status
    }

    pub fn spilink_synced(&self) -> bool {
        self.shared.device.read().spilink_synced
    }

    pub fn dsp_costs(&self) -> DspCosts {
        self.shared.device.read().costs
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if self.runtime.get_mut().is_some() {
            self.disconnect();
        }
    }
}

/// Map a gate outcome to the workflow result.
pub(crate) fn outcome_to_result(outcome: WaitOutcome, timeout: Duration) -> Result<(), LinkError> {
    match outcome {
        WaitOutcome::Set => Ok(()),
        WaitOutcome::TimedOut => Err(LinkError::ResponseTimeout(timeout)),
        WaitOutcome::Aborted | WaitOutcome::Superseded => Err(LinkError::Disconnected),
    }
}
