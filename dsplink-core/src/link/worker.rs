//! The dispatcher-side half of a link session.
//!
//! Owns the transport for the length of a session: writes commands,
//! reads and decodes replies, releases gates and keeps the cache current.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error, info, warn};

use crate::codec::LinkCodec;
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::link::Shared;
use crate::message::Opcode;
use crate::packet::Frame;
use crate::protocol::response::DeviceResponse;
use crate::state::Correlation;
use crate::task::{CommandTask, ExitReason, ExitReport, Executor, Flow};
use crate::transport::Transport;

/// Reads per pump, so a chatty target cannot starve the queue.
const MAX_READS_PER_PUMP: usize = 64;

const READ_CHUNK: usize = 4096;

/// Pause between reads while holding for a barrier ack.
const BARRIER_POLL: Duration = Duration::from_millis(1);

pub(crate) struct LinkWorker {
    transport: Box<dyn Transport>,
    codec: LinkCodec,
    rx: BytesMut,
    read_buf: Vec<u8>,
    shared: Arc<Shared>,
    heartbeat: Option<Duration>,
    link_timeout: Option<Duration>,
    flash_timeout: Duration,
    last_write: Instant,
    last_inbound: Instant,
    /// Opcode the dispatcher is holding for, and whether its ack arrived.
    barrier: Option<(u16, bool)>,
}

impl LinkWorker {
    pub(crate) fn new(transport: Box<dyn Transport>, shared: Arc<Shared>, config: &LinkConfig) -> Self {
        let now = Instant::now();
        Self {
            transport,
            codec: LinkCodec::new(),
            rx: BytesMut::with_capacity(READ_CHUNK),
            read_buf: vec![0; READ_CHUNK],
            shared,
            heartbeat: config.heartbeat_interval(),
            link_timeout: config.link_timeout(),
            flash_timeout: config.flash_timeout(),
            last_write: now,
            last_inbound: now,
            barrier: None,
        }
    }

    fn send(&mut self, task: &CommandTask) -> Result<(), LinkError> {
        let opcode = task.opcode();
        // The queue only accepts tasks that frame.
        let frame = task.to_frame()?;
        self.track(task);
        self.write_frame(frame)?;
        debug!(%opcode, "command written");
        Ok(())
    }

    fn write_frame(&mut self, frame: Frame) -> Result<(), LinkError> {
        let mut buf = BytesMut::new();
        self.codec.encode(frame, &mut buf)?;
        self.transport.write_all(&buf)?;
        self.last_write = Instant::now();
        Ok(())
    }

    fn track(&self, task: &CommandTask) {
        let (path, len, size) = match task {
            CommandTask::CreateFile { path, size, .. } => (Some(path.as_str()), 0, *size),
            CommandTask::AppendFile { data } => (None, data.len(), 0),
            CommandTask::CloseFile { path, .. } => (Some(path.as_str()), 0, 0),
            _ => return,
        };
        self.shared
            .device
            .write()
            .track_transfer(task.opcode(), path, len, size);
    }

    /// Read and handle everything the target has sent so far.
    fn pump(&mut self) -> Result<(), LinkError> {
        for _ in 0..MAX_READS_PER_PUMP {
            let n = self.transport.read(&mut self.read_buf)?;
            if n == 0 {
                break;
            }
            self.last_inbound = Instant::now();
            self.rx.extend_from_slice(&self.read_buf[..n]);
            while let Some(frame) = self.codec.decode(&mut self.rx)? {
                self.handle(frame);
            }
        }
        Ok(())
    }

    fn handle(&mut self, frame: Frame) {
        let response = match DeviceResponse::from_frame(&frame) {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    opcode = frame.header().opcode(),
                    error = %e,
                    "ignoring undecodable reply"
                );
                return;
            }
        };
        debug!(opcode = %response.opcode(), "reply received");

        if let (DeviceResponse::Ack { opcode }, Some((held, acked))) =
            (&response, self.barrier.as_mut())
        {
            if *opcode == *held {
                *acked = true;
            }
        }

        // Cache first, then release waiters, so a woken caller sees the
        // new value.
        let correlation = self.shared.device.write().apply(response);
        match correlation {
            Correlation::None => {}
            Correlation::WriteAck => self.shared.write_gate.set(),
            Correlation::ReadAck => self.shared.read_gate.set(),
            Correlation::Status {
                flags,
                storage_present,
            } => {
                let events = &self.shared.events;
                if events.storage.current() != storage_present {
                    info!(storage_present, "target storage changed");
                    events.storage.publish(storage_present);
                }
                if events.flags.current() != flags {
                    debug!(flags = flags.bits(), "connection flags changed");
                    events.flags.publish(flags);
                }
                self.shared.status_gate.set();
            }
        }
    }

    /// Hold until the target acknowledges the barrier command, the
    /// flash timeout passes or the link is told to stop.
    fn hold_for_ack(&mut self, opcode: Opcode) -> Result<(), LinkError> {
        let deadline = Instant::now() + self.flash_timeout;
        while Instant::now() < deadline {
            self.pump()?;
            if matches!(self.barrier, Some((_, true))) {
                debug!(%opcode, "barrier acknowledged");
                self.barrier = None;
                return Ok(());
            }
            if self.shared.is_stopping() {
                debug!(%opcode, "link stopping; releasing barrier");
                self.barrier = None;
                return Ok(());
            }
            thread::sleep(BARRIER_POLL);
        }
        self.barrier = None;
        warn!(%opcode, timeout = ?self.flash_timeout, "barrier not acknowledged; continuing");
        Ok(())
    }

    fn check_liveness(&self) -> Result<(), LinkError> {
        match self.link_timeout {
            Some(timeout) if self.last_inbound.elapsed() > timeout => {
                Err(LinkError::ResponseTimeout(timeout))
            }
            _ => Ok(()),
        }
    }
}

impl Executor for LinkWorker {
    type Output = Box<dyn Transport>;

    fn execute(&mut self, task: CommandTask) -> Result<Flow, LinkError> {
        let opcode = task.opcode();
        if task.is_barrier() {
            self.barrier = Some((opcode as u16, false));
        }
        self.send(&task)?;

        if task.ends_connection() {
            info!(%opcode, "target is leaving the link");
            return Ok(Flow::Close);
        }
        if task.is_barrier() {
            self.hold_for_ack(opcode)?;
        } else {
            self.pump()?;
        }
        self.check_liveness()?;
        Ok(Flow::Continue)
    }

    fn idle(&mut self) -> Result<Flow, LinkError> {
        self.pump()?;
        self.check_liveness()?;
        if let Some(interval) = self.heartbeat {
            if self.last_write.elapsed() >= interval {
                self.write_frame(Frame::empty(Opcode::Ping))?;
            }
        }
        Ok(Flow::Continue)
    }

    fn finish(mut self, report: &ExitReport) -> Self::Output {
        match &report.reason {
            // The owner is disconnecting and handles the transition.
            ExitReason::Stopped => {}
            ExitReason::Closed => {
                self.shared.end_session();
                if self.shared.set_disconnected() {
                    info!("link closed by target");
                }
            }
            ExitReason::Failed(e) => {
                error!(error = %e, abandoned = report.abandoned, "link failed");
                self.shared.end_session();
                self.shared.set_faulted();
            }
        }
        if self.codec.dropped() > 0 {
            debug!(dropped = self.codec.dropped(), "frames dropped this session");
        }
        self.transport.close();
        self.transport
    }
}
