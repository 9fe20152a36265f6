//! Single consumer thread that executes queued commands in order.
//!
//! ```text
//!  callers ──append──► CommandQueue ──pop──► dispatcher thread ──► Executor
//!                                                 │
//!                                   idle after poll_interval
//! ```
//!
//! The [`Executor`] owns whatever the commands act on (for the link, the
//! transport). It lives on the dispatcher thread for the whole session and
//! is handed back through [`Executor::finish`] when the thread exits.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::{LinkError, QueueError};
use crate::task::CommandTask;
use crate::task::queue::{CommandQueue, Popped};

/// Whether the dispatcher keeps running after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop cleanly; the remaining queue is abandoned.
    Close,
}

/// Why the dispatcher thread stopped.
#[derive(Debug)]
pub enum ExitReason {
    /// The owner shut the dispatcher down.
    Stopped,
    /// The executor asked to stop.
    Closed,
    /// The executor failed.
    Failed(LinkError),
}

#[derive(Debug)]
pub struct ExitReport {
    pub reason: ExitReason,
    /// Queued commands that were never executed.
    pub abandoned: usize,
}

/// Work done on the dispatcher thread.
pub trait Executor: Send + 'static {
    type Output: Send + 'static;

    /// Execute one command. At most one call is in progress at a time.
    fn execute(&mut self, task: CommandTask) -> Result<Flow, LinkError>;

    /// Called when no command arrived within the poll interval.
    fn idle(&mut self) -> Result<Flow, LinkError>;

    /// Called once on the dispatcher thread before it exits.
    fn finish(self, report: &ExitReport) -> Self::Output;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    pub capacity: usize,
    /// How long `append` waits for free space before reporting `QueueFull`.
    pub enqueue_timeout: Duration,
    /// How long the thread waits for a command before calling `idle`.
    pub poll_interval: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            capacity: 64,
            enqueue_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(5),
        }
    }
}

/// Producer side of a running dispatcher.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    queue: CommandQueue,
    enqueue_timeout: Duration,
}

impl QueueHandle {
    /// Enqueue `task`. `Ok(())` means accepted and queued.
    ///
    /// A task that cannot be framed is rejected here, so everything the
    /// dispatcher accepts can be written.
    pub fn append(&self, task: CommandTask) -> Result<(), QueueError> {
        let opcode = task.opcode();
        let result = check_encodable(&task)
            .and_then(|()| self.queue.push(task, self.enqueue_timeout));
        if let Err(e) = &result {
            debug!(%opcode, error = %e, "command not accepted");
        }
        result
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

fn check_encodable(task: &CommandTask) -> Result<(), QueueError> {
    match task.to_frame() {
        Ok(_) => Ok(()),
        Err(LinkError::PayloadTooLarge { size, max }) => {
            Err(QueueError::PayloadTooLarge { size, max })
        }
        Err(_) => Err(QueueError::Unencodable),
    }
}

/// A running dispatcher thread.
pub struct Dispatcher<O> {
    name: String,
    handle: QueueHandle,
    thread: Option<JoinHandle<O>>,
}

impl<O: Send + 'static> Dispatcher<O> {
    /// Start the dispatcher thread around `executor`.
    pub fn spawn<E>(name: &str, settings: DispatcherSettings, executor: E) -> Result<Self, LinkError>
    where
        E: Executor<Output = O>,
    {
        let queue = CommandQueue::new(settings.capacity);
        let consumer = queue.clone();
        let poll_interval = settings.poll_interval;
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(consumer, poll_interval, executor))
            .map_err(|e| LinkError::Other(format!("failed to spawn {name}: {e}")))?;

        info!(name, capacity = settings.capacity, "dispatcher started");
        Ok(Self {
            name: name.to_string(),
            handle: QueueHandle {
                queue,
                enqueue_timeout: settings.enqueue_timeout,
            },
            thread: Some(thread),
        })
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.handle
    }

    /// `true` once the thread has exited on its own.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Stop accepting commands and abandon the pending ones. The thread
    /// exits after the command in progress.
    pub fn close_queue(&self) -> usize {
        let abandoned = self.handle.queue.close().len();
        if abandoned > 0 {
            warn!(name = %self.name, abandoned, "abandoning queued commands");
        }
        abandoned
    }

    /// Abandon pending commands, stop the thread and collect the executor's
    /// output. `None` if the thread panicked.
    pub fn shutdown(mut self) -> Option<O> {
        self.stop()
    }

    fn stop(&mut self) -> Option<O> {
        let thread = self.thread.take()?;
        self.close_queue();
        match thread.join() {
            Ok(output) => Some(output),
            Err(_) => {
                error!(name = %self.name, "dispatcher thread panicked");
                None
            }
        }
    }
}

impl<O> Drop for Dispatcher<O> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.handle.queue.close();
            let _ = thread.join();
        }
    }
}

fn run<E: Executor>(queue: CommandQueue, poll_interval: Duration, mut executor: E) -> E::Output {
    let reason = loop {
        let step = match queue.pop(poll_interval) {
            Popped::Task(task) => {
                debug!(opcode = %task.opcode(), "executing command");
                executor.execute(task)
            }
            Popped::Idle => executor.idle(),
            Popped::Closed => break ExitReason::Stopped,
        };
        match step {
            Ok(Flow::Continue) => {}
            Ok(Flow::Close) => break ExitReason::Closed,
            Err(e) => break ExitReason::Failed(e),
        }
    };

    let abandoned = queue.close().len();
    if abandoned > 0 {
        warn!(abandoned, "abandoning queued commands");
    }
    debug!(?reason, "dispatcher exiting");
    executor.finish(&ExitReport { reason, abandoned })
}
