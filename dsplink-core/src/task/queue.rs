//! Bounded FIFO between callers and the dispatcher thread.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::QueueError;
use crate::task::CommandTask;

#[derive(Debug)]
struct Inner {
    items: VecDeque<CommandTask>,
    closed: bool,
}

/// Result of waiting on the consumer side.
#[derive(Debug, PartialEq, Eq)]
pub enum Popped {
    Task(CommandTask),
    /// Nothing arrived within the poll interval.
    Idle,
    /// The queue was closed; nothing will ever arrive.
    Closed,
}

/// Cloneable handle to a bounded, closable command queue.
///
/// Closing drains under the same lock that `push` checks, so a task is
/// either accepted before the close and returned by [`close`](Self::close),
/// or rejected with [`QueueError::NotConnected`]. It is never dropped
/// silently.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    items: VecDeque::with_capacity(capacity),
                    closed: false,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn len(&self) -> usize {
        self.shared.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.inner.lock().closed
    }

    /// Enqueue `task`, waiting up to `timeout` for free space.
    pub fn push(&self, task: CommandTask, timeout: Duration) -> Result<(), QueueError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut inner = self.shared.inner.lock();
        loop {
            if inner.closed {
                return Err(QueueError::NotConnected);
            }
            if inner.items.len() < self.shared.capacity {
                inner.items.push_back(task);
                self.shared.not_empty.notify_one();
                return Ok(());
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .not_full
                        .wait_until(&mut inner, deadline)
                        .timed_out()
                    {
                        // Space may have freed up exactly at the deadline.
                        if !inner.closed && inner.items.len() < self.shared.capacity {
                            continue;
                        }
                        return Err(if inner.closed {
                            QueueError::NotConnected
                        } else {
                            QueueError::QueueFull
                        });
                    }
                }
                None => self.shared.not_full.wait(&mut inner),
            }
        }
    }

    /// Take the oldest task, waiting up to `timeout`.
    pub fn pop(&self, timeout: Duration) -> Popped {
        let deadline = Instant::now().checked_add(timeout);
        let mut inner = self.shared.inner.lock();
        loop {
            if inner.closed {
                return Popped::Closed;
            }
            if let Some(task) = inner.items.pop_front() {
                self.shared.not_full.notify_one();
                return Popped::Task(task);
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .not_empty
                        .wait_until(&mut inner, deadline)
                        .timed_out()
                        && inner.items.is_empty()
                        && !inner.closed
                    {
                        return Popped::Idle;
                    }
                }
                None => self.shared.not_empty.wait(&mut inner),
            }
        }
    }

    /// Close the queue and hand back every task that was still pending.
    ///
    /// Idempotent; later calls return an empty list.
    pub fn close(&self) -> Vec<CommandTask> {
        let mut inner = self.shared.inner.lock();
        inner.closed = true;
        let abandoned: Vec<CommandTask> = inner.items.drain(..).collect();
        drop(inner);
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(10);

    #[test]
    fn fifo_order() {
        let queue = CommandQueue::new(8);
        for index in 0..5 {
            queue.push(CommandTask::RecallPreset { index }, SHORT).unwrap();
        }
        for index in 0..5 {
            assert_eq!(
                queue.pop(SHORT),
                Popped::Task(CommandTask::RecallPreset { index })
            );
        }
        assert_eq!(queue.pop(SHORT), Popped::Idle);
    }

    #[test]
    fn full_queue_times_out() {
        let queue = CommandQueue::new(1);
        queue.push(CommandTask::Ping, SHORT).unwrap();
        let started = Instant::now();
        assert_eq!(
            queue.push(CommandTask::Ping, SHORT),
            Err(QueueError::QueueFull)
        );
        assert!(started.elapsed() >= SHORT);
    }

    #[test]
    fn push_waits_for_space() {
        let queue = CommandQueue::new(1);
        queue.push(CommandTask::Ping, SHORT).unwrap();
        let consumer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            consumer.pop(SHORT)
        });
        queue
            .push(CommandTask::Start, Duration::from_secs(2))
            .unwrap();
        assert_eq!(handle.join().unwrap(), Popped::Task(CommandTask::Ping));
        assert_eq!(queue.pop(SHORT), Popped::Task(CommandTask::Start));
    }

    #[test]
    fn close_returns_pending_and_rejects_new() {
        let queue = CommandQueue::new(4);
        queue.push(CommandTask::Start, SHORT).unwrap();
        queue.push(CommandTask::Stop, SHORT).unwrap();
        let abandoned = queue.close();
        assert_eq!(abandoned, vec![CommandTask::Start, CommandTask::Stop]);
        assert_eq!(
            queue.push(CommandTask::Ping, SHORT),
            Err(QueueError::NotConnected)
        );
        assert_eq!(queue.pop(SHORT), Popped::Closed);
        assert!(queue.close().is_empty());
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue = CommandQueue::new(1);
        let consumer = queue.clone();
        let handle = thread::spawn(move || consumer.pop(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(handle.join().unwrap(), Popped::Closed);
    }
}
