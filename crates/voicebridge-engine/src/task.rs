//! Background worker — the single consumer that owns all network I/O.
//!
//! One dedicated OS thread drains a bounded FIFO queue of work items.
//! Producers (request dispatch, the media callbacks, and the worker itself
//! when it self-reposts a polling step) enqueue with `try_send`: the media
//! thread must never block, so a full queue drops the item with a warning
//! instead of waiting. Ordering within a channel is FIFO because there is
//! exactly one consumer.

use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread;

use crate::error::BridgeError;

/// Queue depth. Generously above the handful of in-flight items a channel
/// produces (one poll continuation plus a few streaming chunks).
const QUEUE_CAPACITY: usize = 128;

enum Command<M> {
    Work(M),
    Shutdown,
}

/// Cloneable producer handle into a [`Worker`] queue.
pub struct WorkSender<M> {
    tx: SyncSender<Command<M>>,
}

impl<M> Clone for WorkSender<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M> WorkSender<M> {
    /// Enqueue without blocking.
    pub fn post(&self, item: M) -> Result<(), BridgeError> {
        match self.tx.try_send(Command::Work(item)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!("worker queue full, dropping work item");
                Err(BridgeError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(BridgeError::WorkerGone),
        }
    }
}

/// Owning handle to the background thread. Dropping it requests shutdown
/// and joins; queued work behind the shutdown marker is discarded.
pub struct Worker<M: Send + 'static> {
    tx: SyncSender<Command<M>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl<M: Send + 'static> Worker<M> {
    /// Spawn the consumer thread. `handle` runs for every work item, in
    /// queue order, on that thread.
    pub fn spawn(name: &str, mut handle: impl FnMut(M) + Send + 'static) -> Result<Self, BridgeError> {
        let (tx, rx) = mpsc::sync_channel::<Command<M>>(QUEUE_CAPACITY);
        let thread_name = name.to_string();
        let thread = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                while let Ok(command) = rx.recv() {
                    match command {
                        Command::Work(item) => handle(item),
                        Command::Shutdown => break,
                    }
                }
                tracing::debug!(worker = %thread_name, "worker shutting down");
            })?;

        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    /// A producer handle for posting work.
    #[must_use]
    pub fn sender(&self) -> WorkSender<M> {
        WorkSender {
            tx: self.tx.clone(),
        }
    }
}

impl<M: Send + 'static> Drop for Worker<M> {
    fn drop(&mut self) {
        let _ = self.tx.try_send(Command::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}
