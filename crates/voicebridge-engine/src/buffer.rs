//! Bounded byte buffer linking the network worker and the media thread.
//!
//! One producer, one consumer, coordinated only through the write/read
//! positions and the producer-closed flag, all behind a single mutex held
//! for a handful of instructions. The buffer is linear rather than
//! circular: it is reset between requests, and its fixed capacity *is* the
//! backpressure mechanism — a writer that outruns the budget has its excess
//! dropped with a warning, never an error.

use std::sync::{Mutex, MutexGuard, PoisonError};

struct Inner {
    data: Vec<u8>,
    write: usize,
    read: usize,
    closed: bool,
}

/// Fixed-capacity single-producer/single-consumer byte buffer.
pub struct AudioBuffer {
    inner: Mutex<Inner>,
}

impl AudioBuffer {
    /// Allocate a buffer of exactly `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                data: vec![0; capacity],
                write: 0,
                read: 0,
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Positions back to zero, producer reopened.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.write = 0;
        inner.read = 0;
        inner.closed = false;
    }

    /// Append `bytes`, dropping whatever does not fit. Returns the number
    /// of bytes accepted.
    pub fn write(&self, bytes: &[u8]) -> usize {
        let mut inner = self.lock();
        let space = inner.data.len() - inner.write;
        let accepted = bytes.len().min(space);
        if accepted < bytes.len() {
            tracing::warn!(
                dropped = bytes.len() - accepted,
                capacity = inner.data.len(),
                "audio buffer full, dropping excess"
            );
        }
        if accepted > 0 {
            let write = inner.write;
            inner.data[write..write + accepted].copy_from_slice(&bytes[..accepted]);
            inner.write += accepted;
        }
        accepted
    }

    /// Copy up to `out.len()` bytes from the read position, advancing it.
    /// The flag reports whether the request was fully satisfied.
    pub fn read_into(&self, out: &mut [u8]) -> (usize, bool) {
        let mut inner = self.lock();
        let available = inner.write - inner.read;
        let n = out.len().min(available);
        let read = inner.read;
        out[..n].copy_from_slice(&inner.data[read..read + n]);
        inner.read += n;
        (n, n == out.len())
    }

    /// Copy `len` bytes starting at absolute position `start` without
    /// touching the read position. Used by the streaming cursor.
    #[must_use]
    pub fn copy_range(&self, start: usize, len: usize) -> Vec<u8> {
        let inner = self.lock();
        let end = (start + len).min(inner.write);
        inner.data[start.min(end)..end].to_vec()
    }

    /// Snapshot everything written so far and reset the buffer.
    #[must_use]
    pub fn drain_all(&self) -> Vec<u8> {
        let mut inner = self.lock();
        let out = inner.data[..inner.write].to_vec();
        inner.write = 0;
        inner.read = 0;
        inner.closed = false;
        out
    }

    /// Mark the producer side finished. Sticky until [`reset`](Self::reset).
    pub fn close_producer(&self) {
        self.lock().closed = true;
    }

    /// Unread bytes.
    #[must_use]
    pub fn available(&self) -> usize {
        let inner = self.lock();
        inner.write - inner.read
    }

    /// Total bytes written since the last reset.
    #[must_use]
    pub fn write_pos(&self) -> usize {
        self.lock().write
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().data.len()
    }

    /// Producer closed and everything consumed.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        let inner = self.lock();
        inner.closed && inner.write == inner.read
    }
}
