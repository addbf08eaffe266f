//! ctrl/queue — bounded outbound FIFO with a blocking, interruptible reader.
//!
//! Carries whole command records (sequences of 32-bit LE words) from the
//! engine to the user-space daemon. One lock serializes enqueue/dequeue, a
//! condvar wakes readers blocked on an empty queue. This lock is private to
//! the queue and distinct from the channel-registry lock: registry
//! membership changes far less often than queue traffic.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use log::error;

use crate::errors::{Result, SnapError};

struct QueueState {
    bytes: VecDeque<u8>,
    interrupted: bool,
}

pub struct CmdQueue {
    state: Mutex<QueueState>,
    readq: Condvar,
    capacity: usize,
}

/// Readiness snapshot for a poll-style caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollFlags {
    pub readable: bool,
    pub writable: bool,
}

impl CmdQueue {
    pub fn new(capacity: usize) -> Self {
        CmdQueue {
            state: Mutex::new(QueueState {
                bytes: VecDeque::new(),
                interrupted: false,
            }),
            readq: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue one whole record atomically and wake blocked readers.
    ///
    /// Capacity is fixed at creation. Overrun fails with `NoSpace`: a full
    /// queue means the reader side is gone or stuck, which is a logic error
    /// at the caller, not a condition to backpressure the I/O path on.
    pub fn push(&self, words: &[u32]) -> Result<()> {
        let need = words.len() * 4;
        let mut st = self.state.lock().unwrap();
        if st.bytes.len() + need > self.capacity {
            error!(
                "outbound queue overrun: {} queued + {} new > capacity {}",
                st.bytes.len(),
                need,
                self.capacity
            );
            return Err(SnapError::NoSpace);
        }
        for w in words {
            st.bytes.extend(w.to_le_bytes());
        }
        drop(st);
        self.readq.notify_all();
        Ok(())
    }

    /// Block until the queue is non-empty, then drain up to `dst.len()`
    /// bytes and return the count.
    ///
    /// An interrupt delivered while waiting (or still pending from before
    /// the call) fails with `Interrupted`; the queue content is untouched
    /// and the caller decides whether to restart the wait.
    pub fn read(&self, dst: &mut [u8]) -> Result<usize> {
        let mut st = self.state.lock().unwrap();
        while st.bytes.is_empty() {
            if st.interrupted {
                st.interrupted = false;
                error!("unable to wait for queue read: interrupt signal was received");
                return Err(SnapError::Interrupted);
            }
            st = self.readq.wait(st).unwrap();
        }
        let n = dst.len().min(st.bytes.len());
        for (inx, b) in st.bytes.drain(..n).enumerate() {
            dst[inx] = b;
        }
        Ok(n)
    }

    /// Deliver an interrupt to the (current or next) blocked reader.
    pub fn interrupt(&self) {
        let mut st = self.state.lock().unwrap();
        st.interrupted = true;
        drop(st);
        self.readq.notify_all();
    }

    /// Readable when non-empty; always writable.
    pub fn poll(&self) -> PollFlags {
        let st = self.state.lock().unwrap();
        PollFlags {
            readable: !st.bytes.is_empty(),
            writable: true,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
