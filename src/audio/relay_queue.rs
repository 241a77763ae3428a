//! # Audio Relay Queue
//!
//! Bounded handoff between the event-driven AI session callbacks (producer)
//! and the fixed-clock telephone media transmitter (consumer). This queue is
//! the single structure shared between the two per-call threads, and it is
//! also the interruption primitive: caller speech clears it to cancel queued
//! but not-yet-transmitted AI audio.
//!
//! ## Contract:
//! - **push** never blocks the producer
//! - **pop** blocks the consumer, but never longer than one frame interval;
//!   on timeout it returns a silence frame so the media clock stays fed
//! - **size** reports the queued byte count without consuming, which is what
//!   interruption detection inspects
//! - **clear** atomically discards everything queued, safe against concurrent
//!   push/pop
//! - **close** wakes a blocked pop with an end-of-stream `None`
//!
//! One producer thread and one consumer thread may operate concurrently with
//! no external locking.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

struct QueueState {
    chunks: VecDeque<Vec<u8>>,
    queued_bytes: usize,
    closed: bool,
}

/// FIFO byte-chunk queue feeding the telephone transmitter.
///
/// Created at session start, owned by exactly one call, drained and dropped
/// at session end.
pub struct AudioRelayQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    /// Size of the silence frame handed out when no audio arrives in time.
    frame_size: usize,
    /// How long `pop` may wait before falling back to silence.
    pop_timeout: Duration,
}

impl AudioRelayQueue {
    /// Create a queue for the given frame size (bytes) and read cadence.
    ///
    /// For 8 kHz PCM16 with 20 ms frames this is `new(320, Duration::from_millis(20))`.
    pub fn new(frame_size: usize, pop_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState {
                chunks: VecDeque::new(),
                queued_bytes: 0,
                closed: false,
            }),
            available: Condvar::new(),
            frame_size,
            pop_timeout,
        }
    }

    /// Append a chunk. Never blocks. Chunks pushed after `close` are dropped.
    pub fn push(&self, chunk: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.queued_bytes += chunk.len();
        state.chunks.push_back(chunk);
        self.available.notify_one();
    }

    /// Take the next chunk in FIFO order.
    ///
    /// Blocks until a chunk arrives, but at most for the configured read
    /// cadence; on timeout a zero-filled silence frame is returned instead so
    /// the fixed-rate transmitter never stalls. Returns `None` only after
    /// `close` once the queue has drained.
    pub fn pop(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(chunk) = state.chunks.pop_front() {
                state.queued_bytes -= chunk.len();
                return Some(chunk);
            }
            if state.closed {
                return None;
            }
            let (next, timeout) = self
                .available
                .wait_timeout(state, self.pop_timeout)
                .unwrap();
            state = next;
            if timeout.timed_out() && state.chunks.is_empty() {
                if state.closed {
                    return None;
                }
                return Some(vec![0u8; self.frame_size]);
            }
        }
    }

    /// Total queued bytes, observable without consuming.
    pub fn size(&self) -> usize {
        self.state.lock().unwrap().queued_bytes
    }

    /// Number of queued chunks.
    pub fn chunk_count(&self) -> usize {
        self.state.lock().unwrap().chunks.len()
    }

    /// Atomically discard all queued chunks (caller interruption).
    ///
    /// Returns the number of chunks discarded.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let discarded = state.chunks.len();
        state.chunks.clear();
        state.queued_bytes = 0;
        discarded
    }

    /// Signal that no further chunks will be produced.
    ///
    /// A blocked `pop` wakes up and returns `None` once the queue is empty.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.available.notify_all();
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Configured frame size in bytes.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}
