//! Bounded rolling window of recent frames, kept for clip export.

use crate::sync::lock;
use crate::types::Frame;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Fixed-capacity FIFO of owned frame copies.
///
/// All mutation goes through one mutex. Entries are immutable once pushed,
/// so the lock is only held to copy `Arc`s in or out; pixel copies happen
/// after the guard is dropped.
pub struct FrameRingBuffer {
    capacity: usize,
    frames: Mutex<VecDeque<Arc<Frame>>>,
}

impl FrameRingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a copy of `frame`, dropping the oldest entry when full.
    pub fn push(&self, frame: &Frame) {
        let copy = Arc::new(frame.clone());
        let evicted = {
            let mut frames = lock(&self.frames);
            let evicted = if frames.len() >= self.capacity {
                frames.pop_front()
            } else {
                None
            };
            frames.push_back(copy);
            evicted
        };
        drop(evicted);
    }

    /// Owned copies of every buffered frame, oldest first.
    pub fn snapshot(&self) -> Vec<Frame> {
        self.shared_snapshot()
            .iter()
            .map(|frame| Frame::clone(frame))
            .collect()
    }

    /// The buffered frames themselves, oldest first, for read-only consumers
    /// such as clip export. Later pushes and evictions do not affect them.
    pub fn shared_snapshot(&self) -> Vec<Arc<Frame>> {
        lock(&self.frames).iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.frames).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every buffered frame.
    pub fn clear(&self) {
        let drained: VecDeque<Arc<Frame>> = std::mem::take(&mut *lock(&self.frames));
        tracing::debug!(released = drained.len(), "frame buffer drained");
    }
}
