//! Shared state injected into the ingestion loop, the retrain job and the
//! control surface.

use crate::directory::IdentityDirectory;
use crate::height::HeightProfiles;
use crate::ring_buffer::FrameRingBuffer;
use crate::sync::lock;
use crate::state::{StateCell, SystemState};
use crate::types::Frame;
use crate::vision::ModelSlot;
use std::sync::{Arc, Mutex};

/// Everything more than one activity touches. Each piece carries its own
/// lock, and no lock is held across I/O.
pub struct SharedContext {
    pub buffer: FrameRingBuffer,
    current: Mutex<Option<Frame>>,
    pub directory: Arc<IdentityDirectory>,
    pub heights: HeightProfiles,
    pub state: StateCell,
    pub model: Arc<ModelSlot>,
}

impl SharedContext {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            buffer: FrameRingBuffer::new(buffer_capacity),
            current: Mutex::new(None),
            directory: Arc::new(IdentityDirectory::new()),
            heights: HeightProfiles::new(),
            state: StateCell::new(),
            model: Arc::new(ModelSlot::new()),
        }
    }

    /// Buffer a copy of `frame` and make it the current frame. The previous
    /// current frame is dropped here, not later.
    pub fn ingest(&self, frame: &Frame) {
        self.buffer.push(frame);
        let previous = lock(&self.current).replace(frame.clone());
        drop(previous);
    }

    pub fn current_frame(&self) -> Option<Frame> {
        lock(&self.current).clone()
    }

    pub fn buffer_snapshot(&self) -> Vec<Frame> {
        self.buffer.snapshot()
    }

    pub fn system_state(&self) -> SystemState {
        self.state.get()
    }

    /// Drop the current frame and every buffered frame. Called once ingestion
    /// has stopped.
    pub fn release_frames(&self) {
        let last = lock(&self.current).take();
        drop(last);
        self.buffer.clear();
        tracing::info!("frame buffers released");
    }
}
