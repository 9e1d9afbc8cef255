//! Processing context handed to decoders

use crate::error::{Error, Result};
use crate::playback::frame_buffer::FrameBuffer;
use crate::playback::resources::PlayerResources;
use std::sync::Arc;
use tonearm_common::{AudioFormat, Frame};

/// Everything a decoder needs to produce frames for one track
#[derive(Clone)]
pub struct ProcessingContext {
    /// Format frames must be produced in
    pub format: AudioFormat,

    /// Destination of produced frames
    pub frame_buffer: Arc<FrameBuffer>,

    /// Live player resources (volume, filters)
    pub resources: Arc<PlayerResources>,
}

impl ProcessingContext {
    pub fn new(format: AudioFormat, frame_buffer: Arc<FrameBuffer>, resources: Arc<PlayerResources>) -> Self {
        Self {
            format,
            frame_buffer,
            resources,
        }
    }

    /// Push one frame, blocking while the buffer is full
    pub fn consume(&self, frame: &Frame) -> Result<()> {
        self.frame_buffer.consume(frame)
    }

    /// Cancellation checkpoint for decoders doing work outside the buffer
    ///
    /// Returns [`Error::Interrupted`] if a stop is pending or a seek/stop
    /// interrupt was delivered since the last check.
    pub fn check_interrupted(&self) -> Result<()> {
        if self.frame_buffer.is_stopping() || self.frame_buffer.take_interrupt() {
            return Err(Error::Interrupted);
        }

        Ok(())
    }
}
