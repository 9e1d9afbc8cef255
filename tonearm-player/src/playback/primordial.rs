//! Stand-in executor of a track that has not been started
//!
//! Remembers the position and marker set before playback so they can be
//! replayed onto the real executor once it is assigned.

use crate::error::Result;
use crate::playback::executor::{TrackExecutor, TrackState, TrackStateListener};
use crate::playback::frame_buffer::FrameBuffer;
use crate::playback::marker::{MarkerTracker, TrackMarker};
use crate::track::AudioTrack;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tonearm_common::Frame;
use tracing::{debug, warn};

pub struct PrimordialExecutor {
    seekable: bool,
    position: Mutex<u64>,
    markers: MarkerTracker,
}

impl PrimordialExecutor {
    pub fn new(seekable: bool) -> Self {
        Self {
            seekable,
            position: Mutex::new(0),
            markers: MarkerTracker::new(),
        }
    }

    /// Carry the remembered position and marker over to `executor`
    pub fn apply_state_to(&self, executor: &dyn TrackExecutor) {
        let position = *self.position.lock();
        if position != 0 {
            executor.set_position(position as i64);
        }

        executor.set_marker(self.markers.remove());
    }
}

impl TrackExecutor for PrimordialExecutor {
    fn frame_buffer(&self) -> Option<&Arc<FrameBuffer>> {
        None
    }

    fn state(&self) -> TrackState {
        TrackState::Inactive
    }

    fn position(&self) -> u64 {
        *self.position.lock()
    }

    fn set_position(&self, position: i64) {
        if !self.seekable {
            return;
        }

        let position = position.max(0) as u64;
        *self.position.lock() = position;
        self.markers.check_seek_timecode(position);
    }

    fn set_marker(&self, marker: Option<TrackMarker>) {
        self.markers.set(marker, self.position());
    }

    fn stop(&self) {
        debug!("Tried to stop a track which has not been started.");
    }

    fn failed_before_load(&self) -> bool {
        false
    }

    fn execute(&self, track: &Arc<AudioTrack>, _listener: &dyn TrackStateListener) {
        warn!("Cannot execute track {} without an assigned executor", track.identifier());
    }

    fn provide_into(&self, _target: &mut Frame) -> bool {
        false
    }

    fn provide_into_timeout(&self, _target: &mut Frame, _timeout: Duration) -> Result<bool> {
        Ok(false)
    }
}
