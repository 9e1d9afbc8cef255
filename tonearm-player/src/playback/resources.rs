//! Live-tunable player resources
//!
//! Shared by a player and the executor of its current track. The player writes,
//! the decode thread reads on every chunk. All knobs sit behind one lock so a
//! reader never sees a half-applied update.

use crate::playback::pcm::FilterFactory;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tonearm_common::config::MIN_FRAME_BUFFER_DURATION_MS;

/// Highest accepted volume level
pub const MAX_VOLUME: u16 = 1000;

/// Volume level of a fresh player
pub const DEFAULT_VOLUME: u16 = 100;

struct ResourceState {
    volume: u16,
    filter_factory: Option<Arc<dyn FilterFactory>>,
    frame_buffer_duration_ms: Option<u32>,
}

/// Mutable resources of a player, applied in real time
pub struct PlayerResources {
    state: RwLock<ResourceState>,
}

impl PlayerResources {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ResourceState {
                volume: DEFAULT_VOLUME,
                filter_factory: None,
                frame_buffer_duration_ms: None,
            }),
        }
    }

    /// Volume level, 0-1000 with 100 as unity
    pub fn volume(&self) -> u16 {
        self.state.read().volume
    }

    /// Set the volume, clamped to 0-1000
    pub fn set_volume(&self, volume: u16) {
        self.state.write().volume = volume.min(MAX_VOLUME);
    }

    pub fn filter_factory(&self) -> Option<Arc<dyn FilterFactory>> {
        self.state.read().filter_factory.clone()
    }

    /// Replace the PCM filter factory; decoders pick it up on their next chunk
    pub fn set_filter_factory(&self, factory: Option<Arc<dyn FilterFactory>>) {
        self.state.write().filter_factory = factory;
    }

    /// Frame buffer override for the next track started
    pub fn frame_buffer_duration_ms(&self) -> Option<u32> {
        self.state.read().frame_buffer_duration_ms
    }

    /// Override the frame buffer duration, clamped to at least 200ms
    pub fn set_frame_buffer_duration_ms(&self, duration_ms: Option<u32>) {
        self.state.write().frame_buffer_duration_ms =
            duration_ms.map(|d| d.max(MIN_FRAME_BUFFER_DURATION_MS));
    }
}

impl Default for PlayerResources {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PlayerResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("PlayerResources")
            .field("volume", &state.volume)
            .field("filter_factory", &state.filter_factory.is_some())
            .field("frame_buffer_duration_ms", &state.frame_buffer_duration_ms)
            .finish()
    }
}
