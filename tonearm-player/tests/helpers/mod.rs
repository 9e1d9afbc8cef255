//! Test helper modules for tonearm-player integration tests
//!
//! Provides reusable test infrastructure components:
//! - ScriptedDecoder: decoder producing tagged, numbered frames on demand
//! - Gate: releases frames of a gated decoder one permit at a time
//! - EventCollector: records player events and waits for them

#![allow(dead_code)]

pub mod decoders;
pub mod events;

pub use decoders::{FailingDecoder, Gate, PanickingDecoder, ScriptedDecoder, FRAME_MS, TINY_PCM};
pub use events::{describe, EventCollector};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tonearm_common::EngineConfig;
use tonearm_player::{AudioPlayer, PlayerManager};

/// Manager producing tiny frames into 200ms buffers (11 frames)
pub fn test_manager() -> PlayerManager {
    test_manager_with(EngineConfig::default())
}

pub fn test_manager_with(mut config: EngineConfig) -> PlayerManager {
    config.playback.frame_buffer_duration_ms = 200;
    let manager = PlayerManager::with_config(&config).expect("manager should start");
    manager.set_output_format(TINY_PCM);
    manager
}

/// Pull frames until the player has no active track, returning (tag, timecode) pairs
pub fn drain(player: &Arc<AudioPlayer>, timeout: Duration) -> Vec<(u8, u64)> {
    let deadline = Instant::now() + timeout;
    let mut frames = Vec::new();

    while Instant::now() < deadline {
        match player.provide_timeout(Duration::from_millis(50)) {
            Ok(Some(frame)) => frames.push((frame.data[0], frame.timecode)),
            Ok(None) if player.playing_track().is_none() => break,
            Ok(None) => {}
            Err(e) => panic!("provide failed: {}", e),
        }
    }

    frames
}
