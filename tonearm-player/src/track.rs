//! Playable tracks
//!
//! An [`AudioTrack`] couples immutable metadata with a one-shot decoder. Until
//! a player starts it, control calls land on a primordial executor; starting
//! assigns the real executor exactly once.

use crate::error::{Error, Result};
use crate::playback::context::ProcessingContext;
use crate::playback::executor::{ExecutorSettings, LocalExecutor, TrackExecutor, TrackState};
use crate::playback::marker::TrackMarker;
use crate::playback::primordial::PrimordialExecutor;
use crate::playback::resources::PlayerResources;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tonearm_common::Frame;
use tracing::debug;

/// Static description of a track
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackInfo {
    pub identifier: String,
    pub title: String,
    pub author: String,
    /// Length in milliseconds; meaningless for streams
    pub length_ms: u64,
    pub is_stream: bool,
    pub uri: Option<String>,
}

impl TrackInfo {
    pub fn new(identifier: impl Into<String>, length_ms: u64) -> Self {
        Self {
            identifier: identifier.into(),
            title: String::new(),
            author: String::new(),
            length_ms,
            is_stream: false,
            uri: None,
        }
    }

    pub fn stream(identifier: impl Into<String>) -> Self {
        Self {
            is_stream: true,
            length_ms: u64::MAX,
            ..Self::new(identifier, 0)
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }
}

/// Source-specific decode logic of a track
pub trait TrackDecoder: Send {
    /// Decode the whole track into the executor's buffer
    ///
    /// Runs once, on a playback thread. Blocking buffer calls return
    /// [`Error::Interrupted`] on stop or seek; decoders propagate it.
    fn process(&mut self, executor: &LocalExecutor) -> Result<()>;

    /// Executor to use instead of a [`LocalExecutor`], for sources that decode elsewhere
    fn create_executor(
        &self,
        _settings: &ExecutorSettings,
        _resources: &Arc<PlayerResources>,
    ) -> Option<Arc<dyn TrackExecutor>> {
        None
    }
}

type Resolver = Box<dyn FnOnce(&ProcessingContext) -> Result<Box<dyn TrackDecoder>> + Send>;

/// Decoder that resolves the real decoder only when playback starts
pub struct DelegatedDecoder {
    resolver: Option<Resolver>,
}

impl DelegatedDecoder {
    pub fn new(
        resolver: impl FnOnce(&ProcessingContext) -> Result<Box<dyn TrackDecoder>> + Send + 'static,
    ) -> Self {
        Self {
            resolver: Some(Box::new(resolver)),
        }
    }
}

impl TrackDecoder for DelegatedDecoder {
    fn process(&mut self, executor: &LocalExecutor) -> Result<()> {
        let resolver = self
            .resolver
            .take()
            .ok_or_else(|| Error::InvalidState("delegate already resolved".to_string()))?;

        let mut delegate = resolver(executor.processing_context())?;
        debug!("Resolved delegate decoder for track {}", executor.identifier());
        delegate.process(executor)
    }
}

/// A playable track instance; one instance plays at most once
pub struct AudioTrack {
    info: TrackInfo,
    decoder: Mutex<Option<Box<dyn TrackDecoder>>>,
    primordial: Arc<PrimordialExecutor>,
    executor: RwLock<Option<Arc<dyn TrackExecutor>>>,
}

impl AudioTrack {
    pub fn new(info: TrackInfo, decoder: impl TrackDecoder + 'static) -> Arc<Self> {
        Arc::new(Self {
            primordial: Arc::new(PrimordialExecutor::new(!info.is_stream)),
            info,
            decoder: Mutex::new(Some(Box::new(decoder))),
            executor: RwLock::new(None),
        })
    }

    pub fn info(&self) -> &TrackInfo {
        &self.info
    }

    pub fn identifier(&self) -> &str {
        &self.info.identifier
    }

    pub fn is_seekable(&self) -> bool {
        !self.info.is_stream
    }

    /// Length in milliseconds
    pub fn duration(&self) -> u64 {
        self.info.length_ms
    }

    /// Executor control calls go to: the assigned one, or the primordial one
    pub fn active_executor(&self) -> Arc<dyn TrackExecutor> {
        match self.executor.read().as_ref() {
            Some(executor) => executor.clone(),
            None => self.primordial.clone(),
        }
    }

    pub fn has_executor(&self) -> bool {
        self.executor.read().is_some()
    }

    /// Bind the executor that will play this track
    ///
    /// # Errors
    /// [`Error::TrackReused`] if an executor was already assigned.
    pub fn assign_executor(&self, executor: Arc<dyn TrackExecutor>, apply_primordial_state: bool) -> Result<()> {
        let mut slot = self.executor.write();
        if slot.is_some() {
            return Err(Error::TrackReused);
        }

        if apply_primordial_state {
            self.primordial.apply_state_to(executor.as_ref());
        }

        *slot = Some(executor);
        Ok(())
    }

    /// Custom executor offered by the decoder, if any
    pub fn create_custom_executor(
        &self,
        settings: &ExecutorSettings,
        resources: &Arc<PlayerResources>,
    ) -> Option<Arc<dyn TrackExecutor>> {
        self.decoder
            .lock()
            .as_ref()
            .and_then(|decoder| decoder.create_executor(settings, resources))
    }

    /// Hand the decoder to the executor running it; `None` after the first call
    pub fn take_decoder(&self) -> Option<Box<dyn TrackDecoder>> {
        self.decoder.lock().take()
    }

    pub fn state(&self) -> TrackState {
        self.active_executor().state()
    }

    /// Current position in milliseconds
    pub fn position(&self) -> u64 {
        self.active_executor().position()
    }

    /// Seek to `position` ms; ignored for streams
    pub fn set_position(&self, position: i64) {
        self.active_executor().set_position(position);
    }

    pub fn set_marker(&self, marker: Option<TrackMarker>) {
        self.active_executor().set_marker(marker);
    }

    pub fn stop(&self) {
        self.active_executor().stop();
    }

    pub fn failed_before_load(&self) -> bool {
        self.active_executor().failed_before_load()
    }

    pub fn provide(&self) -> Option<Frame> {
        self.active_executor().provide()
    }

    pub fn provide_timeout(&self, timeout: Duration) -> Result<Option<Frame>> {
        self.active_executor().provide_timeout(timeout)
    }

    pub fn provide_into(&self, target: &mut Frame) -> bool {
        self.active_executor().provide_into(target)
    }

    pub fn provide_into_timeout(&self, target: &mut Frame, timeout: Duration) -> Result<bool> {
        self.active_executor().provide_into_timeout(target, timeout)
    }

    /// Snapshot of the decode thread, for stuck reports
    pub fn diagnostics(&self) -> Option<String> {
        self.active_executor().diagnostics()
    }
}

impl fmt::Debug for AudioTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioTrack")
            .field("identifier", &self.info.identifier)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonearm_common::AudioFormat;

    struct Silent;

    impl TrackDecoder for Silent {
        fn process(&mut self, _executor: &LocalExecutor) -> Result<()> {
            Ok(())
        }
    }

    fn local(track: &AudioTrack) -> Arc<dyn TrackExecutor> {
        let settings = ExecutorSettings {
            format: AudioFormat::default(),
            frame_buffer_duration_ms: 1000,
            use_seek_ghosting: false,
        };
        Arc::new(LocalExecutor::new(
            track.identifier(),
            track.is_seekable(),
            settings,
            Arc::new(PlayerResources::new()),
        ))
    }

    #[test]
    fn test_second_assignment_is_rejected() {
        let track = AudioTrack::new(TrackInfo::new("a", 1000), Silent);
        track.assign_executor(local(&track), true).unwrap();

        let err = track.assign_executor(local(&track), true).unwrap_err();
        assert!(matches!(err, Error::TrackReused));
    }

    #[test]
    fn test_primordial_position_carries_over() {
        let track = AudioTrack::new(TrackInfo::new("a", 10_000), Silent);
        track.set_position(2500);
        assert_eq!(track.position(), 2500);
        assert!(!track.has_executor());

        track.assign_executor(local(&track), true).unwrap();
        assert_eq!(track.position(), 2500);
        assert_eq!(track.state(), TrackState::Inactive);
    }

    #[test]
    fn test_streams_ignore_seek() {
        let track = AudioTrack::new(TrackInfo::stream("live").with_title("Live"), Silent);
        assert!(!track.is_seekable());
        track.set_position(2500);
        assert_eq!(track.position(), 0);
    }

    #[test]
    fn test_decoder_is_taken_once() {
        let track = AudioTrack::new(TrackInfo::new("a", 0), Silent);
        assert!(track.take_decoder().is_some());
        assert!(track.take_decoder().is_none());
    }
}
