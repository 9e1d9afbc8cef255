//! Player Manager
//!
//! Factory for players and owner of the services they share: the playback
//! pool running decode calls, the event dispatcher, and the lifecycle watchdog
//! sweeping players for cleanup and stuck tracks.
//!
//! Players hold the shared half ([`ManagerShared`]); the watchdog only holds a
//! weak reference to it, so dropping the manager shuts everything down.

use crate::error::Result;
use crate::events::{AudioEvent, AudioEventListener, EventDispatcher};
use crate::lifecycle::{LifecycleRegistry, LifecycleWatchdog};
use crate::playback::executor::{ExecutorSettings, LocalExecutor, TrackExecutor, TrackStateListener};
use crate::playback::pool::PlaybackPool;
use crate::playback::resources::PlayerResources;
use crate::player::AudioPlayer;
use crate::track::AudioTrack;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tonearm_common::config::MIN_FRAME_BUFFER_DURATION_MS;
use tonearm_common::{AudioFormat, EngineConfig};
use tracing::{debug, info};

/// Live-tunable manager settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerSettings {
    pub output_format: AudioFormat,
    pub frame_buffer_duration_ms: u32,
    pub use_seek_ghosting: bool,
    pub stuck_threshold_ms: u64,
    pub cleanup_threshold_ms: u64,
}

impl From<&EngineConfig> for ManagerSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            output_format: config.playback.audio_format(),
            frame_buffer_duration_ms: config.playback.frame_buffer_duration_ms,
            use_seek_ghosting: config.playback.seek_ghosting,
            stuck_threshold_ms: config.lifecycle.stuck_threshold_ms,
            cleanup_threshold_ms: config.lifecycle.cleanup_threshold_ms,
        }
    }
}

/// State shared between the manager and its players
pub(crate) struct ManagerShared {
    settings: RwLock<ManagerSettings>,
    pool: PlaybackPool,
    dispatcher: EventDispatcher,
    registry: Arc<LifecycleRegistry>,
    players: Mutex<Vec<Weak<AudioPlayer>>>,
    shut_down: AtomicBool,
}

impl ManagerShared {
    pub(crate) fn settings(&self) -> ManagerSettings {
        *self.settings.read()
    }

    pub(crate) fn stuck_threshold(&self) -> Duration {
        Duration::from_millis(self.settings.read().stuck_threshold_ms)
    }

    pub(crate) fn cleanup_threshold(&self) -> Duration {
        Duration::from_millis(self.settings.read().cleanup_threshold_ms)
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub(crate) fn registry(&self) -> &Arc<LifecycleRegistry> {
        &self.registry
    }

    pub(crate) fn dispatch(&self, listeners: Vec<Arc<dyn AudioEventListener>>, event: AudioEvent) {
        self.dispatcher.dispatch(listeners, event);
    }

    fn executor_settings(&self, resources: &PlayerResources) -> ExecutorSettings {
        let settings = self.settings.read();
        ExecutorSettings {
            format: settings.output_format,
            frame_buffer_duration_ms: resources
                .frame_buffer_duration_ms()
                .unwrap_or(settings.frame_buffer_duration_ms),
            use_seek_ghosting: settings.use_seek_ghosting,
        }
    }

    pub(crate) fn create_executor_for_track(
        &self,
        track: &AudioTrack,
        resources: &Arc<PlayerResources>,
    ) -> Arc<dyn TrackExecutor> {
        let settings = self.executor_settings(resources);

        if let Some(custom) = track.create_custom_executor(&settings, resources) {
            debug!("Track {} supplied its own executor", track.identifier());
            return custom;
        }

        Arc::new(LocalExecutor::new(
            track.identifier(),
            track.is_seekable(),
            settings,
            Arc::clone(resources),
        ))
    }

    /// Create and bind the executor of `track`
    pub(crate) fn prepare_track(&self, track: &AudioTrack, resources: &Arc<PlayerResources>) -> Result<Arc<dyn TrackExecutor>> {
        let executor = self.create_executor_for_track(track, resources);
        track.assign_executor(Arc::clone(&executor), true)?;
        Ok(executor)
    }

    /// Run the bound executor of `track` on the playback pool
    pub(crate) fn submit_track(
        &self,
        executor: Arc<dyn TrackExecutor>,
        track: Arc<AudioTrack>,
        listener: Arc<dyn TrackStateListener>,
    ) -> Result<()> {
        self.pool
            .submit(move || executor.execute(&track, listener.as_ref()))
    }
}

/// Entry point of the engine: creates players and owns their shared services
pub struct PlayerManager {
    shared: Arc<ManagerShared>,
    watchdog: LifecycleWatchdog,
}

impl PlayerManager {
    /// Manager with built-in defaults
    pub fn new() -> Result<Self> {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Result<Self> {
        let shared = Arc::new(ManagerShared {
            settings: RwLock::new(ManagerSettings::from(config)),
            pool: PlaybackPool::new(
                Duration::from_millis(config.pool.idle_keepalive_ms),
                Duration::from_millis(config.pool.shutdown_timeout_ms),
            ),
            dispatcher: EventDispatcher::start()?,
            registry: Arc::new(LifecycleRegistry::new()),
            players: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        });

        let watchdog = LifecycleWatchdog::start(
            Arc::downgrade(&shared),
            Duration::from_millis(config.lifecycle.watchdog_interval_ms),
        )?;

        info!(
            "Player manager started (output {}, buffer {}ms)",
            config.playback.audio_format(),
            config.playback.frame_buffer_duration_ms
        );

        Ok(Self { shared, watchdog })
    }

    /// New player registered with the lifecycle watchdog
    pub fn create_player(&self) -> Arc<AudioPlayer> {
        let player = AudioPlayer::new(Arc::clone(&self.shared));
        player.add_listener(self.shared.registry.hook_for(&player));

        let mut players = self.shared.players.lock();
        players.retain(|p| p.strong_count() > 0);
        players.push(Arc::downgrade(&player));

        debug!("Created player {}", player.id());
        player
    }

    /// Stop every player, cancel the watchdog, drain the pool and the dispatcher
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Shutting down player manager");
        self.watchdog.stop();

        let players: Vec<_> = self.shared.players.lock().drain(..).collect();
        for player in players.iter().filter_map(Weak::upgrade) {
            player.stop_track();
        }

        self.shared.pool.shutdown();
        self.shared.dispatcher.shutdown();
        info!("Player manager shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.is_shut_down()
    }

    /// Create and bind the executor for `track`, then start it on the pool
    ///
    /// # Errors
    /// [`crate::Error::TrackReused`] when the track already has an executor.
    pub fn execute_track(
        &self,
        listener: Arc<dyn TrackStateListener>,
        track: Arc<AudioTrack>,
        resources: &Arc<PlayerResources>,
    ) -> Result<()> {
        let executor = self.shared.prepare_track(&track, resources)?;
        self.shared.submit_track(executor, track, listener)
    }

    /// Executor `track` would be played with: its decoder's own, else a local one
    pub fn create_executor_for_track(&self, track: &AudioTrack, resources: &Arc<PlayerResources>) -> Arc<dyn TrackExecutor> {
        self.shared.create_executor_for_track(track, resources)
    }

    pub fn settings(&self) -> ManagerSettings {
        self.shared.settings()
    }

    /// Time without frames after which a playing track is reported stuck
    pub fn set_track_stuck_threshold(&self, threshold_ms: u64) {
        self.shared.settings.write().stuck_threshold_ms = threshold_ms;
    }

    /// Time without `provide` calls after which a player's track is stopped
    pub fn set_player_cleanup_threshold(&self, threshold_ms: u64) {
        self.shared.settings.write().cleanup_threshold_ms = threshold_ms;
    }

    /// Frame buffer length for tracks started from now on, at least 200ms
    pub fn set_frame_buffer_duration(&self, duration_ms: u32) {
        self.shared.settings.write().frame_buffer_duration_ms = duration_ms.max(MIN_FRAME_BUFFER_DURATION_MS);
    }

    pub fn set_use_seek_ghosting(&self, enabled: bool) {
        self.shared.settings.write().use_seek_ghosting = enabled;
    }

    /// Output format for tracks started from now on
    pub fn set_output_format(&self, format: AudioFormat) {
        self.shared.settings.write().output_format = format;
    }

    /// Players the watchdog currently tracks as playing
    pub fn active_player_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Threads currently in the playback pool
    pub fn playback_thread_count(&self) -> usize {
        self.shared.pool.thread_count()
    }
}

impl Drop for PlayerManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
