//! Audio Player
//!
//! Owns one active track slot plus a shadow slot for the track it replaced,
//! and exposes the pull API audio sinks poll for frames.
//!
//! ## Track switching
//!
//! ```text
//! start_track(new) ─▶ previous.stop() ─▶ TrackEnd{Replaced} ─▶ previous → shadow
//!                                   └──▶ TrackStart(new) ─▶ pool runs new executor
//! ```
//!
//! Until the new track yields its first frame, zero-timeout `provide` calls
//! drain the shadow's remaining frames so the switch has no gap. The shadow is
//! dropped when the active track delivers or the shadow hands out its
//! terminator.
//!
//! ## Locking
//!
//! Slot state sits behind one mutex, held for bookkeeping and event emission
//! only. Blocking executor calls (`provide` with a timeout) run outside it.

use crate::error::{Error, FriendlyError, Result};
use crate::events::{AudioEvent, AudioEventListener, ChannelListener, TrackEndReason};
use crate::manager::ManagerShared;
use crate::playback::executor::TrackStateListener;
use crate::playback::pcm::FilterFactory;
use crate::playback::resources::PlayerResources;
use crate::track::AudioTrack;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tonearm_common::{AudioFormat, Frame};
use tracing::{debug, error, warn};
use uuid::Uuid;

struct PlayerState {
    active: Option<Arc<AudioTrack>>,
    shadow: Option<Arc<AudioTrack>>,
    /// Last `provide` call
    last_request: Instant,
    /// Last frame handed out by the active track
    last_receive: Instant,
    stuck_event_sent: bool,
    paused: bool,
    destroyed: bool,
}

/// A player: plays one track at a time and serves its frames
pub struct AudioPlayer {
    id: Uuid,
    shared: Arc<ManagerShared>,
    resources: Arc<PlayerResources>,
    state: Mutex<PlayerState>,
    listeners: RwLock<Vec<Arc<dyn AudioEventListener>>>,
    weak_self: Weak<AudioPlayer>,
}

impl AudioPlayer {
    pub(crate) fn new(shared: Arc<ManagerShared>) -> Arc<Self> {
        let now = Instant::now();

        Arc::new_cyclic(|weak_self| Self {
            id: Uuid::new_v4(),
            shared,
            resources: Arc::new(PlayerResources::new()),
            state: Mutex::new(PlayerState {
                active: None,
                shadow: None,
                last_request: now,
                last_receive: now,
                stuck_event_sent: false,
                paused: false,
                destroyed: false,
            }),
            listeners: RwLock::new(Vec::new()),
            weak_self: weak_self.clone(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn resources(&self) -> &Arc<PlayerResources> {
        &self.resources
    }

    /// Currently active track
    pub fn playing_track(&self) -> Option<Arc<AudioTrack>> {
        self.state.lock().active.clone()
    }

    /// Start `track`, replacing the active one
    pub fn play_track(&self, track: Arc<AudioTrack>) -> Result<bool> {
        self.start_track(Some(track), false)
    }

    /// Switch the active track
    ///
    /// With `no_interrupt`, an already active track is kept and `false` is
    /// returned without side effects. `None` stops the active track. Returns
    /// whether a new track was started.
    ///
    /// # Errors
    /// [`Error::TrackReused`] when `track` was already started once; nothing
    /// changes in that case.
    pub fn start_track(&self, track: Option<Arc<AudioTrack>>, no_interrupt: bool) -> Result<bool> {
        let mut state = self.state.lock();

        if state.destroyed || self.shared.is_shut_down() {
            warn!("Player {} can no longer start tracks", self.id);
            return Ok(false);
        }

        if no_interrupt && state.active.is_some() {
            return Ok(false);
        }

        let Some(listener) = self.weak_self.upgrade() else {
            return Ok(false);
        };

        let executor = match &track {
            Some(track) => Some(self.shared.prepare_track(track, &self.resources)?),
            None => None,
        };

        let previous = std::mem::replace(&mut state.active, track.clone());
        let now = Instant::now();
        state.last_request = now;
        state.last_receive = now;
        state.stuck_event_sent = false;

        if let Some(previous) = previous {
            previous.stop();
            let reason = if track.is_some() {
                TrackEndReason::Replaced
            } else {
                TrackEndReason::Stopped
            };
            self.emit_track_end(&previous, reason);
            state.shadow = Some(previous);
        }

        let (Some(track), Some(executor)) = (track, executor) else {
            state.shadow = None;
            return Ok(false);
        };

        debug!("Player {} starting track {}", self.id, track.identifier());
        self.emit(AudioEvent::TrackStart {
            player_id: self.id,
            track: Arc::clone(&track),
            timestamp: Utc::now(),
        });

        if let Err(e) = self.shared.submit_track(executor, Arc::clone(&track), listener) {
            error!("Player {} could not run track {}: {}", self.id, track.identifier(), e);
            state.active = None;
            self.emit_track_end(&track, TrackEndReason::LoadFailed);
            return Err(e);
        }

        Ok(true)
    }

    /// Stop the active track with reason `Stopped`
    pub fn stop_track(&self) {
        self.stop_with_reason(TrackEndReason::Stopped);
    }

    fn stop_with_reason(&self, reason: TrackEndReason) {
        let mut state = self.state.lock();
        self.stop_locked(&mut state, reason);
    }

    fn stop_locked(&self, state: &mut PlayerState, reason: TrackEndReason) {
        state.shadow = None;

        if let Some(track) = state.active.take() {
            debug!("Player {} stopping track {} ({:?})", self.id, track.identifier(), reason);
            track.stop();
            self.emit_track_end(&track, reason);
        }
    }

    /// Next frame if one is ready, never blocks
    ///
    /// Returns `None` while paused. When the active track has nothing ready,
    /// checks it for being stuck and serves a frame of the shadow track.
    pub fn provide(&self) -> Option<Frame> {
        let mut frame = Frame::empty(self.output_format());
        self.provide_into(&mut frame).then_some(frame)
    }

    /// Next frame, waiting up to `timeout`; `None` if none arrived in time
    pub fn provide_timeout(&self, timeout: Duration) -> Result<Option<Frame>> {
        let mut frame = Frame::empty(self.output_format());
        Ok(self.provide_into_timeout(&mut frame, timeout)?.then_some(frame))
    }

    /// [`AudioPlayer::provide`] into a caller-owned frame
    pub fn provide_into(&self, target: &mut Frame) -> bool {
        match self.provide_frame(target, None) {
            Ok(provided) => provided,
            Err(e) => {
                error!("Player {} failed to provide a frame: {}", self.id, e);
                false
            }
        }
    }

    /// [`AudioPlayer::provide_timeout`] into a caller-owned frame
    pub fn provide_into_timeout(&self, target: &mut Frame, timeout: Duration) -> Result<bool> {
        let timeout = Some(timeout).filter(|t| !t.is_zero());
        self.provide_frame(target, timeout)
    }

    fn provide_frame(&self, target: &mut Frame, timeout: Option<Duration>) -> Result<bool> {
        let paused = {
            let mut state = self.state.lock();
            state.last_request = Instant::now();
            state.paused
        };

        if timeout.is_none() && paused {
            return Ok(false);
        }

        loop {
            let Some(track) = self.state.lock().active.clone() else {
                return Ok(false);
            };

            let received = match timeout {
                Some(timeout) => match track.provide_into_timeout(target, timeout) {
                    Ok(received) => received,
                    Err(Error::TimedOut) => false,
                    Err(e) => return Err(e),
                },
                None => track.provide_into(target),
            };

            if received {
                {
                    let mut state = self.state.lock();
                    state.last_receive = Instant::now();
                    state.stuck_event_sent = false;
                    state.shadow = None;
                }

                if target.is_terminator() {
                    self.handle_terminator(&track);
                    continue;
                }

                return Ok(true);
            }

            if timeout.is_none() {
                self.check_stuck_track(&track);
                return Ok(self.provide_shadow_frame(target));
            }

            return Ok(false);
        }
    }

    fn handle_terminator(&self, track: &Arc<AudioTrack>) {
        let mut state = self.state.lock();

        if state.active.as_ref().is_some_and(|active| Arc::ptr_eq(active, track)) {
            state.active = None;
            let reason = if track.failed_before_load() {
                TrackEndReason::LoadFailed
            } else {
                TrackEndReason::Finished
            };
            self.emit_track_end(track, reason);
        }
    }

    fn provide_shadow_frame(&self, target: &mut Frame) -> bool {
        let Some(shadow) = self.state.lock().shadow.clone() else {
            return false;
        };

        if !shadow.provide_into(target) {
            return false;
        }

        if target.is_terminator() {
            let mut state = self.state.lock();
            if state.shadow.as_ref().is_some_and(|s| Arc::ptr_eq(s, &shadow)) {
                state.shadow = None;
            }
            return false;
        }

        true
    }

    /// Stop the active track with reason `Cleanup` if nobody polled within `threshold`
    pub fn check_cleanup(&self, threshold: Duration) {
        let mut state = self.state.lock();

        if state.active.is_some() && state.last_request.elapsed() >= threshold {
            debug!("Player {} was not polled for {:?}, cleaning up", self.id, threshold);
            self.stop_locked(&mut state, TrackEndReason::Cleanup);
        }
    }

    /// Report the active track as stuck if it has produced nothing for too long
    ///
    /// Fires once per stuck episode. Paused or unpolled players are not stuck.
    pub fn check_stuck(&self) {
        let track = self.state.lock().active.clone();
        if let Some(track) = track {
            self.check_stuck_track(&track);
        }
    }

    fn check_stuck_track(&self, track: &Arc<AudioTrack>) {
        let threshold = self.shared.stuck_threshold();
        let mut state = self.state.lock();

        let is_active = state.active.as_ref().is_some_and(|a| Arc::ptr_eq(a, track));
        if !is_active
            || state.paused
            || state.stuck_event_sent
            || state.last_request.elapsed() >= threshold
            || state.last_receive.elapsed() <= threshold
        {
            return;
        }

        state.stuck_event_sent = true;
        warn!(
            "Track {} on player {} produced no frames for {:?}",
            track.identifier(),
            self.id,
            threshold
        );

        self.emit(AudioEvent::TrackStuck {
            player_id: self.id,
            track: Arc::clone(track),
            threshold_ms: threshold.as_millis() as u64,
            diagnostics: track.diagnostics(),
            timestamp: Utc::now(),
        });
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Pause or resume; events fire only on an actual change
    pub fn set_paused(&self, paused: bool) {
        let mut state = self.state.lock();
        if state.paused == paused {
            return;
        }

        state.paused = paused;
        let timestamp = Utc::now();
        if paused {
            self.emit(AudioEvent::PlayerPause {
                player_id: self.id,
                timestamp,
            });
        } else {
            state.last_receive = Instant::now();
            self.emit(AudioEvent::PlayerResume {
                player_id: self.id,
                timestamp,
            });
        }
    }

    pub fn volume(&self) -> u16 {
        self.resources.volume()
    }

    /// Volume 0-1000, 100 is unity; applied live to the playing track
    pub fn set_volume(&self, volume: u16) {
        self.resources.set_volume(volume);
    }

    /// PCM filter chain for the playing and future tracks
    pub fn set_filter_factory(&self, factory: Option<Arc<dyn FilterFactory>>) {
        self.resources.set_filter_factory(factory);
    }

    /// Frame buffer length for the next track started; `None` uses the manager default
    pub fn set_frame_buffer_duration(&self, duration_ms: Option<u32>) {
        self.resources.set_frame_buffer_duration_ms(duration_ms);
    }

    pub fn add_listener(&self, listener: Arc<dyn AudioEventListener>) {
        self.listeners.write().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn AudioEventListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Channel receiving every event emitted from now on
    pub fn subscribe(&self) -> UnboundedReceiver<AudioEvent> {
        let (listener, receiver) = ChannelListener::pair();
        self.add_listener(Arc::new(listener));
        receiver
    }

    /// Stop the active track; the player cannot start tracks afterwards
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        self.stop_locked(&mut state, TrackEndReason::Stopped);
        state.destroyed = true;
        debug!("Player {} destroyed", self.id);
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    fn output_format(&self) -> AudioFormat {
        self.shared.settings().output_format
    }

    fn emit_track_end(&self, track: &Arc<AudioTrack>, reason: TrackEndReason) {
        self.emit(AudioEvent::TrackEnd {
            player_id: self.id,
            track: Arc::clone(track),
            reason,
            timestamp: Utc::now(),
        });
    }

    fn emit(&self, event: AudioEvent) {
        let listeners = self.listeners.read().clone();
        self.shared.dispatch(listeners, event);
    }
}

impl TrackStateListener for AudioPlayer {
    fn on_track_exception(&self, track: &Arc<AudioTrack>, error: FriendlyError) {
        self.emit(AudioEvent::TrackException {
            player_id: self.id,
            track: Arc::clone(track),
            error,
            timestamp: Utc::now(),
        });
    }
}

impl fmt::Debug for AudioPlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AudioPlayer")
            .field("id", &self.id)
            .field("active", &state.active.as_ref().map(|t| t.identifier().to_string()))
            .field("paused", &state.paused)
            .field("destroyed", &state.destroyed)
            .finish()
    }
}
