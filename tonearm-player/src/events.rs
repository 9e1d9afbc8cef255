//! Player events
//!
//! # Architecture
//!
//! Players never call listeners on the thread that triggered an event. Each
//! emission is queued on the manager's [`EventDispatcher`] together with a
//! snapshot of the player's listeners, and a single dispatch thread delivers
//! them in queue order. Per-player emission order is therefore preserved and a
//! slow or panicking listener never blocks a decode or pull thread.
//!
//! [`EventRecord`] is the serialisable form of an event, used for JSON-lines
//! output.

use crate::error::{Error, FriendlyError, Result, Severity};
use crate::track::AudioTrack;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, trace};
use uuid::Uuid;

/// Why a track stopped being the active track of a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackEndReason {
    /// Played to its terminator
    Finished,
    /// Failed before producing any audio
    LoadFailed,
    /// Stopped by an explicit stop call
    Stopped,
    /// Replaced by a newly started track
    Replaced,
    /// Stopped by the watchdog because the player was not polled
    Cleanup,
}

impl TrackEndReason {
    /// Whether a queue should start its next track after this end
    pub fn may_start_next(self) -> bool {
        matches!(self, TrackEndReason::Finished | TrackEndReason::LoadFailed)
    }
}

/// Event emitted by a player
#[derive(Debug, Clone)]
pub enum AudioEvent {
    TrackStart {
        player_id: Uuid,
        track: Arc<AudioTrack>,
        timestamp: DateTime<Utc>,
    },

    TrackEnd {
        player_id: Uuid,
        track: Arc<AudioTrack>,
        reason: TrackEndReason,
        timestamp: DateTime<Utc>,
    },

    TrackException {
        player_id: Uuid,
        track: Arc<AudioTrack>,
        error: FriendlyError,
        timestamp: DateTime<Utc>,
    },

    /// No frame was received for longer than the threshold
    TrackStuck {
        player_id: Uuid,
        track: Arc<AudioTrack>,
        threshold_ms: u64,
        diagnostics: Option<String>,
        timestamp: DateTime<Utc>,
    },

    PlayerPause {
        player_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    PlayerResume {
        player_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl AudioEvent {
    pub fn player_id(&self) -> Uuid {
        match self {
            AudioEvent::TrackStart { player_id, .. }
            | AudioEvent::TrackEnd { player_id, .. }
            | AudioEvent::TrackException { player_id, .. }
            | AudioEvent::TrackStuck { player_id, .. }
            | AudioEvent::PlayerPause { player_id, .. }
            | AudioEvent::PlayerResume { player_id, .. } => *player_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AudioEvent::TrackStart { timestamp, .. }
            | AudioEvent::TrackEnd { timestamp, .. }
            | AudioEvent::TrackException { timestamp, .. }
            | AudioEvent::TrackStuck { timestamp, .. }
            | AudioEvent::PlayerPause { timestamp, .. }
            | AudioEvent::PlayerResume { timestamp, .. } => *timestamp,
        }
    }

    /// Track the event is about, if any
    pub fn track(&self) -> Option<&Arc<AudioTrack>> {
        match self {
            AudioEvent::TrackStart { track, .. }
            | AudioEvent::TrackEnd { track, .. }
            | AudioEvent::TrackException { track, .. }
            | AudioEvent::TrackStuck { track, .. } => Some(track),
            AudioEvent::PlayerPause { .. } | AudioEvent::PlayerResume { .. } => None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            AudioEvent::TrackStart { .. } => "TrackStart",
            AudioEvent::TrackEnd { .. } => "TrackEnd",
            AudioEvent::TrackException { .. } => "TrackException",
            AudioEvent::TrackStuck { .. } => "TrackStuck",
            AudioEvent::PlayerPause { .. } => "PlayerPause",
            AudioEvent::PlayerResume { .. } => "PlayerResume",
        }
    }

    pub fn to_record(&self) -> EventRecord {
        match self {
            AudioEvent::TrackStart {
                player_id,
                track,
                timestamp,
            } => EventRecord::TrackStart {
                player_id: *player_id,
                track: track.identifier().to_string(),
                timestamp: *timestamp,
            },
            AudioEvent::TrackEnd {
                player_id,
                track,
                reason,
                timestamp,
            } => EventRecord::TrackEnd {
                player_id: *player_id,
                track: track.identifier().to_string(),
                reason: *reason,
                timestamp: *timestamp,
            },
            AudioEvent::TrackException {
                player_id,
                track,
                error,
                timestamp,
            } => EventRecord::TrackException {
                player_id: *player_id,
                track: track.identifier().to_string(),
                message: error.message().to_string(),
                severity: error.severity(),
                cause: error.cause().map(|c| c.to_string()),
                timestamp: *timestamp,
            },
            AudioEvent::TrackStuck {
                player_id,
                track,
                threshold_ms,
                diagnostics,
                timestamp,
            } => EventRecord::TrackStuck {
                player_id: *player_id,
                track: track.identifier().to_string(),
                threshold_ms: *threshold_ms,
                diagnostics: diagnostics.clone(),
                timestamp: *timestamp,
            },
            AudioEvent::PlayerPause { player_id, timestamp } => EventRecord::PlayerPause {
                player_id: *player_id,
                timestamp: *timestamp,
            },
            AudioEvent::PlayerResume { player_id, timestamp } => EventRecord::PlayerResume {
                player_id: *player_id,
                timestamp: *timestamp,
            },
        }
    }
}

/// Serialisable form of [`AudioEvent`], tracks referenced by identifier
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum EventRecord {
    TrackStart {
        player_id: Uuid,
        track: String,
        timestamp: DateTime<Utc>,
    },
    TrackEnd {
        player_id: Uuid,
        track: String,
        reason: TrackEndReason,
        timestamp: DateTime<Utc>,
    },
    TrackException {
        player_id: Uuid,
        track: String,
        message: String,
        severity: Severity,
        cause: Option<String>,
        timestamp: DateTime<Utc>,
    },
    TrackStuck {
        player_id: Uuid,
        track: String,
        threshold_ms: u64,
        diagnostics: Option<String>,
        timestamp: DateTime<Utc>,
    },
    PlayerPause {
        player_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    PlayerResume {
        player_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

/// Receiver of player events
pub trait AudioEventListener: Send + Sync {
    fn on_event(&self, event: &AudioEvent);
}

impl<F> AudioEventListener for F
where
    F: Fn(&AudioEvent) + Send + Sync,
{
    fn on_event(&self, event: &AudioEvent) {
        self(event)
    }
}

/// Forwards events into a tokio channel; see `AudioPlayer::subscribe`
pub(crate) struct ChannelListener {
    sender: UnboundedSender<AudioEvent>,
}

impl ChannelListener {
    pub(crate) fn pair() -> (Self, UnboundedReceiver<AudioEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl AudioEventListener for ChannelListener {
    fn on_event(&self, event: &AudioEvent) {
        // Receiver dropped: the subscriber lost interest
        let _ = self.sender.send(event.clone());
    }
}

struct Dispatch {
    listeners: Vec<Arc<dyn AudioEventListener>>,
    event: AudioEvent,
}

/// Single-threaded, ordered delivery of events to listeners
pub struct EventDispatcher {
    sender: Mutex<Option<UnboundedSender<Dispatch>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatcher {
    /// Start the dispatch thread
    pub fn start() -> Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Dispatch>();

        let handle = thread::Builder::new()
            .name("event-dispatch".to_string())
            .spawn(move || {
                debug!("Event dispatcher started");
                while let Some(dispatch) = receiver.blocking_recv() {
                    Self::deliver(dispatch);
                }
                debug!("Event dispatcher exiting");
            })
            .map_err(Error::Io)?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    fn deliver(dispatch: Dispatch) {
        let event = &dispatch.event;
        trace!("Dispatching {} for player {}", event.event_type(), event.player_id());

        for listener in &dispatch.listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            if outcome.is_err() {
                error!(
                    "Event listener panicked while handling {} for player {}",
                    event.event_type(),
                    event.player_id()
                );
            }
        }
    }

    /// Queue `event` for delivery to `listeners`
    pub fn dispatch(&self, listeners: Vec<Arc<dyn AudioEventListener>>, event: AudioEvent) {
        if listeners.is_empty() {
            return;
        }

        match self.sender.lock().as_ref() {
            Some(sender) => {
                if sender.send(Dispatch { listeners, event }).is_err() {
                    debug!("Event dispatcher is gone, dropping event");
                }
            }
            None => debug!("Dropping {} after dispatcher shutdown", event.event_type()),
        }
    }

    /// Deliver everything queued so far, then stop the dispatch thread
    pub fn shutdown(&self) {
        self.sender.lock().take();

        let Some(handle) = self.handle.lock().take() else {
            return;
        };

        // A listener shutting the manager down cannot wait for itself
        if handle.thread().id() == thread::current().id() {
            return;
        }

        if handle.join().is_err() {
            error!("Event dispatcher thread panicked");
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    #[test]
    fn test_reason_may_start_next() {
        assert!(TrackEndReason::Finished.may_start_next());
        assert!(TrackEndReason::LoadFailed.may_start_next());
        assert!(!TrackEndReason::Stopped.may_start_next());
        assert!(!TrackEndReason::Replaced.may_start_next());
        assert!(!TrackEndReason::Cleanup.may_start_next());
    }

    #[test]
    fn test_record_serialization() {
        let player_id = Uuid::new_v4();
        let event = AudioEvent::PlayerPause {
            player_id,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(event.to_record()).unwrap();
        assert_eq!(json["type"], "PlayerPause");
        assert_eq!(json["player_id"], player_id.to_string());
    }

    #[test]
    fn test_panicking_listener_does_not_stop_delivery() {
        let dispatcher = EventDispatcher::start().unwrap();
        let (tx, rx) = std_mpsc::channel();
        let tx = Mutex::new(tx);

        let bad: Arc<dyn AudioEventListener> = Arc::new(|_: &AudioEvent| panic!("listener failure"));
        let good: Arc<dyn AudioEventListener> = Arc::new(move |event: &AudioEvent| {
            let _ = tx.lock().send(event.event_type());
        });

        let player_id = Uuid::new_v4();
        for resumed in [false, true] {
            let event = if resumed {
                AudioEvent::PlayerResume { player_id, timestamp: Utc::now() }
            } else {
                AudioEvent::PlayerPause { player_id, timestamp: Utc::now() }
            };
            dispatcher.dispatch(vec![bad.clone(), good.clone()], event);
        }

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "PlayerPause");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "PlayerResume");
        dispatcher.shutdown();
    }
}
