//! Track position markers
//!
//! A marker is a one-shot callback armed for a playback timecode. Each track
//! has at most one live marker; every marker fires exactly once, with the
//! [`MarkerState`] describing why.
//!
//! # Example
//!
//! ```
//! use tonearm_player::playback::marker::{MarkerState, MarkerTracker, TrackMarker};
//!
//! let tracker = MarkerTracker::new();
//! tracker.set(Some(TrackMarker::new(30_000, |state| {
//!     assert_eq!(state, MarkerState::Reached);
//! })), 0);
//!
//! tracker.check_playback_timecode(30_020);
//! assert!(!tracker.is_armed());
//! ```

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Why a marker fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerState {
    /// Playback reached the marker position
    Reached,
    /// Marker was armed at or behind the current position
    Late,
    /// A seek jumped past the marker without playing through it
    Overtaken,
    /// Track ended with the marker still armed
    Ended,
    /// Marker was replaced or removed before firing
    Removed,
    /// Track was stopped with the marker still armed
    Stopped,
}

type MarkerHandler = Arc<dyn Fn(MarkerState) + Send + Sync>;

/// One-shot position callback
#[derive(Clone)]
pub struct TrackMarker {
    /// Position in milliseconds
    pub timecode: u64,
    handler: MarkerHandler,
}

impl TrackMarker {
    pub fn new(timecode: u64, handler: impl Fn(MarkerState) + Send + Sync + 'static) -> Self {
        Self {
            timecode,
            handler: Arc::new(handler),
        }
    }

    fn fire(&self, state: MarkerState) {
        trace!("Marker at {}ms fired: {:?}", self.timecode, state);
        (self.handler)(state);
    }
}

impl fmt::Debug for TrackMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackMarker")
            .field("timecode", &self.timecode)
            .finish_non_exhaustive()
    }
}

/// Holds the single live marker of a track
///
/// Handlers always run outside the internal lock, so a handler may set a new
/// marker on the same tracker.
#[derive(Default)]
pub struct MarkerTracker {
    current: Mutex<Option<TrackMarker>>,
}

impl MarkerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `marker` (or disarm with `None`) given the current position
    ///
    /// The replaced marker fires [`MarkerState::Removed`]. A marker at or behind
    /// `current_position` fires [`MarkerState::Late`] immediately.
    pub fn set(&self, marker: Option<TrackMarker>, current_position: u64) {
        let previous = std::mem::replace(&mut *self.current.lock(), marker.clone());

        if let Some(previous) = previous {
            previous.fire(MarkerState::Removed);
        }

        if let Some(marker) = marker {
            if current_position >= marker.timecode {
                self.trigger_if_current(&marker, MarkerState::Late);
            }
        }
    }

    /// Disarm and return the live marker without firing it
    pub fn remove(&self) -> Option<TrackMarker> {
        self.current.lock().take()
    }

    pub fn is_armed(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Fire the live marker with `state`, whatever its position
    pub fn trigger(&self, state: MarkerState) {
        let marker = self.current.lock().take();
        if let Some(marker) = marker {
            marker.fire(state);
        }
    }

    /// Fire [`MarkerState::Reached`] once playback passes the marker
    pub fn check_playback_timecode(&self, timecode: u64) {
        self.check_timecode(timecode, MarkerState::Reached);
    }

    /// Fire [`MarkerState::Overtaken`] when a seek lands past the marker
    pub fn check_seek_timecode(&self, timecode: u64) {
        self.check_timecode(timecode, MarkerState::Overtaken);
    }

    fn check_timecode(&self, timecode: u64, state: MarkerState) {
        let due = {
            let mut current = self.current.lock();
            match current.as_ref() {
                Some(marker) if timecode >= marker.timecode => current.take(),
                _ => None,
            }
        };

        if let Some(marker) = due {
            marker.fire(state);
        }
    }

    fn trigger_if_current(&self, marker: &TrackMarker, state: MarkerState) {
        let taken = {
            let mut current = self.current.lock();
            match current.as_ref() {
                Some(live) if Arc::ptr_eq(&live.handler, &marker.handler) => current.take(),
                _ => None,
            }
        };

        if let Some(marker) = taken {
            marker.fire(state);
        }
    }
}
