//! Event recording

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tonearm_player::{AudioEvent, AudioEventListener, AudioPlayer};

/// Short form of an event: `TrackEnd:a:Replaced`, `TrackStart:b`, `PlayerPause`
pub fn describe(event: &AudioEvent) -> String {
    match event {
        AudioEvent::TrackEnd { track, reason, .. } => format!("TrackEnd:{}:{:?}", track.identifier(), reason),
        other => match other.track() {
            Some(track) => format!("{}:{}", other.event_type(), track.identifier()),
            None => other.event_type().to_string(),
        },
    }
}

/// Listener storing every event it receives
#[derive(Default)]
pub struct EventCollector {
    events: Mutex<Vec<AudioEvent>>,
    signal: Condvar,
}

impl EventCollector {
    pub fn attach(player: &AudioPlayer) -> Arc<Self> {
        let collector = Arc::new(Self::default());
        player.add_listener(collector.clone());
        collector
    }

    pub fn events(&self) -> Vec<AudioEvent> {
        self.events.lock().clone()
    }

    pub fn summary(&self) -> Vec<String> {
        self.events.lock().iter().map(describe).collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    /// Wait until `done` holds for the recorded events
    pub fn wait_until(&self, timeout: Duration, done: impl Fn(&[AudioEvent]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();

        while !done(&events) {
            if self.signal.wait_until(&mut events, deadline).timed_out() {
                return done(&events);
            }
        }

        true
    }

    /// Wait until an event described as `description` was recorded
    pub fn wait_for(&self, description: &str, timeout: Duration) -> bool {
        self.wait_until(timeout, |events| events.iter().any(|e| describe(e) == description))
    }
}

impl AudioEventListener for EventCollector {
    fn on_event(&self, event: &AudioEvent) {
        self.events.lock().push(event.clone());
        self.signal.notify_all();
    }
}
