//! Lifecycle watchdog
//!
//! The registry holds the players that currently have a track active. A hook
//! listener attached to every player adds it on `TrackStart` and removes it on
//! `TrackEnd`. The watchdog thread sweeps the registry at a fixed interval,
//! stopping tracks nobody polls and reporting tracks that stopped producing.

use crate::error::{Error, Result};
use crate::events::{AudioEvent, AudioEventListener};
use crate::manager::ManagerShared;
use crate::player::AudioPlayer;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace};
use uuid::Uuid;

/// Players with an active track, by player id
#[derive(Default)]
pub struct LifecycleRegistry {
    players: Mutex<HashMap<Uuid, Weak<AudioPlayer>>>,
}

impl LifecycleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: Uuid, player: Weak<AudioPlayer>) {
        self.players.lock().insert(id, player);
    }

    pub fn remove(&self, id: &Uuid) {
        self.players.lock().remove(id);
    }

    pub fn len(&self) -> usize {
        self.players.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.lock().is_empty()
    }

    /// Listener keeping this registry in sync with `player`
    pub fn hook_for(self: &Arc<Self>, player: &Arc<AudioPlayer>) -> Arc<dyn AudioEventListener> {
        Arc::new(RegistryHook {
            registry: Arc::downgrade(self),
            player: Arc::downgrade(player),
        })
    }

    /// Live registered players; entries of dropped players are pruned
    fn live_players(&self) -> Vec<Arc<AudioPlayer>> {
        let mut players = self.players.lock();
        players.retain(|_, p| p.strong_count() > 0);
        players.values().filter_map(Weak::upgrade).collect()
    }

    /// Run cleanup and stuck checks on every registered player
    pub fn sweep(&self, cleanup_threshold: Duration) {
        let players = self.live_players();
        trace!("Lifecycle sweep over {} players", players.len());

        for player in players {
            player.check_cleanup(cleanup_threshold);
            player.check_stuck();
        }
    }
}

struct RegistryHook {
    registry: Weak<LifecycleRegistry>,
    player: Weak<AudioPlayer>,
}

impl AudioEventListener for RegistryHook {
    fn on_event(&self, event: &AudioEvent) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };

        match event {
            AudioEvent::TrackStart { player_id, .. } => registry.insert(*player_id, self.player.clone()),
            AudioEvent::TrackEnd { player_id, .. } => registry.remove(player_id),
            _ => {}
        }
    }
}

struct WatchdogControl {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Thread sweeping the manager's registry at a fixed interval
pub struct LifecycleWatchdog {
    control: Arc<WatchdogControl>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleWatchdog {
    pub(crate) fn start(shared: Weak<ManagerShared>, interval: Duration) -> Result<Self> {
        let control = Arc::new(WatchdogControl {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });

        let thread_control = Arc::clone(&control);
        let handle = thread::Builder::new()
            .name("lifecycle-watchdog".to_string())
            .spawn(move || Self::run(thread_control, shared, interval))
            .map_err(Error::Io)?;

        Ok(Self {
            control,
            handle: Mutex::new(Some(handle)),
        })
    }

    fn run(control: Arc<WatchdogControl>, shared: Weak<ManagerShared>, interval: Duration) {
        debug!("Lifecycle watchdog started, interval {:?}", interval);

        loop {
            {
                let mut stopped = control.stopped.lock();
                if !*stopped {
                    control.wake.wait_for(&mut stopped, interval);
                }
                if *stopped {
                    break;
                }
            }

            let Some(shared) = shared.upgrade() else {
                break;
            };

            shared.registry().sweep(shared.cleanup_threshold());
        }

        debug!("Lifecycle watchdog exiting");
    }

    /// Cancel the watchdog and wait for a running sweep to finish
    pub fn stop(&self) {
        *self.control.stopped.lock() = true;
        self.control.wake.notify_all();

        let Some(handle) = self.handle.lock().take() else {
            return;
        };

        if handle.thread().id() != thread::current().id() && handle.join().is_err() {
            error!("Lifecycle watchdog thread panicked");
        }
    }
}
