//! # tonearm Playback Engine (tonearm-player)
//!
//! Turns decodable tracks into a steady stream of fixed-format frames.
//!
//! **Data flow:** decoder → [`playback::FrameBuffer`] → track executor →
//! [`AudioPlayer::provide`] → audio sink
//!
//! **Control flow:** [`PlayerManager`] creates players, players start tracks,
//! each started track gets a single-use executor running on the playback pool.

pub mod error;
pub mod events;
pub mod lifecycle;
pub mod manager;
pub mod playback;
pub mod player;
pub mod source;
pub mod track;

pub use error::{Error, FriendlyError, Result, Severity};
pub use events::{AudioEvent, AudioEventListener, EventRecord, TrackEndReason};
pub use manager::{ManagerSettings, PlayerManager};
pub use player::AudioPlayer;
pub use track::{AudioTrack, DelegatedDecoder, TrackDecoder, TrackInfo};
