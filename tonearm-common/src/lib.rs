//! # tonearm Common Library
//!
//! Shared code for the tonearm playback engine and its collaborators:
//! - Audio formats and codecs
//! - The `Frame` data type
//! - Configuration loading
//! - Common error type
//!
//! Decoders and audio sinks depend only on this crate.

pub mod config;
pub mod error;
pub mod format;
pub mod frame;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use format::{AudioFormat, Codec};
pub use frame::Frame;
