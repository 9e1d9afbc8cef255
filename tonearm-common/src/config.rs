//! Engine configuration loading
//!
//! Configuration is a single TOML file. Every key has a built-in default, so an
//! empty file (or no file at all) yields a working engine.
//!
//! # Config File Resolution
//!
//! 1. Explicit path (command-line argument)
//! 2. `TONEARM_CONFIG` environment variable
//! 3. Per-user config directory (`~/.config/tonearm/config.toml` on Linux)
//! 4. Built-in defaults
//!
//! An explicitly named file that does not exist is an error. A missing file in
//! the per-user location is not.
//!
//! # Example
//!
//! ```toml
//! [playback]
//! frame_buffer_duration_ms = 2000
//! seek_ghosting = false
//! output_format = "pcm_s16_be"
//!
//! [lifecycle]
//! stuck_threshold_ms = 5000
//!
//! [logging]
//! level = "debug"
//! ```

use crate::format::{AudioFormat, Codec};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "TONEARM_CONFIG";

/// Smallest frame buffer a track may be given
pub const MIN_FRAME_BUFFER_DURATION_MS: u32 = 200;

/// Complete engine configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Per-track playback settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PlaybackConfig {
    /// Length of each track's frame buffer
    ///
    /// Default: 5000ms, minimum 200ms
    #[serde(default = "default_frame_buffer_duration_ms")]
    pub frame_buffer_duration_ms: u32,

    /// Keep serving pre-seek frames until post-seek frames arrive
    #[serde(default = "default_true")]
    pub seek_ghosting: bool,

    /// Codec of produced frames (48 kHz stereo, 960-sample chunks)
    #[serde(default = "default_output_codec")]
    pub output_format: Codec,
}

/// Watchdog settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LifecycleConfig {
    /// Idle time after which an unpolled player stops its track
    #[serde(default = "default_cleanup_threshold_ms")]
    pub cleanup_threshold_ms: u64,

    /// Time without frames after which a track is reported stuck
    #[serde(default = "default_stuck_threshold_ms")]
    pub stuck_threshold_ms: u64,

    /// Interval between watchdog sweeps
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,
}

/// Playback thread pool settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// How long an idle playback thread waits for work before exiting
    #[serde(default = "default_idle_keepalive_ms")]
    pub idle_keepalive_ms: u64,

    /// How long shutdown waits for running tracks to wind down
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_frame_buffer_duration_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_output_codec() -> Codec {
    Codec::PcmS16Le
}

fn default_cleanup_threshold_ms() -> u64 {
    60_000
}

fn default_stuck_threshold_ms() -> u64 {
    10_000
}

fn default_watchdog_interval_ms() -> u64 {
    10_000
}

fn default_idle_keepalive_ms() -> u64 {
    10_000
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            frame_buffer_duration_ms: default_frame_buffer_duration_ms(),
            seek_ghosting: true,
            output_format: default_output_codec(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            cleanup_threshold_ms: default_cleanup_threshold_ms(),
            stuck_threshold_ms: default_stuck_threshold_ms(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_keepalive_ms: default_idle_keepalive_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl PlaybackConfig {
    /// Output format for the configured codec
    pub fn audio_format(&self) -> AudioFormat {
        match self.output_format {
            Codec::PcmS16Le => AudioFormat::COMMON_PCM_S16_LE,
            Codec::PcmS16Be => AudioFormat::COMMON_PCM_S16_BE,
            Codec::Opus => AudioFormat::DISCORD_OPUS,
        }
    }
}

impl EngineConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: EngineConfig = toml::from_str(content)?;
        config.validate();
        Ok(config)
    }

    /// Load configuration following the resolution order above
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        match resolve_config_path() {
            Some(path) => Self::from_file(&path),
            None => {
                debug!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Read and parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!("Config file not found: {}", path.display())));
        }

        debug!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Clamp out-of-range values, logging each change
    pub fn validate(&mut self) {
        if self.playback.frame_buffer_duration_ms < MIN_FRAME_BUFFER_DURATION_MS {
            warn!(
                "frame_buffer_duration_ms {} below minimum, using {}",
                self.playback.frame_buffer_duration_ms, MIN_FRAME_BUFFER_DURATION_MS
            );
            self.playback.frame_buffer_duration_ms = MIN_FRAME_BUFFER_DURATION_MS;
        }

        if self.lifecycle.watchdog_interval_ms == 0 {
            warn!("watchdog_interval_ms must be positive, using default");
            self.lifecycle.watchdog_interval_ms = default_watchdog_interval_ms();
        }

        if self.pool.idle_keepalive_ms == 0 {
            warn!("idle_keepalive_ms must be positive, using default");
            self.pool.idle_keepalive_ms = default_idle_keepalive_ms();
        }
    }
}

/// Locate a config file from the environment or the per-user config dir
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|d| d.join("tonearm").join("config.toml"))
        .filter(|p| p.exists())
}
