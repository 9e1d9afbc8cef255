//! Error types for tonearm-player
//!
//! Two layers:
//! - [`Error`]: everything a decode thread, buffer or control call can fail with.
//!   [`Error::Interrupted`] is cooperative cancellation and is never surfaced to
//!   listeners.
//! - [`FriendlyError`]: the classified form of a decode failure, carried by
//!   `TrackException` events. Its [`Severity`] tells whether the cause was
//!   expected, external, or an internal fault.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Main error type for tonearm-player
#[derive(Error, Debug)]
pub enum Error {
    /// Blocking call cancelled by a stop or seek request
    #[error("Interrupted")]
    Interrupted,

    /// Timed provide call expired before a frame arrived
    #[error("Timed out waiting for a frame")]
    TimedOut,

    /// Frame does not fit the buffer arena even when the buffer is empty
    #[error("Frame of {len} bytes is too big for a {capacity} byte buffer")]
    FrameTooLarge { len: usize, capacity: usize },

    /// Track instance was handed to a second executor
    #[error("Cannot play the same instance of a track twice")]
    TrackReused,

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Operation not supported for this format or track
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Audio decoding errors reported by decoders
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Classified decode failure
    #[error(transparent)]
    Friendly(#[from] FriendlyError),

    /// Configuration and shared-type errors
    #[error(transparent)]
    Common(#[from] tonearm_common::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using tonearm-player Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for cooperative cancellation
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Error::Interrupted)
    }

    /// Classify this error, keeping an existing classification untouched
    pub fn wrap_unfriendly(self, message: &str, severity: Severity) -> FriendlyError {
        match self {
            Error::Friendly(friendly) => friendly,
            other => FriendlyError::new(message, severity).with_cause(other),
        }
    }
}

/// How much a failure says about the engine itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Known and expected cause; nothing is wrong with the engine
    Common,
    /// Cause probably outside the engine, e.g. a source answering unexpectedly
    Suspicious,
    /// Probable engine bug, or no way to tell
    Fault,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Common => write!(f, "common"),
            Severity::Suspicious => write!(f, "suspicious"),
            Severity::Fault => write!(f, "fault"),
        }
    }
}

/// Error with a message fit for end users, plus the technical cause
#[derive(Debug, Clone)]
pub struct FriendlyError {
    message: String,
    severity: Severity,
    cause: Option<Arc<Error>>,
}

impl FriendlyError {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: Error) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_deref()
    }

    /// Log at a level matching the severity
    pub fn log(&self, context: &str) {
        match self.severity {
            Severity::Common => debug!("Common failure during {}: {}", context, self),
            Severity::Suspicious => warn!("Suspicious failure during {}: {}", context, self),
            Severity::Fault => error!("Failure during {}: {}", context, self),
        }
    }
}

impl fmt::Display for FriendlyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{} ({})", self.message, cause),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for FriendlyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
