//! Track Executor
//!
//! Runs the single decode call of one track on a playback thread and turns
//! externally requested seek/stop into cooperative cancellation of that call.
//!
//! ## State machine
//!
//! ```text
//! Inactive ──execute──▶ Loading ──read──▶ Playing ◀──────────┐
//!                                           │  seek          │ seek applied
//!                                           ▼                │
//!                                        Seeking ────────────┘
//!            Playing / Seeking ──stop──▶ Stopping ──decode returns──▶ Finished
//! ```
//!
//! Only the executor moves between states; callers request transitions with
//! [`TrackExecutor::set_position`] and [`TrackExecutor::stop`].
//!
//! ## Read/seek loop
//!
//! Decoders call [`LocalExecutor::execute_processing_loop`] with a
//! [`FrameReader`]. The loop calls `read` repeatedly; when `read` is interrupted
//! the executor decides between stopping, seeking internally, handing the seek
//! back to the decoder ([`LoopExit::ExternalSeek`]), or failing on a spurious
//! interruption.
//!
//! ## Cancellation
//!
//! The frame buffer's interrupt token replaces thread interruption. A stop
//! always sets it; a seek sets it only while the decode thread is inside the
//! interruptible region around `read` and the end-of-track wait. Requests made
//! outside that region are picked up at the next loop check.

use crate::error::{Error, FriendlyError, Result, Severity};
use crate::playback::context::ProcessingContext;
use crate::playback::frame_buffer::FrameBuffer;
use crate::playback::marker::{MarkerState, MarkerTracker, TrackMarker};
use crate::playback::resources::PlayerResources;
use crate::track::AudioTrack;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tonearm_common::{AudioFormat, Frame};
use tracing::{debug, warn};

/// Execution state of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    /// Not executed yet
    Inactive,
    /// Decode call started, no read loop yet
    Loading,
    /// Read loop running
    Playing,
    /// Applying a seek
    Seeking,
    /// Stop observed, decode call winding down
    Stopping,
    /// Decode call returned (terminal)
    Finished,
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackState::Inactive => write!(f, "Inactive"),
            TrackState::Loading => write!(f, "Loading"),
            TrackState::Playing => write!(f, "Playing"),
            TrackState::Seeking => write!(f, "Seeking"),
            TrackState::Stopping => write!(f, "Stopping"),
            TrackState::Finished => write!(f, "Finished"),
        }
    }
}

/// Receives failures of a track's decode call
pub trait TrackStateListener: Send + Sync {
    fn on_track_exception(&self, track: &Arc<AudioTrack>, error: FriendlyError);
}

/// Executor of one track; provides its frames and accepts control requests
pub trait TrackExecutor: Send + Sync {
    /// Buffer the decode thread fills, if this executor has one
    fn frame_buffer(&self) -> Option<&Arc<FrameBuffer>>;

    fn state(&self) -> TrackState;

    /// Queued seek target while a seek is pending, else the last provided timecode
    fn position(&self) -> u64;

    /// Request a seek; negative positions clamp to 0
    fn set_position(&self, position: i64);

    /// Arm a position marker, replacing the current one
    fn set_marker(&self, marker: Option<TrackMarker>);

    /// Request the decode call to stop
    fn stop(&self);

    /// The decode call failed before any frame was buffered
    fn failed_before_load(&self) -> bool;

    /// Run the track's decode call on the current thread
    fn execute(&self, track: &Arc<AudioTrack>, listener: &dyn TrackStateListener);

    /// Fill `target` with the next frame if one is ready
    fn provide_into(&self, target: &mut Frame) -> bool;

    /// Fill `target` with the next frame, waiting up to `timeout`
    fn provide_into_timeout(&self, target: &mut Frame, timeout: Duration) -> Result<bool>;

    /// Human-readable snapshot of the decode thread for stuck reports
    fn diagnostics(&self) -> Option<String> {
        None
    }

    fn provide(&self) -> Option<Frame> {
        let mut frame = Frame::empty(AudioFormat::default());
        self.provide_into(&mut frame).then_some(frame)
    }

    fn provide_timeout(&self, timeout: Duration) -> Result<Option<Frame>> {
        let mut frame = Frame::empty(AudioFormat::default());
        Ok(self.provide_into_timeout(&mut frame, timeout)?.then_some(frame))
    }
}

/// Source side of the read/seek loop
pub trait FrameReader {
    /// Decode forward and push frames until end of input or interruption
    fn read(&mut self, context: &ProcessingContext) -> Result<()>;

    /// Whether [`FrameReader::seek`] can reposition the source in place
    fn supports_seek(&self) -> bool {
        false
    }

    /// Reposition the source to `timecode` ms
    fn seek(&mut self, _context: &ProcessingContext, _timecode: u64) -> Result<()> {
        Err(Error::Unsupported("seek".to_string()))
    }
}

/// How a processing loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Input exhausted (and drained, when waiting on end)
    Finished,
    /// Stop request observed
    Stopped,
    /// Seek requested on a reader that cannot seek; the decoder must restart
    /// reading from this position
    ExternalSeek(u64),
}

/// Construction parameters for a local executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub format: AudioFormat,
    pub frame_buffer_duration_ms: u32,
    pub use_seek_ghosting: bool,
}

enum SeekResult {
    NoSeek,
    Internal,
    External(u64),
}

enum Step {
    Proceed,
    Exit(LoopExit),
}

struct Control {
    state: TrackState,
    started: bool,
    queued_stop: bool,
    queued_seek: Option<u64>,
    last_frame_timecode: u64,
    /// Decode thread is inside read or the end-of-track wait
    interruptible: bool,
    playing_thread: Option<String>,
}

/// Default executor: decodes on the calling pool thread into its own buffer
pub struct LocalExecutor {
    identifier: String,
    seekable: bool,
    use_seek_ghosting: bool,
    context: ProcessingContext,
    markers: MarkerTracker,
    control: Mutex<Control>,
    exception: Mutex<Option<FriendlyError>>,
}

impl LocalExecutor {
    pub fn new(
        identifier: impl Into<String>,
        seekable: bool,
        settings: ExecutorSettings,
        resources: Arc<PlayerResources>,
    ) -> Self {
        let buffer = Arc::new(FrameBuffer::new(settings.frame_buffer_duration_ms, settings.format));

        Self {
            identifier: identifier.into(),
            seekable,
            use_seek_ghosting: settings.use_seek_ghosting,
            context: ProcessingContext::new(settings.format, buffer, resources),
            markers: MarkerTracker::new(),
            control: Mutex::new(Control {
                state: TrackState::Inactive,
                started: false,
                queued_stop: false,
                queued_seek: None,
                last_frame_timecode: 0,
                interruptible: false,
                playing_thread: None,
            }),
            exception: Mutex::new(None),
        }
    }

    pub fn processing_context(&self) -> &ProcessingContext {
        &self.context
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Consume a pending stop request, moving to `Stopping`
    pub fn check_stopped(&self) -> bool {
        let mut control = self.control.lock();
        if control.queued_stop {
            control.queued_stop = false;
            control.state = TrackState::Stopping;
            return true;
        }

        false
    }

    /// Arm the terminator and block until the consumer has drained the buffer
    pub fn wait_on_end(&self) -> Result<()> {
        self.context.frame_buffer.set_terminate_on_empty();
        self.context.frame_buffer.wait_for_termination()
    }

    /// Run the read/seek loop for `reader`
    ///
    /// # Errors
    /// Decode and seek failures come back as [`Error::Friendly`] with
    /// [`Severity::Fault`]; a spurious interruption as [`Severity::Suspicious`].
    pub fn execute_processing_loop(&self, reader: &mut dyn FrameReader, wait_on_end: bool) -> Result<LoopExit> {
        if let SeekResult::External(position) = self.check_pending_seek(reader)? {
            return Ok(LoopExit::ExternalSeek(position));
        }

        loop {
            self.set_state(TrackState::Playing);

            let step = match self.read_once(reader, wait_on_end) {
                Ok(step) => step,
                Err(e) if e.is_interrupt() => self.handle_playback_interrupt(true, reader)?,
                Err(e) => {
                    return Err(e
                        .wrap_unfriendly("Something went wrong when decoding the track.", Severity::Fault)
                        .into())
                }
            };

            match step {
                Step::Proceed => continue,
                Step::Exit(exit) => return Ok(exit),
            }
        }
    }

    fn read_once(&self, reader: &mut dyn FrameReader, wait_on_end: bool) -> Result<Step> {
        // An interrupt may have been delivered while the previous one was handled
        if self.context.frame_buffer.take_interrupt() {
            if let Step::Exit(exit) = self.handle_playback_interrupt(false, reader)? {
                return Ok(Step::Exit(exit));
            }
        }

        self.interruptible(|| reader.read(&self.context))?;

        if wait_on_end {
            self.interruptible(|| self.wait_on_end())?;
        }

        Ok(Step::Exit(LoopExit::Finished))
    }

    fn interruptible<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        {
            let mut control = self.control.lock();
            if control.queued_seek.is_some() {
                // Seek queued while outside the read region, handle it first
                return Err(Error::Interrupted);
            }
            control.interruptible = true;
        }

        let result = f();
        self.control.lock().interruptible = false;
        result
    }

    fn handle_playback_interrupt(&self, interrupted: bool, reader: &mut dyn FrameReader) -> Result<Step> {
        self.context.frame_buffer.take_interrupt();

        if self.check_stopped() {
            self.markers.trigger(MarkerState::Stopped);
            return Ok(Step::Exit(LoopExit::Stopped));
        }

        let seek = self.check_pending_seek(reader)?;
        if let SeekResult::NoSeek = seek {
            if interrupted {
                return Err(FriendlyError::new("The track was unexpectedly terminated.", Severity::Suspicious).into());
            }

            return Ok(Step::Proceed);
        }

        // A stop may have arrived while seeking
        if self.check_stopped() {
            self.markers.trigger(MarkerState::Stopped);
            return Ok(Step::Exit(LoopExit::Stopped));
        }

        match seek {
            SeekResult::External(position) => Ok(Step::Exit(LoopExit::ExternalSeek(position))),
            _ => Ok(Step::Proceed),
        }
    }

    fn check_pending_seek(&self, reader: &mut dyn FrameReader) -> Result<SeekResult> {
        if !self.seekable {
            return Ok(SeekResult::NoSeek);
        }

        let position = {
            let mut control = self.control.lock();
            let Some(position) = control.queued_seek.take() else {
                return Ok(SeekResult::NoSeek);
            };

            debug!("Track {} interrupted for seeking to {}", self.identifier, position);
            control.state = TrackState::Seeking;
            if self.use_seek_ghosting {
                self.context.frame_buffer.set_clear_on_insert();
            } else {
                self.context.frame_buffer.clear();
            }

            position
        };

        self.markers.check_seek_timecode(position);

        if reader.supports_seek() {
            self.perform_seek(reader, position)?;
            Ok(SeekResult::Internal)
        } else {
            Ok(SeekResult::External(position))
        }
    }

    fn perform_seek(&self, reader: &mut dyn FrameReader, position: u64) -> Result<()> {
        reader.seek(&self.context, position).map_err(|e| {
            if e.is_interrupt() {
                e
            } else {
                e.wrap_unfriendly("Something went wrong when seeking to a position.", Severity::Fault)
                    .into()
            }
        })
    }

    fn set_state(&self, state: TrackState) {
        self.control.lock().state = state;
    }

    fn is_performing_seek(&self) -> bool {
        let queued = self.control.lock().queued_seek.is_some();
        queued || (self.use_seek_ghosting && self.context.frame_buffer.has_clear_on_insert())
    }

    fn process_provided_frame(&self, frame: &Frame) {
        if frame.is_terminator() {
            return;
        }

        if !self.is_performing_seek() {
            self.markers.check_playback_timecode(frame.timecode);
        }

        self.control.lock().last_frame_timecode = frame.timecode;
    }

    fn fail(&self, track: &Arc<AudioTrack>, listener: &dyn TrackStateListener, error: FriendlyError) {
        *self.exception.lock() = Some(error.clone());
        error.log(&format!("playback of {}", self.identifier));
        listener.on_track_exception(track, error);

        // Only after the exception is out, so it precedes the track end
        self.context.frame_buffer.set_terminate_on_empty();
    }

    fn run_decoder(&self, track: &Arc<AudioTrack>) -> std::thread::Result<Result<()>> {
        let Some(mut decoder) = track.take_decoder() else {
            return Ok(Err(Error::InvalidState(format!(
                "Track {} has no decoder left to run",
                self.identifier
            ))));
        };

        if self.check_stopped() {
            debug!("Track {} was stopped before it started", self.identifier);
            self.markers.trigger(MarkerState::Stopped);
            return Ok(Ok(()));
        }

        panic::catch_unwind(AssertUnwindSafe(|| decoder.process(self)))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "decoder panicked".to_string())
}

impl TrackExecutor for LocalExecutor {
    fn frame_buffer(&self) -> Option<&Arc<FrameBuffer>> {
        Some(&self.context.frame_buffer)
    }

    fn state(&self) -> TrackState {
        self.control.lock().state
    }

    fn position(&self) -> u64 {
        let control = self.control.lock();
        control.queued_seek.unwrap_or(control.last_frame_timecode)
    }

    fn set_position(&self, position: i64) {
        if !self.seekable {
            return;
        }

        let mut control = self.control.lock();
        if control.state == TrackState::Finished {
            debug!("Ignoring seek on finished track {}", self.identifier);
            return;
        }

        control.queued_seek = Some(position.max(0) as u64);

        // Interrupt before clearing so no stale frame lands after the clear
        if control.interruptible {
            control.interruptible = false;
            self.context.frame_buffer.interrupt();
            debug!("Interrupting playing thread to perform a seek {}", self.identifier);
        } else {
            debug!("Seeking on track {} while not in playback loop.", self.identifier);
        }

        // The end of input may already be armed; the seek reads on past it
        if self.use_seek_ghosting {
            self.context.frame_buffer.cancel_termination();
        } else {
            self.context.frame_buffer.clear();
        }
    }

    fn set_marker(&self, marker: Option<TrackMarker>) {
        self.markers.set(marker, self.position());
    }

    fn stop(&self) {
        let mut control = self.control.lock();
        if control.state == TrackState::Finished {
            debug!("Tried to stop track {} which is not playing.", self.identifier);
            return;
        }

        debug!("Requesting stop for track {}", self.identifier);
        control.queued_stop = true;
        self.context.frame_buffer.set_stopping();
        self.context.frame_buffer.interrupt();
    }

    fn failed_before_load(&self) -> bool {
        self.exception.lock().is_some() && !self.context.frame_buffer.has_received_frames()
    }

    fn execute(&self, track: &Arc<AudioTrack>, listener: &dyn TrackStateListener) {
        {
            let mut control = self.control.lock();
            if control.started {
                warn!("Tried to start an already playing track {}", self.identifier);
                return;
            }

            control.started = true;
            control.state = TrackState::Loading;
            control.playing_thread = Some(thread::current().name().unwrap_or("unnamed").to_string());
        }

        debug!("Starting to play track {} locally", self.identifier);

        let mut panic_payload = None;
        match self.run_decoder(track) {
            Ok(Ok(())) => debug!("Playing track {} finished or was stopped.", self.identifier),
            Ok(Err(e)) if e.is_interrupt() && self.check_stopped() => {
                debug!("Track {} was interrupted outside of execution loop.", self.identifier);
            }
            Ok(Err(e)) => {
                let error = e.wrap_unfriendly("Something broke when playing the track.", Severity::Fault);
                self.fail(track, listener, error);
            }
            Err(payload) => {
                let error = FriendlyError::new("Something broke when playing the track.", Severity::Fault)
                    .with_cause(Error::Decode(panic_message(payload.as_ref())));
                self.fail(track, listener, error);
                panic_payload = Some(payload);
            }
        }

        self.markers.trigger(MarkerState::Ended);
        {
            let mut control = self.control.lock();
            control.playing_thread = None;
            control.interruptible = false;
            control.state = TrackState::Finished;
        }

        // Late decode calls must not resurrect frames; drain what is left
        self.context.frame_buffer.set_terminate_on_empty();
        self.context.frame_buffer.lock();

        if let Some(payload) = panic_payload {
            panic::resume_unwind(payload);
        }
    }

    fn provide_into(&self, target: &mut Frame) -> bool {
        if self.context.frame_buffer.provide_into(target) {
            self.process_provided_frame(target);
            return true;
        }

        false
    }

    fn provide_into_timeout(&self, target: &mut Frame, timeout: Duration) -> Result<bool> {
        if self.context.frame_buffer.provide_into_timeout(target, timeout)? {
            self.process_provided_frame(target);
            return Ok(true);
        }

        Ok(false)
    }

    fn diagnostics(&self) -> Option<String> {
        let control = self.control.lock();
        let stats = self.context.frame_buffer.stats();
        Some(format!(
            "thread={} state={} interruptible={} buffered={}/{} written={} read={}",
            control.playing_thread.as_deref().unwrap_or("none"),
            control.state,
            control.interruptible,
            stats.buffered,
            stats.capacity,
            stats.frames_written,
            stats.frames_read,
        ))
    }
}

impl fmt::Debug for LocalExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalExecutor")
            .field("identifier", &self.identifier)
            .field("state", &self.state())
            .field("position", &self.position())
            .finish()
    }
}
