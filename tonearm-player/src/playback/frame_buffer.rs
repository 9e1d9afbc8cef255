//! Frame Buffer
//!
//! Fixed-capacity FIFO of frames between one decode thread (producer) and the
//! pull caller (consumer). Memory is bounded by the configured duration and
//! nothing is allocated per frame after construction.
//!
//! ## Layout
//!
//! ```text
//! arena:  [ frame 3 | frame 4 |  free  | frame 1 | frame 2 ]   maximum_chunk_size * slot_count bytes
//!                              ^tail    ^head
//! slots:  ring of slot_count descriptors (offset, len, timecode, volume)
//! ```
//!
//! A frame is stored right after the newest one, or wraps to offset 0 when the
//! tail would run past the arena and the head has already vacated enough room.
//! If neither fits the producer waits.
//!
//! ## Synchronization
//!
//! All ring state lives behind one mutex. The only blocking points are
//! [`FrameBuffer::consume`] (buffer full), [`FrameBuffer::provide_into_timeout`]
//! (buffer empty) and [`FrameBuffer::wait_for_termination`]; each waits on the
//! condition variable paired with that mutex, so the lock is never held across
//! the wait.
//!
//! ## Cancellation
//!
//! [`FrameBuffer::interrupt`] is the cancellation token for the decode thread.
//! It is sticky until taken: a blocked `consume` or `wait_for_termination`
//! returns [`Error::Interrupted`] and clears it, and the executor's read loop
//! takes it at iteration boundaries. [`FrameBuffer::set_stopping`] is permanent
//! and makes every later `consume` fail fast.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tonearm_common::{AudioFormat, Frame};
use tracing::{debug, trace};

/// Descriptor of one buffered frame inside the arena
#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    offset: usize,
    len: usize,
    timecode: u64,
    volume: u16,
}

impl Slot {
    fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Snapshot of buffer counters for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBufferStats {
    /// Frames currently buffered
    pub buffered: usize,

    /// Total frames the buffer can hold
    pub capacity: usize,

    /// Frames accepted by `consume` since construction
    pub frames_written: u64,

    /// Audio frames handed out by `provide` since construction
    pub frames_read: u64,
}

struct RingState {
    arena: Vec<u8>,
    slots: Vec<Slot>,
    first: usize,
    count: usize,

    /// `consume` is a permanent no-op
    locked: bool,
    /// A stop is pending; `consume` fails fast
    stopping: bool,
    /// Pending cancellation for the decode thread
    interrupted: bool,
    /// A terminator has been handed out
    terminated: bool,
    /// Hand out a terminator once the ring drains
    terminate_on_empty: bool,
    /// Drop buffered frames on the next successful consume
    clear_on_insert: bool,
    received_frames: bool,

    frames_written: u64,
    frames_read: u64,
}

impl RingState {
    fn wrapped(&self, index: usize) -> usize {
        if index >= self.slots.len() {
            index - self.slots.len()
        } else {
            index
        }
    }

    fn last(&self) -> usize {
        self.wrapped(self.first + self.count - 1)
    }

    fn take_interrupt(&mut self) -> bool {
        std::mem::take(&mut self.interrupted)
    }

    fn attempt_store(&mut self, frame: &Frame) -> bool {
        if self.count >= self.slots.len() {
            return false;
        }

        let len = frame.data_len();
        let arena_len = self.arena.len();

        if self.count == 0 {
            self.first = 0;
            self.store(frame, 0, 0);
            return true;
        }

        let last = self.last();
        let next = self.wrapped(last + 1);
        let head = self.slots[self.first].offset;
        let tail = self.slots[last].end();

        if head < tail {
            if tail + len <= arena_len {
                self.store(frame, next, tail);
            } else if head >= len {
                self.store(frame, next, 0);
            } else {
                return false;
            }
        } else if tail + len <= head {
            self.store(frame, next, tail);
        } else {
            return false;
        }

        true
    }

    fn store(&mut self, frame: &Frame, index: usize, offset: usize) {
        let len = frame.data_len();
        self.arena[offset..offset + len].copy_from_slice(&frame.data);
        self.slots[index] = Slot {
            offset,
            len,
            timecode: frame.timecode,
            volume: frame.volume,
        };

        self.count += 1;
        self.frames_written += 1;
    }

    fn pop_frame(&mut self, target: &mut Frame, silence: &[u8]) {
        let slot = self.slots[self.first];

        // Muted frames are served as silence without flushing the ring
        if slot.volume == 0 {
            target.store(slot.timecode, 0, silence);
        } else {
            target.store(slot.timecode, slot.volume, &self.arena[slot.offset..slot.end()]);
        }

        self.first = self.wrapped(self.first + 1);
        self.count -= 1;
        self.frames_read += 1;
    }

    fn pop_terminator(&mut self, target: &mut Frame) {
        self.terminate_on_empty = false;
        self.terminated = true;
        target.mark_terminator();
    }
}

/// Bounded, non-allocating frame FIFO shared by a decode thread and a pull caller
pub struct FrameBuffer {
    format: AudioFormat,
    silence: Vec<u8>,
    full_capacity: usize,
    state: Mutex<RingState>,
    signal: Condvar,
}

impl FrameBuffer {
    /// Number of frame slots for a buffer of `duration_ms`
    pub fn capacity_for(duration_ms: u32, format: &AudioFormat) -> usize {
        duration_ms as usize / format.frame_duration_ms().max(1) as usize + 1
    }

    /// Create a buffer holding about `duration_ms` of audio in `format`
    pub fn new(duration_ms: u32, format: AudioFormat) -> Self {
        let slot_count = Self::capacity_for(duration_ms, &format);
        let arena_len = format.maximum_chunk_size() * slot_count;

        debug!(
            "Frame buffer created: {} slots, {} byte arena ({}ms of {})",
            slot_count, arena_len, duration_ms, format
        );

        Self {
            format,
            silence: format.silence_bytes(),
            full_capacity: arena_len / format.maximum_chunk_size().max(1),
            state: Mutex::new(RingState {
                arena: vec![0; arena_len],
                slots: vec![Slot::default(); slot_count],
                first: 0,
                count: 0,
                locked: false,
                stopping: false,
                interrupted: false,
                terminated: false,
                terminate_on_empty: false,
                clear_on_insert: false,
                received_frames: false,
                frames_written: 0,
                frames_read: 0,
            }),
            signal: Condvar::new(),
        }
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Store a frame, blocking while the buffer is full
    ///
    /// # Errors
    /// - [`Error::Interrupted`] when a stop is pending or the interrupt token is set
    /// - [`Error::FrameTooLarge`] when the frame cannot fit even an empty arena
    ///
    /// Returns `Ok` without storing anything once the buffer is locked.
    pub fn consume(&self, frame: &Frame) -> Result<()> {
        let mut state = self.state.lock();

        if state.stopping || state.take_interrupt() {
            return Err(Error::Interrupted);
        }

        if state.locked {
            return Ok(());
        }

        if frame.data_len() > state.arena.len() {
            return Err(Error::FrameTooLarge {
                len: frame.data_len(),
                capacity: state.arena.len(),
            });
        }

        state.received_frames = true;
        if state.clear_on_insert {
            trace!("Clearing {} stale frames on first post-seek insert", state.count);
            state.count = 0;
            state.clear_on_insert = false;
        }

        while !state.attempt_store(frame) {
            self.signal.wait(&mut state);

            if state.stopping || state.take_interrupt() {
                return Err(Error::Interrupted);
            }

            if state.locked {
                return Ok(());
            }
        }

        self.signal.notify_all();
        Ok(())
    }

    /// Next frame if one is ready, never blocks
    pub fn provide(&self) -> Option<Frame> {
        let mut frame = Frame::with_capacity(self.format, self.format.maximum_chunk_size());
        self.provide_into(&mut frame).then_some(frame)
    }

    /// Next frame, waiting up to `timeout` for one to arrive
    ///
    /// # Errors
    /// [`Error::TimedOut`] when nothing arrived in time
    pub fn provide_timeout(&self, timeout: Duration) -> Result<Option<Frame>> {
        let mut frame = Frame::with_capacity(self.format, self.format.maximum_chunk_size());
        Ok(self.provide_into_timeout(&mut frame, timeout)?.then_some(frame))
    }

    /// Fill `target` with the next frame if one is ready
    ///
    /// Returns false when the buffer is empty and no terminator is due.
    pub fn provide_into(&self, target: &mut Frame) -> bool {
        let mut state = self.state.lock();

        if state.count == 0 {
            if state.terminate_on_empty {
                state.pop_terminator(target);
                self.signal.notify_all();
                return true;
            }

            return false;
        }

        state.pop_frame(target, &self.silence);
        target.format = self.format;
        self.signal.notify_all();
        true
    }

    /// Fill `target` with the next frame, waiting up to `timeout`
    pub fn provide_into_timeout(&self, target: &mut Frame, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        while state.count == 0 {
            if state.terminate_on_empty {
                state.pop_terminator(target);
                self.signal.notify_all();
                return Ok(true);
            }

            if Instant::now() >= deadline {
                return Err(Error::TimedOut);
            }

            self.signal.wait_until(&mut state, deadline);
        }

        state.pop_frame(target, &self.silence);
        target.format = self.format;
        self.signal.notify_all();
        Ok(true)
    }

    /// Drop all buffered frames
    ///
    /// Also disarms a pending terminator; the producer re-arms it once it
    /// reaches the end again.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.count = 0;
        state.terminate_on_empty = false;
        self.signal.notify_all();
    }

    /// Withdraw a terminator armed by [`set_terminate_on_empty`](Self::set_terminate_on_empty)
    /// that has not been handed out yet
    pub fn cancel_termination(&self) {
        self.state.lock().terminate_on_empty = false;
    }

    /// Drop buffered frames together with the next successful insert
    ///
    /// Until then the stale frames keep being served, which hides the gap
    /// while a seek completes.
    pub fn set_clear_on_insert(&self) {
        let mut state = self.state.lock();
        state.clear_on_insert = true;
        state.terminate_on_empty = false;
    }

    pub fn has_clear_on_insert(&self) -> bool {
        self.state.lock().clear_on_insert
    }

    /// Hand out a terminator once the buffered frames run out
    pub fn set_terminate_on_empty(&self) {
        let mut state = self.state.lock();

        if state.clear_on_insert {
            state.count = 0;
            state.clear_on_insert = false;
        }

        if !state.terminated {
            state.terminate_on_empty = true;
            self.signal.notify_all();
        }
    }

    /// Block until a terminator has been handed out
    ///
    /// # Errors
    /// [`Error::Interrupted`] when a stop is pending or the interrupt token is set
    pub fn wait_for_termination(&self) -> Result<()> {
        let mut state = self.state.lock();

        while !state.terminated {
            if state.stopping || state.take_interrupt() {
                return Err(Error::Interrupted);
            }

            self.signal.wait(&mut state);
        }

        Ok(())
    }

    /// Make every later `consume` a no-op
    pub fn lock(&self) {
        let mut state = self.state.lock();
        state.locked = true;
        self.signal.notify_all();
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Mark a stop as pending; blocked and later `consume` calls fail
    pub fn set_stopping(&self) {
        let mut state = self.state.lock();
        state.stopping = true;
        self.signal.notify_all();
    }

    pub fn is_stopping(&self) -> bool {
        self.state.lock().stopping
    }

    /// Set the cancellation token and wake the decode thread
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        self.signal.notify_all();
    }

    /// Clear the cancellation token, returning whether it was set
    pub fn take_interrupt(&self) -> bool {
        self.state.lock().take_interrupt()
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.lock().interrupted
    }

    /// Total number of frames the buffer can hold
    pub fn full_capacity(&self) -> usize {
        self.full_capacity
    }

    /// Number of maximum-size frames that fit without blocking
    ///
    /// Advisory only; `consume` decides under the lock.
    pub fn remaining_capacity(&self) -> usize {
        let state = self.state.lock();

        if state.count == 0 {
            return self.full_capacity;
        }

        let maximum = self.format.maximum_chunk_size().max(1);
        let head = state.slots[state.first].offset;
        let tail = state.slots[state.last()].end();

        let by_bytes = if head < tail {
            (state.arena.len() - tail) / maximum + head / maximum
        } else {
            (head - tail) / maximum
        };

        by_bytes.min(state.slots.len() - state.count)
    }

    /// Timecode of the newest buffered frame
    ///
    /// `None` while empty or while a clear-on-insert is armed.
    pub fn last_input_timecode(&self) -> Option<u64> {
        let state = self.state.lock();

        if state.clear_on_insert || state.count == 0 {
            return None;
        }

        Some(state.slots[state.last()].timecode)
    }

    /// Whether `consume` has ever accepted a frame
    pub fn has_received_frames(&self) -> bool {
        self.state.lock().received_frames
    }

    pub fn stats(&self) -> FrameBufferStats {
        let state = self.state.lock();
        FrameBufferStats {
            buffered: state.count,
            capacity: self.full_capacity,
            frames_written: state.frames_written,
            frames_read: state.frames_read,
        }
    }
}
