//! Decoders with scripted behaviour

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;
use tonearm_common::{AudioFormat, Codec, Frame};
use tonearm_player::error::{Error, Result};
use tonearm_player::playback::{FrameReader, LocalExecutor, LoopExit, ProcessingContext};
use tonearm_player::{AudioTrack, TrackDecoder, TrackInfo};

/// Mono, 100 Hz, 2-sample chunks: 20ms frames of 4 bytes
pub const TINY_PCM: AudioFormat = AudioFormat::new(Codec::PcmS16Le, 1, 100, 2);

pub const FRAME_MS: u64 = 20;

/// Counting semaphore a gated decoder takes one permit from per frame
#[derive(Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<u64>, Condvar)>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self, frames: u64) {
        let (permits, signal) = &*self.inner;
        *permits.lock() += frames;
        signal.notify_all();
    }

    pub fn open(&self) {
        self.release(u64::MAX / 2);
    }

    /// Wait for a permit, honouring stop and seek requests
    fn acquire(&self, context: &ProcessingContext) -> Result<()> {
        let (permits, signal) = &*self.inner;

        loop {
            {
                let mut available = permits.lock();
                if *available > 0 {
                    *available -= 1;
                    return Ok(());
                }
                signal.wait_for(&mut available, Duration::from_millis(5));
            }

            context.check_interrupted()?;
        }
    }
}

/// Produces `frames` frames of 20ms whose first data byte is `tag`
#[derive(Clone)]
pub struct ScriptedDecoder {
    tag: u8,
    frames: u64,
    seekable: bool,
    gate: Option<Gate>,
    fail_at: Option<u64>,
}

impl ScriptedDecoder {
    pub fn new(tag: u8, frames: u64) -> Self {
        Self {
            tag,
            frames,
            seekable: true,
            gate: None,
            fail_at: None,
        }
    }

    /// Reader cannot seek; seeks come back as external seeks
    pub fn without_seek(mut self) -> Self {
        self.seekable = false;
        self
    }

    pub fn gated(mut self, gate: &Gate) -> Self {
        self.gate = Some(gate.clone());
        self
    }

    /// Fail with a decode error instead of producing frame `index`
    pub fn failing_at(mut self, index: u64) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub fn into_track(self, identifier: &str) -> Arc<AudioTrack> {
        let info = TrackInfo::new(identifier, self.frames * FRAME_MS).with_title(identifier);
        AudioTrack::new(info, self)
    }

    fn reader(&self, start_ms: u64) -> ScriptedReader {
        ScriptedReader {
            script: self.clone(),
            index: start_ms / FRAME_MS,
        }
    }
}

impl TrackDecoder for ScriptedDecoder {
    fn process(&mut self, executor: &LocalExecutor) -> Result<()> {
        let mut start = 0;

        loop {
            let mut reader = self.reader(start);
            match executor.execute_processing_loop(&mut reader, true)? {
                LoopExit::ExternalSeek(position) => start = position,
                LoopExit::Finished | LoopExit::Stopped => return Ok(()),
            }
        }
    }
}

struct ScriptedReader {
    script: ScriptedDecoder,
    index: u64,
}

impl FrameReader for ScriptedReader {
    fn read(&mut self, context: &ProcessingContext) -> Result<()> {
        while self.index < self.script.frames {
            if self.script.fail_at == Some(self.index) {
                return Err(Error::Decode(format!("corrupt packet at frame {}", self.index)));
            }

            if let Some(gate) = &self.script.gate {
                gate.acquire(context)?;
            }

            let frame = Frame::new(self.index * FRAME_MS, 100, context.format, vec![self.script.tag, 0, 0, 0]);
            context.consume(&frame)?;
            self.index += 1;
        }

        Ok(())
    }

    fn supports_seek(&self) -> bool {
        self.script.seekable
    }

    fn seek(&mut self, _context: &ProcessingContext, timecode: u64) -> Result<()> {
        self.index = timecode / FRAME_MS;
        Ok(())
    }
}

/// Fails before reading anything
pub struct FailingDecoder {
    pub error: Option<Error>,
}

impl FailingDecoder {
    pub fn new(error: Error) -> Self {
        Self { error: Some(error) }
    }

    pub fn into_track(self, identifier: &str) -> Arc<AudioTrack> {
        AudioTrack::new(TrackInfo::new(identifier, 1000), self)
    }
}

impl TrackDecoder for FailingDecoder {
    fn process(&mut self, _executor: &LocalExecutor) -> Result<()> {
        Err(self.error.take().unwrap_or(Error::Decode("failed twice".to_string())))
    }
}

/// Panics as soon as it runs
pub struct PanickingDecoder;

impl TrackDecoder for PanickingDecoder {
    fn process(&mut self, _executor: &LocalExecutor) -> Result<()> {
        panic!("decoder bug");
    }
}
