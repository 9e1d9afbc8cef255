//! Sine tone source
//!
//! Synthesises a fixed-length sine wave in the player's PCM output format.
//! Seeks are performed in place, so tone tracks never need an external seek.

use crate::error::Result;
use crate::playback::context::ProcessingContext;
use crate::playback::executor::{FrameReader, LocalExecutor};
use crate::playback::pcm::PcmFrameWriter;
use crate::track::{AudioTrack, TrackDecoder, TrackInfo};
use std::f64::consts::TAU;
use std::sync::Arc;
use tracing::debug;

/// Peak amplitude, about -6 dBFS
const DEFAULT_AMPLITUDE: f64 = 16_384.0;

/// Decoder producing a sine tone of `frequency_hz` for `duration_ms`
#[derive(Debug, Clone)]
pub struct ToneDecoder {
    frequency_hz: f64,
    duration_ms: u64,
    amplitude: f64,
}

impl ToneDecoder {
    pub fn new(frequency_hz: f64, duration_ms: u64) -> Self {
        Self {
            frequency_hz,
            duration_ms,
            amplitude: DEFAULT_AMPLITUDE,
        }
    }

    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude.clamp(0.0, i16::MAX as f64);
        self
    }

    /// Wrap into a ready-to-play track
    pub fn into_track(self, identifier: impl Into<String>) -> Arc<AudioTrack> {
        let info = TrackInfo::new(identifier, self.duration_ms)
            .with_title(format!("{} Hz tone", self.frequency_hz))
            .with_author("tonearm");
        AudioTrack::new(info, self)
    }
}

impl TrackDecoder for ToneDecoder {
    fn process(&mut self, executor: &LocalExecutor) -> Result<()> {
        let context = executor.processing_context();
        let mut reader = ToneReader {
            tone: self.clone(),
            writer: PcmFrameWriter::new(context)?,
            sample_index: 0,
            total_samples: self.duration_ms * context.format.sample_rate as u64 / 1000,
            channels: context.format.channel_count as usize,
            sample_rate: context.format.sample_rate as f64,
        };

        let exit = executor.execute_processing_loop(&mut reader, true)?;
        debug!("Tone {} exited its processing loop: {:?}", executor.identifier(), exit);
        Ok(())
    }
}

struct ToneReader {
    tone: ToneDecoder,
    writer: PcmFrameWriter,
    sample_index: u64,
    total_samples: u64,
    channels: usize,
    sample_rate: f64,
}

impl FrameReader for ToneReader {
    fn read(&mut self, context: &ProcessingContext) -> Result<()> {
        let per_chunk = context.format.chunk_sample_count as u64;
        let mut chunk = Vec::with_capacity(context.format.total_sample_count());

        while self.sample_index < self.total_samples {
            let count = per_chunk.min(self.total_samples - self.sample_index);
            chunk.clear();

            for i in 0..count {
                let t = (self.sample_index + i) as f64 / self.sample_rate;
                let value = (TAU * self.tone.frequency_hz * t).sin() * self.tone.amplitude;
                chunk.extend(std::iter::repeat(value as i16).take(self.channels));
            }

            self.writer.write(context, &chunk)?;
            self.sample_index += count;
        }

        self.writer.flush(context)
    }

    fn supports_seek(&self) -> bool {
        true
    }

    fn seek(&mut self, _context: &ProcessingContext, timecode: u64) -> Result<()> {
        let timecode = timecode.min(self.tone.duration_ms);
        self.sample_index = (timecode * self.sample_rate as u64 / 1000).min(self.total_samples);
        self.writer.seek_to(timecode);
        Ok(())
    }
}
