//! PCM post-processing
//!
//! Decoders that produce raw samples hand them to a [`PcmFrameWriter`], which
//! turns them into output frames:
//!
//! ```text
//! i16 samples → chunker → filter chain → volume → encoder → FrameBuffer::consume
//! ```
//!
//! The filter chain comes from the player's current [`FilterFactory`] and is
//! rebuilt as soon as the factory changes. Volume 0 is not applied to the
//! samples; the frame is stored with volume 0 and the frame buffer serves
//! silence in its place.

use crate::error::{Error, Result};
use crate::playback::context::ProcessingContext;
use crate::playback::resources::DEFAULT_VOLUME;
use std::sync::Arc;
use tonearm_common::{AudioFormat, Codec, Frame};
use tracing::debug;

/// In-place processor of interleaved PCM chunks
pub trait PcmFilter: Send {
    /// Process one chunk starting at `timecode` ms
    fn process(&mut self, timecode: u64, samples: &mut [i16]);

    /// Called after the source was repositioned
    fn seek_performed(&mut self, _timecode: u64) {}
}

/// Builds a fresh filter chain for a track
pub trait FilterFactory: Send + Sync {
    fn build(&self, format: &AudioFormat) -> Vec<Box<dyn PcmFilter>>;
}

impl<F> FilterFactory for F
where
    F: Fn(&AudioFormat) -> Vec<Box<dyn PcmFilter>> + Send + Sync,
{
    fn build(&self, format: &AudioFormat) -> Vec<Box<dyn PcmFilter>> {
        self(format)
    }
}

/// Scale samples by `volume` / 100, saturating at the i16 range
pub fn apply_volume(volume: u16, samples: &mut [i16]) {
    if volume == DEFAULT_VOLUME {
        return;
    }

    let volume = volume as i32;
    for sample in samples.iter_mut() {
        let scaled = *sample as i32 * volume / 100;
        *sample = scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    }
}

fn encode(codec: Codec, samples: &[i16], out: &mut Vec<u8>) {
    out.clear();
    match codec {
        Codec::PcmS16Le => samples.iter().for_each(|s| out.extend_from_slice(&s.to_le_bytes())),
        Codec::PcmS16Be => samples.iter().for_each(|s| out.extend_from_slice(&s.to_be_bytes())),
        // Rejected when the writer is built
        Codec::Opus => {}
    }
}

/// Chunks, filters, scales and encodes PCM into frames
pub struct PcmFrameWriter {
    format: AudioFormat,
    chunk: Vec<i16>,
    /// Samples per channel already emitted, drives timecodes
    position: u64,
    filters: Vec<Box<dyn PcmFilter>>,
    factory: Option<Arc<dyn FilterFactory>>,
    encoded: Vec<u8>,
    frame: Frame,
}

impl PcmFrameWriter {
    /// # Errors
    /// [`Error::Unsupported`] when the output format is not PCM
    pub fn new(context: &ProcessingContext) -> Result<Self> {
        let format = context.format;
        if !format.codec.is_pcm() {
            return Err(Error::Unsupported(format!("PCM writer cannot encode {}", format.codec)));
        }

        let factory = context.resources.filter_factory();
        let filters = factory.as_ref().map(|f| f.build(&format)).unwrap_or_default();

        Ok(Self {
            format,
            chunk: Vec::with_capacity(format.total_sample_count()),
            position: 0,
            filters,
            factory,
            encoded: Vec::with_capacity(format.maximum_chunk_size()),
            frame: Frame::with_capacity(format, format.maximum_chunk_size()),
        })
    }

    /// Timecode of the next chunk in milliseconds
    pub fn timecode(&self) -> u64 {
        self.position.saturating_mul(1000) / self.format.sample_rate as u64
    }

    /// Append interleaved samples, emitting a frame per full chunk
    pub fn write(&mut self, context: &ProcessingContext, mut samples: &[i16]) -> Result<()> {
        let chunk_len = self.format.total_sample_count();

        while !samples.is_empty() {
            let take = (chunk_len - self.chunk.len()).min(samples.len());
            self.chunk.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.chunk.len() == chunk_len {
                self.emit(context)?;
            }
        }

        Ok(())
    }

    /// Emit a trailing partial chunk padded with silence
    pub fn flush(&mut self, context: &ProcessingContext) -> Result<()> {
        if self.chunk.is_empty() {
            return Ok(());
        }

        self.chunk.resize(self.format.total_sample_count(), 0);
        self.emit(context)
    }

    /// Drop pending samples and continue timecodes from `timecode`
    pub fn seek_to(&mut self, timecode: u64) {
        self.chunk.clear();
        self.position = timecode.saturating_mul(self.format.sample_rate as u64) / 1000;
        for filter in &mut self.filters {
            filter.seek_performed(timecode);
        }
    }

    fn refresh_filters(&mut self, context: &ProcessingContext) {
        let current = context.resources.filter_factory();
        let changed = match (&current, &self.factory) {
            (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
            (None, None) => false,
            _ => true,
        };

        if changed {
            debug!("Filter factory changed, rebuilding filter chain");
            self.filters = current.as_ref().map(|f| f.build(&self.format)).unwrap_or_default();
            self.factory = current;
        }
    }

    fn emit(&mut self, context: &ProcessingContext) -> Result<()> {
        self.refresh_filters(context);

        let timecode = self.timecode();
        for filter in &mut self.filters {
            filter.process(timecode, &mut self.chunk);
        }

        let volume = context.resources.volume();
        if volume != 0 {
            apply_volume(volume, &mut self.chunk);
        }

        encode(self.format.codec, &self.chunk, &mut self.encoded);
        self.frame.store(timecode, volume, &self.encoded);
        self.chunk.clear();
        self.position += self.format.chunk_sample_count as u64;

        context.consume(&self.frame)
    }
}
