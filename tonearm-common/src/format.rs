//! Audio data formats
//!
//! Describes the fixed-chunk output formats frames are produced in. A format is
//! immutable and supplied once per track executor; the frame buffer sizes its
//! arena from it and substitutes [`AudioFormat::silence_bytes`] for muted frames.
//!
//! # Standard formats
//!
//! | Constant | Codec | Rate | Channels | Chunk |
//! |---|---|---|---|---|
//! | [`AudioFormat::DISCORD_OPUS`] | Opus | 48 kHz | 2 | 960 samples |
//! | [`AudioFormat::COMMON_PCM_S16_LE`] | PCM s16 LE | 48 kHz | 2 | 960 samples |
//! | [`AudioFormat::COMMON_PCM_S16_BE`] | PCM s16 BE | 48 kHz | 2 | 960 samples |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opus packet encoding 20 ms of silence
const OPUS_SILENCE: [u8; 3] = [0xFC, 0xFF, 0xFE];

/// Encoding of the bytes carried by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    /// Signed 16-bit little-endian interleaved PCM
    PcmS16Le,
    /// Signed 16-bit big-endian interleaved PCM
    PcmS16Be,
    /// One Opus packet per frame
    Opus,
}

impl Codec {
    /// Whether frames in this codec carry raw PCM samples
    pub fn is_pcm(self) -> bool {
        matches!(self, Codec::PcmS16Le | Codec::PcmS16Be)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::PcmS16Le => write!(f, "pcm_s16_le"),
            Codec::PcmS16Be => write!(f, "pcm_s16_be"),
            Codec::Opus => write!(f, "opus"),
        }
    }
}

/// Format of audio with a fixed chunk size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Encoding of frame data
    pub codec: Codec,

    /// Number of channels
    pub channel_count: u16,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Samples per channel in one chunk
    pub chunk_sample_count: u32,
}

impl AudioFormat {
    /// Opus at 48 kHz stereo, 20 ms per frame
    pub const DISCORD_OPUS: AudioFormat = AudioFormat::new(Codec::Opus, 2, 48_000, 960);

    /// Little-endian signed 16-bit PCM at 48 kHz stereo, 20 ms per frame
    pub const COMMON_PCM_S16_LE: AudioFormat = AudioFormat::new(Codec::PcmS16Le, 2, 48_000, 960);

    /// Big-endian signed 16-bit PCM at 48 kHz stereo, 20 ms per frame
    pub const COMMON_PCM_S16_BE: AudioFormat = AudioFormat::new(Codec::PcmS16Be, 2, 48_000, 960);

    pub const fn new(codec: Codec, channel_count: u16, sample_rate: u32, chunk_sample_count: u32) -> Self {
        Self {
            codec,
            channel_count,
            sample_rate,
            chunk_sample_count,
        }
    }

    /// Total number of interleaved samples in one chunk
    pub fn total_sample_count(&self) -> usize {
        self.chunk_sample_count as usize * self.channel_count as usize
    }

    /// Duration of one frame in milliseconds
    pub fn frame_duration_ms(&self) -> u64 {
        self.chunk_sample_count as u64 * 1000 / self.sample_rate as u64
    }

    /// Typical encoded size of one frame
    pub fn expected_chunk_size(&self) -> usize {
        match self.codec {
            Codec::Opus => 32,
            Codec::PcmS16Le | Codec::PcmS16Be => self.total_sample_count() * 2,
        }
    }

    /// Upper bound on the encoded size of one frame
    pub fn maximum_chunk_size(&self) -> usize {
        match self.codec {
            Codec::Opus => 400,
            Codec::PcmS16Le | Codec::PcmS16Be => self.total_sample_count() * 2,
        }
    }

    /// Bytes of one frame of silence in this format
    pub fn silence_bytes(&self) -> Vec<u8> {
        match self.codec {
            Codec::Opus => OPUS_SILENCE.to_vec(),
            Codec::PcmS16Le | Codec::PcmS16Be => vec![0; self.maximum_chunk_size()],
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::COMMON_PCM_S16_LE
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}Hz {}ch x{}",
            self.codec, self.sample_rate, self.channel_count, self.chunk_sample_count
        )
    }
}
