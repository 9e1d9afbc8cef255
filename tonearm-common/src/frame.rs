//! PCM/encoded audio frame
//!
//! A frame is one fixed-duration chunk of encoded audio plus its metadata.
//! Terminator frames carry no audio; they mark the end of a track's frame
//! stream without closing it.
//!
//! Frames are value-like. The same type serves as the mutable target of the
//! in-place `provide_into` calls: [`Frame::store`] reuses the existing data
//! allocation so a long-lived frame can be refilled without allocating.

use crate::format::AudioFormat;

/// Default volume level stored with frames
pub const DEFAULT_VOLUME: u16 = 100;

/// One chunk of audio with timecode and volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Position of the frame in the track, in milliseconds
    pub timecode: u64,

    /// Volume level the frame was produced with (0-1000)
    pub volume: u16,

    /// Format of `data`
    pub format: AudioFormat,

    /// Encoded frame bytes, empty for terminators
    pub data: Vec<u8>,

    terminator: bool,
}

impl Frame {
    pub fn new(timecode: u64, volume: u16, format: AudioFormat, data: Vec<u8>) -> Self {
        Self {
            timecode,
            volume,
            format,
            data,
            terminator: false,
        }
    }

    /// Empty frame meant to be filled by `provide_into`
    pub fn empty(format: AudioFormat) -> Self {
        Self::with_capacity(format, 0)
    }

    /// Empty frame with room for `capacity` bytes of data
    pub fn with_capacity(format: AudioFormat, capacity: usize) -> Self {
        Self {
            timecode: 0,
            volume: DEFAULT_VOLUME,
            format,
            data: Vec::with_capacity(capacity),
            terminator: false,
        }
    }

    /// Frame signalling the end of a frame stream
    pub fn terminator() -> Self {
        Self {
            timecode: 0,
            volume: 0,
            format: AudioFormat::default(),
            data: Vec::new(),
            terminator: true,
        }
    }

    pub fn is_terminator(&self) -> bool {
        self.terminator
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    /// Replace frame contents, reusing the data allocation
    pub fn store(&mut self, timecode: u64, volume: u16, data: &[u8]) {
        self.timecode = timecode;
        self.volume = volume;
        self.terminator = false;
        self.data.clear();
        self.data.extend_from_slice(data);
    }

    /// Turn this frame into a terminator in place
    pub fn mark_terminator(&mut self) {
        self.terminator = true;
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_reuses_allocation() {
        let mut frame = Frame::with_capacity(AudioFormat::COMMON_PCM_S16_LE, 64);
        let capacity = frame.data.capacity();

        frame.store(40, 100, &[1, 2, 3, 4]);
        assert_eq!(frame.data, vec![1, 2, 3, 4]);
        assert_eq!(frame.timecode, 40);

        frame.store(60, 50, &[9; 16]);
        assert_eq!(frame.data_len(), 16);
        assert_eq!(frame.volume, 50);
        assert_eq!(frame.data.capacity(), capacity);
    }

    #[test]
    fn test_terminator_flag_cleared_by_store() {
        let mut frame = Frame::empty(AudioFormat::COMMON_PCM_S16_LE);
        frame.mark_terminator();
        assert!(frame.is_terminator());
        assert_eq!(frame.data_len(), 0);

        frame.store(0, 100, &[0; 4]);
        assert!(!frame.is_terminator());
        assert!(Frame::terminator().is_terminator());
    }
}
