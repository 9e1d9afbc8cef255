//! Per-track playback machinery: buffering, markers, execution and PCM output

pub mod context;
pub mod executor;
pub mod frame_buffer;
pub mod marker;
pub mod pcm;
pub mod pool;
pub mod primordial;
pub mod resources;

pub use context::ProcessingContext;
pub use executor::{
    ExecutorSettings, FrameReader, LocalExecutor, LoopExit, TrackExecutor, TrackState, TrackStateListener,
};
pub use frame_buffer::FrameBuffer;
pub use marker::{MarkerState, MarkerTracker, TrackMarker};
pub use pcm::{FilterFactory, PcmFilter, PcmFrameWriter};
pub use resources::PlayerResources;
