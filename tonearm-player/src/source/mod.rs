//! Built-in track sources

pub mod tone;

pub use tone::ToneDecoder;
