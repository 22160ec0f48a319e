pub mod args;
pub mod audio;
pub mod config;
pub mod error;
pub mod fft;
pub mod filter;
pub mod flags;
pub mod matrix;
pub mod modify;
pub mod rng;
pub mod util;
pub mod vocoder;

pub use error::{Result, VocoderError};
pub use matrix::FrameMatrix;
pub use vocoder::{F0Track, SynthesisParameters, Waveform};
