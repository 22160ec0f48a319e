pub mod cheaptrick;
pub mod codec;
pub mod d4c;
pub mod dio;
pub mod harvest;
pub mod pipeline;
pub mod stonemask;
pub mod synthesis;

use std::f64::consts::PI;

use crate::error::{
    check_f0_below_nyquist, check_frame_period, check_sample_rate, Result, VocoderError,
};
use crate::matrix::FrameMatrix;
use crate::util::matlab_round;

pub const F0_FLOOR: f64 = 71.0;
pub const F0_CEIL: f64 = 800.0;
/// Milliseconds between frames.
pub const FRAME_PERIOD: f64 = 5.0;
pub const CHANNELS_IN_OCTAVE: f64 = 2.0;
pub const SPEED: usize = 1;
pub const ALLOWED_RANGE: f64 = 0.1;
pub const Q1: f64 = -0.15;
pub const THRESHOLD: f64 = 0.85;

/// F0 assumed for unvoiced frames by the envelope estimator and synthesis.
pub const DEFAULT_F0: f64 = 500.0;
pub const FLOOR_F0_STONEMASK: f64 = 40.0;
pub const FLOOR_F0_D4C: f64 = 47.0;
pub const SAFE_GUARD_MINIMUM: f64 = 1e-12;
pub(crate) const EPS: f64 = f64::EPSILON;

/// Mono input signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f64>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f64>, sample_rate: u32) -> Result<Self> {
        check_sample_rate(sample_rate)?;
        Ok(Self { samples, sample_rate })
    }

    pub fn fs(&self) -> f64 {
        self.sample_rate as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.fs()
    }
}

/// F0 contour together with the frame times it was estimated at.
#[derive(Debug, Clone, PartialEq)]
pub struct F0Track {
    pub f0: Vec<f64>,
    pub temporal_positions: Vec<f64>,
}

impl F0Track {
    pub fn new(f0: Vec<f64>, temporal_positions: Vec<f64>) -> Result<Self> {
        if f0.len() != temporal_positions.len() {
            return Err(VocoderError::invalid_length(
                "temporal positions",
                f0.len(),
                temporal_positions.len(),
            ));
        }
        Ok(Self { f0, temporal_positions })
    }

    /// Track on the regular grid of `frame_period` milliseconds.
    pub fn on_grid(f0: Vec<f64>, frame_period: f64) -> Result<Self> {
        check_frame_period(frame_period)?;
        let temporal_positions = temporal_positions(f0.len(), frame_period);
        Ok(Self { f0, temporal_positions })
    }

    pub fn len(&self) -> usize {
        self.f0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.f0.is_empty()
    }

    pub fn voiced_count(&self) -> usize {
        self.f0.iter().filter(|&&f| f > 0.0).count()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.f0.len() != self.temporal_positions.len() {
            return Err(VocoderError::invalid_length(
                "temporal positions",
                self.f0.len(),
                self.temporal_positions.len(),
            ));
        }
        check_f0_values(&self.f0)
    }

    /// Like [`F0Track::validate`], and also rejects F0 at or above Nyquist.
    pub(crate) fn validate_for(&self, sample_rate: u32) -> Result<()> {
        self.validate()?;
        check_f0_below_nyquist(&self.f0, sample_rate)
    }
}

fn check_f0_values(f0: &[f64]) -> Result<()> {
    if let Some(bad) = f0.iter().find(|f| !f.is_finite() || **f < 0.0) {
        return Err(VocoderError::invalid_param(
            "f0",
            format!("values must be finite and non-negative, got {}", bad),
        ));
    }
    Ok(())
}

/// Everything the synthesizer consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisParameters {
    pub f0: Vec<f64>,
    pub spectrogram: FrameMatrix,
    pub aperiodicity: FrameMatrix,
    pub sample_rate: u32,
    /// Milliseconds.
    pub frame_period: f64,
}

impl SynthesisParameters {
    pub fn frame_count(&self) -> usize {
        self.f0.len()
    }

    /// FFT length implied by the envelope bin count.
    pub fn fft_size(&self) -> usize {
        self.spectrogram.num_cols().saturating_sub(1) * 2
    }

    /// Checks frame and bin agreement between the three streams and the
    /// range of their values.
    pub fn validate(&self) -> Result<()> {
        check_sample_rate(self.sample_rate)?;
        check_frame_period(self.frame_period)?;
        let frames = self.f0.len();
        if self.spectrogram.num_rows() != frames {
            return Err(VocoderError::invalid_length(
                "spectrogram frames",
                frames,
                self.spectrogram.num_rows(),
            ));
        }
        if self.aperiodicity.num_rows() != frames {
            return Err(VocoderError::invalid_length(
                "aperiodicity frames",
                frames,
                self.aperiodicity.num_rows(),
            ));
        }
        if self.aperiodicity.num_cols() != self.spectrogram.num_cols() {
            return Err(VocoderError::invalid_length(
                "aperiodicity bins",
                self.spectrogram.num_cols(),
                self.aperiodicity.num_cols(),
            ));
        }
        check_f0_values(&self.f0)?;
        check_f0_below_nyquist(&self.f0, self.sample_rate)?;
        if let Some(bad) = self.spectrogram.values().find(|p| !p.is_finite() || *p < 0.0) {
            return Err(VocoderError::invalid_param(
                "spectrogram",
                format!("power must be finite and non-negative, got {}", bad),
            ));
        }
        if let Some(bad) = self.aperiodicity.values().find(|a| !(0.0..=1.0).contains(a)) {
            return Err(VocoderError::invalid_param(
                "aperiodicity",
                format!("values must lie in [0, 1], got {}", bad),
            ));
        }
        Ok(())
    }
}

/// Number of frames for a waveform of `x_length` samples.
pub fn frame_count(sample_rate: u32, x_length: usize, frame_period: f64) -> usize {
    if x_length == 0 || sample_rate == 0 {
        return 0;
    }
    (1000.0 * x_length as f64 / sample_rate as f64 / frame_period) as usize + 1
}

/// Frame times in seconds.
pub fn temporal_positions(frames: usize, frame_period: f64) -> Vec<f64> {
    (0..frames).map(|i| i as f64 * frame_period / 1000.0).collect()
}

/// Window families used for frame extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WindowKind {
    Hanning,
    Blackman,
}

/// Cuts `ratio` periods of `f0` around `position` with edge clamping,
/// applies the window, adds a tiny noise floor and removes the
/// window-weighted mean. Writes into `out` (zero-padded) and returns the
/// window length and the window energy `sum(w^2)`.
pub(crate) fn windowed_segment<R: rand::Rng>(
    x: &[f64],
    fs: f64,
    f0: f64,
    position: f64,
    kind: WindowKind,
    ratio: f64,
    rng: &mut R,
    out: &mut [f64],
) -> (usize, f64) {
    let half = matlab_round(ratio * fs / f0 / 2.0).max(0) as usize;
    let len = (half * 2 + 1).min(out.len());
    let last = x.len().saturating_sub(1) as i64;
    let origin = position * fs;

    out.iter_mut().for_each(|v| *v = 0.0);
    if x.is_empty() {
        return (len, 0.0);
    }

    let mut window_sum = 0.0;
    let mut signal_sum = 0.0;
    let mut window = Vec::with_capacity(len);
    for (i, slot) in out.iter_mut().take(len).enumerate() {
        let offset = i as f64 - half as f64;
        let t = 2.0 * offset / ratio / fs;
        let w = match kind {
            WindowKind::Hanning => 0.5 * (PI * t * f0).cos() + 0.5,
            WindowKind::Blackman => {
                0.42 + 0.5 * (PI * t * f0).cos() + 0.08 * (2.0 * PI * t * f0).cos()
            }
        };
        let index = matlab_round(origin + offset).clamp(0, last) as usize;
        *slot = x[index] * w + crate::rng::randn(rng) * SAFE_GUARD_MINIMUM;
        window_sum += w;
        signal_sum += *slot;
        window.push(w);
    }
    let weight = signal_sum / window_sum;
    for (slot, w) in out.iter_mut().zip(&window) {
        *slot -= w * weight;
    }
    (len, window.iter().map(|w| w * w).sum())
}
