//! CheapTrick: F0-adaptive spectral envelope estimation.
//!
//! Each frame is analysed with a Hanning window three periods long, the power
//! spectrum is smoothed over `2 * f0 / 3` Hz, and the remaining harmonic
//! ripple is removed by liftering the cepstrum with
//! `sinc(pi f0 q) * ((1 - 2 q1) + 2 q1 cos(2 pi f0 q))`.

use std::f64::consts::PI;

use log::{info, warn};
use rayon::prelude::*;
use rustfft::num_complex::Complex;

use super::{windowed_segment, F0Track, Waveform, WindowKind, DEFAULT_F0, EPS, F0_FLOOR, Q1};
use crate::error::{check_fft_size, check_sample_rate, Result, VocoderError};
use crate::fft::{ForwardRealFft, InverseRealFft};
use crate::matrix::FrameMatrix;
use crate::rng::{create_rng, domain, randn};
use crate::util::{dc_correction, linear_smoothing};

/// How the FFT length of the analysis is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FftSizeMode {
    /// Long enough for three periods of this F0 (Hz).
    FromF0Floor(f64),
    /// A given power of two.
    Explicit(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheapTrickOptions {
    /// Spectral recovery coefficient of the lifter.
    pub q1: f64,
    pub fft_size_mode: FftSizeMode,
}

impl Default for CheapTrickOptions {
    fn default() -> Self {
        Self {
            q1: Q1,
            fft_size_mode: FftSizeMode::FromF0Floor(F0_FLOOR),
        }
    }
}

impl CheapTrickOptions {
    pub fn with_q1(mut self, q1: f64) -> Self {
        self.q1 = q1;
        self
    }

    pub fn with_f0_floor(mut self, f0_floor: f64) -> Self {
        self.fft_size_mode = FftSizeMode::FromF0Floor(f0_floor);
        self
    }

    pub fn with_fft_size(mut self, fft_size: usize) -> Self {
        self.fft_size_mode = FftSizeMode::Explicit(fft_size);
        self
    }

    /// Resolves the FFT length for `sample_rate`.
    pub fn fft_size(&self, sample_rate: u32) -> Result<usize> {
        match self.fft_size_mode {
            FftSizeMode::FromF0Floor(f0_floor) => query_fft_size(sample_rate, f0_floor),
            FftSizeMode::Explicit(fft_size) => {
                check_fft_size(fft_size)?;
                Ok(fft_size)
            }
        }
    }
}

/// FFT length holding three periods of `f0_floor`:
/// `2^(1 + floor(log2(3 fs / f0_floor + 1)))`.
pub fn query_fft_size(sample_rate: u32, f0_floor: f64) -> Result<usize> {
    check_sample_rate(sample_rate)?;
    if !(f0_floor.is_finite() && f0_floor > 0.0) {
        return Err(VocoderError::invalid_param(
            "f0_floor",
            format!("must be positive, got {}", f0_floor),
        ));
    }
    let exponent = (3.0 * sample_rate as f64 / f0_floor + 1.0).log2() as u32 + 1;
    if exponent >= usize::BITS - 1 {
        return Err(VocoderError::invalid_param(
            "f0_floor",
            format!("too low for sample rate {}: {}", sample_rate, f0_floor),
        ));
    }
    Ok(1usize << exponent.max(2))
}

/// Lowest F0 whose three periods fit in `fft_size` samples.
pub fn f0_floor_for_fft_size(sample_rate: u32, fft_size: usize) -> f64 {
    3.0 * sample_rate as f64 / (fft_size as f64 - 3.0)
}

/// Estimates the spectral envelope of every frame of `track`.
pub fn cheaptrick(
    waveform: &Waveform,
    track: &F0Track,
    options: &CheapTrickOptions,
) -> Result<FrameMatrix> {
    check_sample_rate(waveform.sample_rate)?;
    track.validate_for(waveform.sample_rate)?;
    if !options.q1.is_finite() {
        return Err(VocoderError::invalid_param(
            "q1",
            format!("must be finite, got {}", options.q1),
        ));
    }
    let fft_size = options.fft_size(waveform.sample_rate)?;
    let f0_floor = f0_floor_for_fft_size(waveform.sample_rate, fft_size);
    if f0_floor >= DEFAULT_F0 {
        return Err(VocoderError::invalid_param(
            "fft_size",
            format!(
                "{} is too short for {} Hz audio; use at least {}",
                fft_size,
                waveform.sample_rate,
                query_fft_size(waveform.sample_rate, DEFAULT_F0)?
            ),
        ));
    }
    if matches!(options.fft_size_mode, FftSizeMode::Explicit(_)) && f0_floor > F0_FLOOR {
        warn!(
            "cheaptrick: fft size {} analyses frames below {:.1} Hz as {} Hz",
            fft_size, f0_floor, DEFAULT_F0
        );
    }

    let bins = fft_size / 2 + 1;
    let mut spectrogram = FrameMatrix::new(track.len(), bins);
    if track.is_empty() {
        return Ok(spectrogram);
    }
    info!(
        "cheaptrick: {} frames, fft {}, q1 {}",
        track.len(),
        fft_size,
        options.q1
    );

    let fs = waveform.fs();
    let x = &waveform.samples;
    spectrogram.par_rows_mut().enumerate().for_each_init(
        || EnvelopeWorkspace::new(fft_size),
        |workspace, (i, row)| {
            let f0 = track.f0[i];
            let current_f0 = if f0 <= f0_floor { DEFAULT_F0 } else { f0 };
            workspace.estimate(x, fs, current_f0, track.temporal_positions[i], options.q1, i, row);
        },
    );
    Ok(spectrogram)
}

struct EnvelopeWorkspace {
    fft_size: usize,
    forward: ForwardRealFft,
    inverse: InverseRealFft,
    segment: Vec<f64>,
    log_spectrum: Vec<f64>,
    cepstrum: Vec<Complex<f64>>,
}

impl EnvelopeWorkspace {
    fn new(fft_size: usize) -> Self {
        Self {
            fft_size,
            forward: ForwardRealFft::new(fft_size),
            inverse: InverseRealFft::new(fft_size),
            segment: vec![0.0; fft_size],
            log_spectrum: vec![0.0; fft_size],
            cepstrum: vec![Complex::new(0.0, 0.0); fft_size / 2 + 1],
        }
    }

    fn estimate(
        &mut self,
        x: &[f64],
        fs: f64,
        f0: f64,
        position: f64,
        q1: f64,
        frame: usize,
        out: &mut [f64],
    ) {
        let fft_size = self.fft_size;
        let half = fft_size / 2;
        let mut rng = create_rng(domain::CHEAPTRICK, frame);

        let (len, energy) = windowed_segment(
            x,
            fs,
            f0,
            position,
            WindowKind::Hanning,
            3.0,
            &mut rng,
            &mut self.segment,
        );
        let scale = 1.0 / energy.sqrt().max(EPS);
        self.segment[..len].iter_mut().for_each(|v| *v *= scale);

        let mut power: Vec<f64> = self
            .forward
            .process(&self.segment)
            .iter()
            .map(|bin| bin.norm_sqr())
            .collect();
        dc_correction(&mut power, f0, fs, fft_size);
        let mut smoothed = linear_smoothing(&power, f0 * 2.0 / 3.0, fs, fft_size);
        for value in smoothed.iter_mut() {
            *value += randn(&mut rng).abs() * EPS;
        }

        for i in 0..=half {
            self.log_spectrum[i] = smoothed[i].ln();
        }
        for i in 1..half {
            self.log_spectrum[fft_size - i] = self.log_spectrum[i];
        }

        let spectrum = self.forward.process(&self.log_spectrum);
        self.cepstrum[0] = spectrum[0] / fft_size as f64;
        for i in 1..=half {
            let quefrency = i as f64 / fs;
            let smoothing = (PI * f0 * quefrency).sin() / (PI * f0 * quefrency);
            let compensation = (1.0 - 2.0 * q1) + 2.0 * q1 * (2.0 * PI * quefrency * f0).cos();
            self.cepstrum[i] = spectrum[i] * (smoothing * compensation / fft_size as f64);
        }

        let liftered = self.inverse.process(&self.cepstrum);
        for (slot, value) in out.iter_mut().zip(liftered) {
            *slot = value.exp();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulse_train(f0: f64, fs: u32, seconds: f64) -> Waveform {
        let len = (fs as f64 * seconds) as usize;
        let period = fs as f64 / f0;
        let mut samples = vec![0.0; len];
        let mut t = 0.0;
        while (t as usize) < len {
            samples[t as usize] = 1.0;
            t += period;
        }
        // one-pole resonance to give the envelope some tilt
        for i in 1..len {
            samples[i] += 0.9 * samples[i - 1];
        }
        Waveform::new(samples, fs).unwrap()
    }

    #[test]
    fn test_query_fft_size_reference_values() {
        assert_eq!(query_fft_size(44100, 71.0).unwrap(), 2048);
        assert_eq!(query_fft_size(16000, 71.0).unwrap(), 1024);
        assert_eq!(query_fft_size(96000, 71.0).unwrap(), 4096);
    }

    #[test]
    fn test_query_fft_size_rejects_bad_input() {
        assert!(query_fft_size(0, 71.0).is_err());
        assert!(query_fft_size(16000, 0.0).is_err());
        assert!(query_fft_size(16000, -3.0).is_err());
    }

    #[test]
    fn test_f0_floor_for_fft_size() {
        let floor = f0_floor_for_fft_size(16000, 1024);
        assert!((floor - 48000.0 / 1021.0).abs() < 1e-12);
        assert!(query_fft_size(16000, floor).unwrap() >= 1024);
    }

    #[test]
    fn test_fft_size_modes() {
        let options = CheapTrickOptions::default();
        assert_eq!(options.fft_size(16000).unwrap(), 1024);
        assert_eq!(options.clone().with_fft_size(2048).fft_size(16000).unwrap(), 2048);
        assert!(options.with_fft_size(1000).fft_size(16000).is_err());
    }

    #[test]
    fn test_envelope_shape_and_positivity() {
        let waveform = pulse_train(120.0, 16000, 0.3);
        let frames = 61;
        let mut f0 = vec![120.0; frames];
        f0[0] = 0.0;
        let track = F0Track::on_grid(f0, 5.0).unwrap();
        let spectrogram = cheaptrick(&waveform, &track, &CheapTrickOptions::default()).unwrap();
        assert_eq!(spectrogram.num_rows(), frames);
        assert_eq!(spectrogram.num_cols(), 513);
        assert!(spectrogram.values().all(|v| v.is_finite() && v > 0.0));
        // low-pass excitation: energy falls with frequency
        let row = spectrogram.row(30);
        assert!(row[10] > row[400] * 10.0);
    }

    #[test]
    fn test_envelope_is_free_of_harmonic_ripple() {
        let waveform = pulse_train(200.0, 16000, 0.3);
        let track = F0Track::on_grid(vec![200.0; 61], 5.0).unwrap();
        let spectrogram = cheaptrick(&waveform, &track, &CheapTrickOptions::default()).unwrap();
        let row = spectrogram.row(30);
        // bins of harmonics 10 and 10.5 (200 Hz = 12.8 bins)
        let at_harmonic = row[128].ln();
        let between = row[134].ln();
        assert!((at_harmonic - between).abs() < 0.5, "{} {}", at_harmonic, between);
    }

    #[test]
    fn test_deterministic() {
        let waveform = pulse_train(150.0, 16000, 0.2);
        let track = F0Track::on_grid(vec![150.0; 41], 5.0).unwrap();
        let a = cheaptrick(&waveform, &track, &CheapTrickOptions::default()).unwrap();
        let b = cheaptrick(&waveform, &track, &CheapTrickOptions::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_track_keeps_bins() {
        let waveform = Waveform::new(Vec::new(), 16000).unwrap();
        let track = F0Track::on_grid(Vec::new(), 5.0).unwrap();
        let spectrogram = cheaptrick(&waveform, &track, &CheapTrickOptions::default()).unwrap();
        assert!(spectrogram.is_empty());
        assert_eq!(spectrogram.num_cols(), 513);
    }

    #[test]
    fn test_too_short_fft_is_rejected() {
        let waveform = pulse_train(150.0, 44100, 0.1);
        let track = F0Track::on_grid(vec![150.0; 21], 5.0).unwrap();
        let options = CheapTrickOptions::default().with_fft_size(128);
        let err = cheaptrick(&waveform, &track, &options).unwrap_err();
        assert!(matches!(err, VocoderError::InvalidParameter { name: "fft_size", .. }));
    }
}
