//! StoneMask: F0 refinement from the instantaneous frequency of the
//! harmonics.
//!
//! The instantaneous frequency at bin `k` is obtained from the spectra of the
//! signal under a Blackman window and under the window's time derivative:
//! `k * fs / N + Im(conj(X) * X_d) / |X|^2 * fs / 2pi`.

use std::collections::HashMap;
use std::f64::consts::PI;

use log::info;
use rayon::prelude::*;
use rustfft::num_complex::Complex;

use super::{F0Track, Waveform, FLOOR_F0_STONEMASK, SAFE_GUARD_MINIMUM};
use crate::error::{check_sample_rate, Result};
use crate::fft::ForwardRealFft;
use crate::util::{matlab_round, parabolic_peak_offset};

const TENTATIVE_HARMONICS: usize = 2;
const MAXIMUM_HARMONICS: usize = 6;
const MAXIMUM_CORRECTION: f64 = 0.2;

/// Refines every voiced frame of `track`. Unvoiced frames stay 0 and voiced
/// frames never become unvoiced.
pub fn stonemask(waveform: &Waveform, track: &F0Track) -> Result<Vec<f64>> {
    check_sample_rate(waveform.sample_rate)?;
    track.validate()?;
    if track.is_empty() {
        return Ok(Vec::new());
    }
    info!(
        "stonemask: refining {} voiced of {} frames",
        track.voiced_count(),
        track.len()
    );

    let fs = waveform.fs();
    let x = &waveform.samples;
    Ok(track
        .f0
        .par_iter()
        .zip(track.temporal_positions.par_iter())
        .map_init(HarmonicAnalyzer::new, |analyzer, (&f0, &position)| {
            refine_frame(analyzer, x, fs, position, f0)
        })
        .collect())
}

fn refine_frame(
    analyzer: &mut HarmonicAnalyzer,
    x: &[f64],
    fs: f64,
    position: f64,
    f0: f64,
) -> f64 {
    if f0 == 0.0 {
        return 0.0;
    }
    if f0 <= FLOOR_F0_STONEMASK || f0 > fs / 12.0 || x.is_empty() {
        return f0;
    }

    // Two harmonics first so that the higher ones are read at the right bins.
    analyzer.transform(x, fs, position, f0);
    let tentative = weighted_f0(&analyzer.harmonics(fs, f0, TENTATIVE_HARMONICS, true));
    if !(tentative > 0.0 && tentative <= 2.0 * f0) {
        return f0;
    }
    let count = ((fs / 2.0 / tentative) as usize).clamp(1, MAXIMUM_HARMONICS);
    let refined = weighted_f0(&analyzer.harmonics(fs, tentative, count, true));

    if !refined.is_finite()
        || refined < FLOOR_F0_STONEMASK
        || refined > fs / 12.0
        || (refined - f0).abs() > f0 * MAXIMUM_CORRECTION
    {
        f0
    } else {
        refined
    }
}

/// Amplitude-weighted F0 implied by harmonics `1..=n`.
fn weighted_f0(harmonics: &[Harmonic]) -> f64 {
    let numerator: f64 = harmonics.iter().map(|h| h.amplitude * h.frequency).sum();
    let denominator: f64 = harmonics
        .iter()
        .enumerate()
        .map(|(i, h)| h.amplitude * (i + 1) as f64)
        .sum();
    numerator / (denominator + SAFE_GUARD_MINIMUM)
}

/// Instantaneous frequency and amplitude measured at one harmonic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Harmonic {
    pub frequency: f64,
    pub amplitude: f64,
}

/// Per-worker scratch for harmonic instantaneous-frequency analysis. FFT
/// workspaces are cached by size since the window length follows F0.
pub(crate) struct HarmonicAnalyzer {
    transforms: HashMap<usize, ForwardRealFft>,
    main_window: Vec<f64>,
    diff_window: Vec<f64>,
    main: Vec<f64>,
    diff: Vec<f64>,
    main_spectrum: Vec<Complex<f64>>,
    fft_size: usize,
    power: Vec<f64>,
    numerator: Vec<f64>,
}

impl HarmonicAnalyzer {
    pub fn new() -> Self {
        Self {
            transforms: HashMap::new(),
            main_window: Vec::new(),
            diff_window: Vec::new(),
            main: Vec::new(),
            diff: Vec::new(),
            main_spectrum: Vec::new(),
            fft_size: 0,
            power: Vec::new(),
            numerator: Vec::new(),
        }
    }

    /// Analyses harmonics `1..=count` of `f0` around `position` seconds.
    pub fn analyze(
        &mut self,
        x: &[f64],
        fs: f64,
        position: f64,
        f0: f64,
        count: usize,
        snap_to_peak: bool,
    ) -> Vec<Harmonic> {
        self.transform(x, fs, position, f0);
        self.harmonics(fs, f0, count, snap_to_peak)
    }

    /// Spectra of the frame at `position` under a three-period Blackman
    /// window of `f0` and under its derivative.
    pub fn transform(&mut self, x: &[f64], fs: f64, position: f64, f0: f64) {
        let half = (1.5 * fs / f0 + 1.0) as usize;
        let len = half * 2 + 1;
        let window_length_in_time = len as f64 / fs;
        let fft_size = 1usize << (2 + (len as f64).log2() as u32);
        let basic_index = matlab_round((position - half as f64 / fs) * fs + 0.001);
        let last = x.len() as i64 - 1;

        self.main_window.clear();
        self.main.clear();
        for i in 0..len {
            let index = basic_index + i as i64 - 1;
            let t = index as f64 / fs - position;
            let w = 0.42
                + 0.5 * (2.0 * PI * t / window_length_in_time).cos()
                + 0.08 * (4.0 * PI * t / window_length_in_time).cos();
            self.main_window.push(w);
            self.main.push(x[index.clamp(0, last) as usize] * w);
        }

        self.diff_window.clear();
        self.diff_window.push(-self.main_window[1] / 2.0);
        for i in 1..len - 1 {
            self.diff_window
                .push(-(self.main_window[i + 1] - self.main_window[i - 1]) / 2.0);
        }
        self.diff_window.push(self.main_window[len - 2] / 2.0);

        self.diff.clear();
        for (i, w) in self.diff_window.iter().enumerate() {
            let index = basic_index + i as i64 - 1;
            self.diff.push(x[index.clamp(0, last) as usize] * w);
        }

        let fft = self
            .transforms
            .entry(fft_size)
            .or_insert_with(|| ForwardRealFft::new(fft_size));
        self.main_spectrum.clear();
        self.main_spectrum.extend_from_slice(fft.process(&self.main));
        let diff_spectrum = fft.process(&self.diff);

        self.power.clear();
        self.numerator.clear();
        for (m, d) in self.main_spectrum.iter().zip(diff_spectrum) {
            self.power.push(m.norm_sqr());
            self.numerator.push(m.re * d.im - m.im * d.re);
        }
        self.fft_size = fft_size;
    }

    /// Reads harmonics `1..=count` of `f0` from the last [`transform`].
    /// With `snap_to_peak`, a harmonic whose power peak lies closer to a
    /// neighbouring bin is read there instead.
    ///
    /// [`transform`]: HarmonicAnalyzer::transform
    pub fn harmonics(&self, fs: f64, f0: f64, count: usize, snap_to_peak: bool) -> Vec<Harmonic> {
        let fft_size = self.fft_size;
        let bins = self.power.len();
        if bins == 0 {
            return Vec::new();
        }
        (1..=count)
            .map(|h| {
                let mut index = matlab_round(f0 * fft_size as f64 / fs * h as f64)
                    .clamp(0, bins as i64 - 1) as usize;
                if snap_to_peak && index >= 1 && index + 1 < bins {
                    let offset = parabolic_peak_offset(
                        self.power[index - 1],
                        self.power[index],
                        self.power[index + 1],
                    );
                    if offset > 0.5 {
                        index += 1;
                    } else if offset < -0.5 {
                        index -= 1;
                    }
                }
                let power = self.power[index];
                let frequency = if power == 0.0 {
                    0.0
                } else {
                    index as f64 * fs / fft_size as f64
                        + self.numerator[index] / power * fs / 2.0 / PI
                };
                Harmonic {
                    frequency,
                    amplitude: power.sqrt(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harmonic_signal(f0: f64, fs: u32, seconds: f64) -> Waveform {
        let len = (fs as f64 * seconds) as usize;
        let samples = (0..len)
            .map(|i| {
                let t = i as f64 / fs as f64;
                (1..=4)
                    .map(|h| (2.0 * PI * f0 * h as f64 * t).sin() / h as f64)
                    .sum::<f64>()
            })
            .collect();
        Waveform::new(samples, fs).unwrap()
    }

    #[test]
    fn test_instantaneous_frequency_of_sine() {
        let fs = 16000.0;
        let x: Vec<f64> = (0..4000).map(|i| (2.0 * PI * 203.0 * i as f64 / fs).sin()).collect();
        let mut analyzer = HarmonicAnalyzer::new();
        let harmonics = analyzer.analyze(&x, fs, 0.1, 200.0, 1, false);
        assert!((harmonics[0].frequency - 203.0).abs() < 0.5, "{:?}", harmonics);
    }

    #[test]
    fn test_refines_towards_true_f0() {
        let waveform = harmonic_signal(180.0, 16000, 0.3);
        let frames = 40;
        let f0 = vec![170.0; frames];
        let track = F0Track::on_grid(f0, 5.0).unwrap();
        let refined = stonemask(&waveform, &track).unwrap();
        for &f in &refined[5..35] {
            assert!((f - 180.0).abs() < 1.0, "refined {}", f);
        }
    }

    #[test]
    fn test_recovers_from_distant_start() {
        let waveform = harmonic_signal(200.0, 16000, 0.3);
        for start in [176.0, 222.0] {
            let track = F0Track::on_grid(vec![start; 40], 5.0).unwrap();
            let refined = stonemask(&waveform, &track).unwrap();
            for &f in &refined[8..32] {
                assert!((f - 200.0).abs() < 2.0, "from {} refined {}", start, f);
            }
        }
    }

    #[test]
    fn test_tentative_pass_uses_two_harmonics() {
        let waveform = harmonic_signal(200.0, 16000, 0.3);
        let mut analyzer = HarmonicAnalyzer::new();
        analyzer.transform(&waveform.samples, 16000.0, 0.15, 176.0);
        let tentative = weighted_f0(&analyzer.harmonics(16000.0, 176.0, TENTATIVE_HARMONICS, true));
        assert!((tentative - 200.0).abs() < 10.0, "tentative {}", tentative);
    }

    #[test]
    fn test_unvoiced_frames_untouched() {
        let waveform = harmonic_signal(150.0, 16000, 0.2);
        let f0 = vec![0.0, 150.0, 0.0, 0.0, 148.0, 0.0];
        let track = F0Track::on_grid(f0.clone(), 5.0).unwrap();
        let refined = stonemask(&waveform, &track).unwrap();
        for (before, after) in f0.iter().zip(&refined) {
            assert_eq!(*before == 0.0, *after == 0.0);
        }
    }

    #[test]
    fn test_out_of_range_frames_keep_input() {
        let waveform = harmonic_signal(150.0, 8000, 0.1);
        let f0 = vec![30.0, 900.0];
        let track = F0Track::on_grid(f0.clone(), 5.0).unwrap();
        let refined = stonemask(&waveform, &track).unwrap();
        assert_eq!(refined, f0);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let waveform = harmonic_signal(150.0, 8000, 0.1);
        let track = F0Track {
            f0: vec![150.0; 3],
            temporal_positions: vec![0.0; 2],
        };
        assert!(stonemask(&waveform, &track).is_err());
    }
}
