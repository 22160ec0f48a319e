#![allow(dead_code)]

use std::f64::consts::PI;

use parvoc::rng::{create_rng, randn};
use parvoc::Waveform;

pub fn sine(freq: f64, fs: u32, seconds: f64) -> Waveform {
    let n = (fs as f64 * seconds) as usize;
    let samples = (0..n)
        .map(|i| 0.5 * (2.0 * PI * freq * i as f64 / fs as f64).sin())
        .collect();
    Waveform::new(samples, fs).unwrap()
}

pub fn noise(fs: u32, seconds: f64, seed: usize) -> Waveform {
    let n = (fs as f64 * seconds) as usize;
    let mut rng = create_rng(99, seed);
    let samples = (0..n).map(|_| 0.1 * randn(&mut rng)).collect();
    Waveform::new(samples, fs).unwrap()
}

/// Amplitude of the vocal tract model at `freq` Hz: three formants over a
/// falling tilt.
pub fn formant_envelope(freq: f64) -> f64 {
    let formants = [(700.0, 130.0, 1.0), (1200.0, 160.0, 0.6), (2600.0, 250.0, 0.3)];
    let peaks: f64 = formants
        .iter()
        .map(|&(centre, width, gain)| gain * (-0.5 * ((freq - centre) / width).powi(2)).exp())
        .sum();
    peaks + 0.02 / (1.0 + freq / 1000.0)
}

/// Voiced vowel with a 5 Hz vibrato around `f0`, followed by a short
/// noise burst.
pub fn speech_like(f0: f64, fs: u32, seconds: f64) -> Waveform {
    let n = (fs as f64 * seconds) as usize;
    let voiced_end = n * 4 / 5;
    let nyquist = fs as f64 / 2.0;
    let mut samples = vec![0.0; n];
    let mut phase = 0.0;
    for (i, sample) in samples.iter_mut().enumerate().take(voiced_end) {
        let t = i as f64 / fs as f64;
        let current = f0 * (1.0 + 0.03 * (2.0 * PI * 5.0 * t).sin());
        phase += 2.0 * PI * current / fs as f64;
        let harmonics = ((nyquist - 200.0) / current) as usize;
        *sample = 0.3
            * (1..=harmonics)
                .map(|h| formant_envelope(h as f64 * current) * (h as f64 * phase).sin())
                .sum::<f64>();
    }
    let mut rng = create_rng(99, 0);
    for sample in samples[voiced_end..].iter_mut() {
        *sample = 0.05 * randn(&mut rng);
    }
    Waveform::new(samples, fs).unwrap()
}

pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut covariance = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        covariance += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    covariance / (var_a * var_b).sqrt()
}
