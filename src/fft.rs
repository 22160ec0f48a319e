use std::cell::RefCell;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

// One planner per thread so rayon workers never contend on it.
thread_local! {
    static PLANNER: RefCell<FftPlanner<f64>> = RefCell::new(FftPlanner::new());
}

fn plan(size: usize, inverse: bool) -> Arc<dyn Fft<f64>> {
    PLANNER.with(|planner| {
        let mut planner = planner.borrow_mut();
        if inverse {
            planner.plan_fft_inverse(size)
        } else {
            planner.plan_fft_forward(size)
        }
    })
}

/// Forward transform of a real signal; yields the `size / 2 + 1`
/// non-negative frequency bins.
pub struct ForwardRealFft {
    size: usize,
    fft: Arc<dyn Fft<f64>>,
    buffer: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl ForwardRealFft {
    pub fn new(size: usize) -> Self {
        let fft = plan(size, false);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            size,
            fft,
            buffer: vec![Complex::new(0.0, 0.0); size],
            scratch,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Transforms `input`, zero-padded or truncated to the FFT size.
    pub fn process(&mut self, input: &[f64]) -> &[Complex<f64>] {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            *slot = Complex::new(input.get(i).copied().unwrap_or(0.0), 0.0);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);
        &self.buffer[..=self.size / 2]
    }
}

/// Inverse transform of a Hermitian spectrum given by its non-negative bins.
/// The output is not normalised.
pub struct InverseRealFft {
    size: usize,
    fft: Arc<dyn Fft<f64>>,
    buffer: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    output: Vec<f64>,
}

impl InverseRealFft {
    pub fn new(size: usize) -> Self {
        let fft = plan(size, true);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            size,
            fft,
            buffer: vec![Complex::new(0.0, 0.0); size],
            scratch,
            output: vec![0.0; size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn process(&mut self, half_spectrum: &[Complex<f64>]) -> &[f64] {
        let half = self.size / 2;
        for (k, slot) in self.buffer.iter_mut().enumerate().take(half + 1) {
            *slot = half_spectrum.get(k).copied().unwrap_or_default();
        }
        for k in 1..half {
            self.buffer[self.size - k] = self.buffer[k].conj();
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);
        for (out, value) in self.output.iter_mut().zip(&self.buffer) {
            *out = value.re;
        }
        &self.output
    }
}

/// Minimum-phase spectrum from a log-amplitude half spectrum, computed by
/// folding the real cepstrum onto positive quefrencies.
pub struct MinimumPhase {
    size: usize,
    forward: ForwardRealFft,
    inverse: InverseRealFft,
    log_spectrum: Vec<Complex<f64>>,
    cepstrum: Vec<f64>,
    spectrum: Vec<Complex<f64>>,
}

impl MinimumPhase {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            forward: ForwardRealFft::new(size),
            inverse: InverseRealFft::new(size),
            log_spectrum: vec![Complex::new(0.0, 0.0); size / 2 + 1],
            cepstrum: vec![0.0; size],
            spectrum: vec![Complex::new(0.0, 0.0); size / 2 + 1],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// `log_amplitude` holds `ln|H(k)|` for `k = 0..=size/2`.
    pub fn process(&mut self, log_amplitude: &[f64]) -> &[Complex<f64>] {
        let half = self.size / 2;
        for (slot, &value) in self.log_spectrum.iter_mut().zip(log_amplitude) {
            *slot = Complex::new(value, 0.0);
        }

        let raw = self.inverse.process(&self.log_spectrum);
        self.cepstrum[0] = raw[0];
        for i in 1..half {
            self.cepstrum[i] = 2.0 * raw[i];
        }
        self.cepstrum[half] = raw[half];
        for value in self.cepstrum[half + 1..].iter_mut() {
            *value = 0.0;
        }

        let scale = self.size as f64;
        let folded = self.forward.process(&self.cepstrum);
        for (slot, value) in self.spectrum.iter_mut().zip(folded) {
            *slot = Complex::from_polar((value.re / scale).exp(), value.im / scale);
        }
        &self.spectrum
    }
}

/// Rotates a length-`n` buffer by `n / 2` so that time zero lands in the
/// middle.
pub fn fftshift(input: &[f64], output: &mut [f64]) {
    let n = input.len();
    let half = n / 2;
    for (i, slot) in output.iter_mut().enumerate().take(n) {
        *slot = input[(i + half) % n];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_inverse_roundtrip_scale() {
        let signal: Vec<f64> = (0..16).map(|i| (i as f64 * 0.7).sin()).collect();
        let mut forward = ForwardRealFft::new(16);
        let spectrum = forward.process(&signal).to_vec();
        assert_eq!(spectrum.len(), 9);

        let mut inverse = InverseRealFft::new(16);
        let restored = inverse.process(&spectrum);
        for (a, b) in signal.iter().zip(restored) {
            assert!((a - b / 16.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_forward_zero_pads() {
        let mut forward = ForwardRealFft::new(8);
        let spectrum = forward.process(&[1.0]);
        for bin in spectrum {
            assert!((bin.re - 1.0).abs() < 1e-12);
            assert!(bin.im.abs() < 1e-12);
        }
    }

    #[test]
    fn test_minimum_phase_keeps_magnitude_and_is_causal() {
        let size = 64;
        let log_amplitude: Vec<f64> = (0..=size / 2)
            .map(|k| {
                let phase = 2.0 * std::f64::consts::PI * 4.0 * k as f64 / size as f64;
                (1.0 + 0.8 * phase.cos()).ln()
            })
            .collect();
        let mut minimum_phase = MinimumPhase::new(size);
        let spectrum = minimum_phase.process(&log_amplitude).to_vec();
        for (bin, &log_amp) in spectrum.iter().zip(&log_amplitude) {
            assert!((bin.norm().ln() - log_amp).abs() < 1e-9);
        }

        let mut inverse = InverseRealFft::new(size);
        let response = inverse.process(&spectrum);
        let head: f64 = response[..size / 2].iter().map(|v| v * v).sum();
        let tail: f64 = response[size * 3 / 4..].iter().map(|v| v * v).sum();
        assert!(tail < head * 1e-3, "head {head} tail {tail}");
    }

    #[test]
    fn test_fftshift() {
        let input = [0.0, 1.0, 2.0, 3.0];
        let mut output = [0.0; 4];
        fftshift(&input, &mut output);
        assert_eq!(output, [2.0, 3.0, 0.0, 1.0]);
    }
}
