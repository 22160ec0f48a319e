use std::f64::consts::PI;

use log::{debug, info};
use rayon::prelude::*;
use rustfft::num_complex::Complex;

use super::{SynthesisParameters, DEFAULT_F0, SAFE_GUARD_MINIMUM};
use crate::error::{check_fft_size, Result, VocoderError};
use crate::fft::{fftshift, ForwardRealFft, InverseRealFft, MinimumPhase};
use crate::rng::{create_rng, domain, randn};
use crate::util::{interp1, matlab_round};

const MINIMUM_APERIODICITY: f64 = 0.001;
const MAXIMUM_APERIODICITY: f64 = 0.999_999_999_999;
/// Squared aperiodicity at DC above which a pulse gets no periodic part.
const PERIODIC_LIMIT: f64 = 0.999;

/// One excitation pulse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pulse {
    /// Output sample the pulse is anchored to.
    pub sample_index: usize,
    /// Sub-sample delay after `sample_index`, in samples.
    pub fraction: f64,
}

/// Running excitation phase. Advancing it sample by sample emits a pulse
/// each time the phase completes a cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseAccumulator {
    /// Wrapped phase in `[0, 2pi)` at `sample_index`.
    pub phase: f64,
    pub sample_index: usize,
}

impl PhaseAccumulator {
    /// State after the first sample, played at `f0` Hz.
    pub fn new(f0: f64, fs: f64) -> Self {
        Self {
            phase: (2.0 * PI * f0 / fs).rem_euclid(2.0 * PI),
            sample_index: 0,
        }
    }

    /// Moves to the next sample, played at `f0` Hz. Returns the pulse when
    /// the phase wrapped between the two samples.
    pub fn advance(&mut self, f0: f64, fs: f64) -> Option<Pulse> {
        let next = (self.phase + 2.0 * PI * f0 / fs).rem_euclid(2.0 * PI);
        let pulse = if (next - self.phase).abs() > PI {
            let before = self.phase - 2.0 * PI;
            Some(Pulse {
                sample_index: self.sample_index,
                fraction: -before / (next - before),
            })
        } else {
            None
        };
        self.phase = next;
        self.sample_index += 1;
        pulse
    }
}

/// Renders the waveform. Its length is `round(N * frame_period * fs / 1000)`.
pub fn synthesize(params: &SynthesisParameters) -> Result<Vec<f64>> {
    params.validate()?;
    let frames = params.frame_count();
    if frames == 0 {
        return Err(VocoderError::EmptyInput {
            operation: "synthesize",
        });
    }
    let fft_size = params.fft_size();
    check_fft_size(fft_size)?;

    let fs = params.sample_rate as f64;
    let y_length = matlab_round(frames as f64 * params.frame_period * fs / 1000.0).max(0) as usize;
    let (f0, voiced) = sample_contours(params, y_length);

    let mut pulses = Vec::new();
    if let Some(&first) = f0.first() {
        let mut accumulator = PhaseAccumulator::new(first, fs);
        pulses.extend(f0[1..].iter().filter_map(|&f| accumulator.advance(f, fs)));
    }
    info!(
        "synthesis: {} frames, {} samples, {} pulses, fft {}",
        frames,
        y_length,
        pulses.len(),
        fft_size
    );

    let dc_remover = dc_remover(fft_size);
    let responses: Vec<Vec<f64>> = pulses
        .par_iter()
        .enumerate()
        .map_init(
            || PulseRenderer::new(fft_size),
            |renderer, (k, pulse)| {
                let next = pulses.get(k + 1).unwrap_or(pulse);
                let noise_size = next.sample_index - pulse.sample_index;
                let is_voiced = voiced[pulse.sample_index];
                renderer.render(params, pulse, is_voiced, noise_size, k, &dc_remover)
            },
        )
        .collect();

    let mut y = vec![0.0; y_length];
    let half = fft_size as i64 / 2;
    for (pulse, response) in pulses.iter().zip(&responses) {
        let offset = pulse.sample_index as i64 - half + 1;
        for (j, value) in response.iter().enumerate() {
            let index = offset + j as i64;
            if index >= 0 && (index as usize) < y_length {
                y[index as usize] += value;
            }
        }
    }
    debug!("synthesis: rendered {} responses", responses.len());
    Ok(y)
}

/// Per-sample F0 and voicing, linearly interpolated from the frame grid.
/// Unvoiced samples are clocked at the default F0.
fn sample_contours(params: &SynthesisParameters, y_length: usize) -> (Vec<f64>, Vec<bool>) {
    let frames = params.frame_count();
    let fs = params.sample_rate as f64;
    let lowest_f0 = fs / params.fft_size() as f64 + 1.0;
    let frame_period = params.frame_period / 1000.0;

    let mut coarse_f0: Vec<f64> = params
        .f0
        .iter()
        .map(|&f| if f < lowest_f0 { 0.0 } else { f })
        .collect();
    let mut coarse_vuv: Vec<f64> = coarse_f0
        .iter()
        .map(|&f| if f > 0.0 { 1.0 } else { 0.0 })
        .collect();
    let extrapolate = |v: &[f64]| {
        if frames > 1 {
            v[frames - 1] * 2.0 - v[frames - 2]
        } else {
            v[0]
        }
    };
    let last_f0 = extrapolate(&coarse_f0);
    let last_vuv = extrapolate(&coarse_vuv);
    coarse_f0.push(last_f0);
    coarse_vuv.push(last_vuv);

    let coarse_time: Vec<f64> = (0..=frames).map(|i| i as f64 * frame_period).collect();
    let time_axis: Vec<f64> = (0..y_length).map(|i| i as f64 / fs).collect();
    let f0 = interp1(&coarse_time, &coarse_f0, &time_axis);
    let vuv = interp1(&coarse_time, &coarse_vuv, &time_axis);

    let voiced: Vec<bool> = vuv.iter().map(|&v| v > 0.5).collect();
    let f0 = f0
        .iter()
        .zip(&voiced)
        .map(|(&f, &v)| if v { f } else { DEFAULT_F0 })
        .collect();
    (f0, voiced)
}

/// Raised cosine summing to one, used to cancel the DC of periodic
/// responses.
fn dc_remover(fft_size: usize) -> Vec<f64> {
    let mut remover = vec![0.0; fft_size];
    let mut total = 0.0;
    for i in 0..fft_size / 2 {
        let value = 0.5 - 0.5 * (2.0 * PI * (i + 1) as f64 / (fft_size + 1) as f64).cos();
        remover[i] = value;
        remover[fft_size - 1 - i] = value;
        total += value * 2.0;
    }
    remover.iter_mut().for_each(|v| *v /= total);
    remover
}

fn safe_aperiodicity(value: f64) -> f64 {
    value.clamp(MINIMUM_APERIODICITY, MAXIMUM_APERIODICITY)
}

/// Per-worker buffers for rendering pulse responses.
struct PulseRenderer {
    fft_size: usize,
    minimum_phase: MinimumPhase,
    forward: ForwardRealFft,
    inverse: InverseRealFft,
    envelope: Vec<f64>,
    ratio: Vec<f64>,
    log_amplitude: Vec<f64>,
    spectrum: Vec<Complex<f64>>,
    noise: Vec<f64>,
}

impl PulseRenderer {
    fn new(fft_size: usize) -> Self {
        let bins = fft_size / 2 + 1;
        Self {
            fft_size,
            minimum_phase: MinimumPhase::new(fft_size),
            forward: ForwardRealFft::new(fft_size),
            inverse: InverseRealFft::new(fft_size),
            envelope: vec![0.0; bins],
            ratio: vec![0.0; bins],
            log_amplitude: vec![0.0; bins],
            spectrum: vec![Complex::new(0.0, 0.0); bins],
            noise: Vec::new(),
        }
    }

    fn render(
        &mut self,
        params: &SynthesisParameters,
        pulse: &Pulse,
        voiced: bool,
        noise_size: usize,
        stream: usize,
        dc_remover: &[f64],
    ) -> Vec<f64> {
        let fft_size = self.fft_size;
        self.interpolate_envelopes(params, pulse.sample_index as f64 / params.sample_rate as f64);

        let mut response = vec![0.0; fft_size];
        if voiced && self.ratio[0] <= PERIODIC_LIMIT {
            self.periodic_response(pulse.fraction, dc_remover, &mut response);
            let gain = (noise_size.max(1) as f64).sqrt();
            response.iter_mut().for_each(|v| *v *= gain);
        }
        self.add_aperiodic_response(voiced, noise_size, stream, &mut response);
        response.iter_mut().for_each(|v| *v /= fft_size as f64);
        response
    }

    /// Envelope and squared aperiodicity at `time` seconds, linear between
    /// the enclosing frames.
    fn interpolate_envelopes(&mut self, params: &SynthesisParameters, time: f64) {
        let last = params.frame_count() - 1;
        let position = time / (params.frame_period / 1000.0);
        let floor = (position.floor() as usize).min(last);
        let ceil = (position.ceil() as usize).min(last);
        let weight = if floor == ceil { 0.0 } else { position - floor as f64 };

        let sp = (params.spectrogram.row(floor), params.spectrogram.row(ceil));
        let ap = (params.aperiodicity.row(floor), params.aperiodicity.row(ceil));
        for i in 0..self.envelope.len() {
            self.envelope[i] = (1.0 - weight) * sp.0[i] + weight * sp.1[i];
            let a = safe_aperiodicity(ap.0[i]).powi(2);
            let b = safe_aperiodicity(ap.1[i]).powi(2);
            self.ratio[i] = (1.0 - weight) * a + weight * b;
        }
    }

    fn periodic_response(&mut self, fraction: f64, dc_remover: &[f64], out: &mut [f64]) {
        let fft_size = self.fft_size;
        let half = fft_size / 2;
        for i in 0..=half {
            self.log_amplitude[i] =
                (self.envelope[i] * (1.0 - self.ratio[i]) + SAFE_GUARD_MINIMUM).ln() / 2.0;
        }
        let coefficient = 2.0 * PI * fraction / fft_size as f64;
        let minimum_phase = self.minimum_phase.process(&self.log_amplitude);
        for (i, (slot, value)) in self.spectrum.iter_mut().zip(minimum_phase).enumerate() {
            *slot = value * Complex::from_polar(1.0, -coefficient * i as f64);
        }
        fftshift(self.inverse.process(&self.spectrum), out);

        let dc: f64 = out[half..].iter().sum();
        for (i, value) in out.iter_mut().enumerate() {
            if i < half {
                *value = -dc * dc_remover[i];
            } else {
                *value -= dc * dc_remover[i];
            }
        }
    }

    fn add_aperiodic_response(
        &mut self,
        voiced: bool,
        noise_size: usize,
        stream: usize,
        out: &mut [f64],
    ) {
        let half = self.fft_size / 2;
        let mut rng = create_rng(domain::SYNTHESIS, stream);
        self.noise.clear();
        self.noise.extend((0..noise_size).map(|_| randn(&mut rng)));
        if self.noise.is_empty() {
            return;
        }
        let mean = self.noise.iter().sum::<f64>() / noise_size as f64;
        self.noise.iter_mut().for_each(|v| *v -= mean);

        for i in 0..=half {
            let power = if voiced {
                self.envelope[i] * self.ratio[i]
            } else {
                self.envelope[i]
            };
            self.log_amplitude[i] = (power + SAFE_GUARD_MINIMUM).ln() / 2.0;
        }
        let noise_spectrum = self.forward.process(&self.noise).to_vec();
        let minimum_phase = self.minimum_phase.process(&self.log_amplitude);
        let bins = self.spectrum.iter_mut().zip(minimum_phase).zip(&noise_spectrum);
        for ((slot, filter), noise) in bins {
            *slot = filter * noise;
        }

        let mut shifted = vec![0.0; self.fft_size];
        fftshift(self.inverse.process(&self.spectrum), &mut shifted);
        for (value, extra) in out.iter_mut().zip(&shifted) {
            *value += extra;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::FrameMatrix;

    fn flat_parameters(f0: Vec<f64>, aperiodicity: f64, fft_size: usize) -> SynthesisParameters {
        let frames = f0.len();
        let bins = fft_size / 2 + 1;
        SynthesisParameters {
            f0,
            spectrogram: FrameMatrix::filled(frames, bins, 1e-4),
            aperiodicity: FrameMatrix::filled(frames, bins, aperiodicity),
            sample_rate: 16000,
            frame_period: 5.0,
        }
    }

    #[test]
    fn test_phase_accumulator_pulse_rate() {
        let fs = 16000.0;
        let mut accumulator = PhaseAccumulator::new(100.0, fs);
        let pulses: Vec<Pulse> = (1..16000)
            .filter_map(|_| accumulator.advance(100.0, fs))
            .collect();
        assert!((99..=100).contains(&pulses.len()), "{}", pulses.len());
        for pair in pulses.windows(2) {
            let period = (pair[1].sample_index as f64 + pair[1].fraction)
                - (pair[0].sample_index as f64 + pair[0].fraction);
            assert!((period - 160.0).abs() < 1e-6, "period {}", period);
        }
        assert_eq!(accumulator.sample_index, 15999);
    }

    #[test]
    fn test_output_length_law() {
        for (frames, frame_period, rate) in [(201, 5.0, 16000), (37, 3.3, 22050), (1, 5.0, 16000)] {
            let mut params = flat_parameters(vec![150.0; frames], 0.1, 1024);
            params.frame_period = frame_period;
            params.sample_rate = rate;
            let y = synthesize(&params).unwrap();
            let expected = (frames as f64 * frame_period * rate as f64 / 1000.0).round() as usize;
            assert_eq!(y.len(), expected);
        }
    }

    #[test]
    fn test_bin_mismatch_is_rejected() {
        let mut params = flat_parameters(vec![150.0; 10], 0.1, 1024);
        params.aperiodicity = FrameMatrix::filled(10, 257, 0.1);
        let err = synthesize(&params).unwrap_err();
        assert!(matches!(err, VocoderError::InvalidLength { what: "aperiodicity bins", .. }));
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let params = flat_parameters(Vec::new(), 0.1, 1024);
        let err = synthesize(&params).unwrap_err();
        assert_eq!(err, VocoderError::EmptyInput { operation: "synthesize" });
    }

    #[test]
    fn test_silent_envelope_gives_silence() {
        let mut params = flat_parameters(vec![0.0; 200], 1.0, 1024);
        params.spectrogram = FrameMatrix::filled(200, 513, 1e-20);
        let y = synthesize(&params).unwrap();
        assert!(y.iter().all(|v| v.abs() < 1e-4));
    }

    #[test]
    fn test_voiced_output_is_periodic() {
        let params = flat_parameters(vec![200.0; 200], 0.001, 1024);
        let y = synthesize(&params).unwrap();
        let segment = &y[4000..12000];
        let correlation = |lag: usize| -> f64 {
            segment[..segment.len() - lag]
                .iter()
                .zip(&segment[lag..])
                .map(|(a, b)| a * b)
                .sum()
        };
        // 200 Hz at 16 kHz: 80 samples per period
        assert!(correlation(80) > 0.9 * correlation(0));
        assert!(correlation(40) < 0.5 * correlation(0));
    }

    #[test]
    fn test_deterministic() {
        let params = flat_parameters(vec![0.0; 50], 0.5, 512);
        assert_eq!(synthesize(&params).unwrap(), synthesize(&params).unwrap());
    }

    #[test]
    fn test_dc_remover_sums_to_one() {
        let remover = dc_remover(1024);
        assert!((remover.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }
}
