//! DIO: multiband zero-crossing F0 estimation.
//!
//! The decimated, low-cut signal is passed through a bank of Nuttall
//! low-pass filters spaced `channels_in_octave` per octave. In every band the
//! intervals between four kinds of events (negative-going and
//! positive-going zero crossings, peaks, dips) give four rate estimates per
//! frame; their relative spread is the candidate's score, and candidates
//! spreading wider than `allowed_range` are dropped. The best candidate per
//! frame is then cleaned up by a four-step contour fixer.

use std::f64::consts::PI;

use log::{debug, info};
use rayon::prelude::*;
use rustfft::num_complex::Complex;

use super::{
    frame_count, temporal_positions, F0Track, Waveform, ALLOWED_RANGE, CHANNELS_IN_OCTAVE,
    F0_CEIL, F0_FLOOR, FRAME_PERIOD, SAFE_GUARD_MINIMUM, SPEED,
};
use crate::error::{check_f0_range, check_frame_period, check_sample_rate, Result, VocoderError};
use crate::fft::{ForwardRealFft, InverseRealFft};
use crate::filter::decimate;
use crate::util::{interp1, matlab_round, nuttall_window, suitable_fft_size};

const LOW_CUT_FREQUENCY: f64 = 50.0;
const MAXIMUM_SCORE: f64 = 100000.0;
const MAXIMUM_SPEED: usize = 12;

#[derive(Debug, Clone, PartialEq)]
pub struct DioOptions {
    pub f0_floor: f64,
    pub f0_ceil: f64,
    pub channels_in_octave: f64,
    /// Milliseconds.
    pub frame_period: f64,
    /// Decimation factor, 1 (most accurate) to 12 (fastest).
    pub speed: usize,
    /// Maximum relative spread of a band's four estimates, and maximum
    /// relative frame-to-frame F0 change kept by the contour fixer.
    pub allowed_range: f64,
}

impl Default for DioOptions {
    fn default() -> Self {
        Self {
            f0_floor: F0_FLOOR,
            f0_ceil: F0_CEIL,
            channels_in_octave: CHANNELS_IN_OCTAVE,
            frame_period: FRAME_PERIOD,
            speed: SPEED,
            allowed_range: ALLOWED_RANGE,
        }
    }
}

impl DioOptions {
    pub fn with_f0_range(mut self, f0_floor: f64, f0_ceil: f64) -> Self {
        self.f0_floor = f0_floor;
        self.f0_ceil = f0_ceil;
        self
    }

    pub fn with_frame_period(mut self, frame_period: f64) -> Self {
        self.frame_period = frame_period;
        self
    }

    pub fn with_channels_in_octave(mut self, channels_in_octave: f64) -> Self {
        self.channels_in_octave = channels_in_octave;
        self
    }

    pub fn with_speed(mut self, speed: usize) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_allowed_range(mut self, allowed_range: f64) -> Self {
        self.allowed_range = allowed_range;
        self
    }

    fn validate(&self) -> Result<()> {
        check_f0_range(self.f0_floor, self.f0_ceil)?;
        check_frame_period(self.frame_period)?;
        if !(1..=MAXIMUM_SPEED).contains(&self.speed) {
            return Err(VocoderError::invalid_param(
                "speed",
                format!("must be in 1..={}, got {}", MAXIMUM_SPEED, self.speed),
            ));
        }
        if !(self.channels_in_octave.is_finite() && self.channels_in_octave > 0.0) {
            return Err(VocoderError::invalid_param(
                "channels_in_octave",
                format!("must be positive, got {}", self.channels_in_octave),
            ));
        }
        if !(self.allowed_range.is_finite() && self.allowed_range > 0.0) {
            return Err(VocoderError::invalid_param(
                "allowed_range",
                format!("must be positive, got {}", self.allowed_range),
            ));
        }
        Ok(())
    }
}

/// Estimates the F0 contour of `waveform` with DIO.
pub fn dio(waveform: &Waveform, options: &DioOptions) -> Result<F0Track> {
    check_sample_rate(waveform.sample_rate)?;
    options.validate()?;

    let frames = frame_count(waveform.sample_rate, waveform.len(), options.frame_period);
    let positions = temporal_positions(frames, options.frame_period);
    if frames == 0 {
        return Ok(F0Track {
            f0: Vec::new(),
            temporal_positions: positions,
        });
    }

    let fs = waveform.fs();
    let boundaries = band_boundaries(options.f0_floor, options.f0_ceil, options.channels_in_octave);
    let ratio = options.speed;
    let y_length = 1 + waveform.len() / ratio;
    let actual_fs = fs / ratio as f64;
    let fft_size = suitable_fft_size(
        y_length
            + matlab_round(actual_fs / LOW_CUT_FREQUENCY) as usize * 2
            + 1
            + 4 * (1.0 + actual_fs / boundaries[0] / 2.0) as usize,
    );
    info!(
        "dio: {} samples at {} Hz, {} frames, {} bands, fft {}",
        waveform.len(),
        waveform.sample_rate,
        frames,
        boundaries.len(),
        fft_size
    );

    let spectrum = low_cut_spectrum(&waveform.samples, ratio, fs, y_length, fft_size)?;

    let bands: Vec<(Vec<f64>, Vec<f64>)> = boundaries
        .par_iter()
        .map_init(
            || BandFilter::new(fft_size),
            |filter, &boundary| {
                let mut filtered = filter.low_pass(&spectrum, actual_fs, boundary, y_length);
                band_candidates(&mut filtered, actual_fs, boundary, &positions, options)
            },
        )
        .collect();
    let (candidates, scores): (Vec<Vec<f64>>, Vec<Vec<f64>>) = bands.into_iter().unzip();

    let best = best_contour(&candidates, &scores, frames);
    let f0 = fix_contour(
        &best,
        &candidates,
        options.frame_period,
        options.f0_floor,
        options.allowed_range,
    );
    debug!(
        "dio: {} of {} frames voiced",
        f0.iter().filter(|&&f| f > 0.0).count(),
        frames
    );

    Ok(F0Track {
        f0,
        temporal_positions: positions,
    })
}

fn band_boundaries(f0_floor: f64, f0_ceil: f64, channels_in_octave: f64) -> Vec<f64> {
    let bands = 1 + ((f0_ceil / f0_floor).log2() * channels_in_octave) as usize;
    (0..bands)
        .map(|i| f0_floor * 2f64.powf((i + 1) as f64 / channels_in_octave))
        .collect()
}

/// Spectrum of the decimated, mean-removed signal after the 50 Hz low-cut.
fn low_cut_spectrum(
    x: &[f64],
    ratio: usize,
    fs: f64,
    y_length: usize,
    fft_size: usize,
) -> Result<Vec<Complex<f64>>> {
    let mut y = decimate(x, ratio, fs)?;
    y.resize(y_length, 0.0);
    let mean = y.iter().sum::<f64>() / y_length as f64;
    y.iter_mut().for_each(|v| *v -= mean);

    let mut forward = ForwardRealFft::new(fft_size);
    let mut spectrum = forward.process(&y).to_vec();

    let actual_fs = fs / ratio as f64;
    let cutoff_in_sample = matlab_round(actual_fs / LOW_CUT_FREQUENCY).max(0) as usize;
    let filter = low_cut_filter(cutoff_in_sample * 2 + 1, fft_size);
    for (bin, response) in spectrum.iter_mut().zip(forward.process(&filter)) {
        *bin *= response;
    }
    Ok(spectrum)
}

/// Raised-cosine high-pass of `len` taps, centred circularly at index 0.
fn low_cut_filter(len: usize, fft_size: usize) -> Vec<f64> {
    let mut filter = vec![0.0; fft_size];
    for i in 1..=len {
        filter[i - 1] = 0.5 - 0.5 * (i as f64 * 2.0 * PI / (len + 1) as f64).cos();
    }
    let sum: f64 = filter[..len].iter().sum();
    for tap in filter[..len].iter_mut() {
        *tap = -*tap / sum;
    }
    let half = (len - 1) / 2;
    for i in 0..half {
        filter[fft_size - half + i] = filter[i];
    }
    for i in 0..len {
        filter[i] = filter[i + half];
    }
    filter[0] += 1.0;
    filter
}

/// Per-worker FFT convolution state.
struct BandFilter {
    forward: ForwardRealFft,
    inverse: InverseRealFft,
    product: Vec<Complex<f64>>,
}

impl BandFilter {
    fn new(fft_size: usize) -> Self {
        Self {
            forward: ForwardRealFft::new(fft_size),
            inverse: InverseRealFft::new(fft_size),
            product: vec![Complex::new(0.0, 0.0); fft_size / 2 + 1],
        }
    }

    /// Low-passes with a Nuttall window spanning two periods of `boundary`
    /// and compensates its delay.
    fn low_pass(
        &mut self,
        spectrum: &[Complex<f64>],
        fs: f64,
        boundary: f64,
        y_length: usize,
    ) -> Vec<f64> {
        let half_average_length = matlab_round(fs / boundary / 2.0).max(0) as usize;
        let window = nuttall_window(half_average_length * 4);
        let response = self.forward.process(&window);
        for ((slot, a), b) in self.product.iter_mut().zip(spectrum).zip(response) {
            *slot = a * b;
        }
        let filtered = self.inverse.process(&self.product);
        let bias = half_average_length * 2;
        (0..y_length)
            .map(|i| filtered.get(i + bias).copied().unwrap_or(0.0))
            .collect()
    }
}

/// Event-rate series: rate (Hz) at the midpoint (s) of each event interval.
#[derive(Debug, Clone, Default)]
pub(crate) struct IntervalSeries {
    pub locations: Vec<f64>,
    pub rates: Vec<f64>,
}

impl IntervalSeries {
    /// Intervals between successive downward crossings of zero.
    fn negative_going(signal: &[f64], fs: f64) -> Self {
        let edges: Vec<f64> = signal
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| pair[0] > 0.0 && pair[1] <= 0.0)
            .map(|(i, pair)| i as f64 + pair[0] / (pair[0] - pair[1]))
            .collect();
        let mut series = Self::default();
        for pair in edges.windows(2) {
            series.rates.push(fs / (pair[1] - pair[0]));
            series.locations.push((pair[0] + pair[1]) / 2.0 / fs);
        }
        series
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }
}

/// The four event-interval series of one filtered band.
#[derive(Debug, Clone, Default)]
pub(crate) struct ZeroCrossings {
    pub negative: IntervalSeries,
    pub positive: IntervalSeries,
    pub peak: IntervalSeries,
    pub dip: IntervalSeries,
}

impl ZeroCrossings {
    /// Consumes the contents of `signal` as scratch.
    pub fn from_signal(signal: &mut [f64], fs: f64) -> Self {
        let len = signal.len();
        if len < 2 {
            return Self::default();
        }
        let negative = IntervalSeries::negative_going(signal, fs);
        signal.iter_mut().for_each(|v| *v = -*v);
        let positive = IntervalSeries::negative_going(signal, fs);

        for i in 0..len - 1 {
            signal[i] -= signal[i + 1];
        }
        let peak = IntervalSeries::negative_going(&signal[..len - 1], fs);
        signal[..len - 1].iter_mut().for_each(|v| *v = -*v);
        let dip = IntervalSeries::negative_going(&signal[..len - 1], fs);

        Self {
            negative,
            positive,
            peak,
            dip,
        }
    }

    /// True when every series has more than two intervals.
    pub fn is_usable(&self) -> bool {
        [&self.negative, &self.positive, &self.peak, &self.dip]
            .iter()
            .all(|series| series.len() > 2)
    }

    /// The four rate series linearly interpolated onto `positions`.
    pub fn interpolate(&self, positions: &[f64]) -> [Vec<f64>; 4] {
        [&self.negative, &self.positive, &self.peak, &self.dip]
            .map(|series| interp1(&series.locations, &series.rates, positions))
    }
}

/// Candidates and relative scores (lower is better) of one band.
fn band_candidates(
    filtered: &mut [f64],
    fs: f64,
    boundary: f64,
    positions: &[f64],
    options: &DioOptions,
) -> (Vec<f64>, Vec<f64>) {
    let frames = positions.len();
    let rejected_score = MAXIMUM_SCORE / SAFE_GUARD_MINIMUM;
    let crossings = ZeroCrossings::from_signal(filtered, fs);
    if !crossings.is_usable() {
        return (vec![0.0; frames], vec![rejected_score; frames]);
    }

    let [a, b, c, d] = crossings.interpolate(positions);
    let mut candidates = Vec::with_capacity(frames);
    let mut scores = Vec::with_capacity(frames);
    for i in 0..frames {
        let estimates = [a[i], b[i], c[i], d[i]];
        let mut candidate = estimates.iter().sum::<f64>() / 4.0;
        let mut score =
            (estimates.iter().map(|e| (e - candidate).powi(2)).sum::<f64>() / 3.0).sqrt();
        if candidate > boundary
            || candidate < boundary / 2.0
            || candidate > options.f0_ceil
            || candidate < options.f0_floor
        {
            candidate = 0.0;
            score = MAXIMUM_SCORE;
        }
        score /= candidate + SAFE_GUARD_MINIMUM;
        if score > options.allowed_range {
            candidate = 0.0;
            score = rejected_score;
        }
        candidates.push(candidate);
        scores.push(score);
    }
    (candidates, scores)
}

fn best_contour(candidates: &[Vec<f64>], scores: &[Vec<f64>], frames: usize) -> Vec<f64> {
    (0..frames)
        .map(|i| {
            let mut best_score = f64::INFINITY;
            let mut best = 0.0;
            for (band_candidates, band_scores) in candidates.iter().zip(scores) {
                if band_scores[i] < best_score {
                    best_score = band_scores[i];
                    best = band_candidates[i];
                }
            }
            best
        })
        .collect()
}

/// Removes edges, jumps and short voiced runs, then grows the remaining
/// voiced sections along the candidate set.
fn fix_contour(
    best: &[f64],
    candidates: &[Vec<f64>],
    frame_period: f64,
    f0_floor: f64,
    allowed_range: f64,
) -> Vec<f64> {
    let frames = best.len();
    let voice_range_minimum = (0.5 + 1000.0 / frame_period / f0_floor) as usize * 2 + 1;
    if frames <= voice_range_minimum {
        return vec![0.0; frames];
    }

    let step1 = remove_jumps(best, voice_range_minimum, allowed_range);
    let step2 = remove_short_sections(&step1, voice_range_minimum);
    let (onsets, offsets) = section_edges(&step2);
    let step3 = extend_forward(&step2, candidates, allowed_range, &offsets);
    extend_backward(&step3, candidates, allowed_range, &onsets)
}

fn remove_jumps(f0: &[f64], voice_range_minimum: usize, allowed_range: f64) -> Vec<f64> {
    let frames = f0.len();
    let mut base = f0.to_vec();
    base[..voice_range_minimum].iter_mut().for_each(|v| *v = 0.0);
    base[frames - voice_range_minimum..].iter_mut().for_each(|v| *v = 0.0);

    let mut fixed = vec![0.0; frames];
    for i in voice_range_minimum..frames {
        let change = (base[i] - base[i - 1]) / (SAFE_GUARD_MINIMUM + base[i]);
        if change.abs() < allowed_range {
            fixed[i] = base[i];
        }
    }
    fixed
}

fn remove_short_sections(f0: &[f64], voice_range_minimum: usize) -> Vec<f64> {
    let frames = f0.len();
    let center = (voice_range_minimum - 1) / 2;
    let mut fixed = f0.to_vec();
    for i in center..frames.saturating_sub(center) {
        if f0[i - center..=i + center].iter().any(|&v| v == 0.0) {
            fixed[i] = 0.0;
        }
    }
    fixed
}

/// Indices of the first frame of each voiced run and of the last frame of
/// each voiced run.
fn section_edges(f0: &[f64]) -> (Vec<usize>, Vec<usize>) {
    let mut onsets = Vec::new();
    let mut offsets = Vec::new();
    for i in 1..f0.len() {
        if f0[i] == 0.0 && f0[i - 1] != 0.0 {
            offsets.push(i - 1);
        } else if f0[i - 1] == 0.0 && f0[i] != 0.0 {
            onsets.push(i);
        }
    }
    (onsets, offsets)
}

/// Candidate closest to the linear prediction from `current` and `past`, or
/// 0 when even that one deviates by more than `allowed_range`.
fn select_best_f0(
    current: f64,
    past: f64,
    candidates: &[Vec<f64>],
    target: usize,
    allowed_range: f64,
) -> f64 {
    let reference = (current * 3.0 - past) / 2.0;
    if reference <= 0.0 {
        return 0.0;
    }
    let mut best = 0.0;
    let mut minimum_error = f64::INFINITY;
    for band in candidates {
        let error = (reference - band[target]).abs();
        if error < minimum_error {
            minimum_error = error;
            best = band[target];
        }
    }
    if (1.0 - best / reference).abs() > allowed_range {
        0.0
    } else {
        best
    }
}

fn extend_forward(
    f0: &[f64],
    candidates: &[Vec<f64>],
    allowed_range: f64,
    offsets: &[usize],
) -> Vec<f64> {
    let frames = f0.len();
    let mut fixed = f0.to_vec();
    for (k, &start) in offsets.iter().enumerate() {
        let limit = offsets.get(k + 1).copied().unwrap_or(frames - 1);
        for j in start..limit {
            let past = if j == 0 { fixed[j] } else { fixed[j - 1] };
            fixed[j + 1] = select_best_f0(fixed[j], past, candidates, j + 1, allowed_range);
            if fixed[j + 1] == 0.0 {
                break;
            }
        }
    }
    fixed
}

fn extend_backward(
    f0: &[f64],
    candidates: &[Vec<f64>],
    allowed_range: f64,
    onsets: &[usize],
) -> Vec<f64> {
    let mut fixed = f0.to_vec();
    for k in (0..onsets.len()).rev() {
        let limit = if k == 0 { 1 } else { onsets[k - 1] };
        let mut j = onsets[k];
        while j > limit {
            let past = fixed.get(j + 1).copied().unwrap_or(fixed[j]);
            fixed[j - 1] = select_best_f0(fixed[j], past, candidates, j - 1, allowed_range);
            if fixed[j - 1] == 0.0 {
                break;
            }
            j -= 1;
        }
    }
    fixed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, fs: u32, seconds: f64) -> Waveform {
        let len = (fs as f64 * seconds) as usize;
        let samples = (0..len)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f64 / fs as f64).sin())
            .collect();
        Waveform::new(samples, fs).unwrap()
    }

    fn interior_voiced(f0: &[f64]) -> Vec<f64> {
        let margin = f0.len() / 5;
        f0[margin..f0.len() - margin]
            .iter()
            .copied()
            .filter(|&f| f > 0.0)
            .collect()
    }

    #[test]
    fn test_band_candidates_gate_on_spread() {
        let fs = 8000.0;
        let positions: Vec<f64> = (10..50).map(|i| i as f64 * 0.005).collect();
        let options = DioOptions::default();

        let mut clean: Vec<f64> = (0..2400)
            .map(|i| (2.0 * PI * 400.0 * i as f64 / fs).sin())
            .collect();
        let (candidates, scores) = band_candidates(&mut clean, fs, 500.0, &positions, &options);
        for (candidate, score) in candidates.iter().zip(&scores) {
            assert!((candidate - 400.0).abs() < 2.0, "candidate {}", candidate);
            assert!(*score < 0.01, "score {}", score);
        }

        // The third harmonic triples the peak and dip rates but leaves the
        // zero crossings alone, so the four estimates spread by about half.
        let rough = |i: usize| {
            let phase = 2.0 * PI * 200.0 * i as f64 / fs;
            phase.sin() + 0.8 * (3.0 * phase).sin()
        };
        let mut signal: Vec<f64> = (0..2400).map(rough).collect();
        let (candidates, _) = band_candidates(&mut signal, fs, 500.0, &positions, &options);
        assert!(candidates.iter().all(|&c| c == 0.0), "{:?}", candidates);

        let tolerant = DioOptions::default().with_allowed_range(1.0);
        let mut signal: Vec<f64> = (0..2400).map(rough).collect();
        let (candidates, _) = band_candidates(&mut signal, fs, 500.0, &positions, &tolerant);
        assert!(candidates.iter().all(|&c| c > 250.0 && c < 500.0), "{:?}", candidates);
    }

    #[test]
    fn test_band_boundaries() {
        let bands = band_boundaries(71.0, 800.0, 2.0);
        assert_eq!(bands.len(), 7);
        assert!((bands[0] - 71.0 * 2f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_low_cut_filter_has_no_dc() {
        let filter = low_cut_filter(641, 4096);
        let dc: f64 = filter.iter().sum();
        assert!(dc.abs() < 1e-12);
    }

    #[test]
    fn test_zero_crossings_of_sine() {
        let fs = 8000.0;
        let mut signal: Vec<f64> = (0..800)
            .map(|i| (2.0 * PI * 100.0 * i as f64 / fs).sin())
            .collect();
        let crossings = ZeroCrossings::from_signal(&mut signal, fs);
        assert!(crossings.is_usable());
        for rate in crossings.negative.rates.iter().chain(&crossings.peak.rates) {
            assert!((rate - 100.0).abs() < 0.5, "rate {}", rate);
        }
    }

    #[test]
    fn test_dio_tracks_sine() {
        let waveform = sine(200.0, 16000, 0.5);
        let track = dio(&waveform, &DioOptions::default()).unwrap();
        assert_eq!(track.len(), frame_count(16000, waveform.len(), 5.0));
        let voiced = interior_voiced(&track.f0);
        assert!(!voiced.is_empty());
        for f in voiced {
            assert!((f - 200.0).abs() < 10.0, "f0 {}", f);
        }
    }

    #[test]
    fn test_dio_with_speed() {
        let waveform = sine(150.0, 16000, 0.5);
        let options = DioOptions::default().with_speed(4);
        let track = dio(&waveform, &options).unwrap();
        let voiced = interior_voiced(&track.f0);
        assert!(!voiced.is_empty());
        for f in voiced {
            assert!((f - 150.0).abs() < 7.5, "f0 {}", f);
        }
    }

    #[test]
    fn test_dio_silence_is_unvoiced() {
        let waveform = Waveform::new(vec![0.0; 8000], 16000).unwrap();
        let track = dio(&waveform, &DioOptions::default()).unwrap();
        assert!(track.f0.iter().all(|&f| f == 0.0));
    }

    #[test]
    fn test_dio_short_input_is_unvoiced() {
        let waveform = sine(200.0, 16000, 0.01);
        let track = dio(&waveform, &DioOptions::default()).unwrap();
        assert_eq!(track.len(), 3);
        assert!(track.f0.iter().all(|&f| f == 0.0));
    }

    #[test]
    fn test_dio_empty_input() {
        let waveform = Waveform::new(Vec::new(), 16000).unwrap();
        let track = dio(&waveform, &DioOptions::default()).unwrap();
        assert!(track.is_empty());
        assert!(track.temporal_positions.is_empty());
    }

    #[test]
    fn test_dio_rejects_bad_options() {
        let waveform = sine(200.0, 16000, 0.1);
        let err = dio(&waveform, &DioOptions::default().with_speed(13)).unwrap_err();
        assert!(matches!(err, VocoderError::InvalidParameter { name: "speed", .. }));
        let err = dio(&waveform, &DioOptions::default().with_f0_range(300.0, 200.0)).unwrap_err();
        assert!(matches!(err, VocoderError::InvalidParameter { name: "f0_ceil", .. }));
        let err = dio(&waveform, &DioOptions::default().with_frame_period(0.0)).unwrap_err();
        assert!(matches!(err, VocoderError::InvalidParameter { name: "frame_period", .. }));
    }
}
