use std::f64::consts::PI;

use log::{debug, info};
use rayon::prelude::*;
use rustfft::num_complex::Complex;

use super::dio::ZeroCrossings;
use super::stonemask::HarmonicAnalyzer;
use super::{
    frame_count, temporal_positions, F0Track, Waveform, F0_CEIL, F0_FLOOR, FRAME_PERIOD,
    SAFE_GUARD_MINIMUM,
};
use crate::error::{check_f0_range, check_frame_period, check_sample_rate, Result};
use crate::fft::{ForwardRealFft, InverseRealFft};
use crate::filter::{decimate, smooth_f0};
use crate::util::{matlab_round, nuttall_window, suitable_fft_size};

const TARGET_FS: f64 = 8000.0;
const CHANNELS_IN_OCTAVE: f64 = 40.0;
/// Milliseconds; the grid every intermediate contour lives on.
const BASIC_FRAME_PERIOD: f64 = 1.0;
const MINIMUM_AGREEING_CHANNELS: usize = 10;
/// Candidates of frame `i` are also tried in frames `i - 3 ..= i + 3`.
const SPREAD: usize = 3;
const MAXIMUM_HARMONICS: usize = 6;
const MINIMUM_SCORE: f64 = 2.5;
const RELIABILITY_RANGE: f64 = 0.05;
const JUMP_RANGE: f64 = 0.008;
const MINIMUM_SECTION_FRAMES: usize = 6;
const EXTENSION_RANGE: f64 = 0.18;
const MAXIMUM_EXTENSION: usize = 100;
const EXTENSION_MISSES: usize = 4;
/// A section survives when it spans more than `2200 / mean_f0` frames.
const MINIMUM_SECTION_PERIODS: f64 = 2200.0;
const MAXIMUM_GAP: usize = 9;
const SMOOTHING_PAD: usize = 300;

#[derive(Debug, Clone, PartialEq)]
pub struct HarvestOptions {
    pub f0_floor: f64,
    pub f0_ceil: f64,
    /// Milliseconds.
    pub frame_period: f64,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            f0_floor: F0_FLOOR,
            f0_ceil: F0_CEIL,
            frame_period: FRAME_PERIOD,
        }
    }
}

impl HarvestOptions {
    pub fn with_f0_range(mut self, f0_floor: f64, f0_ceil: f64) -> Self {
        self.f0_floor = f0_floor;
        self.f0_ceil = f0_ceil;
        self
    }

    pub fn with_frame_period(mut self, frame_period: f64) -> Self {
        self.frame_period = frame_period;
        self
    }

    fn validate(&self) -> Result<()> {
        check_f0_range(self.f0_floor, self.f0_ceil)?;
        check_frame_period(self.frame_period)
    }
}

/// Estimates the F0 contour of `waveform` with Harvest.
pub fn harvest(waveform: &Waveform, options: &HarvestOptions) -> Result<F0Track> {
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

    let basic_f0 = basic_contour(waveform, options.f0_floor, options.f0_ceil)?;
    let last = basic_f0.len() - 1;
    let f0: Vec<f64> = positions
        .iter()
        .map(|t| basic_f0[(matlab_round(t * 1000.0).max(0) as usize).min(last)])
        .collect();
    debug!(
        "harvest: {} of {} frames voiced",
        f0.iter().filter(|&&f| f > 0.0).count(),
        frames
    );

    Ok(F0Track {
        f0,
        temporal_positions: positions,
    })
}

/// The smoothed contour on the 1 ms grid.
fn basic_contour(waveform: &Waveform, f0_floor: f64, f0_ceil: f64) -> Result<Vec<f64>> {
    let fs = waveform.fs();
    let x = &waveform.samples;
    let frames = frame_count(waveform.sample_rate, x.len(), BASIC_FRAME_PERIOD);
    let positions = temporal_positions(frames, BASIC_FRAME_PERIOD);

    let adjusted_floor = f0_floor * 0.9;
    let adjusted_ceil = f0_ceil * 1.1;
    let channels = 1 + ((adjusted_ceil / adjusted_floor).log2() * CHANNELS_IN_OCTAVE) as usize;
    let boundaries: Vec<f64> = (0..channels)
        .map(|i| adjusted_floor * 2f64.powf((i + 1) as f64 / CHANNELS_IN_OCTAVE))
        .collect();

    let ratio = matlab_round(fs / TARGET_FS).clamp(1, 12) as usize;
    let y_length = (x.len() as f64 / ratio as f64).ceil() as usize;
    let actual_fs = fs / ratio as f64;
    let fft_size = suitable_fft_size(y_length + 5 + 2 * (2.0 * actual_fs / boundaries[0]) as usize);
    info!(
        "harvest: {} samples at {} Hz, {} channels, decimation {}, fft {}",
        x.len(),
        waveform.sample_rate,
        channels,
        ratio,
        fft_size
    );

    let y = decimated_signal(x, ratio, fs, y_length)?;
    let spectrum = ForwardRealFft::new(fft_size).process(&y).to_vec();

    let raw: Vec<Vec<f64>> = boundaries
        .par_iter()
        .map_init(
            || BandPass::new(fft_size),
            |filter, &boundary| {
                let mut filtered = filter.process(&spectrum, actual_fs, boundary, y_length);
                raw_candidates(&mut filtered, actual_fs, boundary, &positions, f0_floor, f0_ceil)
            },
        )
        .collect();

    let official: Vec<Vec<f64>> = (0..frames).map(|i| official_candidates(&raw, i)).collect();
    let per_frame = official.iter().map(Vec::len).max().unwrap_or(0);
    if per_frame == 0 {
        return Ok(vec![0.0; frames]);
    }
    debug!("harvest: up to {} candidates per frame", per_frame);

    let spread = spread_candidates(&official, per_frame);
    let (mut candidates, mut scores): (Vec<Vec<f64>>, Vec<Vec<f64>>) = spread
        .par_iter()
        .zip(positions.par_iter())
        .map_init(HarmonicAnalyzer::new, |analyzer, (row, &position)| {
            let refined: (Vec<f64>, Vec<f64>) = row
                .iter()
                .map(|&c| refine_candidate(analyzer, &y, actual_fs, position, c, f0_floor, f0_ceil))
                .unzip();
            refined
        })
        .unzip();

    remove_unreliable(&mut candidates, &mut scores);
    let contour = fix_contour(&candidates, &scores);
    Ok(smooth_contour(&contour))
}

/// Decimates towards 8 kHz with edge-replicated padding, then removes the
/// mean.
fn decimated_signal(x: &[f64], ratio: usize, fs: f64, y_length: usize) -> Result<Vec<f64>> {
    let mut y = if ratio == 1 {
        x.to_vec()
    } else {
        let lag = (140.0 / ratio as f64).ceil() as usize * ratio;
        let first = x[0];
        let last = x[x.len() - 1];
        let mut padded = Vec::with_capacity(x.len() + lag * 2);
        padded.extend(std::iter::repeat(first).take(lag));
        padded.extend_from_slice(x);
        padded.extend(std::iter::repeat(last).take(lag));
        let decimated = decimate(&padded, ratio, fs)?;
        (0..y_length)
            .map(|i| decimated.get(lag / ratio + i).copied().unwrap_or(0.0))
            .collect()
    };
    y.resize(y_length, 0.0);
    let mean = y.iter().sum::<f64>() / y_length as f64;
    y.iter_mut().for_each(|v| *v -= mean);
    Ok(y)
}

/// Per-worker FFT convolution state.
struct BandPass {
    forward: ForwardRealFft,
    inverse: InverseRealFft,
    product: Vec<Complex<f64>>,
}

impl BandPass {
    fn new(fft_size: usize) -> Self {
        Self {
            forward: ForwardRealFft::new(fft_size),
            inverse: InverseRealFft::new(fft_size),
            product: vec![Complex::new(0.0, 0.0); fft_size / 2 + 1],
        }
    }

    /// Nuttall-windowed cosine at `boundary` spanning four periods, delay
    /// compensated.
    fn process(
        &mut self,
        spectrum: &[Complex<f64>],
        fs: f64,
        boundary: f64,
        y_length: usize,
    ) -> Vec<f64> {
        let half = matlab_round(fs / boundary * 2.0).max(1) as usize;
        let filter: Vec<f64> = nuttall_window(half * 2 + 1)
            .iter()
            .enumerate()
            .map(|(i, w)| w * (2.0 * PI * boundary * (i as f64 - half as f64) / fs).cos())
            .collect();
        let response = self.forward.process(&filter);
        for ((slot, a), b) in self.product.iter_mut().zip(spectrum).zip(response) {
            *slot = a * b;
        }
        let filtered = self.inverse.process(&self.product);
        (0..y_length)
            .map(|i| filtered.get(i + half).copied().unwrap_or(0.0))
            .collect()
    }
}

fn raw_candidates(
    filtered: &mut [f64],
    fs: f64,
    boundary: f64,
    positions: &[f64],
    f0_floor: f64,
    f0_ceil: f64,
) -> Vec<f64> {
    let frames = positions.len();
    let crossings = ZeroCrossings::from_signal(filtered, fs);
    if !crossings.is_usable() {
        return vec![0.0; frames];
    }
    let [a, b, c, d] = crossings.interpolate(positions);
    (0..frames)
        .map(|i| {
            let candidate = (a[i] + b[i] + c[i] + d[i]) / 4.0;
            if candidate > boundary * 1.1
                || candidate < boundary * 0.9
                || candidate > f0_ceil
                || candidate < f0_floor
            {
                0.0
            } else {
                candidate
            }
        })
        .collect()
}

/// Means of the runs of at least ten neighbouring channels that all found a
/// candidate in `frame`. The outermost channels never count.
fn official_candidates(raw: &[Vec<f64>], frame: usize) -> Vec<f64> {
    let channels = raw.len();
    let voiced = |j: usize| j != 0 && j + 1 != channels && raw[j][frame] > 0.0;
    let mut result = Vec::new();
    let mut start = 0;
    for j in 1..channels {
        match (voiced(j - 1), voiced(j)) {
            (false, true) => start = j,
            (true, false) if j - start >= MINIMUM_AGREEING_CHANNELS => {
                let sum: f64 = raw[start..j].iter().map(|band| band[frame]).sum();
                result.push(sum / (j - start) as f64);
            }
            _ => {}
        }
    }
    result
}

/// Fixed-width candidate rows: slot block 0 holds the frame's own
/// candidates, blocks 1..=3 those of the preceding frames and blocks 4..=6
/// those of the following frames.
fn spread_candidates(official: &[Vec<f64>], per_frame: usize) -> Vec<Vec<f64>> {
    let frames = official.len();
    let place = |row: &mut [f64], block: usize, source: &[f64]| {
        row[block * per_frame..block * per_frame + source.len()].copy_from_slice(source);
    };
    (0..frames)
        .map(|i| {
            let mut row = vec![0.0; per_frame * (SPREAD * 2 + 1)];
            place(&mut row, 0, &official[i]);
            for k in 1..=SPREAD {
                if i >= k {
                    place(&mut row, k, &official[i - k]);
                }
                if i + k < frames {
                    place(&mut row, k + SPREAD, &official[i + k]);
                }
            }
            row
        })
        .collect()
}

/// Refined frequency and reliability score of one candidate, `(0, 0)` when
/// it is rejected.
fn refine_candidate(
    analyzer: &mut HarmonicAnalyzer,
    y: &[f64],
    fs: f64,
    position: f64,
    candidate: f64,
    f0_floor: f64,
    f0_ceil: f64,
) -> (f64, f64) {
    if candidate <= 0.0 {
        return (0.0, 0.0);
    }
    let count = ((fs / 2.0 / candidate) as usize).clamp(1, MAXIMUM_HARMONICS);
    let harmonics = analyzer.analyze(y, fs, position, candidate, count, false);

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    let mut total_amplitude = 0.0;
    let mut deviation = 0.0;
    for (i, harmonic) in harmonics.iter().enumerate() {
        let order = (i + 1) as f64;
        numerator += harmonic.amplitude * harmonic.frequency;
        denominator += harmonic.amplitude * order;
        total_amplitude += harmonic.amplitude;
        deviation +=
            harmonic.amplitude * (harmonic.frequency / order - candidate).abs() / candidate;
    }
    let refined = numerator / (denominator + SAFE_GUARD_MINIMUM);
    let score = 1.0 / (deviation / (total_amplitude + SAFE_GUARD_MINIMUM) + SAFE_GUARD_MINIMUM);

    if !refined.is_finite() || refined > f0_ceil || refined < f0_floor || score < MINIMUM_SCORE {
        (0.0, 0.0)
    } else {
        (refined, score)
    }
}

/// Smallest relative distance from `reference` to any of `candidates`,
/// capped at 1.
fn nearest_relative_error(reference: f64, candidates: &[f64]) -> f64 {
    candidates
        .iter()
        .map(|c| (reference - c).abs() / reference)
        .fold(1.0, f64::min)
}

/// Drops candidates with no close neighbour in either adjacent frame.
fn remove_unreliable(candidates: &mut [Vec<f64>], scores: &mut [Vec<f64>]) {
    let frames = candidates.len();
    if frames < 3 {
        return;
    }
    let original = candidates.to_vec();
    for i in 1..frames - 1 {
        for (j, &reference) in original[i].iter().enumerate() {
            if reference == 0.0 {
                continue;
            }
            let error = nearest_relative_error(reference, &original[i + 1])
                .min(nearest_relative_error(reference, &original[i - 1]));
            if error > RELIABILITY_RANGE {
                candidates[i][j] = 0.0;
                scores[i][j] = 0.0;
            }
        }
    }
}

fn fix_contour(candidates: &[Vec<f64>], scores: &[Vec<f64>]) -> Vec<f64> {
    let base: Vec<f64> = candidates
        .iter()
        .zip(scores)
        .map(|(row, row_scores)| {
            let mut best = 0.0;
            let mut best_score = 0.0;
            for (&candidate, &score) in row.iter().zip(row_scores) {
                if score > best_score {
                    best_score = score;
                    best = candidate;
                }
            }
            best
        })
        .collect();

    let step1 = remove_jumps(&base);
    let step2 = remove_short_sections(&step1);
    let step3 = extend_sections(&step2, candidates, scores);
    fill_gaps(&step3)
}

/// Inclusive `(start, end)` of every voiced run; the first and last frame
/// are treated as unvoiced.
fn voiced_sections(f0: &[f64]) -> Vec<(usize, usize)> {
    let len = f0.len();
    let voiced = |i: usize| i != 0 && i + 1 != len && f0[i] > 0.0;
    let mut sections = Vec::new();
    let mut start = 0;
    for i in 1..len {
        match (voiced(i - 1), voiced(i)) {
            (false, true) => start = i,
            (true, false) => sections.push((start, i - 1)),
            _ => {}
        }
    }
    sections
}

/// Keeps a frame when it continues either the linear trend of the two
/// previous frames or the previous frame itself.
fn remove_jumps(f0: &[f64]) -> Vec<f64> {
    let mut fixed = vec![0.0; f0.len()];
    for i in 2..f0.len() {
        if f0[i] == 0.0 {
            continue;
        }
        let reference = f0[i - 1] * 2.0 - f0[i - 2];
        let off_trend = ((f0[i] - reference) / reference).abs() > JUMP_RANGE;
        let off_previous = ((f0[i] - f0[i - 1]) / f0[i - 1]).abs() > JUMP_RANGE;
        if !(off_trend && off_previous) {
            fixed[i] = f0[i];
        }
    }
    fixed
}

fn remove_short_sections(f0: &[f64]) -> Vec<f64> {
    let mut fixed = f0.to_vec();
    for (start, end) in voiced_sections(f0) {
        if end - start < MINIMUM_SECTION_FRAMES {
            fixed[start..=end].iter_mut().for_each(|v| *v = 0.0);
        }
    }
    fixed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// One voiced section on its own full-length contour.
struct Section {
    start: usize,
    end: usize,
    contour: Vec<f64>,
}

/// Follows the candidates from `origin` towards `limit` while they stay
/// within the extension range of the last accepted value. Returns the last
/// accepted frame.
fn extend(
    contour: &mut [f64],
    candidates: &[Vec<f64>],
    origin: usize,
    limit: usize,
    direction: Direction,
) -> usize {
    let mut current = contour[origin];
    let mut reached = origin;
    let mut misses = 0;
    let distance = origin.abs_diff(limit);
    for step in 1..=distance {
        let next = match direction {
            Direction::Forward => origin + step,
            Direction::Backward => origin - step,
        };
        let best = select_best_f0(current, &candidates[next], EXTENSION_RANGE);
        contour[next] = best;
        if best == 0.0 {
            misses += 1;
            if misses == EXTENSION_MISSES {
                break;
            }
        } else {
            current = best;
            misses = 0;
            reached = next;
        }
    }
    reached
}

/// Candidate with the smallest relative distance to `reference`, 0 when none
/// is within `allowed_range`.
fn select_best_f0(reference: f64, candidates: &[f64], allowed_range: f64) -> f64 {
    let mut best = 0.0;
    let mut best_error = allowed_range;
    for &candidate in candidates {
        let error = (reference - candidate).abs() / reference;
        if error <= best_error {
            best_error = error;
            best = candidate;
        }
    }
    best
}

/// Grows every section along the candidates, drops those too short for
/// their own pitch and merges the survivors.
fn extend_sections(f0: &[f64], candidates: &[Vec<f64>], scores: &[Vec<f64>]) -> Vec<f64> {
    let len = f0.len();
    let mut sections: Vec<Section> = voiced_sections(f0)
        .into_iter()
        .filter_map(|(start, end)| {
            let mut contour = vec![0.0; len];
            contour[start..=end].copy_from_slice(&f0[start..=end]);
            let end = extend(
                &mut contour,
                candidates,
                end,
                (end + MAXIMUM_EXTENSION).min(len - 2),
                Direction::Forward,
            );
            let start = extend(
                &mut contour,
                candidates,
                start,
                start.saturating_sub(MAXIMUM_EXTENSION).max(1),
                Direction::Backward,
            );
            if end <= start {
                return None;
            }
            let mean = contour[start..end].iter().sum::<f64>() / (end - start) as f64;
            let long_enough = MINIMUM_SECTION_PERIODS / mean < (end - start) as f64;
            (mean > 0.0 && long_enough).then_some(Section {
                start,
                end,
                contour,
            })
        })
        .collect();

    if sections.is_empty() {
        return f0.to_vec();
    }
    sections.sort_by_key(|section| section.start);
    merge_sections(&sections, candidates, scores)
}

fn merge_sections(sections: &[Section], candidates: &[Vec<f64>], scores: &[Vec<f64>]) -> Vec<f64> {
    let mut merged = sections[0].contour.clone();
    let mut current_start = sections[0].start;
    let mut current_end = sections[0].end;
    for section in &sections[1..] {
        if section.start > current_end {
            merged[section.start..=section.end]
                .copy_from_slice(&section.contour[section.start..=section.end]);
            current_start = section.start;
            current_end = section.end;
        } else if current_start > section.start || current_end < section.end {
            let overlap = section.start..=current_end;
            let kept: f64 = overlap
                .clone()
                .map(|i| candidate_score(merged[i], &candidates[i], &scores[i]))
                .sum();
            let incoming: f64 = overlap
                .map(|i| candidate_score(section.contour[i], &candidates[i], &scores[i]))
                .sum();
            let from = if kept > incoming { current_end } else { section.start };
            merged[from..=section.end].copy_from_slice(&section.contour[from..=section.end]);
            current_end = section.end;
        }
    }
    merged
}

/// Score of the candidate equal to `f0`, 0 when none matches.
fn candidate_score(f0: f64, candidates: &[f64], scores: &[f64]) -> f64 {
    candidates
        .iter()
        .zip(scores)
        .filter(|(candidate, _)| **candidate == f0)
        .map(|(_, &score)| score)
        .fold(0.0, f64::max)
}

/// Bridges unvoiced gaps shorter than nine frames linearly.
fn fill_gaps(f0: &[f64]) -> Vec<f64> {
    let mut fixed = f0.to_vec();
    for pair in voiced_sections(f0).windows(2) {
        let (_, end) = pair[0];
        let (next_start, _) = pair[1];
        let distance = next_start - end - 1;
        if distance >= MAXIMUM_GAP {
            continue;
        }
        let from = f0[end] + 1.0;
        let to = f0[next_start] - 1.0;
        let slope = (to - from) / (distance + 1) as f64;
        for (k, slot) in fixed[end + 1..next_start].iter_mut().enumerate() {
            *slot = from + slope * (k + 1) as f64;
        }
    }
    fixed
}

/// Zero-lag low-pass of each voiced section, with the section's edge values
/// held outside it.
fn smooth_contour(f0: &[f64]) -> Vec<f64> {
    let len = f0.len();
    let mut padded = vec![0.0; len + SMOOTHING_PAD * 2];
    padded[SMOOTHING_PAD..SMOOTHING_PAD + len].copy_from_slice(f0);

    let mut smoothed = vec![0.0; padded.len()];
    let mut scratch = vec![0.0; padded.len()];
    for (start, end) in voiced_sections(&padded) {
        for (i, slot) in scratch.iter_mut().enumerate() {
            *slot = padded[i.clamp(start, end)];
        }
        smooth_f0(&mut scratch);
        smoothed[start..=end].copy_from_slice(&scratch[start..=end]);
    }
    smoothed[SMOOTHING_PAD..SMOOTHING_PAD + len].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VocoderError;

    fn sine(freq: f64, fs: u32, seconds: f64) -> Waveform {
        let len = (fs as f64 * seconds) as usize;
        let samples = (0..len)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f64 / fs as f64).sin())
            .collect();
        Waveform::new(samples, fs).unwrap()
    }

    #[test]
    fn test_voiced_sections_ignore_ends() {
        let f0 = [100.0, 100.0, 0.0, 120.0, 121.0, 0.0, 130.0];
        assert_eq!(voiced_sections(&f0), vec![(1, 1), (3, 4)]);
    }

    #[test]
    fn test_remove_jumps_drops_section_onset() {
        let mut f0 = vec![0.0; 10];
        f0[3..9].iter_mut().for_each(|v| *v = 200.0);
        f0[6] = 260.0;
        let fixed = remove_jumps(&f0);
        assert_eq!(fixed[3], 0.0);
        assert_eq!(fixed[4], 200.0);
        assert_eq!(fixed[6], 0.0);
    }

    #[test]
    fn test_fill_gaps_bridges_short_gaps() {
        let mut f0 = vec![0.0; 30];
        f0[2..10].iter_mut().for_each(|v| *v = 100.0);
        f0[14..20].iter_mut().for_each(|v| *v = 105.0);
        let filled = fill_gaps(&f0);
        assert!(filled[10..14].iter().all(|&v| v > 100.0 && v < 105.0));
        assert_eq!(filled[21], 0.0);
    }

    #[test]
    fn test_select_best_f0() {
        assert_eq!(select_best_f0(100.0, &[0.0, 150.0, 104.0, 110.0], 0.18), 104.0);
        assert_eq!(select_best_f0(100.0, &[0.0, 150.0], 0.18), 0.0);
    }

    #[test]
    fn test_harvest_tracks_sine() {
        let waveform = sine(180.0, 16000, 0.6);
        let track = harvest(&waveform, &HarvestOptions::default()).unwrap();
        assert_eq!(track.len(), frame_count(16000, waveform.len(), 5.0));
        let interior = &track.f0[20..track.len() - 20];
        assert!(interior.iter().all(|&f| (f - 180.0).abs() < 2.0), "{:?}", interior);
    }

    #[test]
    fn test_harvest_high_sine() {
        let waveform = sine(1000.0, 16000, 0.5);
        let options = HarvestOptions::default().with_f0_range(500.0, 1200.0);
        let track = harvest(&waveform, &options).unwrap();
        let interior = &track.f0[20..track.len() - 20];
        assert!(interior.iter().all(|&f| (f - 1000.0).abs() < 10.0), "{:?}", interior);
    }

    #[test]
    fn test_harvest_silence_is_unvoiced() {
        let waveform = Waveform::new(vec![0.0; 16000], 16000).unwrap();
        let track = harvest(&waveform, &HarvestOptions::default()).unwrap();
        assert_eq!(track.len(), 201);
        assert!(track.f0.iter().all(|&f| f == 0.0));
    }

    #[test]
    fn test_harvest_frame_period_grid() {
        let waveform = sine(150.0, 22050, 0.3);
        let options = HarvestOptions::default().with_frame_period(2.0);
        let track = harvest(&waveform, &options).unwrap();
        assert_eq!(track.len(), frame_count(22050, waveform.len(), 2.0));
        assert!((track.temporal_positions[10] - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_harvest_empty_and_invalid() {
        let empty = Waveform::new(Vec::new(), 16000).unwrap();
        assert!(harvest(&empty, &HarvestOptions::default()).unwrap().is_empty());
        let waveform = sine(150.0, 16000, 0.1);
        let options = HarvestOptions::default().with_f0_range(0.0, 800.0);
        let err = harvest(&waveform, &options).unwrap_err();
        assert!(matches!(err, VocoderError::InvalidParameter { name: "f0_floor", .. }));
    }
}
