//! D4C: band aperiodicity from the static group delay.
//!
//! Voiced frames are analysed with two windows a quarter period before and
//! after the frame centre. The static group delay is the power-normalised
//! centroid spectrum, flattened by subtracting its own smoothing at `f0`. For
//! every 3 kHz sub-band the spread of the group-delay power gives the
//! aperiodicity in dB.

use log::{debug, info};
use rayon::prelude::*;

use super::codec::number_of_aperiodicities;
use super::{
    windowed_segment, F0Track, Waveform, WindowKind, FLOOR_F0_D4C, SAFE_GUARD_MINIMUM, THRESHOLD,
};
use crate::error::{check_fft_size, check_sample_rate, Result, VocoderError};
use crate::fft::ForwardRealFft;
use crate::matrix::FrameMatrix;
use crate::rng::{create_rng, domain};
use crate::util::{dc_correction, interp1, linear_smoothing, nuttall_window};

/// Band spacing in Hz.
pub(crate) const FREQUENCY_INTERVAL: f64 = 3000.0;
/// Highest band centre in Hz.
pub(crate) const UPPER_LIMIT: f64 = 15000.0;
/// Aperiodicity assumed at 0 Hz, in dB.
const LOWEST_APERIODICITY: f64 = -60.0;
const LOVE_TRAIN_FLOOR: f64 = 40.0;
const LOVE_TRAIN_BOUNDARIES: [f64; 3] = [100.0, 4000.0, 7900.0];

#[derive(Debug, Clone, PartialEq)]
pub struct D4cOptions {
    /// Must match the spectral envelope's FFT length.
    pub fft_size: usize,
    /// Voicing score at or below which a voiced frame is treated as
    /// aperiodic. 0 disables the check.
    pub threshold: f64,
}

impl Default for D4cOptions {
    /// FFT length of the default envelope analysis at 44.1 kHz.
    fn default() -> Self {
        Self {
            fft_size: 2048,
            threshold: THRESHOLD,
        }
    }
}

impl D4cOptions {
    pub fn new(fft_size: usize) -> Self {
        Self {
            fft_size,
            ..Self::default()
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    fn validate(&self) -> Result<()> {
        check_fft_size(self.fft_size)?;
        if !(self.threshold.is_finite() && self.threshold >= 0.0) {
            return Err(VocoderError::invalid_param(
                "threshold",
                format!("must be non-negative, got {}", self.threshold),
            ));
        }
        Ok(())
    }
}

/// Estimates the aperiodicity of every frame of `track`. Unvoiced frames
/// are `1 - 1e-12` everywhere.
pub fn d4c(waveform: &Waveform, track: &F0Track, options: &D4cOptions) -> Result<FrameMatrix> {
    check_sample_rate(waveform.sample_rate)?;
    track.validate_for(waveform.sample_rate)?;
    options.validate()?;

    let bins = options.fft_size / 2 + 1;
    let mut aperiodicity = FrameMatrix::filled(track.len(), bins, 1.0 - SAFE_GUARD_MINIMUM);
    if track.is_empty() {
        return Ok(aperiodicity);
    }

    let fs = waveform.fs();
    let analysis = BandAnalysis::new(waveform.sample_rate, options.fft_size);
    info!(
        "d4c: {} frames, {} bands, fft {} (internal {})",
        track.len(),
        analysis.bands,
        options.fft_size,
        analysis.fft_size
    );

    let x = &waveform.samples;
    let threshold = options.threshold;
    let processed: usize = aperiodicity
        .par_rows_mut()
        .enumerate()
        .map_init(
            || analysis.workspace(),
            |workspace, (i, row)| {
                let f0 = track.f0[i];
                if f0 <= 0.0 {
                    return 0;
                }
                let position = track.temporal_positions[i];
                let mut rng = create_rng(domain::D4C, i);
                if threshold > 0.0 {
                    let score = workspace.love_train(x, fs, f0, position, &mut rng);
                    if score <= threshold {
                        return 0;
                    }
                }
                analysis.estimate(workspace, x, f0.max(FLOOR_F0_D4C), position, &mut rng, row);
                1
            },
        )
        .sum();
    debug!("d4c: {} of {} frames analysed as voiced", processed, track.len());
    Ok(aperiodicity)
}

/// Frame-independent setup shared by all workers.
struct BandAnalysis {
    sample_rate: f64,
    fft_size: usize,
    output_fft_size: usize,
    bands: usize,
    window: Vec<f64>,
    coarse_axis: Vec<f64>,
    love_train_fft_size: usize,
}

impl BandAnalysis {
    fn new(sample_rate: u32, output_fft_size: usize) -> Self {
        let fs = sample_rate as f64;
        let fft_size = 1usize << (1 + (4.0 * fs / FLOOR_F0_D4C + 1.0).log2() as u32);
        let bands = number_of_aperiodicities(sample_rate);
        let window_length = (FREQUENCY_INTERVAL * fft_size as f64 / fs) as usize * 2 + 1;

        let mut coarse_axis = Vec::with_capacity(bands + 2);
        coarse_axis.push(0.0);
        coarse_axis.extend((1..=bands).map(|i| FREQUENCY_INTERVAL * i as f64));
        coarse_axis.push(fs / 2.0);

        Self {
            sample_rate: fs,
            fft_size,
            output_fft_size,
            bands,
            window: nuttall_window(window_length),
            coarse_axis,
            love_train_fft_size: 1usize << (1 + (3.0 * fs / LOVE_TRAIN_FLOOR + 1.0).log2() as u32),
        }
    }

    fn workspace(&self) -> Workspace {
        Workspace {
            fft_size: self.fft_size,
            forward: ForwardRealFft::new(self.fft_size),
            love_train: ForwardRealFft::new(self.love_train_fft_size),
            segment: vec![0.0; self.fft_size.max(self.love_train_fft_size)],
            weighted: vec![0.0; self.fft_size],
        }
    }

    fn estimate<R: rand::Rng>(
        &self,
        workspace: &mut Workspace,
        x: &[f64],
        f0: f64,
        position: f64,
        rng: &mut R,
        out: &mut [f64],
    ) {
        let fs = self.sample_rate;
        let group_delay = workspace.static_group_delay(x, fs, f0, position, rng);

        let mut coarse = Vec::with_capacity(self.bands + 2);
        coarse.push(LOWEST_APERIODICITY);
        for band in 0..self.bands {
            let value = workspace.band_aperiodicity(&group_delay, fs, band, &self.window);
            coarse.push((value + (f0 - 100.0) / 50.0).min(0.0));
        }
        coarse.push(-SAFE_GUARD_MINIMUM);

        let axis: Vec<f64> = (0..out.len())
            .map(|i| i as f64 * fs / self.output_fft_size as f64)
            .collect();
        for (slot, db) in out.iter_mut().zip(interp1(&self.coarse_axis, &coarse, &axis)) {
            *slot = 10f64.powf(db / 20.0);
        }
    }
}

struct Workspace {
    fft_size: usize,
    forward: ForwardRealFft,
    love_train: ForwardRealFft,
    segment: Vec<f64>,
    weighted: Vec<f64>,
}

impl Workspace {
    /// Ratio of the power between 100 Hz and 4 kHz to the power between
    /// 100 Hz and 7.9 kHz.
    fn love_train<R: rand::Rng>(
        &mut self,
        x: &[f64],
        fs: f64,
        f0: f64,
        position: f64,
        rng: &mut R,
    ) -> f64 {
        let fft_size = self.love_train.size();
        let half = fft_size / 2;
        let current_f0 = f0.max(LOVE_TRAIN_FLOOR);
        let buffer = &mut self.segment[..fft_size];
        windowed_segment(x, fs, current_f0, position, WindowKind::Blackman, 3.0, rng, buffer);

        let [low, middle, high] =
            LOVE_TRAIN_BOUNDARIES.map(|f| ((f * fft_size as f64 / fs).ceil() as usize).min(half));
        let mut power: Vec<f64> =
            self.love_train.process(buffer).iter().map(|b| b.norm_sqr()).collect();
        power[..=low].iter_mut().for_each(|p| *p = 0.0);
        for i in low + 1..=high {
            power[i] += power[i - 1];
        }
        let score = power[middle] / power[high];
        if score.is_finite() {
            score
        } else {
            0.0
        }
    }

    /// Group delay flattened by its own f0-wide smoothing.
    fn static_group_delay<R: rand::Rng>(
        &mut self,
        x: &[f64],
        fs: f64,
        f0: f64,
        position: f64,
        rng: &mut R,
    ) -> Vec<f64> {
        let fft_size = self.fft_size;
        let mut centroid = self.centroid(x, fs, f0, position - 0.25 / f0, rng);
        let later = self.centroid(x, fs, f0, position + 0.25 / f0, rng);
        for (c, l) in centroid.iter_mut().zip(&later) {
            *c += l;
        }
        dc_correction(&mut centroid, f0, fs, fft_size);

        let power = self.smoothed_power(x, fs, f0, position, rng);
        let group_delay: Vec<f64> = centroid.iter().zip(&power).map(|(c, p)| c / p).collect();
        let group_delay = linear_smoothing(&group_delay, f0 / 2.0, fs, fft_size);
        let trend = linear_smoothing(&group_delay, f0, fs, fft_size);
        group_delay.iter().zip(&trend).map(|(g, t)| g - t).collect()
    }

    /// `Re(X conj(X_t))`, where `X_t` is the spectrum of the time-weighted
    /// segment.
    fn centroid<R: rand::Rng>(
        &mut self,
        x: &[f64],
        fs: f64,
        f0: f64,
        position: f64,
        rng: &mut R,
    ) -> Vec<f64> {
        let segment = &mut self.segment[..self.fft_size];
        let (len, _) =
            windowed_segment(x, fs, f0, position, WindowKind::Blackman, 4.0, rng, segment);
        let norm = segment[..len].iter().map(|v| v * v).sum::<f64>().sqrt().max(f64::EPSILON);
        segment[..len].iter_mut().for_each(|v| *v /= norm);
        for (i, (slot, v)) in self.weighted.iter_mut().zip(segment.iter()).enumerate() {
            *slot = v * (i + 1) as f64;
        }

        let main = self.forward.process(segment).to_vec();
        let weighted = self.forward.process(&self.weighted);
        main.iter()
            .zip(weighted)
            .map(|(m, w)| m.re * w.re + m.im * w.im)
            .collect()
    }

    fn smoothed_power<R: rand::Rng>(
        &mut self,
        x: &[f64],
        fs: f64,
        f0: f64,
        position: f64,
        rng: &mut R,
    ) -> Vec<f64> {
        let segment = &mut self.segment[..self.fft_size];
        windowed_segment(x, fs, f0, position, WindowKind::Hanning, 4.0, rng, segment);
        let mut power: Vec<f64> =
            self.forward.process(segment).iter().map(|b| b.norm_sqr()).collect();
        dc_correction(&mut power, f0, fs, self.fft_size);
        linear_smoothing(&power, f0, fs, self.fft_size)
    }

    /// Aperiodicity of sub-band `band` in dB: how much of the group-delay
    /// power lies outside its strongest components.
    fn band_aperiodicity(
        &mut self,
        group_delay: &[f64],
        fs: f64,
        band: usize,
        window: &[f64],
    ) -> f64 {
        let fft_size = self.fft_size;
        let half = fft_size / 2;
        let window_length = window.len();
        let boundary = (fft_size as f64 * 8.0 / window_length as f64).round() as usize;
        let center = (FREQUENCY_INTERVAL * (band + 1) as f64 * fft_size as f64 / fs) as usize;
        let half_window = window_length / 2;

        let segment = &mut self.segment[..fft_size];
        segment.iter_mut().for_each(|v| *v = 0.0);
        for (j, (slot, w)) in segment.iter_mut().zip(window).enumerate() {
            let index = (center + j).checked_sub(half_window);
            *slot = index.and_then(|k| group_delay.get(k)).copied().unwrap_or(0.0) * w;
        }

        let mut power: Vec<f64> =
            self.forward.process(segment).iter().map(|b| b.norm_sqr()).collect();
        power.sort_by(|a, b| a.total_cmp(b));
        for i in 1..power.len() {
            power[i] += power[i - 1];
        }
        let lower = half.saturating_sub(boundary + 1);
        10.0 * (power[lower] / power[half]).log10()
    }
}
