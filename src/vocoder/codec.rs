use std::f64::consts::PI;

use super::d4c::{FREQUENCY_INTERVAL, UPPER_LIMIT};
use super::SAFE_GUARD_MINIMUM;
use crate::error::{check_fft_size, check_sample_rate, Result, VocoderError};
use crate::matrix::FrameMatrix;
use crate::util::{interp1, interp1_uniform};

const FLOOR_FREQUENCY: f64 = 40.0;
const CEIL_FREQUENCY: f64 = 20000.0;
/// Frames whose mean band aperiodicity exceeds this (dB) decode as
/// unvoiced.
const UNVOICED_BAND_MEAN: f64 = -0.5;
const LOWEST_APERIODICITY: f64 = -60.0;

/// Number of 3 kHz bands carried by the band aperiodicity at `sample_rate`.
pub fn number_of_aperiodicities(sample_rate: u32) -> usize {
    let limit = UPPER_LIMIT.min(sample_rate as f64 / 2.0 - FREQUENCY_INTERVAL);
    (limit / FREQUENCY_INTERVAL).max(0.0) as usize
}

fn fft_size_from_bins(bins: usize) -> Result<usize> {
    let fft_size = bins.saturating_sub(1) * 2;
    check_fft_size(fft_size)?;
    Ok(fft_size)
}

/// Aperiodicity in dB sampled at every 3 kHz band centre.
pub fn code_aperiodicity(aperiodicity: &FrameMatrix, sample_rate: u32) -> Result<FrameMatrix> {
    check_sample_rate(sample_rate)?;
    let fft_size = fft_size_from_bins(aperiodicity.num_cols())?;
    let bands = number_of_aperiodicities(sample_rate);
    let axis: Vec<f64> = (1..=bands).map(|i| FREQUENCY_INTERVAL * i as f64).collect();
    let step = sample_rate as f64 / fft_size as f64;

    let rows = aperiodicity
        .rows()
        .map(|row| {
            let db: Vec<f64> = row
                .iter()
                .map(|a| 20.0 * a.max(SAFE_GUARD_MINIMUM).log10())
                .collect();
            interp1_uniform(0.0, step, &db, &axis)
        })
        .collect();
    FrameMatrix::from_rows(rows, bands)
}

/// Full-resolution aperiodicity from band values.
pub fn decode_aperiodicity(
    coded: &FrameMatrix,
    sample_rate: u32,
    fft_size: usize,
) -> Result<FrameMatrix> {
    check_sample_rate(sample_rate)?;
    check_fft_size(fft_size)?;
    let bands = number_of_aperiodicities(sample_rate);
    if coded.num_cols() != bands {
        return Err(VocoderError::invalid_length("band aperiodicity", bands, coded.num_cols()));
    }

    let fs = sample_rate as f64;
    let bins = fft_size / 2 + 1;
    let mut coarse_axis = Vec::with_capacity(bands + 2);
    coarse_axis.push(0.0);
    coarse_axis.extend((1..=bands).map(|i| FREQUENCY_INTERVAL * i as f64));
    coarse_axis.push(fs / 2.0);
    let axis: Vec<f64> = (0..bins).map(|i| i as f64 * fs / fft_size as f64).collect();

    let mut aperiodicity = FrameMatrix::filled(coded.num_rows(), bins, 1.0 - SAFE_GUARD_MINIMUM);
    for (out, band_values) in aperiodicity.rows_mut().zip(coded.rows()) {
        if bands > 0 && band_values.iter().sum::<f64>() / bands as f64 > UNVOICED_BAND_MEAN {
            continue;
        }
        let mut coarse = Vec::with_capacity(bands + 2);
        coarse.push(LOWEST_APERIODICITY);
        coarse.extend_from_slice(band_values);
        coarse.push(-SAFE_GUARD_MINIMUM);
        for (slot, db) in out.iter_mut().zip(interp1(&coarse_axis, &coarse, &axis)) {
            *slot = 10f64.powf(db / 20.0);
        }
    }
    Ok(aperiodicity)
}

fn frequency_to_mel(frequency: f64) -> f64 {
    1127.01048 * (frequency / 700.0 + 1.0).ln()
}

fn mel_to_frequency(mel: f64) -> f64 {
    700.0 * ((mel / 1127.01048).exp() - 1.0)
}

/// `dims` points at the centres of equal divisions of the mel axis between
/// 40 Hz and `min(20 kHz, fs / 2)`.
struct MelAxis {
    floor: f64,
    step: f64,
    dims: usize,
}

impl MelAxis {
    fn new(sample_rate: u32, dims: usize) -> Self {
        let floor = frequency_to_mel(FLOOR_FREQUENCY);
        let ceil = frequency_to_mel(CEIL_FREQUENCY.min(sample_rate as f64 / 2.0));
        Self {
            floor,
            step: (ceil - floor) / dims as f64,
            dims,
        }
    }

    fn mel(&self, index: usize) -> f64 {
        self.floor + (index as f64 + 0.5) * self.step
    }

    fn frequencies(&self) -> Vec<f64> {
        (0..self.dims).map(|i| mel_to_frequency(self.mel(i))).collect()
    }
}

/// Orthonormal DCT-II.
fn dct(input: &[f64]) -> Vec<f64> {
    let n = input.len() as f64;
    (0..input.len())
        .map(|k| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            scale
                * input
                    .iter()
                    .enumerate()
                    .map(|(i, x)| x * (PI / n * (i as f64 + 0.5) * k as f64).cos())
                    .sum::<f64>()
        })
        .collect()
}

/// Inverse of [`dct`].
fn idct(input: &[f64]) -> Vec<f64> {
    let n = input.len() as f64;
    (0..input.len())
        .map(|i| {
            input
                .iter()
                .enumerate()
                .map(|(k, x)| {
                    let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
                    scale * x * (PI / n * (i as f64 + 0.5) * k as f64).cos()
                })
                .sum()
        })
        .collect()
}

fn check_dims(dims: usize, fft_size: usize) -> Result<()> {
    if dims == 0 || dims > fft_size / 2 {
        return Err(VocoderError::invalid_param(
            "dims",
            format!("must be in 1..={}, got {}", fft_size / 2, dims),
        ));
    }
    Ok(())
}

/// Mel-cepstral coding: the log envelope resampled on a mel axis and
/// transformed with an orthonormal DCT-II.
pub fn code_spectral_envelope(
    spectrogram: &FrameMatrix,
    sample_rate: u32,
    dims: usize,
) -> Result<FrameMatrix> {
    check_sample_rate(sample_rate)?;
    let fft_size = fft_size_from_bins(spectrogram.num_cols())?;
    check_dims(dims, fft_size)?;

    let query = MelAxis::new(sample_rate, dims).frequencies();
    let step = sample_rate as f64 / fft_size as f64;
    let rows = spectrogram
        .rows()
        .map(|row| {
            let log_spectrum: Vec<f64> =
                row.iter().map(|p| p.max(SAFE_GUARD_MINIMUM).ln()).collect();
            dct(&interp1_uniform(0.0, step, &log_spectrum, &query))
        })
        .collect();
    FrameMatrix::from_rows(rows, dims)
}

/// Inverse of [`code_spectral_envelope`] onto `fft_size / 2 + 1` bins.
pub fn decode_spectral_envelope(
    coded: &FrameMatrix,
    sample_rate: u32,
    fft_size: usize,
) -> Result<FrameMatrix> {
    check_sample_rate(sample_rate)?;
    check_fft_size(fft_size)?;
    let dims = coded.num_cols();
    check_dims(dims, fft_size)?;

    let axis = MelAxis::new(sample_rate, dims);
    let bins = fft_size / 2 + 1;
    let bin_mels: Vec<f64> = (0..bins)
        .map(|i| frequency_to_mel(i as f64 * sample_rate as f64 / fft_size as f64))
        .collect();

    let rows = coded
        .rows()
        .map(|row| {
            let log_spectrum = idct(row);
            interp1_uniform(axis.mel(0), axis.step, &log_spectrum, &bin_mels)
                .into_iter()
                .map(f64::exp)
                .collect()
        })
        .collect();
    FrameMatrix::from_rows(rows, bins)
}
