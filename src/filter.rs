use biquad::{Biquad, Coefficients, DirectForm1, Type};

use crate::error::{Result, VocoderError};

/// Samples of odd-reflection padding on each side before decimating.
const DECIMATE_PAD: usize = 9;

/// Q of the two second-order sections of a 4th-order Butterworth low-pass.
const BUTTERWORTH_Q: [f64; 2] = [0.541_196_100_146_197, 1.306_562_964_876_376_6];

/// Second-order low-pass (about 20 Hz at a 1 kHz contour rate) applied to
/// voiced F0 sections.
const F0_SMOOTHER: Coefficients<f64> = Coefficients {
    a1: -1.734_725_768_809_275_4,
    a2: 0.766_006_600_943_264_1,
    b0: 0.007_820_208_033_497_172,
    b1: 0.015_640_416_066_994_345,
    b2: 0.007_820_208_033_497_172,
};

pub fn forward_backward_filter<F: Biquad<f64>>(signal: &mut [f64], filter: &mut F) {
    signal.iter_mut().for_each(|x| *x = filter.run(*x));
    filter.reset_state();
    signal.reverse();
    signal.iter_mut().for_each(|x| *x = filter.run(*x));
    filter.reset_state();
    signal.reverse();
}

/// Designs a second-order section with its cutoff at `freq` Hz.
///
/// The cutoff is normalised against Nyquist here; `Coefficients::from_params`
/// divides by twice the sample rate instead, which lands a quarter too low.
pub fn make_coefficients(
    f_type: Type<f64>,
    fs: f64,
    freq: f64,
    q: f64,
) -> Result<Coefficients<f64>> {
    if !(freq > 0.0 && 2.0 * freq < fs) {
        return Err(VocoderError::invalid_param(
            "cutoff",
            format!("{} Hz is outside (0, {}) for fs {}", freq, fs / 2.0, fs),
        ));
    }
    Coefficients::<f64>::from_normalized_params(f_type, 2.0 * freq / fs, q).map_err(|e| {
        VocoderError::invalid_param(
            "cutoff",
            format!("cannot design filter at {} Hz for fs {}: {:?}", freq, fs, e),
        )
    })
}

/// Zero-phase low-pass and downsample by `ratio`.
///
/// Returns `(len - 1) / ratio + 1` samples aligned so that the last input
/// sample is kept.
pub fn decimate(x: &[f64], ratio: usize, fs: f64) -> Result<Vec<f64>> {
    if ratio <= 1 || x.is_empty() {
        return Ok(x.to_vec());
    }
    let n = x.len();

    let mut padded = Vec::with_capacity(n + DECIMATE_PAD * 2);
    for i in 0..DECIMATE_PAD {
        padded.push(2.0 * x[0] - x[(DECIMATE_PAD - i).min(n - 1)]);
    }
    padded.extend_from_slice(x);
    for i in 0..DECIMATE_PAD {
        padded.push(2.0 * x[n - 1] - x[n.saturating_sub(2 + i)]);
    }

    let cutoff = 0.8 * fs / ratio as f64 / 2.0;
    for q in BUTTERWORTH_Q {
        let mut section = DirectForm1::<f64>::new(make_coefficients(Type::LowPass, fs, cutoff, q)?);
        forward_backward_filter(&mut padded, &mut section);
    }

    let output_len = (n - 1) / ratio + 1;
    let first = ratio + n - ratio * output_len;
    Ok((first..n + DECIMATE_PAD)
        .step_by(ratio)
        .take(output_len)
        .map(|i| padded[i + DECIMATE_PAD - 1])
        .collect())
}

/// Zero-lag smoothing of an F0 contour sampled every millisecond.
pub fn smooth_f0(contour: &mut [f64]) {
    let mut smoother = DirectForm1::<f64>::new(F0_SMOOTHER);
    forward_backward_filter(contour, &mut smoother);
}
