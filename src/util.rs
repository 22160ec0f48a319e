use std::f64::consts::PI;

/// Rounds half away from zero, the convention every window/index
/// computation in the analysis code relies on.
pub fn matlab_round(x: f64) -> i64 {
    if x.is_nan() {
        return 0;
    }
    if x >= 0.0 {
        (x + 0.5).floor() as i64
    } else {
        (x - 0.5).ceil() as i64
    }
}

/// Smallest power of two strictly greater than `log2(sample)`'s integer part,
/// i.e. `2^(floor(log2(sample)) + 1)`.
pub fn suitable_fft_size(sample: usize) -> usize {
    let sample = sample.max(1);
    1usize << ((usize::BITS - 1 - sample.leading_zeros()) + 1)
}

pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a * (1.0 - t) + b * t
}

/// 4-term Nuttall window of `len` samples.
pub fn nuttall_window(len: usize) -> Vec<f64> {
    match len {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let denom = (len - 1) as f64;
            (0..len)
                .map(|i| {
                    let t = i as f64 / denom;
                    0.355768 - 0.487396 * (2.0 * PI * t).cos() + 0.144232 * (4.0 * PI * t).cos()
                        - 0.012604 * (6.0 * PI * t).cos()
                })
                .collect()
        }
    }
}

/// Linear interpolation of `(x, y)` at `xi`. `x` must be ascending with at
/// least two points; queries outside the range extrapolate from the end
/// segments.
pub fn interp1(x: &[f64], y: &[f64], xi: &[f64]) -> Vec<f64> {
    let n = x.len().min(y.len());
    if n == 0 {
        return vec![0.0; xi.len()];
    }
    if n == 1 {
        return vec![y[0]; xi.len()];
    }
    xi.iter()
        .map(|&q| {
            let k = x[..n].partition_point(|&v| v <= q).clamp(1, n - 1);
            let h = x[k] - x[k - 1];
            if h == 0.0 {
                return y[k - 1];
            }
            y[k - 1] + (q - x[k - 1]) / h * (y[k] - y[k - 1])
        })
        .collect()
}

/// Linear interpolation on a uniform axis `origin + i * step`.
///
/// Queries are clamped to the sampled range; the last sample holds.
pub fn interp1_uniform(origin: f64, step: f64, y: &[f64], xi: &[f64]) -> Vec<f64> {
    let n = y.len();
    if n == 0 {
        return vec![0.0; xi.len()];
    }
    xi.iter()
        .map(|&q| {
            let position = (q - origin) / step;
            if position <= 0.0 {
                return y[0];
            }
            let base = position as usize;
            if base >= n - 1 {
                return y[n - 1];
            }
            let fraction = position - base as f64;
            y[base] + (y[base + 1] - y[base]) * fraction
        })
        .collect()
}

/// Folds the spectral components below `f0` back onto the positive axis so
/// that energy under the fundamental is not lost to the DC bin.
pub fn dc_correction(spectrum: &mut [f64], f0: f64, fs: f64, fft_size: usize) {
    let bin_width = fs / fft_size as f64;
    let upper_limit = (2 + (f0 * fft_size as f64 / fs) as usize).min(spectrum.len());
    let source_len = (upper_limit + 1).min(spectrum.len());
    let axis: Vec<f64> = (0..upper_limit).map(|i| i as f64 * bin_width).collect();
    let replica = interp1_uniform(f0, -bin_width, &spectrum[..source_len], &axis);
    for (value, extra) in spectrum.iter_mut().zip(replica) {
        *value += extra;
    }
}

/// Rectangular smoothing of width `width` Hz on a half spectrum, computed
/// from the cumulative sum of a mirrored copy.
pub fn linear_smoothing(spectrum: &[f64], width: f64, fs: f64, fft_size: usize) -> Vec<f64> {
    let half = fft_size / 2;
    let bin_width = fs / fft_size as f64;
    let boundary = (width * fft_size as f64 / fs) as usize + 1;
    let total = half + boundary * 2 + 1;

    let mut mirrored = vec![0.0; total];
    for i in 0..boundary {
        mirrored[i] = spectrum[(boundary - i).min(half)];
    }
    for i in boundary..half + boundary {
        mirrored[i] = spectrum[i - boundary];
    }
    for i in half + boundary..total {
        mirrored[i] = spectrum[half.saturating_sub(i - (half + boundary))];
    }

    let mut cumulative = Vec::with_capacity(total);
    let mut running = 0.0;
    for value in &mirrored {
        running += value * bin_width;
        cumulative.push(running);
    }

    let origin = -(boundary as f64 - 0.5) * bin_width;
    let low_axis: Vec<f64> = (0..=half).map(|i| i as f64 * bin_width - width / 2.0).collect();
    let high_axis: Vec<f64> = low_axis.iter().map(|f| f + width).collect();
    let low = interp1_uniform(origin, bin_width, &cumulative, &low_axis);
    let high = interp1_uniform(origin, bin_width, &cumulative, &high_axis);

    low.iter().zip(&high).map(|(l, h)| (h - l) / width).collect()
}

/// Vertex offset of the parabola through three equally spaced points,
/// in units of the spacing, relative to the middle point.
pub fn parabolic_peak_offset(left: f64, center: f64, right: f64) -> f64 {
    let denom = left - 2.0 * center + right;
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    0.5 * (left - right) / denom
}
