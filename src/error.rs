use thiserror::Error;

/// Result type for vocoder operations.
pub type Result<T> = std::result::Result<T, VocoderError>;

/// Errors reported at the boundary of every public operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VocoderError {
    /// Two arrays that must share a frame or bin count disagree.
    #[error("invalid length for {what}: expected {expected}, found {actual}")]
    InvalidLength {
        /// Which array was checked.
        what: &'static str,
        /// Length implied by the other inputs.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },

    /// A scalar option is out of its accepted range.
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Error message, including the offending value.
        message: String,
    },

    /// The operation needs at least one frame.
    #[error("{operation} requires at least one frame")]
    EmptyInput {
        /// Operation that rejected the input.
        operation: &'static str,
    },
}

impl VocoderError {
    /// Creates an invalid parameter error.
    pub fn invalid_param(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            message: message.into(),
        }
    }

    /// Creates an invalid length error.
    pub fn invalid_length(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::InvalidLength {
            what,
            expected,
            actual,
        }
    }
}

/// Rejects a non-positive sample rate.
pub(crate) fn check_sample_rate(sample_rate: u32) -> Result<()> {
    if sample_rate == 0 {
        return Err(VocoderError::invalid_param(
            "sample_rate",
            "must be positive, got 0",
        ));
    }
    Ok(())
}

/// Rejects a non-positive or non-finite frame period.
pub(crate) fn check_frame_period(frame_period: f64) -> Result<()> {
    if !(frame_period.is_finite() && frame_period > 0.0) {
        return Err(VocoderError::invalid_param(
            "frame_period",
            format!("must be positive, got {}", frame_period),
        ));
    }
    Ok(())
}

/// Rejects an empty or inverted F0 search range.
pub(crate) fn check_f0_range(f0_floor: f64, f0_ceil: f64) -> Result<()> {
    if !(f0_floor.is_finite() && f0_floor > 0.0) {
        return Err(VocoderError::invalid_param(
            "f0_floor",
            format!("must be positive, got {}", f0_floor),
        ));
    }
    if !(f0_ceil.is_finite() && f0_floor < f0_ceil) {
        return Err(VocoderError::invalid_param(
            "f0_ceil",
            format!("must exceed f0_floor ({}), got {}", f0_floor, f0_ceil),
        ));
    }
    Ok(())
}

/// Rejects any F0 at or above the Nyquist frequency of `sample_rate`.
pub(crate) fn check_f0_below_nyquist(f0: &[f64], sample_rate: u32) -> Result<()> {
    let nyquist = sample_rate as f64 / 2.0;
    if let Some(bad) = f0.iter().find(|&&f| f >= nyquist) {
        return Err(VocoderError::invalid_param(
            "f0",
            format!("must stay below {} Hz, got {}", nyquist, bad),
        ));
    }
    Ok(())
}

/// Rejects an FFT length that is not a power of two of at least 4.
pub(crate) fn check_fft_size(fft_size: usize) -> Result<()> {
    if fft_size < 4 || !fft_size.is_power_of_two() {
        return Err(VocoderError::invalid_param(
            "fft_size",
            format!("must be a power of two >= 4, got {}", fft_size),
        ));
    }
    Ok(())
}
