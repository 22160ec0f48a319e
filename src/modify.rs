use log::debug;

use crate::error::{Result, VocoderError};
use crate::matrix::FrameMatrix;
use crate::util::lerp;
use crate::vocoder::SynthesisParameters;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Modification {
    /// Pitch change of voiced frames in semitones.
    pub transpose_semitones: f64,
    /// Formant shift in tenths of a semitone. Positive values lower the
    /// formants.
    pub formant_shift: f64,
    /// Blend of the aperiodicity towards 1, in `[0, 1]`.
    pub breathiness: f64,
}

impl Modification {
    pub fn is_identity(&self) -> bool {
        self.transpose_semitones == 0.0 && self.formant_shift == 0.0 && self.breathiness == 0.0
    }

    fn validate(&self) -> Result<()> {
        if !self.transpose_semitones.is_finite() {
            return Err(VocoderError::invalid_param(
                "transpose_semitones",
                format!("must be finite, got {}", self.transpose_semitones),
            ));
        }
        if !self.formant_shift.is_finite() {
            return Err(VocoderError::invalid_param(
                "formant_shift",
                format!("must be finite, got {}", self.formant_shift),
            ));
        }
        if !(0.0..=1.0).contains(&self.breathiness) {
            return Err(VocoderError::invalid_param(
                "breathiness",
                format!("must be within [0, 1], got {}", self.breathiness),
            ));
        }
        Ok(())
    }

    pub fn apply(&self, params: &SynthesisParameters) -> Result<SynthesisParameters> {
        self.validate()?;
        params.validate()?;
        let mut out = params.clone();
        if self.is_identity() {
            return Ok(out);
        }
        debug!(
            "modify: transpose {} st, formant {}, breathiness {}",
            self.transpose_semitones, self.formant_shift, self.breathiness
        );

        if self.transpose_semitones != 0.0 {
            let ratio = (self.transpose_semitones / 12.0).exp2();
            out.f0.iter_mut().filter(|f| **f > 0.0).for_each(|f| *f *= ratio);
        }
        if self.formant_shift != 0.0 {
            let ratio = (self.formant_shift / 120.0).exp2();
            out.spectrogram = warp_frequency(&params.spectrogram, ratio);
        }
        if self.breathiness > 0.0 {
            for value in out.aperiodicity.rows_mut().flatten() {
                *value = lerp(*value, 1.0, self.breathiness);
            }
        }
        Ok(out)
    }
}

/// Output bin `i` reads the source at `i * ratio`, held at the top bin.
fn warp_frequency(spectrogram: &FrameMatrix, ratio: f64) -> FrameMatrix {
    let bins = spectrogram.num_cols();
    let mut warped = FrameMatrix::new(spectrogram.num_rows(), bins);
    for (source, target) in spectrogram.rows().zip(warped.rows_mut()) {
        for (i, slot) in target.iter_mut().enumerate() {
            let position = (i as f64 * ratio).min((bins - 1) as f64);
            let i0 = position.floor() as usize;
            let i1 = (i0 + 1).min(bins - 1);
            *slot = lerp(source[i0], source[i1], position - i0 as f64);
        }
    }
    warped
}
