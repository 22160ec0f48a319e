use log::info;

use super::cheaptrick::cheaptrick;
use super::d4c::d4c;
use super::dio::dio;
use super::harvest::harvest;
use super::stonemask::stonemask;
use super::{SynthesisParameters, Waveform};
use crate::config::{AnalysisConfig, Estimator};
use crate::error::{check_frame_period, Result};

/// DIO, StoneMask, CheapTrick and D4C with default settings.
pub fn analyze_full(waveform: &Waveform, frame_period: f64) -> Result<SynthesisParameters> {
    check_frame_period(frame_period)?;
    analyze(waveform, &AnalysisConfig::default().with_frame_period(frame_period))
}

/// Runs the analysis chain described by `config`. The envelope FFT length
/// is resolved once and handed to the aperiodicity estimator.
pub fn analyze(waveform: &Waveform, config: &AnalysisConfig) -> Result<SynthesisParameters> {
    let frame_period = config.frame_period();
    check_frame_period(frame_period)?;

    let estimator = config.estimator();
    let mut track = match estimator {
        Estimator::Dio => dio(waveform, &config.dio_options())?,
        Estimator::Harvest => harvest(waveform, &config.harvest_options())?,
    };
    if config.refine() {
        track.f0 = stonemask(waveform, &track)?;
    }

    let cheaptrick_options = config.cheaptrick_options();
    let fft_size = cheaptrick_options.fft_size(waveform.sample_rate)?;
    let spectrogram = cheaptrick(waveform, &track, &cheaptrick_options)?;
    let aperiodicity = d4c(waveform, &track, &config.d4c_options(fft_size))?;

    info!(
        "analysis ({:?}): {} frames, {} voiced, fft {}",
        estimator,
        track.len(),
        track.voiced_count(),
        fft_size
    );
    Ok(SynthesisParameters {
        f0: track.f0,
        spectrogram,
        aperiodicity,
        sample_rate: waveform.sample_rate,
        frame_period,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocoder::cheaptrick::query_fft_size;
    use crate::vocoder::synthesis::synthesize;
    use crate::vocoder::{frame_count, F0_FLOOR};

    fn tone(f0: f64, fs: u32, seconds: f64) -> Waveform {
        let n = (fs as f64 * seconds) as usize;
        let samples = (0..n)
            .map(|i| {
                let t = i as f64 / fs as f64;
                (1..=5)
                    .map(|h| (2.0 * std::f64::consts::PI * f0 * h as f64 * t).sin() / h as f64)
                    .sum::<f64>()
                    * 0.2
            })
            .collect();
        Waveform::new(samples, fs).unwrap()
    }

    #[test]
    fn test_analyze_full_shapes() {
        let waveform = tone(150.0, 16000, 0.5);
        let params = analyze_full(&waveform, 5.0).unwrap();
        let frames = frame_count(16000, waveform.len(), 5.0);
        let fft_size = query_fft_size(16000, F0_FLOOR).unwrap();
        assert_eq!(params.frame_count(), frames);
        assert_eq!(params.spectrogram.num_rows(), frames);
        assert_eq!(params.spectrogram.num_cols(), fft_size / 2 + 1);
        assert_eq!(params.aperiodicity.num_cols(), fft_size / 2 + 1);
        assert_eq!(params.fft_size(), fft_size);
        params.validate().unwrap();
    }

    #[test]
    fn test_harvest_without_refinement() {
        let waveform = tone(200.0, 16000, 0.5);
        let config = AnalysisConfig::parse("general estimator=\"harvest\" refine=false").unwrap();
        let params = analyze(&waveform, &config).unwrap();
        let voiced: Vec<f64> = params.f0.iter().copied().filter(|&f| f > 0.0).collect();
        assert!(voiced.len() > params.frame_count() / 2);
        let mean = voiced.iter().sum::<f64>() / voiced.len() as f64;
        assert!((mean - 200.0).abs() < 10.0, "mean {}", mean);
    }

    #[test]
    fn test_empty_waveform_gives_no_frames() {
        let waveform = Waveform::new(Vec::new(), 16000).unwrap();
        let params = analyze_full(&waveform, 5.0).unwrap();
        assert_eq!(params.frame_count(), 0);
        assert!(synthesize(&params).is_err());
    }

    #[test]
    fn test_rejects_bad_frame_period() {
        let waveform = tone(150.0, 16000, 0.1);
        assert!(analyze_full(&waveform, 0.0).is_err());
    }
}
