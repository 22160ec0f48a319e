use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use knuffel::{Decode, DecodeScalar};
use serde::{Deserialize, Serialize};

use crate::vocoder::cheaptrick::CheapTrickOptions;
use crate::vocoder::d4c::D4cOptions;
use crate::vocoder::dio::DioOptions;
use crate::vocoder::harvest::HarvestOptions;
use crate::vocoder::{
    ALLOWED_RANGE, CHANNELS_IN_OCTAVE, F0_CEIL, F0_FLOOR, FRAME_PERIOD, Q1, SPEED, THRESHOLD,
};

/// F0 estimator used by the analysis pipeline.
#[derive(DecodeScalar, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Estimator {
    #[default]
    Dio,
    Harvest,
}

impl FromStr for Estimator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dio" => Ok(Self::Dio),
            "harvest" => Ok(Self::Harvest),
            other => Err(format!("unknown estimator '{}', expected dio or harvest", other)),
        }
    }
}

/// Analysis settings, read from a KDL document such as
///
/// ```kdl
/// general threads=4 estimator="harvest" refine=true frame-period=5.0
/// f0 floor=71.0 ceil=800.0
/// dio channels-in-octave=2.0 speed=1 allowed-range=0.1
/// cheaptrick q1=-0.15
/// d4c threshold=0.85
/// ```
///
/// Every node and property may be omitted.
#[derive(Decode, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[knuffel(child)]
    pub general: Option<GeneralConfig>,
    #[knuffel(child)]
    pub f0: Option<F0Config>,
    #[knuffel(child)]
    pub dio: Option<DioConfig>,
    #[knuffel(child)]
    pub cheaptrick: Option<CheapTrickConfig>,
    #[knuffel(child)]
    pub d4c: Option<D4cConfig>,
}

#[derive(Decode, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Worker threads, 0 for the rayon default.
    #[knuffel(property)]
    pub threads: Option<usize>,
    #[knuffel(property)]
    pub estimator: Option<Estimator>,
    #[knuffel(property)]
    pub refine: Option<bool>,
    #[knuffel(property)]
    pub frame_period: Option<f64>,
}

#[derive(Decode, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct F0Config {
    #[knuffel(property)]
    pub floor: Option<f64>,
    #[knuffel(property)]
    pub ceil: Option<f64>,
}

#[derive(Decode, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DioConfig {
    #[knuffel(property)]
    pub channels_in_octave: Option<f64>,
    #[knuffel(property)]
    pub speed: Option<usize>,
    #[knuffel(property)]
    pub allowed_range: Option<f64>,
}

#[derive(Decode, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheapTrickConfig {
    #[knuffel(property)]
    pub q1: Option<f64>,
}

#[derive(Decode, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct D4cConfig {
    #[knuffel(property)]
    pub threshold: Option<f64>,
}

impl AnalysisConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config = knuffel::parse("config.kdl", text)?;
        Ok(config)
    }

    fn general(&self) -> GeneralConfig {
        self.general.clone().unwrap_or_default()
    }

    pub fn threads(&self) -> usize {
        self.general().threads.unwrap_or(0)
    }

    pub fn estimator(&self) -> Estimator {
        self.general().estimator.unwrap_or_default()
    }

    pub fn refine(&self) -> bool {
        self.general().refine.unwrap_or(true)
    }

    /// Milliseconds.
    pub fn frame_period(&self) -> f64 {
        self.general().frame_period.unwrap_or(FRAME_PERIOD)
    }

    pub fn f0_range(&self) -> (f64, f64) {
        let f0 = self.f0.clone().unwrap_or_default();
        (f0.floor.unwrap_or(F0_FLOOR), f0.ceil.unwrap_or(F0_CEIL))
    }

    pub fn with_estimator(mut self, estimator: Estimator) -> Self {
        self.general.get_or_insert_with(Default::default).estimator = Some(estimator);
        self
    }

    pub fn with_frame_period(mut self, frame_period: f64) -> Self {
        self.general.get_or_insert_with(Default::default).frame_period = Some(frame_period);
        self
    }

    pub fn dio_options(&self) -> DioOptions {
        let (floor, ceil) = self.f0_range();
        let dio = self.dio.clone().unwrap_or_default();
        DioOptions::default()
            .with_f0_range(floor, ceil)
            .with_frame_period(self.frame_period())
            .with_channels_in_octave(dio.channels_in_octave.unwrap_or(CHANNELS_IN_OCTAVE))
            .with_speed(dio.speed.unwrap_or(SPEED))
            .with_allowed_range(dio.allowed_range.unwrap_or(ALLOWED_RANGE))
    }

    pub fn harvest_options(&self) -> HarvestOptions {
        let (floor, ceil) = self.f0_range();
        HarvestOptions::default()
            .with_f0_range(floor, ceil)
            .with_frame_period(self.frame_period())
    }

    /// The FFT size follows the configured F0 floor.
    pub fn cheaptrick_options(&self) -> CheapTrickOptions {
        let q1 = self.cheaptrick.as_ref().and_then(|c| c.q1).unwrap_or(Q1);
        CheapTrickOptions::default()
            .with_q1(q1)
            .with_f0_floor(self.f0_range().0)
    }

    pub fn d4c_options(&self, fft_size: usize) -> D4cOptions {
        let threshold = self.d4c.as_ref().and_then(|c| c.threshold).unwrap_or(THRESHOLD);
        D4cOptions::new(fft_size).with_threshold(threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AnalysisConfig::parse("").unwrap();
        assert_eq!(config, AnalysisConfig::default());
        assert_eq!(config.estimator(), Estimator::Dio);
        assert!(config.refine());
        assert_eq!(config.threads(), 0);
        assert_eq!(config.frame_period(), FRAME_PERIOD);
        assert_eq!(config.dio_options(), DioOptions::default());
        assert_eq!(config.harvest_options(), HarvestOptions::default());
        assert_eq!(config.cheaptrick_options(), CheapTrickOptions::default());
    }

    #[test]
    fn test_full_document() {
        let config = AnalysisConfig::parse(
            r#"
            general threads=4 estimator="harvest" refine=false frame-period=2.5
            f0 floor=60.0 ceil=600.0
            dio channels-in-octave=3.0 speed=2 allowed-range=0.2
            cheaptrick q1=-0.1
            d4c threshold=0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.threads(), 4);
        assert_eq!(config.estimator(), Estimator::Harvest);
        assert!(!config.refine());
        assert_eq!(config.frame_period(), 2.5);
        assert_eq!(config.f0_range(), (60.0, 600.0));

        let dio = config.dio_options();
        assert_eq!(dio.channels_in_octave, 3.0);
        assert_eq!(dio.speed, 2);
        assert_eq!(dio.allowed_range, 0.2);
        assert_eq!(dio.frame_period, 2.5);

        let harvest = config.harvest_options();
        assert_eq!((harvest.f0_floor, harvest.f0_ceil), (60.0, 600.0));
        assert_eq!(config.cheaptrick_options().q1, -0.1);

        let d4c = config.d4c_options(1024);
        assert_eq!(d4c.fft_size, 1024);
        assert_eq!(d4c.threshold, 0.5);
    }

    #[test]
    fn test_partial_general_node() {
        let config = AnalysisConfig::parse("general estimator=\"harvest\"").unwrap();
        assert_eq!(config.estimator(), Estimator::Harvest);
        assert!(config.refine());
        assert_eq!(config.frame_period(), FRAME_PERIOD);
    }

    #[test]
    fn test_rejects_unknown_estimator() {
        assert!(AnalysisConfig::parse("general estimator=\"yin\"").is_err());
        assert!("yin".parse::<Estimator>().is_err());
        assert_eq!("Harvest".parse::<Estimator>(), Ok(Estimator::Harvest));
    }

    #[test]
    fn test_overrides() {
        let config = AnalysisConfig::default()
            .with_estimator(Estimator::Harvest)
            .with_frame_period(1.0);
        assert_eq!(config.estimator(), Estimator::Harvest);
        assert_eq!(config.frame_period(), 1.0);
    }
}
