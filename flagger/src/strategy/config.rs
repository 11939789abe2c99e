//! Strategy configuration and its JSON persistence.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::detection::rms::RmsMode;
use crate::detection::sumthreshold::SumThresholdSettings;
use crate::detection::thresholds::ThresholdSequence;
use crate::error::FlagError;
use crate::image_proc::lowpass::LowPassFilter;
use crate::polarization::{ComplexRepresentation, Polarization};

/// Gaussian smoothing of the shrunk baseline. Sigmas are given squared, in
/// samples of the shrunk image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LowPassSettings {
    pub kernel_width: usize,
    pub kernel_height: usize,
    pub horizontal_sigma_sq: f64,
    pub vertical_sigma_sq: f64,
}

impl Default for LowPassSettings {
    fn default() -> Self {
        Self {
            kernel_width: 21,
            kernel_height: 31,
            horizontal_sigma_sq: 1.6,
            vertical_sigma_sq: 2.2,
        }
    }
}

impl LowPassSettings {
    pub fn filter(&self) -> Result<LowPassFilter, FlagError> {
        LowPassFilter::new(
            self.kernel_width,
            self.kernel_height,
            self.horizontal_sigma_sq,
            self.vertical_sigma_sq,
        )
    }
}

/// All tunables of one strategy invocation.
///
/// Every field has a default, so a configuration file only needs to name the
/// values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Number of detection passes per representation, including the final one.
    pub iteration_count: usize,
    /// Ratio between the thresholds of consecutive passes.
    pub threshold_factor_step: f64,
    /// Sensitivity of the final pass.
    pub base_threshold: f64,
    /// Polarizations to flag; `None` flags those present in the input.
    pub polarizations: Option<Vec<Polarization>>,
    /// Representations to flag for every polarization.
    pub representations: Vec<ComplexRepresentation>,
    pub timestep_rms_threshold: f64,
    /// Multiplied by the threshold factor of the current pass.
    pub channel_rms_threshold: f64,
    pub channel_rms_flag_low_values: bool,
    pub rms_mode: RmsMode,
    pub shrink_horizontal: usize,
    pub shrink_vertical: usize,
    pub low_pass: LowPassSettings,
    pub sumthreshold: SumThresholdSettings,
    pub sir_eta_horizontal: f64,
    pub sir_eta_vertical: f64,
    pub final_timestep_rms_threshold: f64,
    /// Discard input flags before detection.
    pub clear_input_mask: bool,
    /// When input flags are kept they mark missing data. Each missing sample
    /// weighs this much in the rank operator; `None` skips missing samples.
    pub sir_missing_penalty: Option<f64>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            iteration_count: 3,
            threshold_factor_step: 2.0,
            base_threshold: 1.4,
            polarizations: None,
            representations: vec![ComplexRepresentation::Amplitude],
            timestep_rms_threshold: 3.5,
            channel_rms_threshold: 3.0,
            channel_rms_flag_low_values: true,
            rms_mode: RmsMode::PerSample,
            shrink_horizontal: 3,
            shrink_vertical: 3,
            low_pass: LowPassSettings::default(),
            sumthreshold: SumThresholdSettings::default(),
            sir_eta_horizontal: 0.2,
            sir_eta_vertical: 0.2,
            final_timestep_rms_threshold: 4.0,
            clear_input_mask: true,
            sir_missing_penalty: Some(0.1),
        }
    }
}

impl StrategyConfig {
    /// The descending threshold schedule of the iterative passes.
    pub fn threshold_sequence(&self) -> Result<ThresholdSequence, FlagError> {
        ThresholdSequence::new(
            self.base_threshold,
            self.threshold_factor_step,
            self.iteration_count,
        )
    }

    /// Check every value, so that a bad configuration fails before any data
    /// is touched.
    pub fn validate(&self) -> Result<(), FlagError> {
        self.threshold_sequence()?;
        self.sumthreshold.threshold_config()?;
        self.low_pass.filter()?;

        if self.representations.is_empty() {
            return Err(FlagError::InvalidConfig(
                "at least one representation is required".to_string(),
            ));
        }
        if let Some(polarizations) = &self.polarizations {
            if polarizations.is_empty() {
                return Err(FlagError::InvalidConfig(
                    "polarization list must not be empty".to_string(),
                ));
            }
        }
        for (name, value) in [
            ("timestep RMS threshold", self.timestep_rms_threshold),
            ("channel RMS threshold", self.channel_rms_threshold),
            ("final timestep RMS threshold", self.final_timestep_rms_threshold),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(FlagError::InvalidConfig(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if self.shrink_horizontal == 0 || self.shrink_vertical == 0 {
            return Err(FlagError::InvalidConfig(format!(
                "shrink factors must be at least 1, got {}x{}",
                self.shrink_horizontal, self.shrink_vertical
            )));
        }
        for eta in [self.sir_eta_horizontal, self.sir_eta_vertical] {
            if !(0.0..=1.0).contains(&eta) {
                return Err(FlagError::InvalidConfig(format!(
                    "rank operator eta must be within [0, 1], got {eta}"
                )));
            }
        }
        if let Some(penalty) = self.sir_missing_penalty {
            if !(penalty.is_finite() && penalty >= 0.0) {
                return Err(FlagError::InvalidConfig(format!(
                    "rank operator penalty must be non-negative, got {penalty}"
                )));
            }
        }
        Ok(())
    }

    /// Save as pretty-printed JSON.
    pub fn save_to_file(&self, path: &Path) -> Result<(), FlagError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON and validate.
    pub fn load_from_file(path: &Path) -> Result<Self, FlagError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::sumthreshold::NoiseDistribution;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = StrategyConfig::default();
        config.validate().unwrap();
        assert_eq!(config.threshold_sequence().unwrap().factors(), &[4.0, 2.0]);
        assert_eq!(config.low_pass.filter().unwrap().vertical_window(), 31);
    }

    #[test]
    fn test_invalid_values() {
        let mut config = StrategyConfig {
            iteration_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config = StrategyConfig {
            sir_eta_vertical: 1.2,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config = StrategyConfig {
            shrink_horizontal: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config = StrategyConfig {
            representations: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config = StrategyConfig {
            sir_missing_penalty: Some(-0.5),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config = StrategyConfig::default();
        config.low_pass.vertical_sigma_sq = 0.0;
        assert!(matches!(config.validate(), Err(FlagError::InvalidConfig(_))));
    }

    #[test]
    fn test_save_and_load() {
        let mut config = StrategyConfig {
            iteration_count: 5,
            polarizations: Some(vec![Polarization::StokesI, Polarization::XY]),
            rms_mode: RmsMode::WholeSlice,
            ..Default::default()
        };
        config.sumthreshold.distribution = NoiseDistribution::Gaussian;

        let file = NamedTempFile::new().unwrap();
        config.save_to_file(file.path()).unwrap();
        let loaded = StrategyConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let file = NamedTempFile::new().unwrap();
        let json = r#"{ "base_threshold": 2.0, "low_pass": { "kernel_width": 11 } }"#;
        std::fs::write(file.path(), json).unwrap();
        let loaded = StrategyConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded.base_threshold, 2.0);
        assert_eq!(loaded.low_pass.kernel_width, 11);
        assert_eq!(loaded.low_pass.kernel_height, 31);
        assert_eq!(loaded.iteration_count, 3);
    }

    #[test]
    fn test_load_errors() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "not json").unwrap();
        assert!(matches!(
            StrategyConfig::load_from_file(file.path()),
            Err(FlagError::Serialization(_))
        ));
        assert!(matches!(
            StrategyConfig::load_from_file(Path::new("/nonexistent/strategy.json")),
            Err(FlagError::Io(_))
        ));
    }
}
