//! Picking configuration, read from a TOML file
//!
//! Every section and value is optional and falls back to its default, e.g.:
//! ```toml
//! [survey]
//! obsdir = "data"
//!
//! [picking]
//! method = "aic"
//! cores = 4
//!
//! [quality]
//! snr_threshold = { near = 5.0, far = 2.0, decay_length = 50.0 }
//! ```
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::charfuns::HosOrder;
use crate::error::SurveyError;
use crate::shot::{PickMethod, ShotParameters, SnrThreshold};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PickingConfig {
    pub survey: SurveyConfig,
    pub windows: WindowsConfig,
    pub picking: PickOptions,
    pub quality: QualityConfig,
}

/// Where the shot files and coordinates are
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    pub obsdir: PathBuf,
    /// `<shotnumber> <x> <y> <z>` per line
    pub source_file: PathBuf,
    /// `<trace ID> <x> <y> <z>` per line
    pub receiver_file: PathBuf,
    /// Shot files are named `<prefix><shotnumber><suffix>`
    pub prefix: String,
    pub suffix: String,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            obsdir: PathBuf::from("."),
            source_file: PathBuf::from("shots.txt"),
            receiver_file: PathBuf::from("receivers.txt"),
            prefix: String::new(),
            suffix: ".hdr".to_string(),
        }
    }
}

impl SurveyConfig {
    pub fn shot_path(&self, shotnumber: u32) -> PathBuf {
        self.obsdir
            .join(format!("{}{}{}", self.prefix, shotnumber, self.suffix))
    }
}

/// Timing parameters of every trace. All durations are in seconds.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowsConfig {
    /// The part of the traces that characteristic functions are calculated on
    pub cutwindow: (f64, f64),
    pub tmovwind: f64,
    pub tsignal: f64,
    pub tgap: f64,
    pub order: HosOrder,
    /// Multiple of the noise RMS that the signal has to exceed for the latest possible pick
    pub nfac: f64,
}

impl Default for WindowsConfig {
    fn default() -> Self {
        let parameters = ShotParameters::default();
        Self {
            cutwindow: parameters.cut,
            tmovwind: parameters.tmovwind,
            tsignal: parameters.tsignal,
            tgap: parameters.tgap,
            order: parameters.order,
            nfac: parameters.nfac,
        }
    }
}

impl WindowsConfig {
    pub fn validate(&self) -> Result<(), SurveyError> {
        let (start, end) = self.cutwindow;
        if start < 0. || (end != 0. && end <= start) {
            return Err(SurveyError::Configuration(format!(
                "Invalid cut window: ({start}, {end})"
            )));
        };
        for (name, value) in [
            ("tmovwind", self.tmovwind),
            ("tsignal", self.tsignal),
            ("nfac", self.nfac),
        ] {
            if !(value.is_finite() && value > 0.) {
                return Err(SurveyError::Configuration(format!(
                    "{name} must be positive, got {value}"
                )));
            };
        }
        if !(self.tgap.is_finite() && self.tgap >= 0.) {
            return Err(SurveyError::Configuration(format!(
                "tgap must not be negative, got {}",
                self.tgap
            )));
        };
        Ok(())
    }

    /// Apply the windows to a set of shot parameters
    pub fn apply(&self, parameters: &mut ShotParameters) {
        parameters.cut = self.cutwindow;
        parameters.tmovwind = self.tmovwind;
        parameters.tsignal = self.tsignal;
        parameters.tgap = self.tgap;
        parameters.order = self.order;
        parameters.nfac = self.nfac;
    }
}

/// Arguments of a survey-wide picking run
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PickOptions {
    /// Lowest apparent velocity in m/s
    pub vmin: f64,
    /// Highest apparent velocity in m/s
    pub vmax: f64,
    pub folm: f64,
    pub method: PickMethod,
    pub aicwindow: (usize, usize),
    pub cores: usize,
    /// Clear all automatic picks before picking
    pub repick: bool,
}

impl Default for PickOptions {
    fn default() -> Self {
        let parameters = ShotParameters::default();
        Self {
            vmin: parameters.vmin,
            vmax: parameters.vmax,
            folm: parameters.folm,
            method: parameters.method,
            aicwindow: parameters.aicwindow,
            cores: 1,
            repick: false,
        }
    }
}

impl PickOptions {
    pub fn validate(&self) -> Result<(), SurveyError> {
        if self.cores < 1 {
            return Err(SurveyError::Configuration(format!(
                "The number of cores must be at least 1, got {}",
                self.cores
            )));
        };
        if !(self.vmin > 0. && self.vmin < self.vmax) {
            return Err(SurveyError::Configuration(format!(
                "Expected 0 < vmin < vmax, got vmin={} and vmax={}",
                self.vmin, self.vmax
            )));
        };
        if !(self.folm > 0. && self.folm <= 1.) {
            return Err(SurveyError::Configuration(format!(
                "folm must be in (0, 1], got {}",
                self.folm
            )));
        };
        Ok(())
    }

    pub fn apply(&self, parameters: &mut ShotParameters) {
        parameters.vmin = self.vmin;
        parameters.vmax = self.vmax;
        parameters.folm = self.folm;
        parameters.method = self.method;
        parameters.aicwindow = self.aicwindow;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub snr_threshold: SnrThreshold,
    /// Invalidate picks with a larger symmetric pick error (s)
    pub max_spe: Option<f64>,
}

impl PickingConfig {
    pub fn from_toml(content: &str) -> Result<Self, SurveyError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(filepath: &Path) -> Result<Self, SurveyError> {
        let content =
            std::fs::read_to_string(filepath).map_err(|e| SurveyError::io(filepath, e))?;
        Self::from_toml(&content)
    }

    pub fn to_toml(&self) -> Result<String, SurveyError> {
        toml::to_string_pretty(self)
            .map_err(|e| SurveyError::Configuration(format!("Could not serialize config: {e}")))
    }

    pub fn validate(&self) -> Result<(), SurveyError> {
        self.windows.validate()?;
        self.picking.validate()?;

        if let SnrThreshold::Distance { decay_length, .. } = self.quality.snr_threshold {
            if decay_length <= 0. {
                return Err(SurveyError::Configuration(format!(
                    "The SNR threshold decay length must be positive, got {decay_length}"
                )));
            };
        };
        if let Some(max_spe) = self.quality.max_spe {
            if max_spe <= 0. {
                return Err(SurveyError::Configuration(format!(
                    "max_spe must be positive, got {max_spe}"
                )));
            };
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::PickingConfig;
    use crate::charfuns::HosOrder;
    use crate::error::SurveyError;
    use crate::shot::{PickMethod, ShotParameters, SnrThreshold};

    #[test]
    fn test_defaults() {
        let config = PickingConfig::from_toml("").unwrap();

        assert_eq!(config, PickingConfig::default());
        assert_eq!(config.windows.cutwindow, (0., 0.2));
        assert_eq!(config.windows.order, HosOrder::Kurtosis);
        assert_eq!(config.picking.aicwindow, (15, 0));
        assert_eq!(config.quality.snr_threshold, SnrThreshold::Constant(2.));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse() {
        let config = PickingConfig::from_toml(
            r#"
            [survey]
            obsdir = "data"
            prefix = "shot_"

            [windows]
            order = 3
            tsignal = 0.05

            [picking]
            method = "aic"
            cores = 4
            aicwindow = [10, 2]

            [quality]
            snr_threshold = { near = 5.0, far = 2.0, decay_length = 50.0 }
            max_spe = 0.01
            "#,
        )
        .unwrap();

        assert_eq!(config.survey.shot_path(12), PathBuf::from("data/shot_12.hdr"));
        assert_eq!(config.windows.order, HosOrder::Skewness);
        assert_eq!(config.windows.tsignal, 0.05);
        assert_eq!(config.windows.tgap, 0.0007);
        assert_eq!(config.picking.method, PickMethod::Aic);
        assert_eq!(config.picking.aicwindow, (10, 2));
        assert_eq!(
            config.quality.snr_threshold,
            SnrThreshold::Distance {
                near: 5.,
                far: 2.,
                decay_length: 50.
            }
        );
        assert_eq!(config.quality.max_spe, Some(0.01));

        let mut parameters = ShotParameters::default();
        config.windows.apply(&mut parameters);
        config.picking.apply(&mut parameters);
        assert_eq!(parameters.method, PickMethod::Aic);
        assert_eq!(parameters.tsignal, 0.05);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            PickingConfig::from_toml("[windows]\norder = 5"),
            Err(SurveyError::Config(_))
        ));

        for content in [
            "[picking]\ncores = 0",
            "[picking]\nvmin = 6000.0",
            "[picking]\nfolm = 1.5",
            "[windows]\ntmovwind = 0.0",
            "[windows]\ncutwindow = [0.2, 0.1]",
        ] {
            let config = PickingConfig::from_toml(content).unwrap();
            assert!(
                matches!(config.validate(), Err(SurveyError::Configuration(_))),
                "{content}"
            );
        }
    }

    #[test]
    fn test_to_toml() {
        let config = PickingConfig::default();
        let content = config.to_toml().unwrap();

        assert!(content.contains("[picking]"));
        assert_eq!(PickingConfig::from_toml(&content).unwrap(), config);
    }
}
