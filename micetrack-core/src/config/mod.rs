//! config — analysis parameters, loadable from YAML
//!
//! Everything has a default except `sound_size`, which has to be stated
//! explicitly by the caller or the configuration file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::detection::{CropMargins, DEFAULT_THRESHOLD};
use crate::error::{Result, TrackError};
use crate::selection::FrameSelector;
use crate::tracking::{ReconstructionParams, DEFAULT_MIN_ELONGATION};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Margins excluded from detection.
    #[serde(default)]
    pub crop: CropMargins,

    /// Minimum weighted colour deviation of a foreground pixel.
    #[serde(default = "default_threshold")]
    pub threshold: u8,

    /// Blobs with `major / minor` at or below this are not trusted.
    #[serde(default = "default_min_elongation")]
    pub min_elongation: f64,

    /// Frames averaged into the background.
    #[serde(default)]
    pub background: FrameSelector,

    /// Reject detections whose length is far from the median.
    pub sound_size: bool,

    /// Highlight foreground pixels in overlays.
    #[serde(default)]
    pub hilite: bool,
}

fn default_threshold() -> u8 {
    DEFAULT_THRESHOLD
}

fn default_min_elongation() -> f64 {
    DEFAULT_MIN_ELONGATION
}

impl AnalysisConfig {
    pub fn new(sound_size: bool) -> Self {
        Self {
            crop: CropMargins::default(),
            threshold: DEFAULT_THRESHOLD,
            min_elongation: DEFAULT_MIN_ELONGATION,
            background: FrameSelector::default(),
            sound_size,
            hilite: false,
        }
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| TrackError::Config(format!("failed to parse config: {e}")))
    }

    /// Save configuration to a YAML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| TrackError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.min_elongation.is_finite() || self.min_elongation < 1.0 {
            return Err(TrackError::Config(format!(
                "minimum elongation must be a finite value of at least 1, got {}",
                self.min_elongation
            )));
        }
        let empty = match self.background {
            FrameSelector::Range { lower, upper } => lower >= upper,
            FrameSelector::Ratio { kept, .. } => kept == 0,
        };
        if empty {
            return Err(TrackError::Config(format!(
                "background selector {} accepts no frame",
                self.background
            )));
        }
        Ok(())
    }

    pub fn reconstruction(&self) -> ReconstructionParams {
        ReconstructionParams::new(self.sound_size).with_min_elongation(self.min_elongation)
    }
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# micetrack analysis configuration

# pixels ignored on each side of the frame
crop:
  left: 0
  right: 0
  top: 0
  bottom: 0

threshold: 64
min_elongation: 1.3

# frames averaged into the background: kind range (lower, upper)
# or kind ratio (kept, skipped)
background:
  kind: ratio
  kept: 1
  skipped: 9

# drop detections at least twice or at most half the median length
sound_size: true

hilite: false
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_config_parses() {
        let config = AnalysisConfig::from_yaml(EXAMPLE_CONFIG).unwrap();
        assert!(config.sound_size);
        assert_eq!(config.background, FrameSelector::ratio(1, 9));
        assert_eq!(config.threshold, 64);
        config.validate().unwrap();
    }

    #[test]
    fn sound_size_is_mandatory() {
        let err = AnalysisConfig::from_yaml("threshold: 32\n").unwrap_err();
        assert!(matches!(err, TrackError::Config(_)));

        let config = AnalysisConfig::from_yaml("sound_size: false\n").unwrap();
        assert_eq!(config, AnalysisConfig::new(false));
    }

    #[test]
    fn empty_selectors_are_rejected() {
        let mut config = AnalysisConfig::new(true);
        config.background = FrameSelector::range(4, 4);
        assert!(config.validate().is_err());
        config.background = FrameSelector::ratio(0, 3);
        assert!(config.validate().is_err());
        config.background = FrameSelector::ratio(2, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn round_elongation_floor_is_rejected() {
        let mut config = AnalysisConfig::new(true);
        config.min_elongation = 0.5;
        assert!(config.validate().is_err());
        config.min_elongation = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_round_trip() {
        let path = std::env::temp_dir().join(format!("micetrack-config-{}.yaml", std::process::id()));
        let mut config = AnalysisConfig::new(false);
        config.crop = CropMargins::new(1, 2, 3, 4);
        config.hilite = true;
        config.to_file(&path).unwrap();
        let loaded = AnalysisConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
