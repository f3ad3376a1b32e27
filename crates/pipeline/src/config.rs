//! Pipeline configuration
//!
//! All knobs live in one serde struct so a deployment can keep them in a
//! YAML file instead of scattering environment lookups through the code.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use visual_region_detector::{vision::MAX_KERNEL_LENGTH, DetectorConfig};
use visual_region_embeddings::EmbeddingConfig;
use visual_region_matcher::MatcherConfig;
use visual_region_ocr::DescriberConfig;

/// Errors raised while loading or validating a configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete configuration of a [`crate::VisualRegionPipeline`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Master switch; a disabled pipeline returns no matches without doing any work
    pub enabled: bool,
    pub detector: DetectorConfig,
    pub describer: DescriberConfig,
    pub matcher: MatcherConfig,
    pub embedding: EmbeddingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detector: DetectorConfig::default(),
            describer: DescriberConfig::default(),
            matcher: MatcherConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a YAML configuration file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate a YAML document; missing keys take their defaults
    ///
    /// # Errors
    /// Returns an error if the YAML is malformed or a value is out of range
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is usable
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let detector = &self.detector;
        let geometry = &detector.geometry;
        if !(detector.render_scale > 0.0 && detector.render_scale.is_finite()) {
            return invalid(format!(
                "detector.render_scale must be positive (got {})",
                detector.render_scale
            ));
        }
        let (min_aspect, max_aspect) = detector.aspect_ratio_range;
        if !(min_aspect > 0.0 && min_aspect < max_aspect) {
            return invalid(format!(
                "detector.aspect_ratio_range must satisfy 0 < min < max \
                 (got {min_aspect}..{max_aspect})"
            ));
        }
        if detector.line_kernel_length == 0 || detector.line_kernel_length > MAX_KERNEL_LENGTH {
            return invalid(format!(
                "detector.line_kernel_length must be within 1..={MAX_KERNEL_LENGTH} (got {})",
                detector.line_kernel_length
            ));
        }
        if !(0.0..=1.0).contains(&detector.embedded_image_confidence) {
            return invalid("detector.embedded_image_confidence must be within [0, 1]".to_string());
        }
        if !(geometry.max_area_ratio > 0.0 && geometry.max_area_ratio <= 1.0) {
            return invalid("detector.geometry.max_area_ratio must be within (0, 1]".to_string());
        }
        if !(geometry.max_dimension_ratio > 0.0 && geometry.max_dimension_ratio <= 1.0) {
            return invalid(
                "detector.geometry.max_dimension_ratio must be within (0, 1]".to_string(),
            );
        }
        if geometry.floor_width > geometry.min_width
            || geometry.floor_height > geometry.min_height
        {
            return invalid(
                "detector.geometry floor size must not exceed the minimum size".to_string(),
            );
        }

        if self.describer.language.trim().is_empty() {
            return invalid("describer.language must not be empty".to_string());
        }

        let matcher = &self.matcher;
        if !(0.0..=1.0).contains(&matcher.confidence_floor) {
            return invalid(format!(
                "matcher.confidence_floor must be within [0, 1] (got {})",
                matcher.confidence_floor
            ));
        }
        if matcher.max_regions == 0 {
            return invalid("matcher.max_regions must be at least 1".to_string());
        }
        if matcher.question_batch_size == 0
            || matcher.region_batch_small == 0
            || matcher.region_batch_medium == 0
            || matcher.region_batch_large == 0
        {
            return invalid("matcher batch sizes must be at least 1".to_string());
        }

        if self.embedding.max_length == 0 || self.embedding.lexical_dimension == 0 {
            return invalid(
                "embedding.max_length and embedding.lexical_dimension must be at least 1"
                    .to_string(),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.enabled);
        assert!(config.validate().is_ok());
        assert!((config.matcher.confidence_floor - 0.35).abs() < 1e-6);
        assert_eq!(config.matcher.max_regions, 35);
        assert_eq!(config.embedding.model, "all-MiniLM-L6-v2");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r"
enabled: false
matcher:
  confidence_floor: 0.5
  max_regions: 60
describer:
  primary_layout: sparse_text
";
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        assert!(!config.enabled);
        assert!((config.matcher.confidence_floor - 0.5).abs() < 1e-6);
        assert_eq!(config.matcher.max_regions, 60);
        assert_eq!(config.matcher.question_batch_size, 16);
        assert_eq!(config.detector.min_region_area, 2500);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let out_of_range = PipelineConfig::from_yaml_str("matcher:\n  confidence_floor: 1.5\n");
        assert!(matches!(out_of_range, Err(ConfigError::Invalid(_))));

        let zero_cap = PipelineConfig::from_yaml_str("matcher:\n  max_regions: 0\n");
        assert!(matches!(zero_cap, Err(ConfigError::Invalid(_))));

        let inverted =
            PipelineConfig::from_yaml_str("detector:\n  aspect_ratio_range: [5.0, 0.2]\n");
        assert!(matches!(inverted, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_yaml() {
        let result = PipelineConfig::from_yaml_str("matcher: [not, a, map");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regions.yaml");
        std::fs::write(&path, "matcher:\n  max_regions: 50\n").unwrap();

        let config = PipelineConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.matcher.max_regions, 50);

        let missing = PipelineConfig::from_yaml_file(dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
