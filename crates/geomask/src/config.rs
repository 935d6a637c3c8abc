use schemars::{JsonSchema, schema::RootSchema, schema_for};
use serde::{Deserialize, Serialize};

use crate::{
    algorithms::{assembly::BlendMode, tiling::TileSampler},
    error::{MaskError, Result},
};

/// Parameters of one detection run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Parameters for tiling, mask assembly, instance extraction and vectorization")]
pub struct DetectionConfig {
    #[schemars(description = "Chip probabilities below this value are zeroed before blending")]
    pub confidence_threshold: f32,
    #[schemars(description = "A mask cell belongs to an instance when its probability is at least this value")]
    pub mask_threshold: f32,
    #[schemars(description = "Instances smaller than this area (squared CRS units) are discarded")]
    pub min_object_area: f64,
    #[schemars(description = "Fraction of a chip shared with its neighbour, in [0, 1)")]
    pub overlap: f64,
    #[schemars(description = "Chip width and height in pixels")]
    pub chip_size: (u32, u32),
    #[schemars(description = "Number of chips inferred together")]
    pub batch_size: usize,
    #[schemars(description = "Simplification and orthogonalization tolerance in pixels")]
    pub epsilon: f64,
    pub blend_mode: BlendMode,
    #[schemars(description = "Value used to pad chips that extend past the raster edge")]
    pub fill_value: f32,
    #[schemars(description = "Additional attempts for a chip whose inference failed")]
    pub max_retries: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.4,
            mask_threshold: 0.5,
            min_object_area: 100.0,
            overlap: 0.25,
            chip_size: (400, 400),
            batch_size: 4,
            epsilon: 0.2,
            blend_mode: BlendMode::Max,
            fill_value: 0.0,
            max_retries: 2,
        }
    }
}

impl DetectionConfig {
    pub fn builder() -> DetectionConfigBuilder {
        DetectionConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(MaskError::invalid_config(format!(
                "confidence_threshold must be in [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.mask_threshold) {
            return Err(MaskError::invalid_config(format!(
                "mask_threshold must be in [0, 1], got {}",
                self.mask_threshold
            )));
        }
        if !(self.min_object_area.is_finite() && self.min_object_area >= 0.0) {
            return Err(MaskError::invalid_config(format!(
                "min_object_area must be a non-negative number, got {}",
                self.min_object_area
            )));
        }
        if self.batch_size == 0 {
            return Err(MaskError::invalid_config("batch_size must be at least 1"));
        }
        if !(self.epsilon.is_finite() && self.epsilon >= 0.0) {
            return Err(MaskError::invalid_config(format!(
                "epsilon must be a non-negative number, got {}",
                self.epsilon
            )));
        }
        if !self.fill_value.is_finite() {
            return Err(MaskError::invalid_config("fill_value must be finite"));
        }
        self.sampler().map(|_| ())
    }

    /// Chip sampler for these settings
    pub fn sampler(&self) -> Result<TileSampler> {
        Ok(TileSampler::new(self.chip_size, self.overlap)?.with_fill_value(self.fill_value))
    }

    pub fn schema() -> RootSchema {
        schema_for!(DetectionConfig)
    }
}

/// Fluent construction of a validated [`DetectionConfig`]
#[derive(Debug, Clone, Default)]
pub struct DetectionConfigBuilder {
    config: DetectionConfig,
}

impl DetectionConfigBuilder {
    pub fn confidence_threshold(mut self, value: f32) -> Self {
        self.config.confidence_threshold = value;
        self
    }

    pub fn mask_threshold(mut self, value: f32) -> Self {
        self.config.mask_threshold = value;
        self
    }

    pub fn min_object_area(mut self, value: f64) -> Self {
        self.config.min_object_area = value;
        self
    }

    pub fn overlap(mut self, value: f64) -> Self {
        self.config.overlap = value;
        self
    }

    pub fn chip_size(mut self, width: u32, height: u32) -> Self {
        self.config.chip_size = (width, height);
        self
    }

    pub fn batch_size(mut self, value: usize) -> Self {
        self.config.batch_size = value;
        self
    }

    pub fn epsilon(mut self, value: f64) -> Self {
        self.config.epsilon = value;
        self
    }

    pub fn blend_mode(mut self, mode: BlendMode) -> Self {
        self.config.blend_mode = mode;
        self
    }

    pub fn fill_value(mut self, value: f32) -> Self {
        self.config.fill_value = value;
        self
    }

    pub fn max_retries(mut self, value: u32) -> Self {
        self.config.max_retries = value;
        self
    }

    pub fn build(self) -> Result<DetectionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DetectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chip_size, (400, 400));
        assert_eq!(config.sampler().expect("valid").stride(), (300, 300));
    }

    #[test]
    fn test_builder_validates() {
        let config = DetectionConfig::builder()
            .mask_threshold(0.6)
            .min_object_area(0.0)
            .chip_size(256, 128)
            .build()
            .expect("valid config");
        assert_eq!(config.mask_threshold, 0.6);
        assert_eq!(config.chip_size, (256, 128));

        for builder in [
            DetectionConfig::builder().overlap(1.0),
            DetectionConfig::builder().mask_threshold(f32::NAN),
            DetectionConfig::builder().batch_size(0),
            DetectionConfig::builder().chip_size(0, 10),
            DetectionConfig::builder().min_object_area(-1.0),
            DetectionConfig::builder().epsilon(f64::INFINITY),
        ] {
            assert!(matches!(builder.build(), Err(MaskError::InvalidConfiguration(_))));
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DetectionConfig =
            serde_json::from_str(r#"{ "mask_threshold": 0.7, "blend_mode": "average" }"#)
                .expect("valid json");
        assert_eq!(config.mask_threshold, 0.7);
        assert_eq!(config.blend_mode, BlendMode::Average);
        assert_eq!(config.batch_size, 4);
    }

    #[test]
    fn test_schema_lists_fields() {
        let schema = serde_json::to_value(DetectionConfig::schema()).expect("serializable");
        let properties = &schema["properties"];
        assert!(properties.get("confidence_threshold").is_some());
        assert!(properties.get("chip_size").is_some());
    }
}
