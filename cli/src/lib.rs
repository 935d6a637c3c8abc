use geomask::{
    AttributeFilter, BandModel, DetectionConfig, DetectionPipeline, MaskError,
    algorithms::{DouglasPeuckerSimplifier, NoSimplifier, VisvalingamWhyattSimplifier},
};

use schemars::{JsonSchema, schema::RootSchema, schema_for};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    TomlDeError(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSerError(#[from] toml::ser::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    MaskError(#[from] MaskError),
    #[error("Missing '{0}' field")]
    MissingField(&'static str),
    #[error("Unsupported file format. Please use .toml or .json files")]
    UnsupportedFileFormat,
}

/// Ring simplification applied while vectorizing
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Simplification {
    #[default]
    DouglasPeucker,
    VisvalingamWhyatt,
    None,
}

/// One detection run: input raster, outputs, and every tunable
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RunConfig {
    pub input_path: String,
    /// Probability mask GeoTIFF, skipped when absent
    #[serde(default)]
    pub mask_output: Option<String>,
    pub vector_output: String,
    /// Polygons that pass `filter`, skipped when absent
    #[serde(default)]
    pub filtered_output: Option<String>,
    #[serde(default)]
    pub simplification: Simplification,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub model: BandModel,
    #[serde(default)]
    pub filter: AttributeFilter,
}

impl RunConfig {
    pub fn new(input_path: impl Into<String>, vector_output: impl Into<String>) -> Self {
        Self {
            input_path: input_path.into(),
            mask_output: None,
            vector_output: vector_output.into(),
            filtered_output: None,
            simplification: Simplification::default(),
            detection: DetectionConfig::default(),
            model: BandModel::default(),
            filter: AttributeFilter::default(),
        }
    }

    /// Load RunConfig from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, CliError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load RunConfig from TOML string
    pub fn from_toml(content: &str) -> Result<Self, CliError> {
        let config: RunConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load RunConfig from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, CliError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Load RunConfig from JSON string
    pub fn from_json(content: &str) -> Result<Self, CliError> {
        let config: RunConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Auto-detect file format and load configuration
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CliError> {
        let path_ref = path.as_ref();
        match path_ref.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(CliError::UnsupportedFileFormat),
        }
    }

    /// Save RunConfig to a TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CliError> {
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, CliError> {
        Ok(toml::to_string_pretty(&self)?)
    }

    pub fn to_json(&self) -> Result<String, CliError> {
        Ok(serde_json::to_string_pretty(&self)?)
    }

    pub fn validate(&self) -> Result<(), CliError> {
        if self.input_path.trim().is_empty() {
            return Err(CliError::MissingField("input_path"));
        }
        if self.vector_output.trim().is_empty() {
            return Err(CliError::MissingField("vector_output"));
        }
        self.detection.validate()?;
        Ok(())
    }

    /// Pipeline described by this configuration
    pub fn pipeline(&self) -> Result<DetectionPipeline, CliError> {
        let builder = DetectionPipeline::builder()
            .config(self.detection.clone())
            .with_model(self.model);
        let builder = match self.simplification {
            Simplification::DouglasPeucker => builder.set_simplifier(DouglasPeuckerSimplifier),
            Simplification::VisvalingamWhyatt => builder.set_simplifier(VisvalingamWhyattSimplifier),
            Simplification::None => builder.set_simplifier(NoSimplifier),
        };
        Ok(builder.build()?)
    }

    pub fn schema() -> RootSchema {
        schema_for!(RunConfig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geomask::Attribute;

    const TOML: &str = r#"
input_path = "scene.tif"
vector_output = "panels.geojson"
filtered_output = "compact.geojson"
simplification = "visvalingam_whyatt"

[detection]
chip_size = [256, 256]
overlap = 0.5

[model]
band = 1

[[filter.bounds]]
attribute = "elongation"
less_than = 10.0
"#;

    #[test]
    fn test_toml_fills_defaults() {
        let config = RunConfig::from_toml(TOML).expect("valid TOML");
        assert_eq!(config.detection.chip_size, (256, 256));
        assert_eq!(config.detection.overlap, 0.5);
        assert_eq!(config.detection.mask_threshold, DetectionConfig::default().mask_threshold);
        assert_eq!(config.model, BandModel::new(1, 1.0));
        assert_eq!(config.simplification, Simplification::VisvalingamWhyatt);
        assert_eq!(
            config.filter,
            AttributeFilter::new().less_than(Attribute::Elongation, 10.0)
        );
        assert_eq!(config.mask_output, None);

        let pipeline = config.pipeline().expect("valid pipeline");
        assert!(pipeline.info().contains("visvalingam_whyatt"));
    }

    #[test]
    fn test_json_and_toml_agree() {
        let config = RunConfig::from_toml(TOML).expect("valid TOML");
        let from_json = RunConfig::from_json(&config.to_json().expect("json")).expect("valid JSON");
        assert_eq!(from_json, config);
        let from_toml = RunConfig::from_toml(&config.to_toml().expect("toml")).expect("valid TOML");
        assert_eq!(from_toml, config);
    }

    #[test]
    fn test_invalid_detection_settings_are_rejected() {
        let content = TOML.replace("overlap = 0.5", "overlap = 1.0");
        assert!(matches!(
            RunConfig::from_toml(&content),
            Err(CliError::MaskError(MaskError::InvalidConfiguration(_)))
        ));
        assert!(matches!(
            RunConfig::new("", "out.geojson").validate(),
            Err(CliError::MissingField("input_path"))
        ));
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().expect("temp dir");
        let toml_path = dir.path().join("run.toml");
        RunConfig::new("scene.tif", "panels.geojson")
            .to_toml_file(&toml_path)
            .expect("written");
        let config = RunConfig::from_file(&toml_path).expect("loaded");
        assert_eq!(config.input_path, "scene.tif");

        let yaml_path = dir.path().join("run.yaml");
        fs::write(&yaml_path, "input_path: scene.tif").expect("written");
        assert!(matches!(
            RunConfig::from_file(&yaml_path),
            Err(CliError::UnsupportedFileFormat)
        ));
    }

    #[test]
    fn test_schema_names_top_level_fields() {
        let schema = serde_json::to_value(RunConfig::schema()).expect("schema serializes");
        let properties = &schema["properties"];
        assert!(properties.get("input_path").is_some());
        assert!(properties.get("detection").is_some());
    }
}
