use strum::Display;
use thiserror::Error;

/// Pipeline stage at which a raster-level failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    #[default]
    LoadRaster,
    Sampling,
    Inference,
    Assembly,
    Extraction,
    Vectorization,
    Attribution,
    WriteOutput,
}

#[derive(Error, Debug)]
pub enum MaskError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Degenerate geometry for instance {label}: {distinct_vertices} distinct vertices after simplification")]
    DegenerateGeometry { label: u32, distinct_vertices: usize },

    #[error("Inference failed for chip {chip_index} after {attempts} attempt(s): {message}")]
    InferenceFailure {
        chip_index: usize,
        attempts: u32,
        message: String,
    },

    #[error(
        "Processing {path} failed during {stage} \
         ({chips_completed} chips and {instances_completed} instances completed): {source}"
    )]
    RasterProcessingFailure {
        path: String,
        stage: Stage,
        chips_completed: usize,
        instances_completed: usize,
        source: Box<MaskError>,
    },

    #[error("Failed to load image: {0}")]
    ImageLoad(#[from] image::ImageError),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("Unsupported raster: {0}")]
    UnsupportedRaster(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),
}

impl MaskError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Stage reported by a raster-level failure, if this is one
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::RasterProcessingFailure { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MaskError>;
