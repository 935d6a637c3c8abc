//! # Geospatial Mask Extraction Library
//!
//! Turns per-pixel detection scores over a georeferenced raster into
//! attributed vector polygons: chips are sampled with overlap, scored by a
//! [`ChipModel`], blended back into one probability mask, split into
//! connected instances, traced into simplified polygons and measured in
//! metres.
//!
//! ## Core Features
//!
//! - **Overlapping Tiling**: Fixed-size chips with edge fill and deterministic blending
//! - **Pluggable Models**: Any `Fn(&Chip) -> Result<Band>` or [`ChipModel`] implementation
//! - **Hole-aware Vectorization**: Pixel-edge tracing, simplification and orthogonalization
//! - **Geometric Attributes**: Area, perimeter, elongation, orientation and shape indices
//! - **GeoTIFF and GeoJSON I/O**: Georeferencing is preserved end to end
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use geomask::{DetectionConfig, DetectionPipeline};
//!
//! let config = DetectionConfig::builder()
//!     .chip_size(512, 512)
//!     .overlap(0.25)
//!     .build()?;
//!
//! // Band 0 of the input already holds scores in [0, 1]
//! let pipeline = DetectionPipeline::builder()
//!     .config(config)
//!     .with_band_model(0, 1.0)
//!     .build()?;
//!
//! let output = pipeline.run_path("scene.tif")?;
//! output.save_mask("mask.tif")?;
//!
//! let panels = output.polygons.filter(|a| a.elongation < 10.0);
//! panels.save_geojson("panels.geojson")?;
//! # Ok::<(), geomask::MaskError>(())
//! ```
//!
//! ## Custom Model
//!
//! ```rust,no_run
//! use geomask::{Band, Chip, DetectionPipeline, Result};
//!
//! let model = |chip: &Chip| -> Result<Band> {
//!     let mut scores = chip.band(0).cloned().unwrap_or_default();
//!     scores.pixels_mut().for_each(|p| p.0[0] = p.0[0].clamp(0.0, 1.0));
//!     Ok(scores)
//! };
//!
//! let pipeline = DetectionPipeline::builder()
//!     .with_model(model)
//!     .with_vw_simplification(0.5)
//!     .build()?;
//! # Ok::<(), geomask::MaskError>(())
//! ```

// Core modules
pub mod error;
pub mod raster;
pub mod types;
pub mod traits;
pub mod algorithms;
pub mod config;
pub mod model;
pub mod filter;
pub mod pipeline;
pub mod io;
pub mod typed_geojson;

// Re-exports for convenience
pub use algorithms::{
    AreaSummary, BlendMode, Chip, GeometricAttributes, Instance, PolygonVectorizer, TileSampler,
};
pub use config::DetectionConfig;
pub use error::{MaskError, Result, Stage};
pub use filter::{Attribute, AttributeBound, AttributeFilter};
pub use io::{load_raster, read_geotiff, write_geotiff};
pub use model::BandModel;
pub use pipeline::{DetectionPipeline, builder::PipelineBuilder};
pub use raster::{Band, Crs, GeoTransform, ProbabilityMask, Raster};
pub use traits::{ChipModel, RingSimplifier};
pub use types::{AttributedPolygon, DetectionOutput, PolygonCollection, VectorPolygon};
