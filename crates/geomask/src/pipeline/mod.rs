pub mod builder;

use std::path::Path;

use tracing::{debug, info, warn};

use crate::{
    algorithms::{
        assembly::{ChipMask, MaskAssembler},
        attributes::attribute_all,
        extraction::{Instance, InstanceExtractor},
        preprocessing::suppress_below,
        tiling::{Chip, TileSampler},
        PolygonVectorizer,
    },
    config::DetectionConfig,
    error::{MaskError, Result, Stage},
    io::load_raster,
    raster::{Band, Crs, GeoTransform, ProbabilityMask, Raster},
    traits::ChipModel,
    types::{DetectionOutput, PolygonCollection},
};

/// Where a run got to, reported when it fails
#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    stage: Stage,
    chips_completed: usize,
    instances_completed: usize,
}

/// Raster in, attributed polygons out
pub struct DetectionPipeline {
    config: DetectionConfig,
    sampler: TileSampler,
    model: Box<dyn ChipModel>,
    vectorizer: PolygonVectorizer,
}

impl DetectionPipeline {
    /// Create a new pipeline builder
    pub fn builder() -> builder::PipelineBuilder {
        builder::PipelineBuilder::new()
    }

    /// Create a pipeline from already validated parts
    pub fn new(
        config: DetectionConfig,
        model: Box<dyn ChipModel>,
        vectorizer: PolygonVectorizer,
    ) -> Result<Self> {
        config.validate()?;
        let sampler = config.sampler()?;
        Ok(Self {
            config,
            sampler,
            model,
            vectorizer,
        })
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn sampler(&self) -> &TileSampler {
        &self.sampler
    }

    /// Load `path` and run every stage over it
    pub fn run_path(&self, path: impl AsRef<Path>) -> Result<DetectionOutput> {
        let path = path.as_ref();
        let raster = load_raster(path).map_err(|source| MaskError::RasterProcessingFailure {
            path: path.display().to_string(),
            stage: Stage::LoadRaster,
            chips_completed: 0,
            instances_completed: 0,
            source: Box::new(source),
        })?;
        self.process(&raster, &path.display().to_string())
    }

    /// Run every stage over an in-memory raster
    pub fn run(&self, raster: &Raster) -> Result<DetectionOutput> {
        self.process(raster, "<in-memory raster>")
    }

    /// Run every stage; failures are reported against `source`
    pub fn process(&self, raster: &Raster, source: &str) -> Result<DetectionOutput> {
        self.tracked(source, |progress| self.run_stages(raster, progress))
    }

    /// Run `stages`, wrapping any failure with how far they got
    fn tracked<T>(
        &self,
        source: &str,
        stages: impl FnOnce(&mut Progress) -> Result<T>,
    ) -> Result<T> {
        let mut progress = Progress::default();
        stages(&mut progress).map_err(|err| {
            warn!(
                path = source,
                stage = %progress.stage,
                chips_completed = progress.chips_completed,
                "raster processing failed"
            );
            MaskError::RasterProcessingFailure {
                path: source.to_string(),
                stage: progress.stage,
                chips_completed: progress.chips_completed,
                instances_completed: progress.instances_completed,
                source: Box::new(err),
            }
        })
    }

    fn run_stages(&self, raster: &Raster, progress: &mut Progress) -> Result<DetectionOutput> {
        let mask = self.assemble_mask(raster, progress)?;

        progress.stage = Stage::Extraction;
        let instances = self.extract_instances(&mask, raster.pixel_area())?;

        let (polygons, degenerate_dropped) =
            self.vectorize_instances(&instances, raster.transform(), raster.crs(), progress);

        let mask = Raster::single_band(mask, *raster.transform(), *raster.crs())?;
        info!(
            chips = progress.chips_completed,
            instances = instances.len(),
            polygons = polygons.len(),
            degenerate_dropped,
            "detection finished"
        );
        Ok(DetectionOutput {
            mask,
            instances,
            polygons,
            chips_processed: progress.chips_completed,
            degenerate_dropped,
        })
    }

    /// Tile, infer and blend `raster` into a full-resolution probability mask
    pub fn generate_mask(&self, raster: &Raster) -> Result<ProbabilityMask> {
        self.assemble_mask(raster, &mut Progress::default())
    }

    fn assemble_mask(&self, raster: &Raster, progress: &mut Progress) -> Result<ProbabilityMask> {
        progress.stage = Stage::Sampling;
        let total = self.sampler.chip_count(raster.width(), raster.height());
        info!(
            width = raster.width(),
            height = raster.height(),
            chips = total,
            model = self.model.name(),
            "generating mask"
        );

        let mut assembler = MaskAssembler::new(raster.extent(), self.config.blend_mode);
        let mut chips = self.sampler.sample(raster);
        loop {
            progress.stage = Stage::Sampling;
            let batch: Vec<Chip> = chips.by_ref().take(self.config.batch_size).collect();
            if batch.is_empty() {
                break;
            }

            progress.stage = Stage::Inference;
            let masks = self.infer_batch(&batch)?;

            progress.stage = Stage::Assembly;
            for mask in &masks {
                assembler.add(mask)?;
            }
            progress.chips_completed += batch.len();
            debug!(completed = progress.chips_completed, total, "batch assembled");
        }
        assembler.finish()
    }

    fn infer_batch(&self, batch: &[Chip]) -> Result<Vec<ChipMask>> {
        let results = self.model.infer_batch(batch);
        if results.len() != batch.len() {
            return Err(MaskError::invalid_config(format!(
                "model {} returned {} masks for {} chips",
                self.model.name(),
                results.len(),
                batch.len()
            )));
        }
        batch
            .iter()
            .zip(results)
            .map(|(chip, result)| {
                let mut probabilities = match result {
                    Ok(probabilities) => probabilities,
                    Err(err) => self.retry(chip, err)?,
                };
                suppress_below(&mut probabilities, self.config.confidence_threshold);
                ChipMask::new(chip.window, probabilities)
            })
            .collect()
    }

    /// Re-run a failed chip up to `max_retries` more times
    fn retry(&self, chip: &Chip, first: MaskError) -> Result<Band> {
        let mut last = first;
        for attempt in 1..=self.config.max_retries {
            warn!(chip = chip.window.index, attempt, error = %last, "retrying chip inference");
            match self.model.infer(chip) {
                Ok(probabilities) => return Ok(probabilities),
                Err(err) => last = err,
            }
        }
        Err(MaskError::InferenceFailure {
            chip_index: chip.window.index,
            attempts: self.config.max_retries + 1,
            message: last.to_string(),
        })
    }

    /// Threshold, label and area-filter a full-resolution mask
    pub fn extract_instances(&self, mask: &ProbabilityMask, pixel_area: f64) -> Result<Vec<Instance>> {
        let extractor = InstanceExtractor::new(
            self.config.mask_threshold,
            self.config.min_object_area,
            pixel_area,
        )?;
        let instances = extractor.extract(mask);
        info!(instances = instances.len(), "extracted instances");
        Ok(instances)
    }

    /// Vectorize and attribute instances; the second value counts dropped degenerate instances
    pub fn vectorize(
        &self,
        instances: &[Instance],
        transform: &GeoTransform,
        crs: &Crs,
    ) -> (PolygonCollection, usize) {
        self.vectorize_instances(instances, transform, crs, &mut Progress::default())
    }

    fn vectorize_instances(
        &self,
        instances: &[Instance],
        transform: &GeoTransform,
        crs: &Crs,
        progress: &mut Progress,
    ) -> (PolygonCollection, usize) {
        progress.stage = Stage::Vectorization;
        let (polygons, dropped) = self.vectorizer.vectorize_all(instances, transform);
        if dropped > 0 {
            warn!(dropped, "dropped degenerate instances");
        }
        progress.instances_completed = instances.len();

        progress.stage = Stage::Attribution;
        (PolygonCollection::new(attribute_all(polygons, crs), *crs), dropped)
    }

    /// Skip inference: treat `band` of an existing mask raster as the probability mask
    pub fn vectorize_mask(&self, mask_raster: &Raster, band: usize) -> Result<DetectionOutput> {
        self.tracked("<in-memory mask>", |progress| {
            progress.stage = Stage::Extraction;
            let mask = mask_raster.band(band).ok_or_else(|| {
                MaskError::invalid_config(format!(
                    "band {band} requested but the mask has {} band(s)",
                    mask_raster.band_count()
                ))
            })?;
            let instances = self.extract_instances(mask, mask_raster.pixel_area())?;
            let (polygons, degenerate_dropped) = self.vectorize_instances(
                &instances,
                mask_raster.transform(),
                mask_raster.crs(),
                progress,
            );
            Ok(DetectionOutput {
                mask: Raster::single_band(mask.clone(), *mask_raster.transform(), *mask_raster.crs())?,
                instances,
                polygons,
                chips_processed: 0,
                degenerate_dropped,
            })
        })
    }

    /// Get information about the pipeline configuration
    pub fn info(&self) -> String {
        let (chip_width, chip_height) = self.sampler.chip_size();
        format!(
            "Pipeline: model {}, {}x{} chips with {:.0}% overlap in batches of {}, {} blending, {} simplification at {} px",
            self.model.name(),
            chip_width,
            chip_height,
            self.sampler.overlap() * 100.0,
            self.config.batch_size,
            self.config.blend_mode,
            self.vectorizer.simplifier_name(),
            self.vectorizer.epsilon()
        )
    }
}
