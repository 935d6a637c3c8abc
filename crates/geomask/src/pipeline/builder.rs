use crate::{
    algorithms::{
        DouglasPeuckerSimplifier, NoSimplifier, PolygonVectorizer, VisvalingamWhyattSimplifier,
    },
    config::DetectionConfig,
    error::Result,
    model::BandModel,
    pipeline::DetectionPipeline,
    traits::{ChipModel, RingSimplifier},
};

/// Builder for creating detection pipelines with a fluent API
pub struct PipelineBuilder {
    config: DetectionConfig,
    model: Option<Box<dyn ChipModel>>,
    simplifier: Option<Box<dyn RingSimplifier>>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new() -> Self {
        Self {
            config: DetectionConfig::default(),
            model: None,
            simplifier: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: DetectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the detection model (replaces any existing one)
    pub fn with_model<M>(mut self, model: M) -> Self
    where
        M: ChipModel + 'static,
    {
        self.model = Some(Box::new(model));
        self
    }

    /// Read probabilities from `band` of the input, multiplied by `scale`
    pub fn with_band_model(self, band: usize, scale: f32) -> Self {
        self.with_model(BandModel::new(band, scale))
    }

    /// Set the ring simplifier (replaces any existing one)
    pub fn set_simplifier<S>(mut self, simplifier: S) -> Self
    where
        S: RingSimplifier + 'static,
    {
        self.simplifier = Some(Box::new(simplifier));
        self
    }

    /// Douglas-Peucker simplification at `epsilon` pixels
    pub fn with_simplification(mut self, epsilon: f64) -> Self {
        self.config.epsilon = epsilon;
        self.set_simplifier(DouglasPeuckerSimplifier)
    }

    /// Topology-preserving Visvalingam-Whyatt simplification at `epsilon` pixels
    pub fn with_vw_simplification(mut self, epsilon: f64) -> Self {
        self.config.epsilon = epsilon;
        self.set_simplifier(VisvalingamWhyattSimplifier)
    }

    /// Keep the exact pixel outlines
    pub fn without_simplification(self) -> Self {
        self.set_simplifier(NoSimplifier)
    }

    /// Build the pipeline with default components if not specified
    pub fn build(self) -> Result<DetectionPipeline> {
        let model = self
            .model
            .unwrap_or_else(|| Box::new(BandModel::default()));
        let simplifier = self
            .simplifier
            .unwrap_or_else(|| Box::new(DouglasPeuckerSimplifier));
        let vectorizer = PolygonVectorizer::from_boxed(simplifier, self.config.epsilon);
        DetectionPipeline::new(self.config, model, vectorizer)
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
