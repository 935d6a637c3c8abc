use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, eyre};
use geomask::{
    AttributeFilter, DetectionConfig, DetectionPipeline, PolygonCollection, load_raster,
};
use geomask_cli::RunConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print size, georeferencing and band statistics of a raster
    Info {
        /// GeoTIFF or plain image
        input: PathBuf,
    },
    /// Run the full detection pipeline from a configuration file
    Detect {
        /// Path to the TOML or JSON run configuration
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Vectorize an existing probability mask without running a model
    Vectorize {
        /// Mask GeoTIFF
        #[arg(short, long)]
        input: PathBuf,
        /// GeoJSON output path
        #[arg(short, long)]
        output: PathBuf,
        /// Band holding the probabilities
        #[arg(long, default_value = "0")]
        band: usize,
        #[arg(long, default_value = "0.5")]
        mask_threshold: f32,
        /// Minimum instance area in squared CRS units
        #[arg(long, default_value = "100.0")]
        min_object_area: f64,
        /// Simplification tolerance in pixels
        #[arg(long, default_value = "0.2")]
        epsilon: f64,
    },
    /// Keep polygons whose attributes satisfy every bound, e.g. `elongation<10`
    Filter {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Bounds such as `area_m2>5` or `elongation<10`
        #[arg(short = 'w', long = "where", required = true)]
        bounds: Vec<String>,
    },
    /// Print area statistics of a polygon GeoJSON
    Summarize {
        input: PathBuf,
    },
    /// Print the JSON schema of a configuration document
    Schema {
        #[arg(value_enum, default_value_t = SchemaKind::Run)]
        kind: SchemaKind,
    },
    /// Write a configuration skeleton with default settings
    Init {
        /// Raster to process
        #[arg(short, long)]
        input: PathBuf,
        /// GeoJSON output of the run
        #[arg(short, long)]
        vector_output: PathBuf,
        /// Where to save the generated TOML configuration
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemaKind {
    Run,
    Detection,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Info { input } => print_info(input)?,
        Commands::Detect { config } => detect(config)?,
        Commands::Vectorize {
            input,
            output,
            band,
            mask_threshold,
            min_object_area,
            epsilon,
        } => {
            let config = DetectionConfig::builder()
                .mask_threshold(*mask_threshold)
                .min_object_area(*min_object_area)
                .epsilon(*epsilon)
                .build()?;
            vectorize(input, output, *band, config)?;
        }
        Commands::Filter {
            input,
            output,
            bounds,
        } => filter(input, output, bounds)?,
        Commands::Summarize { input } => summarize(input)?,
        Commands::Schema { kind } => {
            let schema = match kind {
                SchemaKind::Run => RunConfig::schema(),
                SchemaKind::Detection => DetectionConfig::schema(),
            };
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
        Commands::Init {
            input,
            vector_output,
            config,
        } => {
            let run = RunConfig::new(
                input.to_string_lossy(),
                vector_output.to_string_lossy(),
            );
            run.to_toml_file(config)?;
            info!("Configuration saved to: {:?}", config);
        }
    }

    Ok(())
}

fn print_info(input: &Path) -> Result<()> {
    let raster = load_raster(input)?;
    println!("{}", serde_json::to_string_pretty(&raster.info())?);
    Ok(())
}

fn detect(config_path: &Path) -> Result<()> {
    let run = RunConfig::from_file(config_path)?;
    let pipeline = run.pipeline()?;
    info!("{}", pipeline.info());

    let output = pipeline.run_path(&run.input_path)?;
    if let Some(mask_output) = &run.mask_output {
        output.save_mask(mask_output)?;
        info!("Mask saved to: {mask_output}");
    }
    output.save_geojson(&run.vector_output)?;
    info!(
        polygons = output.polygons.len(),
        dropped = output.degenerate_dropped,
        "Polygons saved to: {}",
        run.vector_output
    );

    match (&run.filtered_output, run.filter.bounds.is_empty()) {
        (Some(path), false) => {
            let kept = PolygonCollection::new(
                run.filter.apply(&output.polygons.polygons),
                output.polygons.crs,
            );
            kept.save_geojson(path)?;
            info!(kept = kept.len(), "Filtered polygons saved to: {path}");
        }
        (Some(path), true) => warn!("No filter bounds configured, skipping {path}"),
        (None, _) => {}
    }

    if let Some(summary) = output.polygons.area_summary() {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

fn vectorize(input: &Path, output: &Path, band: usize, config: DetectionConfig) -> Result<()> {
    let pipeline = DetectionPipeline::builder().config(config).build()?;
    let mask = load_raster(input)?;
    let result = pipeline.vectorize_mask(&mask, band)?;
    result.save_geojson(output)?;
    info!(
        polygons = result.polygons.len(),
        dropped = result.degenerate_dropped,
        "Polygons saved to: {:?}",
        output
    );
    Ok(())
}

fn filter(input: &Path, output: &Path, bounds: &[String]) -> Result<()> {
    let filter = AttributeFilter::parse(bounds)?;
    let collection = PolygonCollection::from_geojson_file(input)?;
    let kept = PolygonCollection::new(filter.apply(&collection.polygons), collection.crs);
    info!("Kept {} of {} polygons", kept.len(), collection.len());
    kept.save_geojson(output)?;
    Ok(())
}

fn summarize(input: &Path) -> Result<()> {
    let collection = PolygonCollection::from_geojson_file(input)?;
    let summary = collection
        .area_summary()
        .ok_or_else(|| eyre!("{} holds no polygons", input.display()))?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
