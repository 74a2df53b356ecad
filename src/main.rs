use clap::Parser;
use env_logger::Env;
use log::{info, warn};

use npp8_biomass::cli::Args;
use npp8_biomass::config::PipelineConfig;
use npp8_biomass::error::Result;
use npp8_biomass::io::{read_features, write_raster, DirectorySource};
use npp8_biomass::output::{
    export_file_name, layer_file_name, validate_compression, write_series_csv,
};
use npp8_biomass::pipeline::{Diagnostic, Pipeline};

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    info!("=== NPP8 Biomass Estimation ===");

    // Set thread pool size if specified
    if let Some(n_threads) = args.threads {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build_global()
        {
            warn!("Could not configure thread pool: {}", e);
        } else {
            info!("Using {} threads", n_threads);
        }
    } else {
        info!("Using all available threads");
    }

    let base = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    let config = args.apply_to(base);
    if args.export {
        validate_compression(&args.compression)?;
    }

    // Configuration errors abort here, before any raster is read
    let pipeline = Pipeline::new(config)?;
    let config = pipeline.config();

    let features = read_features(&args.regions)?;
    let source = DirectorySource::new()
        .with_collection(&config.gpp_collection, &args.gpp_dir, &config.gpp_band)
        .with_collection(&config.npp_collection, &args.npp_dir, &config.npp_band);

    let output = pipeline.run(&source, &features)?;

    for diagnostic in &output.diagnostics {
        match diagnostic {
            Diagnostic::EmptyAggregate { band, year } => {
                warn!("No '{}' rasters for {}", band, year)
            }
            Diagnostic::SpatialMismatch => warn!("Region does not overlap the input rasters"),
        }
    }

    for (class, pixels) in output.class_counts(config) {
        info!("Composite pixels {:?}: {}", class, pixels);
    }

    std::fs::create_dir_all(&args.output_dir)?;
    let csv_path = args.output_dir.join(format!(
        "biomass_series_{}-{}.csv",
        config.start_year, config.end_year
    ));
    write_series_csv(&csv_path, &output.series)?;

    if args.export {
        let tif_path = args
            .output_dir
            .join(export_file_name(config.start_year, config.end_year, config.scale));
        write_raster(&tif_path, &output.composite, &args.compression)?;

        let npp8_path = args.output_dir.join(layer_file_name(
            "npp8",
            config.start_year,
            config.end_year,
            config.scale,
        ));
        write_raster(&npp8_path, &output.npp8_composite, &args.compression)?;
    }

    info!("=== Done! ===");
    Ok(())
}
