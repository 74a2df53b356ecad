use crate::annual::Reducer;
use crate::biomass::{convert, BIOMASS_BAND};
use crate::config::{BiomassClass, PipelineConfig};
use crate::crs::resolution_in_crs_units;
use crate::error::{Result, Stage, StageContext};
use crate::npp8::{Npp8Deriver, NPP8_BAND};
use crate::raster::{GridSpec, Raster};
use crate::region::{mean_composite, select_region, series_by_region, Feature, SeriesPoint};
use crate::reproject::reproject_series;
use crate::source::RasterSource;
use log::{info, warn};
use std::collections::BTreeMap;

/// Non-fatal conditions found during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// A year of a collection had no rasters; its aggregate is all zeros
    /// (sum) or all no-data (mean).
    EmptyAggregate { band: String, year: i32 },
    /// The region yielded no valid pixel in any raster.
    SpatialMismatch,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Target grid covering the region.
    pub grid: GridSpec,
    /// Mean biomass composite, no-data outside the region.
    pub composite: Raster,
    /// Mean NPP8 composite, no-data outside the region.
    pub npp8_composite: Raster,
    /// Regional mean biomass per 8-day step.
    pub series: Vec<SeriesPoint>,
    pub diagnostics: Vec<Diagnostic>,
}

impl PipelineOutput {
    /// Number of composite pixels per biomass class.
    pub fn class_counts(&self, config: &PipelineConfig) -> BTreeMap<BiomassClass, usize> {
        let mut counts = BTreeMap::new();
        if let Ok(band) = self.composite.band(BIOMASS_BAND) {
            for value in band.data.iter().flatten() {
                *counts.entry(config.thresholds.classify(*value)).or_insert(0) += 1;
            }
        }
        counts
    }
}

/// Region → reprojection → NPP8 → biomass → composite and time series.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Validates the configuration before any data is touched.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate().at_stage(Stage::Configuration)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, source: &dyn RasterSource, features: &[Feature]) -> Result<PipelineOutput> {
        let config = &self.config;
        info!(
            "Running biomass pipeline {}-{} ({} at {} m, coefficient {})",
            config.start_year, config.end_year, config.crs, config.scale, config.coefficient
        );

        // Resolve the single region of interest
        let region = select_region(features, &config.region_attribute, config.region_value)
            .at_stage(Stage::RegionSelection)?;

        // Target grid snapped around the region bounds
        let grid = region
            .bounds()
            .and_then(|bounds| {
                let resolution = resolution_in_crs_units(&config.crs, config.scale)?;
                GridSpec::covering(bounds, config.crs.clone(), resolution)
            })
            .at_stage(Stage::Configuration)?;
        info!("Target grid: {}x{} pixels", grid.width, grid.height);

        // Fetch both collections for the whole window
        let window = config.window().at_stage(Stage::Configuration)?;
        let gpp_raw = source
            .fetch(&config.gpp_collection, &window)
            .at_stage(Stage::Acquisition)?;
        let npp_raw = source
            .fetch(&config.npp_collection, &window)
            .at_stage(Stage::Acquisition)?;
        info!(
            "Fetched {} GPP and {} NPP rasters",
            gpp_raw.len(),
            npp_raw.len()
        );

        // Put GPP and NPP on the target grid
        let gpp = reproject_series(&gpp_raw, &grid).at_stage(Stage::Reprojection)?;
        let npp = reproject_series(&npp_raw, &grid).at_stage(Stage::Reprojection)?;

        // NPP8 from the reprojected GPP, which is also its own annual source
        let deriver = Npp8Deriver::new(&gpp, &npp, grid.clone())
            .with_bands(config.gpp_band.clone(), config.npp_band.clone());
        let npp8 = deriver.derive(&gpp).at_stage(Stage::Derivation)?;

        let mut diagnostics: Vec<Diagnostic> = deriver
            .empty_years(&gpp)
            .at_stage(Stage::Derivation)?
            .into_iter()
            .map(|(band, year)| Diagnostic::EmptyAggregate { band, year })
            .collect();

        let biomass = convert(&npp8, config.coefficient).at_stage(Stage::Conversion)?;

        // Composites and regional series
        let composite =
            mean_composite(&biomass, &region, BIOMASS_BAND, &grid).at_stage(Stage::Reduction)?;
        let npp8_composite =
            mean_composite(&npp8, &region, NPP8_BAND, &grid).at_stage(Stage::Reduction)?;
        let series = series_by_region(&biomass, &region, BIOMASS_BAND, Reducer::Mean, config.scale)
            .at_stage(Stage::Reduction)?;

        if !series.is_empty() && series.iter().all(|p| p.value.is_none()) {
            warn!("No valid biomass inside the region for any time step");
            diagnostics.push(Diagnostic::SpatialMismatch);
        }

        info!(
            "Pipeline done: {} time steps, {} diagnostics",
            series.len(),
            diagnostics.len()
        );
        Ok(PipelineOutput {
            grid,
            composite,
            npp8_composite,
            series,
            diagnostics,
        })
    }
}
