use crate::error::{BiomassError, Result};
use crate::npp8::NPP8_BAND;
use crate::raster::RasterSeries;
use log::info;
use rayon::prelude::*;

pub const BIOMASS_BAND: &str = "Biomass";

/// Empirical NPP8-to-biomass multiplier (MODIS workflow default).
pub const DEFAULT_COEFFICIENT: f64 = 2.5;

/// Reject coefficients that are not finite and strictly positive.
pub fn validate_coefficient(coefficient: f64) -> Result<()> {
    if !(coefficient.is_finite() && coefficient > 0.0) {
        return Err(BiomassError::Configuration(format!(
            "biomass coefficient must be a positive number, got {}",
            coefficient
        )));
    }
    Ok(())
}

/// Multiply every NPP8 raster by `coefficient` and rename the band to
/// `Biomass`. Timestamps, properties and order are kept.
pub fn convert(npp8_series: &RasterSeries, coefficient: f64) -> Result<RasterSeries> {
    validate_coefficient(coefficient)?;
    info!(
        "Converting {} NPP8 rasters to biomass (x{})",
        npp8_series.len(),
        coefficient
    );

    let rasters = npp8_series
        .rasters()
        .par_iter()
        .map(|r| r.map_band(NPP8_BAND, BIOMASS_BAND, |p| p.map(|v| v * coefficient)))
        .collect::<Result<Vec<_>>>()?;

    RasterSeries::new(vec![BIOMASS_BAND.to_string()], rasters)
}
