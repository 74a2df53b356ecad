//! 8-day net primary productivity.
//!
//! Each 8-day GPP raster is scaled by the ratio of its year's mean annual NPP
//! to the year's total GPP:
//!
//! ```text
//! NPP8 = (GPP8 / sum(GPP in year)) * mean(NPP in year)
//! ```
//!
//! Pixels where the yearly GPP total is zero or missing have no defined
//! ratio and come out as no-data.

use crate::annual::{aggregate, count, Reducer};
use crate::error::Result;
use crate::raster::{Band, GridSpec, Pixel, Raster, RasterSeries};
use crate::temporal::year_of;
use log::{debug, info};
use ndarray::Zip;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

pub const NPP8_BAND: &str = "NPP8";
pub const DEFAULT_GPP_BAND: &str = "Gpp";
pub const DEFAULT_NPP_BAND: &str = "Npp";

/// One year's aggregates feeding the NPP8 ratio.
#[derive(Debug, Clone)]
pub struct AnnualRatio {
    pub year: i32,
    /// Pixel-wise sum of GPP over the year.
    pub gpp_total: Raster,
    /// Pixel-wise mean of annual NPP over the year.
    pub npp_mean: Raster,
    pub gpp_count: usize,
    pub npp_count: usize,
}

impl AnnualRatio {
    pub fn is_complete(&self) -> bool {
        self.gpp_count > 0 && self.npp_count > 0
    }
}

/// `(g / total) * npp`, or no-data when any input is missing, the total is
/// zero, or the result is not finite.
pub fn scale_pixel(g: Pixel, gpp_total: Pixel, npp_mean: Pixel) -> Pixel {
    match (g, gpp_total, npp_mean) {
        (Some(g), Some(total), Some(npp)) if total != 0.0 => {
            let v = (g / total) * npp;
            v.is_finite().then_some(v)
        }
        _ => None,
    }
}

/// Derives NPP8 rasters from explicit GPP and NPP sources on a shared grid.
#[derive(Debug, Clone)]
pub struct Npp8Deriver<'a> {
    gpp_series: &'a RasterSeries,
    npp_series: &'a RasterSeries,
    grid: GridSpec,
    gpp_band: String,
    npp_band: String,
}

impl<'a> Npp8Deriver<'a> {
    pub fn new(gpp_series: &'a RasterSeries, npp_series: &'a RasterSeries, grid: GridSpec) -> Self {
        Self {
            gpp_series,
            npp_series,
            grid,
            gpp_band: DEFAULT_GPP_BAND.to_string(),
            npp_band: DEFAULT_NPP_BAND.to_string(),
        }
    }

    pub fn with_bands(mut self, gpp_band: impl Into<String>, npp_band: impl Into<String>) -> Self {
        self.gpp_band = gpp_band.into();
        self.npp_band = npp_band.into();
        self
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// GPP total and NPP mean for `year`.
    pub fn annual(&self, year: i32) -> Result<AnnualRatio> {
        let gpp_total = aggregate(self.gpp_series, &self.gpp_band, year, Reducer::Sum, &self.grid)?;
        let npp_mean = aggregate(self.npp_series, &self.npp_band, year, Reducer::Mean, &self.grid)?;
        Ok(AnnualRatio {
            year,
            gpp_total,
            npp_mean,
            gpp_count: count(self.gpp_series, year)?,
            npp_count: count(self.npp_series, year)?,
        })
    }

    /// Years whose GPP or NPP source has no rasters, among the years of
    /// `gpp8_series`.
    pub fn empty_years(&self, gpp8_series: &RasterSeries) -> Result<Vec<(String, i32)>> {
        let mut empty = Vec::new();
        for year in Self::years(gpp8_series)? {
            if count(self.gpp_series, year)? == 0 {
                empty.push((self.gpp_band.clone(), year));
            }
            if count(self.npp_series, year)? == 0 {
                empty.push((self.npp_band.clone(), year));
            }
        }
        Ok(empty)
    }

    fn years(series: &RasterSeries) -> Result<BTreeSet<i32>> {
        series.iter().map(year_of).collect()
    }

    /// One NPP8 raster per input raster, in input order, each carrying the
    /// input's timestamp and properties.
    pub fn derive(&self, gpp8_series: &RasterSeries) -> Result<RasterSeries> {
        let years = Self::years(gpp8_series)?;
        info!(
            "Deriving NPP8 for {} rasters across {} years",
            gpp8_series.len(),
            years.len()
        );

        let ratios: BTreeMap<i32, AnnualRatio> = years
            .into_par_iter()
            .map(|year| self.annual(year).map(|ratio| (year, ratio)))
            .collect::<Result<_>>()?;

        let rasters = gpp8_series
            .rasters()
            .par_iter()
            .map(|g| {
                let year = year_of(g)?;
                // every year of the series was aggregated above
                let ratio = &ratios[&year];
                self.derive_one(g, ratio)
            })
            .collect::<Result<Vec<_>>>()?;

        RasterSeries::new(vec![NPP8_BAND.to_string()], rasters)
    }

    fn derive_one(&self, g: &Raster, ratio: &AnnualRatio) -> Result<Raster> {
        debug!("NPP8 for {} (year {})", g.label(), ratio.year);
        if !g.grid().is_aligned_with(&self.grid) {
            return Err(crate::error::BiomassError::GridMismatch(format!(
                "GPP raster {} is not on the derivation grid",
                g.label()
            )));
        }

        let gpp8 = &g.band(&self.gpp_band)?.data;
        let total = &ratio.gpp_total.band(&self.gpp_band)?.data;
        let npp = &ratio.npp_mean.band(&self.npp_band)?.data;

        let data = Zip::from(gpp8)
            .and(total)
            .and(npp)
            .map_collect(|&g, &t, &n| scale_pixel(g, t, n));

        Ok(Raster::new(self.grid.clone(), vec![Band::new(NPP8_BAND, data)])?.with_metadata_of(g))
    }
}
