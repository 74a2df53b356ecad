use crate::error::{BiomassError, Result};
use crate::raster::{Band, GridSpec, Pixel, Raster, RasterSeries};
use crate::temporal::year_bounds;
use log::{debug, warn};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Commutative pixel reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    Sum,
    Mean,
}

impl Reducer {
    /// Reduce a set of samples, skipping no-data. `None` when no sample is
    /// valid.
    pub fn reduce<I>(self, samples: I) -> Pixel
    where
        I: IntoIterator<Item = Pixel>,
    {
        let (total, n) = samples
            .into_iter()
            .flatten()
            .fold((0.0, 0usize), |(total, n), v| (total + v, n + 1));
        if n == 0 {
            return None;
        }
        match self {
            Reducer::Sum => Some(total),
            Reducer::Mean => Some(total / n as f64),
        }
    }

    /// Pixel value of an aggregate over zero rasters: "no growth" for a sum,
    /// undefined for a mean.
    pub fn empty_value(self) -> Pixel {
        match self {
            Reducer::Sum => Some(0.0),
            Reducer::Mean => None,
        }
    }
}

/// Number of rasters in `series` dated inside `year`.
pub fn count(series: &RasterSeries, year: i32) -> Result<usize> {
    let window = year_bounds(year)?;
    Ok(series.in_window(&window).count())
}

/// Pixel-wise reduction of `band` over the members of `series` dated in
/// `year`. All members must lie on `grid`; the result has no timestamp.
pub fn aggregate(
    series: &RasterSeries,
    band: &str,
    year: i32,
    reducer: Reducer,
    grid: &GridSpec,
) -> Result<Raster> {
    let window = year_bounds(year)?;
    let members: Vec<&Raster> = series.in_window(&window).collect();

    if members.is_empty() {
        warn!(
            "Empty aggregate: no '{}' rasters in {}, {:?} yields {}",
            band,
            year,
            reducer,
            if reducer == Reducer::Sum { "zeros" } else { "no-data" }
        );
        return Ok(Raster::filled(grid.clone(), band, reducer.empty_value()));
    }

    let layers = members
        .into_iter()
        .map(|r| {
            if !r.grid().is_aligned_with(grid) {
                return Err(BiomassError::GridMismatch(format!(
                    "raster {} is not on the aggregation grid",
                    r.label()
                )));
            }
            r.band(band).map(|b| &b.data)
        })
        .collect::<Result<Vec<&Array2<Pixel>>>>()?;

    debug!(
        "Aggregating {} '{}' rasters for {} with {:?}",
        layers.len(),
        band,
        year,
        reducer
    );

    let (nrows, ncols) = grid.shape();
    let rows: Vec<Vec<Pixel>> = (0..nrows)
        .into_par_iter()
        .map(|row| {
            (0..ncols)
                .map(|col| reducer.reduce(layers.iter().map(|layer| layer[[row, col]])))
                .collect()
        })
        .collect();

    let flat: Vec<Pixel> = rows.into_iter().flatten().collect();
    let data = Array2::from_shape_vec((nrows, ncols), flat)?;
    Raster::new(grid.clone(), vec![Band::new(band, data)])
}
