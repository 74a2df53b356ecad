use crate::annual::Reducer;
use crate::crs::resolution_in_crs_units;
use crate::error::{BiomassError, Result};
use crate::raster::{Band, GridSpec, Pixel, Raster, RasterSeries};
use crate::reproject::Resampler;
use chrono::{DateTime, Utc};
use geo::{BoundingRect, Centroid, Intersects, MultiPolygon, Point, Rect};
use log::{debug, info, warn};
use ndarray::Array2;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;

/// Attribute value of a vector feature.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Integer(i64),
    Real(f64),
    Text(String),
}

/// A vector feature: polygonal geometry plus attributes.
#[derive(Debug, Clone)]
pub struct Feature {
    pub geometry: MultiPolygon<f64>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Feature {
    pub fn new(geometry: MultiPolygon<f64>) -> Self {
        Self {
            geometry,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.attributes.get(key) {
            Some(AttributeValue::Integer(v)) => Some(*v),
            _ => None,
        }
    }
}

/// The single region of interest.
#[derive(Debug, Clone)]
pub struct Region {
    pub geometry: MultiPolygon<f64>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Region {
    pub fn bounds(&self) -> Result<Rect<f64>> {
        self.geometry.bounding_rect().ok_or_else(|| {
            BiomassError::Configuration("region geometry is empty".to_string())
        })
    }

    /// Pixels of `grid` whose centre falls inside the region. A region that
    /// holds no pixel centre falls back to the pixel containing its centroid.
    pub fn mask(&self, grid: &GridSpec) -> Array2<bool> {
        let mut mask = Array2::from_shape_fn(grid.shape(), |(row, col)| {
            let (x, y) = grid.pixel_center(row, col);
            self.geometry.intersects(&Point::new(x, y))
        });
        if !mask.iter().any(|m| *m) {
            if let Some(index) = self
                .geometry
                .centroid()
                .and_then(|c| grid.pixel_index(c.x(), c.y()))
            {
                debug!("Region smaller than a pixel, using pixel {:?}", index);
                mask[index] = true;
            }
        }
        mask
    }
}

/// The one feature whose integer `attribute` equals `value`. No match or
/// several matches is a configuration error.
pub fn select_region(features: &[Feature], attribute: &str, value: i64) -> Result<Region> {
    let matches: Vec<&Feature> = features
        .iter()
        .filter(|f| f.integer(attribute) == Some(value))
        .collect();

    match matches.as_slice() {
        [feature] => {
            info!("Selected region {} = {}", attribute, value);
            Ok(Region {
                geometry: feature.geometry.clone(),
                attributes: feature.attributes.clone(),
            })
        }
        [] => Err(BiomassError::Configuration(format!(
            "no feature has {} = {}",
            attribute, value
        ))),
        many => Err(BiomassError::Configuration(format!(
            "{} features have {} = {}; the region filter must be unambiguous",
            many.len(),
            attribute,
            value
        ))),
    }
}

/// One entry of a regional time series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub time_start: DateTime<Utc>,
    /// `None` when no valid pixel of the raster falls inside the region.
    pub value: Option<f64>,
}

/// Temporal mean of `band` across the series, masked to the region. The
/// output keeps the shape of `grid`; pixels outside the region are no-data.
pub fn mean_composite(
    series: &RasterSeries,
    region: &Region,
    band: &str,
    grid: &GridSpec,
) -> Result<Raster> {
    let layers = series
        .iter()
        .map(|r| {
            if !r.grid().is_aligned_with(grid) {
                return Err(BiomassError::GridMismatch(format!(
                    "raster {} is not on the composite grid",
                    r.label()
                )));
            }
            r.band(band).map(|b| &b.data)
        })
        .collect::<Result<Vec<&Array2<Pixel>>>>()?;

    let mask = region.mask(grid);
    let inside = mask.iter().filter(|m| **m).count();
    if inside == 0 {
        warn!("Spatial mismatch: region covers no pixel of the composite grid");
    }
    debug!(
        "Mean composite of {} rasters, {} pixels inside region",
        layers.len(),
        inside
    );

    let (nrows, ncols) = grid.shape();
    let rows: Vec<Vec<Pixel>> = (0..nrows)
        .into_par_iter()
        .map(|row| {
            (0..ncols)
                .map(|col| {
                    if !mask[[row, col]] {
                        return None;
                    }
                    Reducer::Mean.reduce(layers.iter().map(|layer| layer[[row, col]]))
                })
                .collect()
        })
        .collect();

    let flat: Vec<Pixel> = rows.into_iter().flatten().collect();
    let data = Array2::from_shape_vec((nrows, ncols), flat)?;
    Raster::new(grid.clone(), vec![Band::new(band, data)])
}

/// Spatial reduction of one band over the region.
fn reduce_region(raster: &Raster, band: &str, region: &Region, reducer: Reducer) -> Result<Pixel> {
    let data = &raster.band(band)?.data;
    let mask = region.mask(raster.grid());
    Ok(reducer.reduce(
        data.iter()
            .zip(mask.iter())
            .filter(|(_, inside)| **inside)
            .map(|(p, _)| *p),
    ))
}

/// One regional statistic per raster, in input order, paired with the
/// raster's timestamp. `scale` is a ground resolution in metres; rasters at
/// another resolution are resampled onto a grid at that scale first.
pub fn series_by_region(
    series: &RasterSeries,
    region: &Region,
    band: &str,
    reducer: Reducer,
    scale: f64,
) -> Result<Vec<SeriesPoint>> {
    info!(
        "Reducing {} rasters over region ({:?} of '{}' at {} m)",
        series.len(),
        reducer,
        band,
        scale
    );

    let mut resampler: Option<Resampler> = None;
    let mut points = Vec::with_capacity(series.len());

    for raster in series {
        let time_start = raster
            .time_start()
            .ok_or_else(|| BiomassError::MissingMetadata(raster.label()))?;

        // Reduce in place when the raster is already at the requested scale
        let crs = &raster.grid().crs;
        let resolution = resolution_in_crs_units(crs, scale)?;
        let value = if raster.grid().has_resolution(resolution) {
            reduce_region(raster, band, region, reducer)?
        } else {
            // Otherwise resample, rebuilding the lookup only when the grid changes
            let reusable = resampler
                .as_ref()
                .is_some_and(|r| raster.grid().is_aligned_with(r.source()));
            if !reusable {
                let target = GridSpec::covering(region.bounds()?, crs.clone(), resolution)?;
                resampler = Some(Resampler::new(raster.grid(), &target)?);
            }
            match &resampler {
                Some(r) => reduce_region(&r.resample(raster)?, band, region, reducer)?,
                None => None,
            }
        };

        points.push(SeriesPoint { time_start, value });
    }

    if !points.is_empty() && points.iter().all(|p| p.value.is_none()) {
        warn!("Spatial mismatch: region yielded no valid pixel in any raster");
    }
    Ok(points)
}
