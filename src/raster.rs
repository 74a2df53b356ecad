//! Value-typed rasters and raster series.
//!
//! Pixels are `Option<f64>`: `None` is an explicit no-data cell. Nothing in
//! the compute stages uses NaN or sentinel values; those only appear at the
//! GDAL boundary in `io`.

use crate::error::{BiomassError, Result};
use crate::temporal::TimeWindow;
use chrono::{DateTime, Utc};
use geo::{coord, Rect};
use ndarray::Array2;
use std::collections::{BTreeMap, HashSet};

/// A single raster cell; `None` is no-data.
pub type Pixel = Option<f64>;

// snapping tolerance, in pixels, when fitting a grid onto bounds
const SNAP_EPSILON: f64 = 1e-9;

/// Spatial reference of a raster: CRS, GDAL-style geotransform and size.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    pub crs: String,
    pub geotransform: [f64; 6],
    pub width: usize,
    pub height: usize,
}

impl GridSpec {
    pub fn new(
        crs: impl Into<String>,
        geotransform: [f64; 6],
        width: usize,
        height: usize,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(BiomassError::InvalidDimensions {
                expected: (1, 1),
                found: (height, width),
            });
        }
        if geotransform[2] != 0.0 || geotransform[4] != 0.0 {
            return Err(BiomassError::GridMismatch(
                "rotated geotransforms are not supported".to_string(),
            ));
        }
        if !(geotransform[1].is_finite() && geotransform[1] > 0.0)
            || !(geotransform[5].is_finite() && geotransform[5] != 0.0)
        {
            return Err(BiomassError::GridMismatch(format!(
                "invalid pixel size {} x {}",
                geotransform[1], geotransform[5]
            )));
        }
        Ok(Self {
            crs: crs.into(),
            geotransform,
            width,
            height,
        })
    }

    /// North-up grid with square pixels anchored at its top-left corner.
    pub fn north_up(
        crs: impl Into<String>,
        origin_x: f64,
        origin_y: f64,
        pixel_size: f64,
        width: usize,
        height: usize,
    ) -> Result<Self> {
        Self::new(
            crs,
            [origin_x, pixel_size, 0.0, origin_y, 0.0, -pixel_size],
            width,
            height,
        )
    }

    /// Smallest north-up grid at `resolution` that covers `bounds`, with its
    /// edges snapped to multiples of the resolution.
    pub fn covering(bounds: Rect<f64>, crs: impl Into<String>, resolution: f64) -> Result<Self> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(BiomassError::Configuration(format!(
                "resolution must be positive, got {}",
                resolution
            )));
        }
        let min = bounds.min();
        let max = bounds.max();

        let x0 = (min.x / resolution + SNAP_EPSILON).floor() * resolution;
        let y0 = (max.y / resolution - SNAP_EPSILON).ceil() * resolution;
        let width = ((max.x - x0) / resolution - SNAP_EPSILON).ceil().max(1.0) as usize;
        let height = ((y0 - min.y) / resolution - SNAP_EPSILON).ceil().max(1.0) as usize;

        Self::north_up(crs, x0, y0, resolution, width, height)
    }

    pub fn pixel_width(&self) -> f64 {
        self.geotransform[1].abs()
    }

    pub fn pixel_height(&self) -> f64 {
        self.geotransform[5].abs()
    }

    /// Array shape `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Coordinates of the centre of a pixel, in the grid CRS.
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let gt = &self.geotransform;
        (
            gt[0] + (col as f64 + 0.5) * gt[1],
            gt[3] + (row as f64 + 0.5) * gt[5],
        )
    }

    /// Pixel `(row, col)` containing a point, if it lies on the grid.
    pub fn pixel_index(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let gt = &self.geotransform;
        let col = ((x - gt[0]) / gt[1]).floor();
        let row = ((y - gt[3]) / gt[5]).floor();
        if !(col.is_finite() && row.is_finite()) {
            return None;
        }
        if col < 0.0 || row < 0.0 || col >= self.width as f64 || row >= self.height as f64 {
            return None;
        }
        Some((row as usize, col as usize))
    }

    /// Bounding rectangle of the grid, in the grid CRS.
    pub fn footprint(&self) -> Rect<f64> {
        let gt = &self.geotransform;
        let x1 = gt[0] + self.width as f64 * gt[1];
        let y1 = gt[3] + self.height as f64 * gt[5];
        Rect::new(coord! { x: gt[0], y: gt[3] }, coord! { x: x1, y: y1 })
    }

    /// True when both pixel dimensions equal `resolution` (relative tolerance).
    pub fn has_resolution(&self, resolution: f64) -> bool {
        let close = |a: f64| ((a - resolution) / resolution).abs() < 1e-9;
        close(self.pixel_width()) && close(self.pixel_height())
    }

    /// Same CRS, size and (numerically) the same geotransform.
    pub fn is_aligned_with(&self, other: &GridSpec) -> bool {
        self.crs == other.crs
            && self.width == other.width
            && self.height == other.height
            && self
                .geotransform
                .iter()
                .zip(other.geotransform.iter())
                .all(|(a, b)| (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0))
    }
}

/// A named band of pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub name: String,
    pub data: Array2<Pixel>,
}

impl Band {
    pub fn new(name: impl Into<String>, data: Array2<Pixel>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Band where every pixel holds a valid value.
    pub fn from_values(name: impl Into<String>, values: &Array2<f64>) -> Self {
        Self::new(name, values.mapv(Some))
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|p| p.is_some()).count()
    }
}

/// An immutable raster: grid, named bands, timestamp and properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    grid: GridSpec,
    bands: Vec<Band>,
    time_start: Option<DateTime<Utc>>,
    properties: BTreeMap<String, String>,
}

impl Raster {
    pub fn new(grid: GridSpec, bands: Vec<Band>) -> Result<Self> {
        if bands.is_empty() {
            return Err(BiomassError::SchemaMismatch {
                expected: vec!["<at least one band>".to_string()],
                found: Vec::new(),
            });
        }
        let mut seen = HashSet::new();
        for band in &bands {
            if band.data.dim() != grid.shape() {
                return Err(BiomassError::InvalidDimensions {
                    expected: grid.shape(),
                    found: band.data.dim(),
                });
            }
            if !seen.insert(band.name.as_str()) {
                return Err(BiomassError::SchemaMismatch {
                    expected: vec!["unique band names".to_string()],
                    found: bands.iter().map(|b| b.name.clone()).collect(),
                });
            }
        }
        Ok(Self {
            grid,
            bands,
            time_start: None,
            properties: BTreeMap::new(),
        })
    }

    /// Single-band raster with every pixel set to `value`.
    pub fn filled(grid: GridSpec, band: impl Into<String>, value: Pixel) -> Self {
        let data = Array2::from_elem(grid.shape(), value);
        Self {
            grid,
            bands: vec![Band::new(band, data)],
            time_start: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_time_start(mut self, time_start: DateTime<Utc>) -> Self {
        self.time_start = Some(time_start);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Copies timestamp and properties from `other`.
    pub fn with_metadata_of(mut self, other: &Raster) -> Self {
        self.time_start = other.time_start;
        self.properties = other.properties.clone();
        self
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn band_names(&self) -> Vec<String> {
        self.bands.iter().map(|b| b.name.clone()).collect()
    }

    pub fn band(&self, name: &str) -> Result<&Band> {
        self.bands
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| BiomassError::BandNotFound(name.to_string()))
    }

    pub fn time_start(&self) -> Option<DateTime<Utc>> {
        self.time_start
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Short human-readable identifier for logs and errors.
    pub fn label(&self) -> String {
        if let Some(id) = self.properties.get("id") {
            return id.clone();
        }
        match self.time_start {
            Some(t) => t.format("%Y-%m-%d").to_string(),
            None => "<untimed>".to_string(),
        }
    }

    /// New single-band raster: `band` transformed pixel-wise and renamed to
    /// `output`, keeping grid, timestamp and properties.
    pub fn map_band<F>(&self, band: &str, output: &str, f: F) -> Result<Raster>
    where
        F: Fn(Pixel) -> Pixel,
    {
        let source = self.band(band)?;
        Ok(Raster {
            grid: self.grid.clone(),
            bands: vec![Band::new(output, source.data.mapv(f))],
            time_start: self.time_start,
            properties: self.properties.clone(),
        })
    }
}

/// Ordered rasters sharing one band schema.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterSeries {
    band_names: Vec<String>,
    rasters: Vec<Raster>,
}

impl RasterSeries {
    pub fn new(band_names: Vec<String>, rasters: Vec<Raster>) -> Result<Self> {
        for raster in &rasters {
            let found = raster.band_names();
            if found != band_names {
                return Err(BiomassError::SchemaMismatch {
                    expected: band_names,
                    found,
                });
            }
        }
        Ok(Self {
            band_names,
            rasters,
        })
    }

    pub fn empty(band_names: Vec<String>) -> Self {
        Self {
            band_names,
            rasters: Vec::new(),
        }
    }

    /// Series whose schema is taken from its first member.
    pub fn from_rasters(rasters: Vec<Raster>) -> Result<Self> {
        let band_names = rasters
            .first()
            .map(Raster::band_names)
            .ok_or_else(|| {
                BiomassError::Configuration(
                    "cannot infer band schema of an empty series".to_string(),
                )
            })?;
        Self::new(band_names, rasters)
    }

    pub fn band_names(&self) -> &[String] {
        &self.band_names
    }

    pub fn rasters(&self) -> &[Raster] {
        &self.rasters
    }

    pub fn into_rasters(self) -> Vec<Raster> {
        self.rasters
    }

    pub fn len(&self) -> usize {
        self.rasters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rasters.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Raster> {
        self.rasters.iter()
    }

    /// Borrowed members whose timestamp falls inside `window`, in order.
    /// Untimed members are never included.
    pub fn in_window<'a>(
        &'a self,
        window: &'a TimeWindow,
    ) -> impl Iterator<Item = &'a Raster> + 'a {
        self.rasters
            .iter()
            .filter(move |r| r.time_start().is_some_and(|t| window.contains(t)))
    }

    /// Owned copy of the members inside `window`.
    pub fn filter_window(&self, window: &TimeWindow) -> RasterSeries {
        RasterSeries {
            band_names: self.band_names.clone(),
            rasters: self.in_window(window).cloned().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a RasterSeries {
    type Item = &'a Raster;
    type IntoIter = std::slice::Iter<'a, Raster>;

    fn into_iter(self) -> Self::IntoIter {
        self.rasters.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ndarray::arr2;

    fn grid() -> GridSpec {
        GridSpec::north_up("EPSG:3857", 0.0, 300.0, 100.0, 3, 3).unwrap()
    }

    #[test]
    fn test_pixel_center_and_index() {
        let grid = grid();
        assert_eq!(grid.pixel_center(0, 0), (50.0, 250.0));
        assert_eq!(grid.pixel_center(2, 1), (150.0, 50.0));
        assert_eq!(grid.pixel_index(150.0, 50.0), Some((2, 1)));
        assert_eq!(grid.pixel_index(-1.0, 50.0), None);
        assert_eq!(grid.pixel_index(150.0, 300.5), None);
    }

    #[test]
    fn test_footprint() {
        let rect = grid().footprint();
        assert_eq!(rect.min().x, 0.0);
        assert_eq!(rect.min().y, 0.0);
        assert_eq!(rect.max().x, 300.0);
        assert_eq!(rect.max().y, 300.0);
    }

    #[test]
    fn test_covering_snaps_to_resolution() {
        let bounds = Rect::new(coord! { x: 230.0, y: 120.0 }, coord! { x: 780.0, y: 810.0 });
        let grid = GridSpec::covering(bounds, "EPSG:3857", 100.0).unwrap();
        assert_eq!(grid.geotransform[0], 200.0);
        assert_eq!(grid.geotransform[3], 900.0);
        assert_eq!(grid.width, 6);
        assert_eq!(grid.height, 8);
    }

    #[test]
    fn test_covering_exact_bounds() {
        let bounds = Rect::new(coord! { x: 0.2, y: 0.2 }, coord! { x: 0.8, y: 0.8 });
        let grid = GridSpec::covering(bounds, "EPSG:4326", 0.1).unwrap();
        assert_eq!(grid.width, 6);
        assert_eq!(grid.height, 6);
    }

    #[test]
    fn test_raster_rejects_bad_shape() {
        let band = Band::from_values("b", &arr2(&[[1.0, 2.0], [3.0, 4.0]]));
        assert!(matches!(
            Raster::new(grid(), vec![band]),
            Err(BiomassError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_raster_rejects_duplicate_bands() {
        let a = Band::new("b", Array2::from_elem((3, 3), Some(1.0)));
        assert!(Raster::new(grid(), vec![a.clone(), a]).is_err());
    }

    #[test]
    fn test_map_band_keeps_metadata() {
        let t = Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap();
        let raster = Raster::filled(grid(), "NPP8", Some(2.0))
            .with_time_start(t)
            .with_property("id", "a");
        let mapped = raster
            .map_band("NPP8", "Biomass", |p| p.map(|v| v * 3.0))
            .unwrap();
        assert_eq!(mapped.band_names(), vec!["Biomass".to_string()]);
        assert_eq!(mapped.time_start(), Some(t));
        assert_eq!(mapped.label(), "a");
        assert!(mapped.band("Biomass").unwrap().data.iter().all(|p| *p == Some(6.0)));
    }

    #[test]
    fn test_series_schema_enforced() {
        let a = Raster::filled(grid(), "Gpp", Some(1.0));
        let b = Raster::filled(grid(), "Npp", Some(1.0));
        assert!(matches!(
            RasterSeries::from_rasters(vec![a, b]),
            Err(BiomassError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_filter_window_inclusive() {
        let at = |m, d| Utc.with_ymd_and_hms(2023, m, d, 12, 0, 0).unwrap();
        let rasters = vec![
            Raster::filled(grid(), "Gpp", Some(1.0)).with_time_start(at(1, 1)),
            Raster::filled(grid(), "Gpp", Some(1.0)).with_time_start(at(12, 31)),
            Raster::filled(grid(), "Gpp", Some(1.0)),
        ];
        let series = RasterSeries::from_rasters(rasters).unwrap();
        let window = TimeWindow::new(
            chrono::NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
        )
        .unwrap();
        assert_eq!(series.filter_window(&window).len(), 2);
    }
}
