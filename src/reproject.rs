use crate::crs::CoordTransform;
use crate::error::Result;
use crate::raster::{Band, GridSpec, Pixel, Raster, RasterSeries};
use log::{debug, info};
use ndarray::Array2;
use rayon::prelude::*;

/// Nearest-neighbour lookup from a target grid into a source grid.
///
/// Target pixel centres are transformed into the source CRS once; every
/// raster on the same source grid then resamples through the cached table.
#[derive(Debug, Clone)]
pub struct Resampler {
    source: GridSpec,
    target: GridSpec,
    lookup: Vec<Option<(usize, usize)>>,
}

impl Resampler {
    pub fn new(source: &GridSpec, target: &GridSpec) -> Result<Self> {
        let transform = CoordTransform::between(&target.crs, &source.crs)?;

        let mut lookup = Vec::with_capacity(target.width * target.height);
        for row in 0..target.height {
            for col in 0..target.width {
                let (x, y) = target.pixel_center(row, col);
                // points that fail to transform fall outside the source
                let index = transform
                    .apply(x, y)
                    .ok()
                    .and_then(|(sx, sy)| source.pixel_index(sx, sy));
                lookup.push(index);
            }
        }

        let hits = lookup.iter().filter(|i| i.is_some()).count();
        debug!(
            "Resampler {}x{} -> {}x{}: {} of {} target pixels on source",
            source.width,
            source.height,
            target.width,
            target.height,
            hits,
            lookup.len()
        );

        Ok(Self {
            source: source.clone(),
            target: target.clone(),
            lookup,
        })
    }

    pub fn source(&self) -> &GridSpec {
        &self.source
    }

    pub fn target(&self) -> &GridSpec {
        &self.target
    }

    /// Resample every band of `raster`, which must lie on the source grid.
    pub fn resample(&self, raster: &Raster) -> Result<Raster> {
        if !raster.grid().is_aligned_with(&self.source) {
            return Err(crate::error::BiomassError::GridMismatch(format!(
                "raster {} is not on the resampler's source grid",
                raster.label()
            )));
        }

        let bands = raster
            .bands()
            .iter()
            .map(|band| self.resample_band(band))
            .collect::<Result<Vec<_>>>()?;

        Ok(Raster::new(self.target.clone(), bands)?.with_metadata_of(raster))
    }

    fn resample_band(&self, band: &Band) -> Result<Band> {
        let width = self.target.width;

        let rows: Vec<Vec<Pixel>> = (0..self.target.height)
            .into_par_iter()
            .map(|row| {
                self.lookup[row * width..(row + 1) * width]
                    .iter()
                    .map(|index| index.and_then(|(r, c)| band.data[[r, c]]))
                    .collect()
            })
            .collect();

        let flat: Vec<Pixel> = rows.into_iter().flatten().collect();
        let data = Array2::from_shape_vec(self.target.shape(), flat)?;
        Ok(Band::new(band.name.clone(), data))
    }
}

/// Reproject a single raster onto `target`.
pub fn reproject(raster: &Raster, target: &GridSpec) -> Result<Raster> {
    if raster.grid().is_aligned_with(target) {
        return Ok(raster.clone());
    }
    Resampler::new(raster.grid(), target)?.resample(raster)
}

/// Reproject every raster of a series onto `target`, reusing the lookup
/// table while consecutive rasters share a source grid.
pub fn reproject_series(series: &RasterSeries, target: &GridSpec) -> Result<RasterSeries> {
    info!(
        "Reprojecting {} rasters to {} at {:.8} ({}x{})",
        series.len(),
        target.crs,
        target.pixel_width(),
        target.width,
        target.height
    );

    let mut resampler: Option<Resampler> = None;
    let mut out = Vec::with_capacity(series.len());

    for raster in series {
        if raster.grid().is_aligned_with(target) {
            out.push(raster.clone());
            continue;
        }
        let reusable = resampler
            .as_ref()
            .is_some_and(|r| raster.grid().is_aligned_with(r.source()));
        if !reusable {
            resampler = Some(Resampler::new(raster.grid(), target)?);
        }
        if let Some(r) = &resampler {
            out.push(r.resample(raster)?);
        }
    }

    RasterSeries::new(series.band_names().to_vec(), out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn source() -> Raster {
        let grid = GridSpec::north_up("EPSG:3857", 0.0, 200.0, 100.0, 2, 2).unwrap();
        let band = Band::from_values("Gpp", &arr2(&[[1.0, 2.0], [3.0, 4.0]]));
        Raster::new(grid, vec![band]).unwrap()
    }

    #[test]
    fn test_upsample_nearest() {
        let target = GridSpec::north_up("EPSG:3857", 0.0, 200.0, 50.0, 4, 4).unwrap();
        let out = reproject(&source(), &target).unwrap();
        let data = &out.band("Gpp").unwrap().data;
        assert_eq!(data[[0, 0]], Some(1.0));
        assert_eq!(data[[0, 3]], Some(2.0));
        assert_eq!(data[[3, 0]], Some(3.0));
        assert_eq!(data[[2, 2]], Some(4.0));
    }

    #[test]
    fn test_outside_source_is_nodata() {
        let target = GridSpec::north_up("EPSG:3857", 100.0, 200.0, 100.0, 3, 1).unwrap();
        let out = reproject(&source(), &target).unwrap();
        let data = &out.band("Gpp").unwrap().data;
        assert_eq!(data[[0, 0]], Some(2.0));
        assert_eq!(data[[0, 1]], None);
        assert_eq!(data[[0, 2]], None);
    }

    #[test]
    fn test_modis_sinusoidal_onto_lonlat() {
        let grid = GridSpec::north_up(crate::crs::MODIS_SINUSOIDAL, 0.0, 5000.0, 500.0, 12, 12)
            .unwrap();
        let values = Array2::from_shape_fn((12, 12), |(r, c)| (r * 100 + c) as f64);
        let raster = Raster::new(grid, vec![Band::from_values("Gpp", &values)]).unwrap();

        let target = GridSpec::north_up("EPSG:4326", 0.0, 0.04, 0.01, 4, 4).unwrap();
        let out = reproject(&raster, &target).unwrap();
        let data = &out.band("Gpp").unwrap().data;
        assert!(data.iter().all(|p| p.is_some()));
        // (0.005E, 0.035N) -> x ~ 556 m, y ~ 3892 m
        assert_eq!(data[[0, 0]], Some(201.0));
        // (0.035E, 0.005N) -> x ~ 3892 m, y ~ 556 m
        assert_eq!(data[[3, 3]], Some(807.0));
    }

    #[test]
    fn test_aligned_is_unchanged() {
        let raster = source();
        let out = reproject(&raster, raster.grid()).unwrap();
        assert_eq!(out, raster);
    }

    #[test]
    fn test_series_keeps_order_and_metadata() {
        let a = source().with_property("id", "a");
        let b = source().with_property("id", "b");
        let series = RasterSeries::from_rasters(vec![a, b]).unwrap();
        let target = GridSpec::north_up("EPSG:3857", 0.0, 200.0, 50.0, 4, 4).unwrap();
        let out = reproject_series(&series, &target).unwrap();
        let labels: Vec<String> = out.iter().map(Raster::label).collect();
        assert_eq!(labels, vec!["a", "b"]);
        assert!(out.iter().all(|r| r.grid() == &target));
    }
}
