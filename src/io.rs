use crate::crs::{identify_crs, proj_string, MODIS_SINUSOIDAL};
use crate::error::{BiomassError, Result};
use crate::output::creation_options;
use crate::raster::{Band, GridSpec, Pixel, Raster, RasterSeries};
use crate::region::{AttributeValue, Feature};
use crate::source::RasterSource;
use crate::temporal::TimeWindow;
use chrono::{DateTime, NaiveDate, Utc};
use gdal::cpl::CslStringList;
use gdal::raster::RasterBand;
use gdal::spatial_ref::SpatialRef;
use gdal::vector::{FieldValue, LayerAccess};
use gdal::{Dataset, DriverManager, Metadata};
use geo::{Geometry, MultiPolygon};
use log::{debug, info, warn};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Read band 1 of a GeoTIFF as a single-band raster named `band_name`.
/// The band nodata value and NaN become no-data pixels.
pub fn read_raster(path: &Path, band_name: &str) -> Result<Raster> {
    debug!("Opening raster: {}", path.display());
    let dataset = Dataset::open(path)?;

    let rasterband: RasterBand = dataset.rasterband(1)?;
    let width = rasterband.x_size();
    let height = rasterband.y_size();
    let nodata = rasterband.no_data_value();

    let geotransform = dataset.geo_transform()?;
    // authority code when present, otherwise detect the MODIS sinusoidal grid
    let sr = dataset.spatial_ref()?;
    let authority = sr.auth_name().ok().zip(sr.auth_code().ok().map(|c| c.to_string()));
    let proj4 = sr.to_proj4().ok();
    let crs = identify_crs(
        authority.as_ref().map(|(n, c)| (n.as_str(), c.as_str())),
        proj4.as_deref(),
    )
    .map_err(|e| BiomassError::CrsError(format!("{}: {}", path.display(), e)))?;

    let grid = GridSpec::new(crs, geotransform, width, height)?;
    if (grid.pixel_width() - grid.pixel_height()).abs() > 1e-9 * grid.pixel_width() {
        warn!(
            "Non-square pixels in {} ({:.6} x {:.6})",
            path.display(),
            grid.pixel_width(),
            grid.pixel_height()
        );
    }

    let buffer = rasterband.read_as::<f64>((0, 0), (width, height), (width, height), None)?;
    let data_vec: Vec<Pixel> = buffer
        .into_iter()
        .map(|v| {
            let is_nodata = v.is_nan() || nodata.is_some_and(|nd| v == nd);
            (!is_nodata).then_some(v)
        })
        .collect();
    let data = Array2::from_shape_vec((height, width), data_vec)?;

    Raster::new(grid, vec![Band::new(band_name, data)])
}

/// Date encoded in a file stem: `YYYY-MM-DD`, `YYYYMMDD` or a MODIS
/// `AYYYYDDD` token (e.g. `MOD17A2HGF.A2023009.h25v06`).
pub fn parse_file_date(stem: &str) -> Option<NaiveDate> {
    for token in stem.split(|c: char| c == '.' || c == '_') {
        if let Ok(date) = NaiveDate::parse_from_str(token, "%Y-%m-%d") {
            return Some(date);
        }
        if token.len() == 8 && token.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(date) = NaiveDate::parse_from_str(token, "%Y%m%d") {
                return Some(date);
            }
        }
        if let Some(rest) = token.strip_prefix('A') {
            if rest.len() == 7 && rest.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(date) = NaiveDate::parse_from_str(rest, "%Y%j") {
                    return Some(date);
                }
            }
        }
    }
    None
}

/// Raster collections stored as one directory of GeoTIFFs per collection,
/// one file per timestamp.
#[derive(Debug, Clone, Default)]
pub struct DirectorySource {
    collections: BTreeMap<String, (PathBuf, String)>,
}

impl DirectorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(
        mut self,
        name: impl Into<String>,
        dir: impl Into<PathBuf>,
        band_name: impl Into<String>,
    ) -> Self {
        self.collections
            .insert(name.into(), (dir.into(), band_name.into()));
        self
    }
}

impl RasterSource for DirectorySource {
    fn fetch(&self, collection: &str, window: &TimeWindow) -> Result<RasterSeries> {
        let (dir, band_name) = self.collections.get(collection).ok_or_else(|| {
            BiomassError::Configuration(format!("unknown raster collection '{}'", collection))
        })?;
        info!("Scanning {} for '{}'", dir.display(), collection);

        let mut dated: Vec<(NaiveDate, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_tiff = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"));
            if !is_tiff {
                continue;
            }
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            match parse_file_date(stem) {
                Some(date) => dated.push((date, path)),
                None => {
                    return Err(BiomassError::MissingMetadata(path.display().to_string()));
                }
            }
        }
        dated.sort();

        let mut rasters = Vec::new();
        for (date, path) in dated {
            let Some(midnight) = date.and_hms_opt(0, 0, 0) else {
                continue;
            };
            let time_start = DateTime::<Utc>::from_naive_utc_and_offset(midnight, Utc);
            if !window.contains(time_start) {
                continue;
            }
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            rasters.push(
                read_raster(&path, band_name)?
                    .with_time_start(time_start)
                    .with_property("id", id),
            );
        }

        info!("Loaded {} rasters for '{}'", rasters.len(), collection);
        RasterSeries::new(vec![band_name.clone()], rasters)
    }
}

fn to_multipolygon(geometry: Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p])),
        Geometry::MultiPolygon(mp) => Some(mp),
        _ => None,
    }
}

/// Polygon features of the first layer of an OGR vector dataset.
pub fn read_features(path: &Path) -> Result<Vec<Feature>> {
    info!("Reading region features: {}", path.display());
    let dataset = Dataset::open(path)?;
    let mut layer = dataset.layer(0)?;

    let field_names: Vec<String> = layer.defn().fields().map(|f| f.name()).collect();

    let mut features = Vec::new();
    for feature in layer.features() {
        let Some(geometry) = feature.geometry() else {
            continue;
        };
        let Some(geometry) = to_multipolygon(geometry.to_geo()?) else {
            debug!("Skipping non-polygonal feature");
            continue;
        };

        let mut attributes = BTreeMap::new();
        for (index, name) in field_names.iter().enumerate() {
            let value = match feature.field(index)? {
                Some(FieldValue::IntegerValue(v)) => AttributeValue::Integer(i64::from(v)),
                Some(FieldValue::Integer64Value(v)) => AttributeValue::Integer(v),
                Some(FieldValue::RealValue(v)) => AttributeValue::Real(v),
                Some(FieldValue::StringValue(v)) => AttributeValue::Text(v),
                _ => continue,
            };
            attributes.insert(name.clone(), value);
        }
        features.push(Feature {
            geometry,
            attributes,
        });
    }

    info!("Read {} polygon features", features.len());
    Ok(features)
}

/// Write every band of a raster to a float32 GeoTIFF. No-data pixels are
/// written as NaN, which is also set as the band nodata value.
pub fn write_raster(path: &Path, raster: &Raster, compression: &str) -> Result<()> {
    info!("Creating output raster: {}", path.display());
    let grid = raster.grid();

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut gdal_options = CslStringList::new();
    for opt in creation_options(compression) {
        gdal_options.add_string(&opt)?;
    }
    let mut dataset = driver.create_with_band_type_with_options::<f32, _>(
        path,
        grid.width,
        grid.height,
        raster.bands().len(),
        &gdal_options,
    )?;

    dataset.set_geo_transform(&grid.geotransform)?;
    let srs = if grid.crs.eq_ignore_ascii_case(MODIS_SINUSOIDAL) {
        proj_string(&grid.crs).and_then(|def| Ok(SpatialRef::from_proj4(&def)?))
    } else {
        SpatialRef::from_definition(&grid.crs).map_err(BiomassError::from)
    };
    match srs {
        Ok(srs) => dataset.set_spatial_ref(&srs)?,
        Err(e) => warn!("Could not resolve CRS {} for output: {}", grid.crs, e),
    }

    for (i, band) in raster.bands().iter().enumerate() {
        let band_index = i + 1;
        debug!("Writing band {} ({})", band_index, band.name);

        let values: Vec<f32> = band
            .data
            .iter()
            .map(|p| p.map_or(f32::NAN, |v| v as f32))
            .collect();
        let mut buffer = gdal::raster::Buffer::new((grid.width, grid.height), values);

        let mut raster_band = dataset.rasterband(band_index)?;
        raster_band.write((0, 0), (grid.width, grid.height), &mut buffer)?;
        raster_band.set_description(&band.name)?;
        raster_band.set_no_data_value(Some(f64::NAN))?;
    }

    info!("Successfully wrote {} bands to output", raster.bands().len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_date() {
        assert_eq!(parse_file_date("2023-01-09"), NaiveDate::from_ymd_opt(2023, 1, 9));
        assert_eq!(parse_file_date("gpp_20230109"), NaiveDate::from_ymd_opt(2023, 1, 9));
        assert_eq!(
            parse_file_date("MOD17A2HGF.A2023009.h25v06.061"),
            NaiveDate::from_ymd_opt(2023, 1, 9)
        );
        assert_eq!(parse_file_date("no_date_here"), None);
    }
}
