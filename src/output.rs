use crate::error::{BiomassError, Result};
use crate::region::SeriesPoint;
use log::info;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Validate compression type
pub fn validate_compression(compression: &str) -> Result<()> {
    let valid_types = ["DEFLATE", "LZW", "ZSTD", "NONE"];
    if !valid_types.contains(&compression) {
        return Err(BiomassError::InvalidCompression(compression.to_string()));
    }
    Ok(())
}

/// GTiff creation options for a tiled, compressed composite.
pub fn creation_options(compression: &str) -> Vec<String> {
    vec![
        format!("COMPRESS={}", compression),
        "TILED=YES".to_string(),
        "BIGTIFF=IF_SAFER".to_string(),
    ]
}

/// File name of the exported composite, e.g. `mean_biomass_2023-2024_500m.tif`.
pub fn export_file_name(start_year: i32, end_year: i32, scale: f64) -> String {
    layer_file_name("biomass", start_year, end_year, scale)
}

/// File name of an exported mean layer, e.g. `mean_npp8_2023-2024_500m.tif`.
pub fn layer_file_name(layer: &str, start_year: i32, end_year: i32, scale: f64) -> String {
    format!("mean_{}_{}-{}_{}m.tif", layer, start_year, end_year, scale)
}

#[derive(Serialize)]
struct SeriesRecord<'a> {
    time_start: &'a str,
    biomass: Option<f64>,
}

/// Write a regional time series as CSV; no-data values are left empty.
pub fn write_series<W: Write>(writer: W, points: &[SeriesPoint]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for point in points {
        let time_start = point.time_start.format("%Y-%m-%d").to_string();
        csv_writer.serialize(SeriesRecord {
            time_start: &time_start,
            biomass: point.value,
        })?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_series_csv(path: &Path, points: &[SeriesPoint]) -> Result<()> {
    info!("Writing {} time steps to {}", points.len(), path.display());
    let file = std::fs::File::create(path)?;
    write_series(std::io::BufWriter::new(file), points)
}
